//! The fixed-size directory entry record (spec §3.4): a name and an inode
//! index, packed into power-of-two slots inside a directory's data blocks.

use crate::BlockPtr;

/// Longest name, including the implicit null terminator, that fits in a
/// slot alongside the 4-byte inode index (`32 - 4`).
pub const MAX_NAME: usize = 28;

pub const DIRENT_SIZE: usize = MAX_NAME + 4;

pub const DENTRIES_PER_BLOCK: usize = crate::BLOCK_SIZE / DIRENT_SIZE;

#[derive(Copy, Clone, Debug)]
pub struct DirEntry {
    name: [u8; MAX_NAME],
    pub num: BlockPtr,
}

impl DirEntry {
    pub fn free() -> Self {
        DirEntry {
            name: [0u8; MAX_NAME],
            num: BlockPtr::NULL,
        }
    }

    /// Builds an entry for `name` pointing at inode `num`. Names longer
    /// than `MAX_NAME - 1` bytes (leaving room for the terminator) are
    /// rejected by the caller before this is reached — `ops` validates
    /// length against `ENAMETOOLONG` at the operation boundary.
    pub fn new(name: &str, num: u32) -> Self {
        let mut packed = [0u8; MAX_NAME];
        let bytes = name.as_bytes();
        let n = bytes.len().min(MAX_NAME - 1);
        packed[..n].copy_from_slice(&bytes[..n]);
        DirEntry {
            name: packed,
            num: BlockPtr::new(num),
        }
    }

    pub fn is_free(&self) -> bool {
        self.num.is_null()
    }

    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn name_matches(&self, other: &str) -> bool {
        self.name() == other
    }

    pub fn to_bytes(&self) -> [u8; DIRENT_SIZE] {
        let mut buf = [0u8; DIRENT_SIZE];
        buf[..MAX_NAME].copy_from_slice(&self.name);
        buf[MAX_NAME..].copy_from_slice(&self.num.raw().to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut name = [0u8; MAX_NAME];
        name.copy_from_slice(&buf[..MAX_NAME]);
        let num = i32::from_le_bytes(buf[MAX_NAME..DIRENT_SIZE].try_into().unwrap());
        DirEntry {
            name,
            num: BlockPtr::from_raw(num),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let entry = DirEntry::new("notes.txt", 7);
        let decoded = DirEntry::from_bytes(&entry.to_bytes());
        assert_eq!(decoded.name(), "notes.txt");
        assert_eq!(decoded.num, BlockPtr::new(7));
        assert!(!decoded.is_free());
    }

    #[test]
    fn free_entry_has_null_pointer() {
        let entry = DirEntry::free();
        assert!(entry.is_free());
        assert_eq!(entry.name(), "");
    }

    #[test]
    fn long_names_are_truncated_not_overrun() {
        let long = "a".repeat(64);
        let entry = DirEntry::new(&long, 1);
        assert_eq!(entry.name().len(), MAX_NAME - 1);
    }

    #[test]
    fn dentries_per_block_matches_layout() {
        assert_eq!(DIRENT_SIZE, 32);
        assert_eq!(DENTRIES_PER_BLOCK, 16);
    }
}
