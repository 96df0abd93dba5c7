//! On-disk layout and in-memory block engine for a RAID-backed POSIX-style
//! filesystem: superblock, bitmap allocators, inode table, data block layer,
//! path resolver, and the operation surface a filesystem-driver front end
//! (see the `wfsd` crate) drives.
//!
//! Journaling, crash consistency, concurrent multi-client access, hard
//! links, extended attributes, symlinks, device files, quotas, online
//! resizing, and mirror repair are out of scope; see `ops` for the
//! supported operation set.

pub mod bitmap;
pub mod datablock;
pub mod dirent;
pub mod disk;
pub mod error;
pub mod format;
pub mod inode;
pub mod ops;
pub mod raid;
pub mod resolver;
pub mod superblock;

pub use disk::{Disk, DiskArray};
pub use error::WfsError;
pub use raid::RaidMode;
pub use superblock::SuperBlock;

/// Block size in bytes. All on-disk structures are aligned to block
/// boundaries where noted in the module docs.
pub const BLOCK_SIZE: usize = 512;

/// Number of block pointers in an inode's `blocks[]` array. The first
/// `N_BLOCKS - 1` are direct block indices; the last is an indirect block
/// index.
pub const N_BLOCKS: usize = 8;

/// Number of direct block slots (`N_BLOCKS - 1`).
pub const N_DIRECT: usize = N_BLOCKS - 1;

/// Number of block indices held by a single indirect block.
pub const INDIRECT_ENTRIES: usize = BLOCK_SIZE / 4;

/// Largest file size (in blocks) addressable via direct + one indirect
/// block level.
pub const MAX_FILE_BLOCKS: usize = N_DIRECT + INDIRECT_ENTRIES;

/// Inode number of the root directory. Always allocated.
pub const ROOT_INODE: u32 = 0;

/// A disk-resident pointer: either `-1` ("unallocated"/"free slot") or a
/// non-negative index into an inode table, data block region, or indirect
/// block. Mirrors the on-disk signed-32 encoding while keeping the null
/// state explicit in the type rather than as a magic raw value once decoded.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockPtr(i32);

impl BlockPtr {
    pub const NULL: BlockPtr = BlockPtr(-1);

    pub fn new(index: u32) -> Self {
        BlockPtr(index as i32)
    }

    pub fn from_raw(raw: i32) -> Self {
        BlockPtr(raw)
    }

    pub fn get(self) -> Option<u32> {
        if self.0 < 0 {
            None
        } else {
            Some(self.0 as u32)
        }
    }

    pub fn is_null(self) -> bool {
        self.0 < 0
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

impl From<u32> for BlockPtr {
    fn from(index: u32) -> Self {
        BlockPtr::new(index)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::disk::{Disk, DiskArray};
    use crate::format;
    use crate::raid::RaidMode;
    use crate::superblock::SuperBlock;
    use crate::Filesystem;

    /// Builds an in-memory-backed filesystem with `num_disks` disks, each
    /// sized generously for `num_inodes`/`num_data_blocks`, formatted and
    /// ready for operations. Used by every module's unit tests so none of
    /// them touch real files or mmap.
    pub(crate) fn make_fs(num_disks: u32, mode: RaidMode, num_inodes: u32, num_data_blocks: u32) -> Filesystem {
        let layout = format::compute_layout(num_inodes, num_data_blocks);
        let disk_size = layout.required_size + crate::BLOCK_SIZE as u64 * 4;

        let mut disks = Vec::new();
        for disk_index in 0..num_disks {
            let mut disk = Disk::from_memory(disk_size as usize);
            format::format_disk(&mut disk, &layout, mode, disk_index, num_disks, 0xABCD_0000 + disk_index)
                .expect("format_disk");
            disks.push(disk);
        }

        let disks = DiskArray::new(disks);
        let sb = SuperBlock::read(&disks, mode).expect("read superblock");
        Filesystem { sb, disks, mode }
    }
}

/// The filesystem's runtime state: the superblock (read once at mount time,
/// immutable thereafter) and the array of backing disks. Threaded explicitly
/// through every operation rather than held as an ambient global, per the
/// single-threaded, sequential-dispatch concurrency model this crate
/// assumes (see `ops`).
pub struct Filesystem {
    pub sb: SuperBlock,
    pub disks: DiskArray,
    pub mode: RaidMode,
}

impl Filesystem {
    /// Mounts a filesystem over an already-assembled, disk-index-ordered
    /// array of backing disks. Reads and validates the superblock from the
    /// primary disk; a magic mismatch or disk-count mismatch is fatal.
    pub fn mount(disks: DiskArray) -> Result<Self, WfsError> {
        let probe = SuperBlock::read_unverified(&disks)?;
        let mode = probe.raid_mode()?;
        let sb = SuperBlock::read(&disks, mode)?;

        if sb.total_disks != disks.len() as u32 {
            return Err(WfsError::Fatal(format!(
                "superblock expects {} disks, {} were opened",
                sb.total_disks,
                disks.len()
            )));
        }

        Ok(Filesystem { sb, disks, mode })
    }
}
