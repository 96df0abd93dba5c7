//! The inode record (spec §3.3) and the allocator/accessor operations that
//! read and write it through the RAID-aware disk array.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::bitmap;
use crate::error::WfsError;
use crate::{BlockPtr, Filesystem, N_BLOCKS};

pub const INODE_SIZE: usize = 84;

#[derive(Copy, Clone, Debug)]
pub struct Inode {
    pub num: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlinks: u32,
    pub atim: i64,
    pub mtim: i64,
    pub ctim: i64,
    pub blocks: [BlockPtr; N_BLOCKS],
}

impl Inode {
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn is_reg(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFREG as u32
    }

    pub fn to_bytes(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        let mut at = 0;

        macro_rules! put {
            ($value:expr) => {{
                let bytes = $value.to_le_bytes();
                buf[at..at + bytes.len()].copy_from_slice(&bytes);
                at += bytes.len();
            }};
        }

        put!(self.num);
        put!(self.mode);
        put!(self.uid);
        put!(self.gid);
        put!(self.size);
        put!(self.nlinks);
        put!(self.atim);
        put!(self.mtim);
        put!(self.ctim);
        for block in &self.blocks {
            put!(block.raw());
        }

        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut at = 0;

        macro_rules! take {
            ($ty:ty) => {{
                const N: usize = std::mem::size_of::<$ty>();
                let value = <$ty>::from_le_bytes(buf[at..at + N].try_into().unwrap());
                at += N;
                value
            }};
        }

        let num = take!(u32);
        let mode = take!(u32);
        let uid = take!(u32);
        let gid = take!(u32);
        let size = take!(u64);
        let nlinks = take!(u32);
        let atim = take!(i64);
        let mtim = take!(i64);
        let ctim = take!(i64);

        let mut blocks = [BlockPtr::NULL; N_BLOCKS];
        for slot in blocks.iter_mut() {
            *slot = BlockPtr::from_raw(take!(i32));
        }

        Inode {
            num,
            mode,
            uid,
            gid,
            size,
            nlinks,
            atim,
            mtim,
            ctim,
            blocks,
        }
    }
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Filesystem {
    fn inode_offset(&self, num: u32) -> u64 {
        self.sb.i_blocks_ptr + num as u64 * crate::BLOCK_SIZE as u64
    }

    pub fn read_inode(&self, num: u32) -> Result<Inode, WfsError> {
        if num as u64 >= self.sb.num_inodes {
            return Err(WfsError::Fatal(format!(
                "inode {num} out of range (0..{})",
                self.sb.num_inodes
            )));
        }

        let offset = self.inode_offset(num);
        let buf = if self.mode.verified() {
            self.disks.read_majority(offset, INODE_SIZE)?
        } else {
            let mut buf = vec![0u8; INODE_SIZE];
            self.disks.read_plain(0, offset, &mut buf)?;
            buf
        };

        Ok(Inode::from_bytes(&buf))
    }

    pub fn write_inode(&mut self, inode: &Inode) -> Result<(), WfsError> {
        let offset = self.inode_offset(inode.num);
        self.disks
            .write_replicated(0, offset, &inode.to_bytes(), self.mode.replicates())
    }

    /// Reserves an inode bitmap slot and writes a freshly composed record:
    /// `nlinks = 2` for directories (itself plus its own `..`), `1` for
    /// regular files, current timestamps, zero size, every block slot null.
    pub fn allocate_and_init_inode(&mut self, mode_bits: u32, is_dir: bool, uid: u32, gid: u32) -> Result<u32, WfsError> {
        let index = bitmap::allocate_first_fit(&mut self.disks, self.mode, self.sb.i_bitmap_ptr, self.sb.num_inodes as u32)?;

        let now = now_secs();
        let inode = Inode {
            num: index,
            mode: mode_bits,
            uid,
            gid,
            size: 0,
            nlinks: if is_dir { 2 } else { 1 },
            atim: now,
            mtim: now,
            ctim: now,
            blocks: [BlockPtr::NULL; N_BLOCKS],
        };

        self.write_inode(&inode)?;
        Ok(index)
    }

    /// Reclaims an inode: frees its data blocks, then clears its bitmap
    /// bit. Callers must not free the inode's blocks themselves first.
    /// Directories store plain dentry blocks in every slot (no indirect
    /// interpretation of the last one); regular files split direct and
    /// indirect as usual.
    pub fn free_inode(&mut self, num: u32) -> Result<(), WfsError> {
        let mut inode = self.read_inode(num)?;
        if inode.is_dir() {
            self.free_all_plain_blocks(&mut inode)?;
        } else {
            self.free_direct_data_blocks(&mut inode)?;
            self.free_indirect_data_block(&mut inode)?;
        }
        bitmap::free_bit(&mut self.disks, self.mode, self.sb.i_bitmap_ptr, num)
    }

    pub fn touch_mtime(&mut self, inode: &mut Inode) -> Result<(), WfsError> {
        inode.mtim = now_secs();
        inode.ctim = inode.mtim;
        self.write_inode(inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut blocks = [BlockPtr::NULL; N_BLOCKS];
        blocks[0] = BlockPtr::new(5);
        blocks[7] = BlockPtr::new(9);

        let inode = Inode {
            num: 3,
            mode: libc::S_IFREG as u32 | 0o644,
            uid: 1000,
            gid: 1000,
            size: 4096,
            nlinks: 1,
            atim: 10,
            mtim: 20,
            ctim: 30,
            blocks,
        };

        let decoded = Inode::from_bytes(&inode.to_bytes());
        assert_eq!(decoded.num, inode.num);
        assert_eq!(decoded.mode, inode.mode);
        assert_eq!(decoded.size, inode.size);
        assert_eq!(decoded.blocks[0], BlockPtr::new(5));
        assert_eq!(decoded.blocks[1], BlockPtr::NULL);
        assert_eq!(decoded.blocks[7], BlockPtr::new(9));
        assert!(decoded.is_reg());
    }

    #[test]
    fn allocate_and_free_round_trips_through_bitmap() {
        let mut fs = crate::test_support::make_fs(1, crate::RaidMode::Stripe, 32, 32);
        let first = fs.allocate_and_init_inode(libc::S_IFREG as u32 | 0o644, false, 0, 0).unwrap();
        let second = fs.allocate_and_init_inode(libc::S_IFDIR as u32 | 0o755, true, 0, 0).unwrap();
        assert_ne!(first, second);

        let dir = fs.read_inode(second).unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.nlinks, 2);

        fs.free_inode(first).unwrap();
        let reused = fs.allocate_and_init_inode(libc::S_IFREG as u32 | 0o600, false, 0, 0).unwrap();
        assert_eq!(reused, first);
    }
}
