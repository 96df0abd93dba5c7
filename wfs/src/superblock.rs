//! The fixed header written at byte 0 of every disk (spec §3, §6).
//! Identical across mirrors except for the disk-local identity fields
//! (`disk_index`, `disk_id`). Never rewritten after format time.

use crate::disk::DiskArray;
use crate::error::WfsError;
use crate::raid::RaidMode;

pub const MAGIC: u32 = 0x5746_5330; // "WFS0"

pub const SUPERBLOCK_SIZE: usize = 68;

#[derive(Copy, Clone, Debug)]
pub struct SuperBlock {
    pub magic: u32,
    pub num_inodes: u64,
    pub num_data_blocks: u64,
    pub i_bitmap_ptr: u64,
    pub d_bitmap_ptr: u64,
    pub i_blocks_ptr: u64,
    pub d_blocks_ptr: u64,
    pub raid_mode: u32,
    pub disk_index: u32,
    pub total_disks: u32,
    pub disk_id: u32,
}

impl SuperBlock {
    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        let mut at = 0;

        macro_rules! put {
            ($value:expr) => {{
                let bytes = $value.to_le_bytes();
                buf[at..at + bytes.len()].copy_from_slice(&bytes);
                at += bytes.len();
            }};
        }

        put!(self.magic);
        put!(self.num_inodes);
        put!(self.num_data_blocks);
        put!(self.i_bitmap_ptr);
        put!(self.d_bitmap_ptr);
        put!(self.i_blocks_ptr);
        put!(self.d_blocks_ptr);
        put!(self.raid_mode);
        put!(self.disk_index);
        put!(self.total_disks);
        put!(self.disk_id);

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

        SuperBlock {
            magic: take!(u32),
            num_inodes: take!(u64),
            num_data_blocks: take!(u64),
            i_bitmap_ptr: take!(u64),
            d_bitmap_ptr: take!(u64),
            i_blocks_ptr: take!(u64),
            d_blocks_ptr: take!(u64),
            raid_mode: take!(u32),
            disk_index: take!(u32),
            total_disks: take!(u32),
            disk_id: take!(u32),
        }
    }

    /// Reads the superblock from disk 0 without validating it — used to
    /// probe a disk array before the raid mode (and thus the correct read
    /// strategy) is known.
    pub fn read_unverified(disks: &DiskArray) -> Result<Self, WfsError> {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        disks.read_plain(0, 0, &mut buf)?;
        let sb = SuperBlock::from_bytes(&buf);
        if sb.magic != MAGIC {
            return Err(WfsError::Fatal(format!(
                "bad superblock magic {:#x}, expected {:#x} (uninitialized or corrupt disk)",
                sb.magic, MAGIC
            )));
        }
        Ok(sb)
    }

    /// Reads and validates the superblock, applying majority-read if `mode`
    /// is `VerifiedMirror` (spec §9's decision to apply verified-mirror
    /// reads uniformly, not only to directory/file paths).
    pub fn read(disks: &DiskArray, mode: RaidMode) -> Result<Self, WfsError> {
        let buf = if mode.verified() {
            disks.read_majority(0, SUPERBLOCK_SIZE)?
        } else {
            let mut buf = vec![0u8; SUPERBLOCK_SIZE];
            disks.read_plain(0, 0, &mut buf)?;
            buf
        };

        let sb = SuperBlock::from_bytes(&buf);
        if sb.magic != MAGIC {
            log::error!("superblock magic mismatch: got {:#x}, expected {:#x}", sb.magic, MAGIC);
            return Err(WfsError::Fatal(format!(
                "bad superblock magic {:#x}, expected {:#x}",
                sb.magic, MAGIC
            )));
        }
        Ok(sb)
    }

    /// Parses `raid_mode` into the typed enum. A fatal error if the disk
    /// carries an unrecognized mode byte (corrupt superblock).
    pub fn raid_mode(&self) -> Result<RaidMode, WfsError> {
        RaidMode::from_code(self.raid_mode)
    }

    pub fn inode_bitmap_size(&self) -> u64 {
        (self.num_inodes + 7) / 8
    }

    pub fn data_bitmap_size(&self) -> u64 {
        (self.num_data_blocks + 7) / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let sb = SuperBlock {
            magic: MAGIC,
            num_inodes: 32,
            num_data_blocks: 64,
            i_bitmap_ptr: 68,
            d_bitmap_ptr: 72,
            i_blocks_ptr: 512,
            d_blocks_ptr: 16896,
            raid_mode: 1,
            disk_index: 1,
            total_disks: 2,
            disk_id: 0xdead_beef,
        };

        let decoded = SuperBlock::from_bytes(&sb.to_bytes());
        assert_eq!(decoded.magic, sb.magic);
        assert_eq!(decoded.num_inodes, sb.num_inodes);
        assert_eq!(decoded.num_data_blocks, sb.num_data_blocks);
        assert_eq!(decoded.i_bitmap_ptr, sb.i_bitmap_ptr);
        assert_eq!(decoded.d_bitmap_ptr, sb.d_bitmap_ptr);
        assert_eq!(decoded.i_blocks_ptr, sb.i_blocks_ptr);
        assert_eq!(decoded.d_blocks_ptr, sb.d_blocks_ptr);
        assert_eq!(decoded.raid_mode, sb.raid_mode);
        assert_eq!(decoded.disk_index, sb.disk_index);
        assert_eq!(decoded.total_disks, sb.total_disks);
        assert_eq!(decoded.disk_id, sb.disk_id);
    }
}
