//! Computes the on-disk layout (spec §6) and writes it to a freshly
//! allocated backing disk: superblock, empty bitmaps with inode 0 marked
//! allocated, and the root inode.

use crate::error::WfsError;
use crate::inode::{now_secs, Inode};
use crate::raid::RaidMode;
use crate::superblock::{SuperBlock, MAGIC, SUPERBLOCK_SIZE};
use crate::{BlockPtr, Disk, N_BLOCKS};

fn round_up_32(n: u32) -> u32 {
    (n + 31) / 32 * 32
}

fn round_up_block(offset: u64) -> u64 {
    (offset + crate::BLOCK_SIZE as u64 - 1) / crate::BLOCK_SIZE as u64 * crate::BLOCK_SIZE as u64
}

#[derive(Copy, Clone, Debug)]
pub struct Layout {
    pub num_inodes: u32,
    pub num_data_blocks: u32,
    pub i_bitmap_ptr: u64,
    pub d_bitmap_ptr: u64,
    pub i_blocks_ptr: u64,
    pub d_blocks_ptr: u64,
    pub required_size: u64,
}

/// Rounds both counts up to a multiple of 32 and derives every region
/// offset from them, in the order superblock, inode bitmap, data bitmap,
/// (block-aligned) inode table, (block-aligned) data block region.
pub fn compute_layout(num_inodes: u32, num_data_blocks: u32) -> Layout {
    let num_inodes = round_up_32(num_inodes);
    let num_data_blocks = round_up_32(num_data_blocks);

    let i_bitmap_ptr = SUPERBLOCK_SIZE as u64;
    let i_bitmap_size = (num_inodes as u64 + 7) / 8;
    let d_bitmap_ptr = i_bitmap_ptr + i_bitmap_size;
    let d_bitmap_size = (num_data_blocks as u64 + 7) / 8;

    let i_blocks_ptr = round_up_block(d_bitmap_ptr + d_bitmap_size);
    let inode_table_size = num_inodes as u64 * crate::BLOCK_SIZE as u64;

    let d_blocks_ptr = round_up_block(i_blocks_ptr + inode_table_size);
    let data_region_size = num_data_blocks as u64 * crate::BLOCK_SIZE as u64;

    Layout {
        num_inodes,
        num_data_blocks,
        i_bitmap_ptr,
        d_bitmap_ptr,
        i_blocks_ptr,
        d_blocks_ptr,
        required_size: d_blocks_ptr + data_region_size,
    }
}

/// Writes the superblock, empty bitmaps (inode 0 pre-marked allocated),
/// and the root inode to `disk`. `disk_id` is an opaque per-disk identity
/// value the daemon can use for diagnostics; it has no on-disk semantics
/// beyond being carried through unchanged.
pub fn format_disk(disk: &mut Disk, layout: &Layout, mode: RaidMode, disk_index: u32, total_disks: u32, disk_id: u32) -> Result<(), WfsError> {
    if disk.len() < layout.required_size {
        return Err(WfsError::InvalidArgument(format!(
            "disk too small: {} bytes, {} required",
            disk.len(),
            layout.required_size
        )));
    }

    let sb = SuperBlock {
        magic: MAGIC,
        num_inodes: layout.num_inodes as u64,
        num_data_blocks: layout.num_data_blocks as u64,
        i_bitmap_ptr: layout.i_bitmap_ptr,
        d_bitmap_ptr: layout.d_bitmap_ptr,
        i_blocks_ptr: layout.i_blocks_ptr,
        d_blocks_ptr: layout.d_blocks_ptr,
        raid_mode: mode.code(),
        disk_index,
        total_disks,
        disk_id,
    };
    disk.write_at(0, &sb.to_bytes())?;

    let mut i_bitmap = vec![0u8; sb.inode_bitmap_size() as usize];
    i_bitmap[0] |= 1; // root inode pre-allocated
    disk.write_at(sb.i_bitmap_ptr, &i_bitmap)?;

    let d_bitmap = vec![0u8; sb.data_bitmap_size() as usize];
    disk.write_at(sb.d_bitmap_ptr, &d_bitmap)?;

    let now = now_secs();
    let root = Inode {
        num: crate::ROOT_INODE,
        mode: libc::S_IFDIR as u32 | 0o755,
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        size: 0,
        nlinks: 2,
        atim: now,
        mtim: now,
        ctim: now,
        blocks: [BlockPtr::NULL; N_BLOCKS],
    };
    disk.write_at(layout.i_blocks_ptr, &root.to_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_rounds_counts_and_block_aligns_regions() {
        let layout = compute_layout(10, 10);
        assert_eq!(layout.num_inodes, 32);
        assert_eq!(layout.num_data_blocks, 32);
        assert_eq!(layout.i_bitmap_ptr, SUPERBLOCK_SIZE as u64);
        assert_eq!(layout.i_blocks_ptr % crate::BLOCK_SIZE as u64, 0);
        assert_eq!(layout.d_blocks_ptr % crate::BLOCK_SIZE as u64, 0);
        assert!(layout.required_size >= layout.d_blocks_ptr + 32 * crate::BLOCK_SIZE as u64);
    }

    #[test]
    fn rejects_undersized_disk() {
        let layout = compute_layout(32, 32);
        let mut disk = Disk::from_memory(16);
        assert!(matches!(
            format_disk(&mut disk, &layout, RaidMode::Stripe, 0, 1, 0),
            Err(WfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn formatted_disk_has_root_inode_and_marked_bitmap() {
        let layout = compute_layout(32, 32);
        let mut disk = Disk::from_memory(layout.required_size as usize);
        format_disk(&mut disk, &layout, RaidMode::Stripe, 0, 1, 42).unwrap();

        let mut bitmap_byte = [0u8; 1];
        disk.read_at(layout.i_bitmap_ptr, &mut bitmap_byte).unwrap();
        assert_eq!(bitmap_byte[0], 0b0000_0001);

        let mut root_bytes = vec![0u8; crate::inode::INODE_SIZE];
        disk.read_at(layout.i_blocks_ptr, &mut root_bytes).unwrap();
        let root = Inode::from_bytes(&root_bytes);
        assert!(root.is_dir());
        assert_eq!(root.nlinks, 2);
    }
}
