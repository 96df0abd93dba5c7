//! Raw data-block I/O through the RAID mapper, direct/indirect block
//! addressing for regular files, and the directory-entry protocol packed
//! inside a directory's blocks (spec §3.4, §4).
//!
//! Directories never use indirect addressing: every slot in `blocks[]`,
//! including the one a regular file treats as its indirect pointer, holds
//! a plain block of directory entries. Regular files use the first
//! `N_DIRECT` slots as direct block pointers and the last slot as an
//! indirect block of further pointers.

use crate::bitmap;
use crate::dirent::{DirEntry, DENTRIES_PER_BLOCK, DIRENT_SIZE};
use crate::error::WfsError;
use crate::inode::Inode;
use crate::raid;
use crate::{BlockPtr, Filesystem, BLOCK_SIZE, INDIRECT_ENTRIES, N_BLOCKS, N_DIRECT};

impl Filesystem {
    fn data_block_offset(&self, physical_block: u64) -> u64 {
        self.sb.d_blocks_ptr + physical_block * BLOCK_SIZE as u64
    }

    pub fn read_block(&self, logical_block: u32) -> Result<[u8; BLOCK_SIZE], WfsError> {
        let (disk, phys) = raid::locate(self.mode, self.sb.total_disks, self.sb.num_data_blocks, logical_block as u64)?;
        let offset = self.data_block_offset(phys);

        let mut block = [0u8; BLOCK_SIZE];
        if self.mode.verified() {
            let bytes = self.disks.read_majority(offset, BLOCK_SIZE)?;
            block.copy_from_slice(&bytes);
        } else {
            self.disks.read_plain(disk as usize, offset, &mut block)?;
        }
        Ok(block)
    }

    pub fn write_block(&mut self, logical_block: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), WfsError> {
        let (disk, phys) = raid::locate(self.mode, self.sb.total_disks, self.sb.num_data_blocks, logical_block as u64)?;
        let offset = self.data_block_offset(phys);
        self.disks.write_replicated(disk as usize, offset, buf, self.mode.replicates())
    }

    pub fn allocate_data_block(&mut self) -> Result<u32, WfsError> {
        bitmap::allocate_first_fit(&mut self.disks, self.mode, self.sb.d_bitmap_ptr, self.sb.num_data_blocks as u32)
    }

    pub fn free_data_block(&mut self, block: u32) -> Result<(), WfsError> {
        bitmap::free_bit(&mut self.disks, self.mode, self.sb.d_bitmap_ptr, block)
    }

    pub(crate) fn read_indirect_entries(&self, indirect_block: u32) -> Result<[i32; INDIRECT_ENTRIES], WfsError> {
        let raw = self.read_block(indirect_block)?;
        let mut entries = [0i32; INDIRECT_ENTRIES];
        for (i, entry) in entries.iter_mut().enumerate() {
            *entry = i32::from_le_bytes(raw[i * 4..i * 4 + 4].try_into().unwrap());
        }
        Ok(entries)
    }

    pub(crate) fn write_indirect_entries(&mut self, indirect_block: u32, entries: &[i32; INDIRECT_ENTRIES]) -> Result<(), WfsError> {
        let mut raw = [0u8; BLOCK_SIZE];
        for (i, entry) in entries.iter().enumerate() {
            raw[i * 4..i * 4 + 4].copy_from_slice(&entry.to_le_bytes());
        }
        self.write_block(indirect_block, &raw)
    }

    /// Resolves slot `k` (`0 <= k < N_DIRECT`) to an allocated block,
    /// allocating and zeroing a fresh one if the slot is null.
    pub fn allocate_direct_block(&mut self, inode: &mut Inode, k: usize) -> Result<u32, WfsError> {
        if let Some(block) = inode.blocks[k].get() {
            return Ok(block);
        }
        let block = self.allocate_data_block()?;
        self.write_block(block, &[0u8; BLOCK_SIZE])?;
        inode.blocks[k] = BlockPtr::new(block);
        self.write_inode(inode)?;
        Ok(block)
    }

    /// Resolves indirect entry `index` (`0 <= index < INDIRECT_ENTRIES`),
    /// allocating the indirect block itself (sentinel-filled) on first use,
    /// then allocating and zeroing the target data block if that entry is
    /// still null.
    pub fn allocate_indirect_block(&mut self, inode: &mut Inode, index: usize) -> Result<u32, WfsError> {
        if index >= INDIRECT_ENTRIES {
            return Err(WfsError::Io(format!(
                "indirect index {index} exceeds capacity of {INDIRECT_ENTRIES} entries"
            )));
        }

        let indirect_block = match inode.blocks[N_BLOCKS - 1].get() {
            Some(block) => block,
            None => {
                let block = self.allocate_data_block()?;
                self.write_indirect_entries(block, &[-1i32; INDIRECT_ENTRIES])?;
                inode.blocks[N_BLOCKS - 1] = BlockPtr::new(block);
                self.write_inode(inode)?;
                block
            }
        };

        let mut entries = self.read_indirect_entries(indirect_block)?;
        if entries[index] >= 0 {
            return Ok(entries[index] as u32);
        }

        let block = self.allocate_data_block()?;
        self.write_block(block, &[0u8; BLOCK_SIZE])?;
        entries[index] = block as i32;
        self.write_indirect_entries(indirect_block, &entries)?;
        Ok(block)
    }

    /// Resolves the block backing file-relative block `index` without
    /// allocating. `None` means the slot is a hole (never written).
    pub fn resolve_block_for_read(&self, inode: &Inode, index: usize) -> Result<Option<u32>, WfsError> {
        if index < N_DIRECT {
            return Ok(inode.blocks[index].get());
        }
        let indirect_index = index - N_DIRECT;
        if indirect_index >= INDIRECT_ENTRIES {
            return Err(WfsError::Io(format!(
                "indirect index {indirect_index} exceeds capacity of {INDIRECT_ENTRIES} entries"
            )));
        }
        match inode.blocks[N_BLOCKS - 1].get() {
            None => Ok(None),
            Some(indirect_block) => {
                let entries = self.read_indirect_entries(indirect_block)?;
                Ok(if entries[indirect_index] >= 0 {
                    Some(entries[indirect_index] as u32)
                } else {
                    None
                })
            }
        }
    }

    /// Resolves file-relative block `index`, allocating through the direct
    /// or indirect path as needed.
    pub fn resolve_block_for_write(&mut self, inode: &mut Inode, index: usize) -> Result<u32, WfsError> {
        if index < N_DIRECT {
            self.allocate_direct_block(inode, index)
        } else {
            self.allocate_indirect_block(inode, index - N_DIRECT)
        }
    }

    /// Adds `name -> target_num` to the directory's entry set: first free
    /// slot anywhere wins, scanning all `N_BLOCKS` slots (directories never
    /// use indirect addressing — every slot is a plain dentry block).
    pub fn add_entry(&mut self, parent_num: u32, name: &str, target_num: u32, target_is_dir: bool) -> Result<(), WfsError> {
        let mut parent = self.read_inode(parent_num)?;

        for k in 0..N_BLOCKS {
            match parent.blocks[k].get() {
                None => {
                    let block = self.allocate_data_block()?;
                    let mut slots = [DirEntry::free(); DENTRIES_PER_BLOCK];
                    slots[0] = DirEntry::new(name, target_num);
                    self.write_block(block, &pack_dentries(&slots))?;

                    parent.blocks[k] = BlockPtr::new(block);
                    parent.size += DIRENT_SIZE as u64;
                    if target_is_dir {
                        parent.nlinks += 1;
                    }
                    self.write_inode(&parent)?;
                    return Ok(());
                }
                Some(block) => {
                    let raw = self.read_block(block)?;
                    let mut slots = unpack_dentries(&raw);
                    if let Some(slot) = slots.iter_mut().find(|e| e.is_free()) {
                        *slot = DirEntry::new(name, target_num);
                        self.write_block(block, &pack_dentries(&slots))?;

                        parent.size += DIRENT_SIZE as u64;
                        if target_is_dir {
                            parent.nlinks += 1;
                        }
                        self.write_inode(&parent)?;
                        return Ok(());
                    }
                }
            }
        }

        log::warn!("directory inode {parent_num} has no free dentry slot across {N_BLOCKS} blocks");
        Err(WfsError::NoSpace)
    }

    /// Removes the entry pointing at `target_num`. Mirrors `add_entry`'s
    /// `nlinks` policy: decremented only when the removed entry was itself
    /// a directory (its `..` no longer refers back to this one).
    pub fn remove_entry(&mut self, parent_num: u32, target_num: u32, target_is_dir: bool) -> Result<(), WfsError> {
        let mut parent = self.read_inode(parent_num)?;

        for k in 0..N_BLOCKS {
            let Some(block) = parent.blocks[k].get() else {
                continue;
            };
            let raw = self.read_block(block)?;
            let mut slots = unpack_dentries(&raw);
            if let Some(slot) = slots.iter_mut().find(|e| e.num.get() == Some(target_num)) {
                *slot = DirEntry::free();
                self.write_block(block, &pack_dentries(&slots))?;

                if target_is_dir {
                    parent.nlinks -= 1;
                }
                parent.size = parent.size.saturating_sub(DIRENT_SIZE as u64);
                self.write_inode(&parent)?;
                return Ok(());
            }
        }

        Err(WfsError::NotFound)
    }

    pub fn find_entry(&self, dir_num: u32, name: &str) -> Result<Option<u32>, WfsError> {
        let dir = self.read_inode(dir_num)?;
        for k in 0..N_BLOCKS {
            let Some(block) = dir.blocks[k].get() else {
                continue;
            };
            let raw = self.read_block(block)?;
            for slot in unpack_dentries(&raw) {
                if !slot.is_free() && slot.name_matches(name) {
                    return Ok(slot.num.get());
                }
            }
        }
        Ok(None)
    }

    /// All live entries in a directory, for `readdir`.
    pub fn list_entries(&self, dir_num: u32) -> Result<Vec<(String, u32)>, WfsError> {
        let dir = self.read_inode(dir_num)?;
        let mut out = Vec::new();
        for k in 0..N_BLOCKS {
            let Some(block) = dir.blocks[k].get() else {
                continue;
            };
            let raw = self.read_block(block)?;
            for slot in unpack_dentries(&raw) {
                if let Some(num) = slot.num.get() {
                    out.push((slot.name(), num));
                }
            }
        }
        Ok(out)
    }

    pub fn is_empty_dir(&self, dir_num: u32) -> Result<bool, WfsError> {
        Ok(self.list_entries(dir_num)?.is_empty())
    }

    /// Frees every direct block slot (`0..N_DIRECT`), for regular-file
    /// unlink.
    pub fn free_direct_data_blocks(&mut self, inode: &mut Inode) -> Result<(), WfsError> {
        for k in 0..N_DIRECT {
            if let Some(block) = inode.blocks[k].get() {
                self.free_data_block(block)?;
                inode.blocks[k] = BlockPtr::NULL;
            }
        }
        Ok(())
    }

    /// Frees the indirect block and everything it points at, for
    /// regular-file unlink.
    pub fn free_indirect_data_block(&mut self, inode: &mut Inode) -> Result<(), WfsError> {
        if let Some(indirect) = inode.blocks[N_BLOCKS - 1].get() {
            let entries = self.read_indirect_entries(indirect)?;
            for entry in entries {
                if entry >= 0 {
                    self.free_data_block(entry as u32)?;
                }
            }
            self.free_data_block(indirect)?;
            inode.blocks[N_BLOCKS - 1] = BlockPtr::NULL;
        }
        Ok(())
    }

    /// Frees every slot in `blocks[]` as a plain data block, for rmdir
    /// (directories have no indirect interpretation of the last slot).
    pub fn free_all_plain_blocks(&mut self, inode: &mut Inode) -> Result<(), WfsError> {
        for k in 0..N_BLOCKS {
            if let Some(block) = inode.blocks[k].get() {
                self.free_data_block(block)?;
                inode.blocks[k] = BlockPtr::NULL;
            }
        }
        Ok(())
    }
}

fn pack_dentries(slots: &[DirEntry; DENTRIES_PER_BLOCK]) -> [u8; BLOCK_SIZE] {
    let mut raw = [0u8; BLOCK_SIZE];
    for (i, slot) in slots.iter().enumerate() {
        raw[i * DIRENT_SIZE..(i + 1) * DIRENT_SIZE].copy_from_slice(&slot.to_bytes());
    }
    raw
}

fn unpack_dentries(raw: &[u8; BLOCK_SIZE]) -> [DirEntry; DENTRIES_PER_BLOCK] {
    let mut slots = [DirEntry::free(); DENTRIES_PER_BLOCK];
    for (i, slot) in slots.iter_mut().enumerate() {
        *slot = DirEntry::from_bytes(&raw[i * DIRENT_SIZE..(i + 1) * DIRENT_SIZE]);
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RaidMode;

    #[test]
    fn add_find_and_remove_entry() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        let root = crate::ROOT_INODE;
        let child = fs.allocate_and_init_inode(libc::S_IFREG as u32 | 0o644, false, 0, 0).unwrap();

        fs.add_entry(root, "a.txt", child, false).unwrap();
        assert_eq!(fs.find_entry(root, "a.txt").unwrap(), Some(child));
        assert_eq!(fs.find_entry(root, "missing").unwrap(), None);

        fs.remove_entry(root, child, false).unwrap();
        assert_eq!(fs.find_entry(root, "a.txt").unwrap(), None);
        assert!(fs.is_empty_dir(root).unwrap());
    }

    #[test]
    fn directory_capacity_spans_all_blocks_then_enospc() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 200, 200);
        let root = crate::ROOT_INODE;

        let capacity = N_BLOCKS * DENTRIES_PER_BLOCK;
        for i in 0..capacity {
            let child = fs.allocate_and_init_inode(libc::S_IFREG as u32 | 0o644, false, 0, 0).unwrap();
            fs.add_entry(root, &format!("f{i}"), child, false).unwrap();
        }

        let overflow = fs.allocate_and_init_inode(libc::S_IFREG as u32 | 0o644, false, 0, 0).unwrap();
        assert!(matches!(fs.add_entry(root, "one-too-many", overflow, false), Err(WfsError::NoSpace)));
    }

    #[test]
    fn indirect_allocation_resolves_far_blocks() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 512);
        let file_ino = fs.allocate_and_init_inode(libc::S_IFREG as u32 | 0o644, false, 0, 0).unwrap();
        let mut file = fs.read_inode(file_ino).unwrap();

        let far = fs.resolve_block_for_write(&mut file, N_DIRECT + 3).unwrap();
        assert_eq!(fs.resolve_block_for_read(&file, N_DIRECT + 3).unwrap(), Some(far));
        assert_eq!(fs.resolve_block_for_read(&file, N_DIRECT + 4).unwrap(), None);
    }
}
