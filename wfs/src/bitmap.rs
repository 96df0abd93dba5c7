//! First-fit bit allocator over a byte range of the disk array. Used for
//! both the inode bitmap and the data-block bitmap (spec §3.2) — the two
//! instances differ only in their capacity and base byte offset, so this
//! module is generic over both rather than duplicating the scan logic.

use crate::disk::DiskArray;
use crate::error::WfsError;
use crate::raid::RaidMode;

fn read_region(disks: &DiskArray, mode: RaidMode, offset: u64, len: usize) -> Result<Vec<u8>, WfsError> {
    if mode.verified() {
        disks.read_majority(offset, len)
    } else {
        let mut buf = vec![0u8; len];
        disks.read_plain(0, offset, &mut buf)?;
        Ok(buf)
    }
}

fn write_region(disks: &mut DiskArray, mode: RaidMode, offset: u64, buf: &[u8]) -> Result<(), WfsError> {
    disks.write_replicated(0, offset, buf, mode.replicates())
}

fn byte_len(capacity: u32) -> usize {
    ((capacity as usize) + 7) / 8
}

/// Scans the bitmap at `base_offset` (covering `capacity` bits) for the
/// first clear bit, sets it, and returns its index. `NoSpace` if the
/// bitmap is full.
pub fn allocate_first_fit(disks: &mut DiskArray, mode: RaidMode, base_offset: u64, capacity: u32) -> Result<u32, WfsError> {
    let mut bytes = read_region(disks, mode, base_offset, byte_len(capacity))?;

    for (byte_idx, byte) in bytes.iter_mut().enumerate() {
        if *byte == 0xFF {
            continue;
        }
        for bit in 0..8u32 {
            let index = (byte_idx as u32) * 8 + bit;
            if index >= capacity {
                break;
            }
            if *byte & (1 << bit) == 0 {
                *byte |= 1 << bit;
                write_region(disks, mode, base_offset + byte_idx as u64, &[*byte])?;
                return Ok(index);
            }
        }
    }

    log::warn!("bitmap at offset {base_offset} exhausted ({capacity} bits)");
    Err(WfsError::NoSpace)
}

/// Clears the bit at `index`. Freeing an already-clear bit is a no-op —
/// callers that track their own allocations should never do this, but it
/// keeps double-free harmless rather than corrupting.
pub fn free_bit(disks: &mut DiskArray, mode: RaidMode, base_offset: u64, index: u32) -> Result<(), WfsError> {
    let byte_idx = (index / 8) as u64;
    let bit = index % 8;

    let mut byte = read_region(disks, mode, base_offset + byte_idx, 1)?;
    byte[0] &= !(1 << bit);
    write_region(disks, mode, base_offset + byte_idx, &byte)
}

pub fn is_set(disks: &DiskArray, mode: RaidMode, base_offset: u64, index: u32) -> Result<bool, WfsError> {
    let byte_idx = (index / 8) as u64;
    let bit = index % 8;
    let byte = read_region(disks, mode, base_offset + byte_idx, 1)?;
    Ok(byte[0] & (1 << bit) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Disk;

    fn fresh_array(num_disks: usize, size: usize) -> DiskArray {
        DiskArray::new((0..num_disks).map(|_| Disk::from_memory(size)).collect())
    }

    #[test]
    fn allocates_sequentially_then_exhausts() {
        let mut disks = fresh_array(1, 64);
        let capacity = 10;

        for expected in 0..capacity {
            let got = allocate_first_fit(&mut disks, RaidMode::Stripe, 0, capacity).unwrap();
            assert_eq!(got, expected);
        }

        assert!(matches!(
            allocate_first_fit(&mut disks, RaidMode::Stripe, 0, capacity),
            Err(WfsError::NoSpace)
        ));
    }

    #[test]
    fn freeing_makes_a_slot_reusable() {
        let mut disks = fresh_array(1, 64);
        let capacity = 4;

        for _ in 0..capacity {
            allocate_first_fit(&mut disks, RaidMode::Stripe, 0, capacity).unwrap();
        }

        free_bit(&mut disks, RaidMode::Stripe, 0, 1).unwrap();
        let reused = allocate_first_fit(&mut disks, RaidMode::Stripe, 0, capacity).unwrap();
        assert_eq!(reused, 1);
    }

    #[test]
    fn mirrored_writes_replicate_to_every_disk() {
        let mut disks = fresh_array(3, 64);
        allocate_first_fit(&mut disks, RaidMode::Mirror, 0, 16).unwrap();

        for i in 0..3 {
            let mut byte = [0u8; 1];
            disks.read_plain(i, 0, &mut byte).unwrap();
            assert_eq!(byte[0], 0b0000_0001);
        }
    }

    #[test]
    fn is_set_reflects_allocation_state() {
        let mut disks = fresh_array(1, 64);
        assert!(!is_set(&disks, RaidMode::Stripe, 0, 3).unwrap());
        allocate_first_fit(&mut disks, RaidMode::Stripe, 0, 8).unwrap();
        allocate_first_fit(&mut disks, RaidMode::Stripe, 0, 8).unwrap();
        allocate_first_fit(&mut disks, RaidMode::Stripe, 0, 8).unwrap();
        assert!(is_set(&disks, RaidMode::Stripe, 0, 2).unwrap());
        assert!(!is_set(&disks, RaidMode::Stripe, 0, 3).unwrap());
    }
}
