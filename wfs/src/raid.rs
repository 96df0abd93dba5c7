//! Translates a logical block index into `(disk index, physical block
//! index)`, purely from `raid_mode`, `total_disks`, and the logical index
//! (spec §4.1).

use crate::error::WfsError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RaidMode {
    /// Round-robin distribution of logical blocks across disks. No
    /// redundancy.
    Stripe,
    /// Every disk is a full replica; reads go to the primary (disk 0) by
    /// convention.
    Mirror,
    /// Mirroring with majority-voted reads, applied consistently to every
    /// on-disk structure (superblock, bitmaps, inode table, data blocks).
    VerifiedMirror,
}

impl RaidMode {
    pub fn from_code(code: u32) -> Result<Self, WfsError> {
        match code {
            0 => Ok(RaidMode::Stripe),
            1 => Ok(RaidMode::Mirror),
            2 => Ok(RaidMode::VerifiedMirror),
            other => Err(WfsError::Fatal(format!("unknown raid mode code {other}"))),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            RaidMode::Stripe => 0,
            RaidMode::Mirror => 1,
            RaidMode::VerifiedMirror => 2,
        }
    }

    /// Whether writes to this mode must replicate byte-identically to
    /// every other disk.
    pub fn replicates(self) -> bool {
        matches!(self, RaidMode::Mirror | RaidMode::VerifiedMirror)
    }

    /// Whether reads should be majority-voted across all disks rather than
    /// served from the primary alone.
    pub fn verified(self) -> bool {
        matches!(self, RaidMode::VerifiedMirror)
    }
}

/// Maps a logical data-block index to `(disk_index, physical_block)`.
/// Fails only if `logical_block` is out of range for `num_data_blocks` —
/// a programming error the spec treats as fatal.
pub fn locate(mode: RaidMode, total_disks: u32, num_data_blocks: u64, logical_block: u64) -> Result<(u32, u64), WfsError> {
    if logical_block >= num_data_blocks {
        return Err(WfsError::Fatal(format!(
            "logical block {logical_block} out of range (0..{num_data_blocks})"
        )));
    }
    if total_disks == 0 {
        return Err(WfsError::Fatal("raid array has zero disks".into()));
    }

    match mode {
        RaidMode::Stripe => Ok((
            (logical_block % total_disks as u64) as u32,
            logical_block / total_disks as u64,
        )),
        RaidMode::Mirror | RaidMode::VerifiedMirror => Ok((0, logical_block)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_round_robins_across_disks() {
        for k in 0..8u64 {
            let (disk, phys) = locate(RaidMode::Stripe, 2, 100, k).unwrap();
            assert_eq!(disk, (k % 2) as u32);
            assert_eq!(phys, k / 2);
        }
    }

    #[test]
    fn mirror_always_targets_primary() {
        for k in 0..8u64 {
            let (disk, phys) = locate(RaidMode::Mirror, 3, 100, k).unwrap();
            assert_eq!(disk, 0);
            assert_eq!(phys, k);
        }
    }

    #[test]
    fn out_of_range_block_is_fatal() {
        assert!(locate(RaidMode::Stripe, 2, 10, 10).is_err());
    }

    #[test]
    fn replicates_and_verified_flags() {
        assert!(!RaidMode::Stripe.replicates());
        assert!(RaidMode::Mirror.replicates());
        assert!(RaidMode::VerifiedMirror.replicates());
        assert!(!RaidMode::Mirror.verified());
        assert!(RaidMode::VerifiedMirror.verified());
    }
}
