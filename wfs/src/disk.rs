//! The byte-addressable backing-region abstraction the rest of the core
//! consumes. Production code maps backing files into memory with
//! `memmap2`; the core's own tests use a plain in-memory buffer so the
//! block engine can be exercised without touching the filesystem.

use memmap2::MmapMut;

use crate::error::WfsError;

enum Backing {
    Mmap(MmapMut),
    Memory(Vec<u8>),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Mmap(m) => &m[..],
            Backing::Memory(v) => &v[..],
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Backing::Mmap(m) => &mut m[..],
            Backing::Memory(v) => &mut v[..],
        }
    }
}

/// One backing region: a single "disk" in the array. All disks in an array
/// are identically sized.
pub struct Disk {
    backing: Backing,
}

impl Disk {
    pub fn from_mmap(mmap: MmapMut) -> Self {
        Disk {
            backing: Backing::Mmap(mmap),
        }
    }

    pub fn from_memory(size: usize) -> Self {
        Disk {
            backing: Backing::Memory(vec![0u8; size]),
        }
    }

    pub fn len(&self) -> u64 {
        self.backing.as_slice().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), WfsError> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| WfsError::Fatal("read offset overflow".into()))?;
        let slice = self.backing.as_slice();
        if end > slice.len() {
            return Err(WfsError::Fatal(format!(
                "read [{start}..{end}) out of range (disk size {})",
                slice.len()
            )));
        }
        buf.copy_from_slice(&slice[start..end]);
        Ok(())
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), WfsError> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| WfsError::Fatal("write offset overflow".into()))?;
        let slice = self.backing.as_mut_slice();
        if end > slice.len() {
            return Err(WfsError::Fatal(format!(
                "write [{start}..{end}) out of range (disk size {})",
                slice.len()
            )));
        }
        slice[start..end].copy_from_slice(buf);
        Ok(())
    }
}

/// An ordered array of backing disks, indexed by `disk_index` as recorded
/// in each disk's superblock. Shared by reference across every component;
/// there is no internal locking since the operation surface assumes
/// sequential, single-threaded dispatch (see `ops`).
pub struct DiskArray {
    disks: Vec<Disk>,
}

impl DiskArray {
    pub fn new(disks: Vec<Disk>) -> Self {
        DiskArray { disks }
    }

    pub fn len(&self) -> usize {
        self.disks.len()
    }

    /// Unwraps the array back into its disks, in current order. Used by a
    /// daemon that probes disks one at a time before it knows the order
    /// `disk_index` dictates.
    pub fn into_disks(self) -> Vec<Disk> {
        self.disks
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    pub fn disk(&self, index: usize) -> &Disk {
        &self.disks[index]
    }

    pub fn disk_mut(&mut self, index: usize) -> &mut Disk {
        &mut self.disks[index]
    }

    /// Writes `buf` to `offset` on `disks[primary]`. If `replicate` is set,
    /// copies the exact same bytes to the same offset on every other disk —
    /// the replication primitive from spec §4.1, generalized to operate on
    /// raw byte offsets so it applies uniformly to bitmaps, the inode
    /// table, and data blocks.
    pub fn write_replicated(&mut self, primary: usize, offset: u64, buf: &[u8], replicate: bool) -> Result<(), WfsError> {
        self.disks[primary].write_at(offset, buf)?;
        if replicate {
            for (i, disk) in self.disks.iter_mut().enumerate() {
                if i != primary {
                    disk.write_at(offset, buf)?;
                }
            }
        }
        Ok(())
    }

    /// Plain read from a single named disk (the reference mirror mode:
    /// reads go to the primary by convention).
    pub fn read_plain(&self, disk_index: usize, offset: u64, buf: &mut [u8]) -> Result<(), WfsError> {
        self.disks[disk_index].read_at(offset, buf)
    }

    /// Verified-mirror read: reads the same byte range from every disk and
    /// returns the content agreed upon by a plurality, breaking ties toward
    /// the lowest disk index.
    pub fn read_majority(&self, offset: u64, len: usize) -> Result<Vec<u8>, WfsError> {
        let mut candidates: Vec<u8> = Vec::with_capacity(self.disks.len());
        let mut tallies: Vec<(Vec<u8>, usize)> = Vec::new();

        for disk in &self.disks {
            candidates.resize(len, 0);
            disk.read_at(offset, &mut candidates)?;

            match tallies.iter_mut().find(|(bytes, _)| bytes == &candidates) {
                Some((_, count)) => *count += 1,
                None => tallies.push((candidates.clone(), 1)),
            }
        }

        tallies
            .into_iter()
            .enumerate()
            .max_by_key(|(i, (_, count))| (*count, usize::MAX - i))
            .map(|(_, (bytes, _))| bytes)
            .ok_or_else(|| WfsError::Fatal("read_majority over empty disk array".into()))
    }
}
