//! The operation surface a filesystem-driver front end drives: attribute
//! lookup, directory listing, creation, read/write, and removal (spec §5).
//! Every method resolves its own path; none of them assume a caller has
//! already done so.

use crate::dirent::MAX_NAME;
use crate::error::WfsError;
use crate::{BlockPtr, Filesystem, BLOCK_SIZE, MAX_FILE_BLOCKS, N_BLOCKS, N_DIRECT};

/// The subset of inode state a `getattr` caller needs, independent of any
/// particular filesystem-driver binding's stat representation.
#[derive(Copy, Clone, Debug)]
pub struct Attr {
    pub ino: u32,
    pub mode: u32,
    pub nlinks: u32,
    pub size: u64,
    pub atim: i64,
    pub mtim: i64,
    pub ctim: i64,
}

impl Filesystem {
    pub fn getattr(&self, path: &str) -> Result<Attr, WfsError> {
        let ino = self.resolve(path)?;
        let inode = self.read_inode(ino)?;
        Ok(Attr {
            ino,
            mode: inode.mode,
            nlinks: inode.nlinks,
            size: inode.size,
            atim: inode.atim,
            mtim: inode.mtim,
            ctim: inode.ctim,
        })
    }

    /// Lists `path`'s entries, synthesizing `.` and `..` (neither is
    /// physically stored as a dentry).
    pub fn readdir(&self, path: &str) -> Result<Vec<(String, u32)>, WfsError> {
        let ino = self.resolve(path)?;
        let inode = self.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(WfsError::NotADirectory);
        }

        let parent = if path == "/" {
            crate::ROOT_INODE
        } else {
            self.resolve_parent(path)?.0
        };

        let mut out = vec![(".".to_string(), ino), ("..".to_string(), parent)];
        out.extend(self.list_entries(ino)?);
        Ok(out)
    }

    pub fn mkdir(&mut self, path: &str, mode_bits: u32, uid: u32, gid: u32) -> Result<u32, WfsError> {
        let (parent, name) = self.resolve_parent(path)?;
        validate_name(name)?;
        if self.find_entry(parent, name)?.is_some() {
            return Err(WfsError::AlreadyExists);
        }

        let child = self.allocate_and_init_inode(libc::S_IFDIR as u32 | (mode_bits & 0o7777), true, uid, gid)?;
        self.add_entry(parent, name, child, true)?;
        Ok(child)
    }

    /// `dev` is accepted for interface symmetry with a driver's `mknod`
    /// callback but unused — device files are out of scope.
    pub fn mknod(&mut self, path: &str, mode_bits: u32, uid: u32, gid: u32) -> Result<u32, WfsError> {
        let (parent, name) = self.resolve_parent(path)?;
        validate_name(name)?;
        if self.find_entry(parent, name)?.is_some() {
            return Err(WfsError::AlreadyExists);
        }

        let child = self.allocate_and_init_inode(libc::S_IFREG as u32 | (mode_bits & 0o7777), false, uid, gid)?;
        self.add_entry(parent, name, child, false)?;
        Ok(child)
    }

    /// Reads up to `size` bytes starting at `offset`, clipped to the
    /// file's length. A logical hole (never written) reads back as zeros.
    pub fn read(&self, path: &str, size: usize, offset: u64) -> Result<Vec<u8>, WfsError> {
        let ino = self.resolve(path)?;
        let inode = self.read_inode(ino)?;
        if inode.is_dir() {
            return Err(WfsError::IsADirectory);
        }

        if offset >= inode.size {
            return Ok(Vec::new());
        }
        let end = (offset + size as u64).min(inode.size);

        let mut out = Vec::with_capacity((end - offset) as usize);
        let mut pos = offset;
        while pos < end {
            let block_index = (pos / BLOCK_SIZE as u64) as usize;
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let take = ((end - pos) as usize).min(BLOCK_SIZE - in_block);

            match self.resolve_block_for_read(&inode, block_index)? {
                Some(block) => {
                    let data = self.read_block(block)?;
                    out.extend_from_slice(&data[in_block..in_block + take]);
                }
                None => out.extend(std::iter::repeat(0u8).take(take)),
            }
            pos += take as u64;
        }
        Ok(out)
    }

    /// Writes `data` starting at `offset`, allocating blocks as needed and
    /// extending the file's size if the write reaches past the current
    /// end. Returns the number of bytes written.
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> Result<usize, WfsError> {
        let ino = self.resolve(path)?;
        let mut inode = self.read_inode(ino)?;
        if inode.is_dir() {
            return Err(WfsError::IsADirectory);
        }

        let end = offset + data.len() as u64;
        if data.is_empty() {
            return Ok(0);
        }
        let last_block = ((end - 1) / BLOCK_SIZE as u64) as usize;
        if last_block >= MAX_FILE_BLOCKS {
            return Err(WfsError::Io(format!(
                "write would reach block {last_block}, past the {MAX_FILE_BLOCKS}-block file capacity"
            )));
        }

        let mut pos = offset;
        let mut written = 0usize;
        while pos < end {
            let block_index = (pos / BLOCK_SIZE as u64) as usize;
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let take = ((end - pos) as usize).min(BLOCK_SIZE - in_block);

            let block = self.resolve_block_for_write(&mut inode, block_index)?;
            let mut buf = self.read_block(block)?;
            buf[in_block..in_block + take].copy_from_slice(&data[written..written + take]);
            self.write_block(block, &buf)?;

            pos += take as u64;
            written += take;
        }

        if end > inode.size {
            inode.size = end;
        }
        self.touch_mtime(&mut inode)?;
        Ok(written)
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), WfsError> {
        let (parent, name) = self.resolve_parent(path)?;
        let target = self.find_entry(parent, name)?.ok_or(WfsError::NotFound)?;

        let inode = self.read_inode(target)?;
        if inode.is_dir() {
            return Err(WfsError::IsADirectory);
        }

        self.remove_entry(parent, target, false)?;
        self.free_inode(target)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), WfsError> {
        if path == "/" {
            return Err(WfsError::InvalidArgument("cannot remove the root directory".into()));
        }

        let (parent, name) = self.resolve_parent(path)?;
        let target = self.find_entry(parent, name)?.ok_or(WfsError::NotFound)?;

        let inode = self.read_inode(target)?;
        if !inode.is_dir() {
            return Err(WfsError::NotADirectory);
        }
        if !self.is_empty_dir(target)? {
            return Err(WfsError::NotEmpty);
        }

        self.remove_entry(parent, target, true)?;
        self.free_inode(target)
    }

    /// Resizes a regular file, freeing trailing blocks on shrink. Growing
    /// only updates `size`; the newly exposed range reads back as zeros
    /// through the same hole semantics as `read`.
    pub fn truncate(&mut self, path: &str, new_size: u64) -> Result<(), WfsError> {
        let ino = self.resolve(path)?;
        let mut inode = self.read_inode(ino)?;
        if inode.is_dir() {
            return Err(WfsError::IsADirectory);
        }

        if new_size < inode.size {
            let keep_blocks = if new_size == 0 {
                0
            } else {
                ((new_size - 1) / BLOCK_SIZE as u64) as usize + 1
            };

            for k in keep_blocks.min(N_DIRECT)..N_DIRECT {
                if let Some(block) = inode.blocks[k].get() {
                    self.free_data_block(block)?;
                    inode.blocks[k] = BlockPtr::NULL;
                }
            }

            if keep_blocks <= N_DIRECT {
                self.free_indirect_data_block(&mut inode)?;
            } else if let Some(indirect) = inode.blocks[N_BLOCKS - 1].get() {
                let keep_indirect = keep_blocks - N_DIRECT;
                let mut entries = self.read_indirect_entries(indirect)?;
                for entry in entries.iter_mut().skip(keep_indirect) {
                    if *entry >= 0 {
                        self.free_data_block(*entry as u32)?;
                        *entry = -1;
                    }
                }
                self.write_indirect_entries(indirect, &entries)?;
            }
        }

        inode.size = new_size;
        self.touch_mtime(&mut inode)
    }
}

fn validate_name(name: &str) -> Result<(), WfsError> {
    if name.is_empty() || name.len() >= MAX_NAME {
        return Err(WfsError::InvalidArgument(format!("invalid name: {name:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::RaidMode;

    #[test]
    fn format_then_getattr_root() {
        let fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        let attr = fs.getattr("/").unwrap();
        assert_eq!(attr.ino, crate::ROOT_INODE);
        assert_eq!(attr.nlinks, 2);
        assert_eq!(attr.size, 0);
        assert!(attr.mode & libc::S_IFDIR as u32 != 0);
    }

    #[test]
    fn mkdir_then_readdir_shows_dot_entries() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        fs.mkdir("/sub", 0o755, 0, 0).unwrap();

        let entries = fs.readdir("/").unwrap();
        let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"."));
        assert!(names.contains(&".."));
        assert!(names.contains(&"sub"));
    }

    #[test]
    fn mkdir_duplicate_name_fails() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        fs.mkdir("/sub", 0o755, 0, 0).unwrap();
        assert!(matches!(fs.mkdir("/sub", 0o755, 0, 0), Err(crate::WfsError::AlreadyExists)));
    }

    #[test]
    fn write_then_read_spans_block_boundary() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        fs.mknod("/f", 0o644, 0, 0).unwrap();

        let payload = vec![b'x'; 700];
        let written = fs.write("/f", &payload, 0).unwrap();
        assert_eq!(written, 700);

        let read_back = fs.read("/f", 700, 0).unwrap();
        assert_eq!(read_back, payload);
        assert_eq!(fs.getattr("/f").unwrap().size, 700);
    }

    #[test]
    fn write_past_direct_blocks_uses_indirect_chain() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 512);
        fs.mknod("/big", 0o644, 0, 0).unwrap();

        let offset = 7 * crate::BLOCK_SIZE as u64;
        let payload = vec![b'z'; 64];
        fs.write("/big", &payload, offset).unwrap();

        let read_back = fs.read("/big", 64, offset).unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn read_past_eof_returns_short_result() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        fs.mknod("/f", 0o644, 0, 0).unwrap();
        fs.write("/f", b"hello", 0).unwrap();

        let got = fs.read("/f", 100, 0).unwrap();
        assert_eq!(got, b"hello");
    }

    #[test]
    fn unlink_frees_inode_and_removes_entry() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        fs.mknod("/f", 0o644, 0, 0).unwrap();
        fs.write("/f", b"data", 0).unwrap();

        fs.unlink("/f").unwrap();
        assert!(matches!(fs.getattr("/f"), Err(crate::WfsError::NotFound)));
        assert!(fs.readdir("/").unwrap().iter().all(|(n, _)| n != "f"));
    }

    #[test]
    fn rmdir_refuses_nonempty() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        fs.mkdir("/sub", 0o755, 0, 0).unwrap();
        fs.mknod("/sub/f", 0o644, 0, 0).unwrap();

        assert!(matches!(fs.rmdir("/sub"), Err(crate::WfsError::NotEmpty)));
        fs.unlink("/sub/f").unwrap();
        fs.rmdir("/sub").unwrap();
        assert!(matches!(fs.getattr("/sub"), Err(crate::WfsError::NotFound)));
    }

    #[test]
    fn rmdir_root_is_rejected() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        assert!(matches!(fs.rmdir("/"), Err(crate::WfsError::InvalidArgument(_))));
    }

    #[test]
    fn truncate_shrinks_and_frees_trailing_blocks() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        fs.mknod("/f", 0o644, 0, 0).unwrap();
        fs.write("/f", &vec![b'a'; 1500], 0).unwrap();

        fs.truncate("/f", 10).unwrap();
        assert_eq!(fs.getattr("/f").unwrap().size, 10);
        assert_eq!(fs.read("/f", 10, 0).unwrap(), vec![b'a'; 10]);
    }

    #[test]
    fn mkdir_increments_parent_nlinks_unlike_mknod() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        let before = fs.getattr("/").unwrap().nlinks;
        fs.mknod("/f", 0o644, 0, 0).unwrap();
        assert_eq!(fs.getattr("/").unwrap().nlinks, before);
        fs.mkdir("/d", 0o755, 0, 0).unwrap();
        assert_eq!(fs.getattr("/").unwrap().nlinks, before + 1);
    }
}
