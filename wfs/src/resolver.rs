//! Converts a `/`-separated path into an inode index by walking directory
//! entries component by component, starting at the root (spec §4.2).

use crate::error::WfsError;
use crate::{Filesystem, ROOT_INODE};

impl Filesystem {
    /// Resolves an absolute path to its inode index. `"/"` resolves to the
    /// root inode directly; every other component must name an existing
    /// directory entry of the directory resolved so far.
    pub fn resolve(&self, path: &str) -> Result<u32, WfsError> {
        if !path.starts_with('/') {
            return Err(WfsError::InvalidArgument(format!("not an absolute path: {path}")));
        }
        if path == "/" {
            return Ok(ROOT_INODE);
        }

        let mut current = ROOT_INODE;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let dir = self.read_inode(current)?;
            if !dir.is_dir() {
                return Err(WfsError::NotADirectory);
            }
            current = self
                .find_entry(current, component)?
                .ok_or(WfsError::NotFound)?;
        }
        Ok(current)
    }

    /// Splits `path` into `(parent_inode, final_component)`, resolving the
    /// parent directory but not the final component itself — used by
    /// `mkdir`/`mknod`/`unlink`/`rmdir`, which need the parent to exist but
    /// the child to not (or to exist for removal, checked separately).
    pub fn resolve_parent<'a>(&self, path: &'a str) -> Result<(u32, &'a str), WfsError> {
        let path = path.trim_end_matches('/');
        let (parent_path, name) = match path.rfind('/') {
            Some(0) => ("/", &path[1..]),
            Some(i) => (&path[..i], &path[i + 1..]),
            None => return Err(WfsError::InvalidArgument(format!("not an absolute path: {path}"))),
        };
        if name.is_empty() {
            return Err(WfsError::InvalidArgument("empty final path component".into()));
        }
        let parent = self.resolve(parent_path)?;
        if !self.read_inode(parent)?.is_dir() {
            return Err(WfsError::NotADirectory);
        }
        Ok((parent, name))
    }
}

#[cfg(test)]
mod tests {
    use crate::RaidMode;

    #[test]
    fn resolves_root() {
        let fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        assert_eq!(fs.resolve("/").unwrap(), crate::ROOT_INODE);
    }

    #[test]
    fn resolves_nested_path() {
        let mut fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        let dir = fs.allocate_and_init_inode(libc::S_IFDIR as u32 | 0o755, true, 0, 0).unwrap();
        fs.add_entry(crate::ROOT_INODE, "sub", dir, true).unwrap();
        let file = fs.allocate_and_init_inode(libc::S_IFREG as u32 | 0o644, false, 0, 0).unwrap();
        fs.add_entry(dir, "leaf.txt", file, false).unwrap();

        assert_eq!(fs.resolve("/sub").unwrap(), dir);
        assert_eq!(fs.resolve("/sub/leaf.txt").unwrap(), file);
    }

    #[test]
    fn missing_component_is_not_found() {
        let fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        assert!(matches!(fs.resolve("/nope"), Err(crate::WfsError::NotFound)));
    }

    #[test]
    fn resolve_rejects_relative_paths() {
        let fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        assert!(matches!(fs.resolve(""), Err(crate::WfsError::InvalidArgument(_))));
        assert!(matches!(fs.resolve("foo"), Err(crate::WfsError::InvalidArgument(_))));
    }

    #[test]
    fn resolve_parent_splits_path() {
        let fs = crate::test_support::make_fs(1, RaidMode::Stripe, 32, 32);
        let (parent, name) = fs.resolve_parent("/f.txt").unwrap();
        assert_eq!(parent, crate::ROOT_INODE);
        assert_eq!(name, "f.txt");
    }
}
