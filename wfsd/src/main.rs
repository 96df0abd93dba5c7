//! The filesystem-driver front end: probes and mounts a disk array, then
//! binds the core's path-based operation surface to `fuser`'s inode-based
//! lowlevel callbacks (spec §6's daemon CLI; driver binding internals are
//! otherwise out of this crate's scope).

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use fuser::{FileAttr, FileType as FuseFileType, Filesystem as FuseFilesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyWrite, Request, TimeOrNow};
use log::{error, info, warn};

use wfs::ops::Attr;
use wfs::{Disk, DiskArray, Filesystem as WfsFilesystem, SuperBlock, WfsError};

const TTL: Duration = Duration::from_secs(1);
const FUSE_ROOT_INO: u64 = 1;

fn to_fuse_ino(wfs_ino: u32) -> u64 {
    wfs_ino as u64 + 1
}

fn errno_for(e: &WfsError) -> i32 {
    -e.to_errno()
}

fn systime(secs: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
}

/// Maps FUSE inode numbers to the paths the core filesystem resolves by.
/// `fuser` is inode-addressed; `wfs`'s operation surface is path-addressed
/// (spec §5), so every callback that hands out a new inode number to the
/// kernel records the path it corresponds to here.
struct PathTable {
    by_ino: HashMap<u64, String>,
}

impl PathTable {
    fn new() -> Self {
        let mut by_ino = HashMap::new();
        by_ino.insert(FUSE_ROOT_INO, "/".to_string());
        PathTable { by_ino }
    }

    fn path(&self, ino: u64) -> Option<String> {
        self.by_ino.get(&ino).cloned()
    }

    fn remember(&mut self, ino: u64, path: String) {
        self.by_ino.insert(ino, path);
    }

    fn join(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }
}

struct WfsDaemon {
    fs: WfsFilesystem,
    paths: PathTable,
}

impl WfsDaemon {
    fn attr_to_fuse(&self, attr: Attr) -> FileAttr {
        let kind = if attr.mode & libc::S_IFDIR as u32 != 0 {
            FuseFileType::Directory
        } else {
            FuseFileType::RegularFile
        };

        FileAttr {
            ino: to_fuse_ino(attr.ino),
            size: attr.size,
            blocks: (attr.size + wfs::BLOCK_SIZE as u64 - 1) / wfs::BLOCK_SIZE as u64,
            atime: systime(attr.atim),
            mtime: systime(attr.mtim),
            ctime: systime(attr.ctim),
            crtime: systime(attr.ctim),
            kind,
            perm: (attr.mode & 0o7777) as u16,
            nlink: attr.nlinks,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: wfs::BLOCK_SIZE as u32,
            flags: 0,
        }
    }

    /// Resolves a FUSE inode to the path the core filesystem expects, or
    /// `None` if the kernel referenced an inode we never handed out.
    fn path_of(&self, ino: u64) -> Option<String> {
        if ino == fuser::FUSE_ROOT_ID {
            Some("/".to_string())
        } else {
            self.paths.path(ino)
        }
    }
}

impl FuseFilesystem for WfsDaemon {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let child_path = PathTable::join(&parent_path, name);

        match self.fs.getattr(&child_path) {
            Ok(attr) => {
                self.paths.remember(to_fuse_ino(attr.ino), child_path);
                reply.entry(&TTL, &self.attr_to_fuse(attr), 0);
            }
            Err(e) => reply.error(errno_for(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &self.attr_to_fuse(attr)),
            Err(e) => reply.error(errno_for(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::EINVAL);
            return;
        };

        if let Some(new_size) = size {
            if let Err(e) = self.fs.truncate(&path, new_size) {
                reply.error(errno_for(&e));
                return;
            }
        }

        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &self.attr_to_fuse(attr)),
            Err(e) => reply.error(errno_for(&e)),
        }
    }

    fn mkdir(&mut self, req: &Request, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let child_path = PathTable::join(&parent_path, name);

        match self.fs.mkdir(&child_path, mode, req.uid(), req.gid()) {
            Ok(child_ino) => {
                self.paths.remember(to_fuse_ino(child_ino), child_path.clone());
                let attr = self.fs.getattr(&child_path).expect("just-created inode must resolve");
                reply.entry(&TTL, &self.attr_to_fuse(attr), 0);
            }
            Err(e) => reply.error(errno_for(&e)),
        }
    }

    fn mknod(&mut self, req: &Request, parent: u64, name: &OsStr, mode: u32, _umask: u32, _rdev: u32, reply: ReplyEntry) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let child_path = PathTable::join(&parent_path, name);

        match self.fs.mknod(&child_path, mode, req.uid(), req.gid()) {
            Ok(child_ino) => {
                self.paths.remember(to_fuse_ino(child_ino), child_path.clone());
                let attr = self.fs.getattr(&child_path).expect("just-created inode must resolve");
                reply.entry(&TTL, &self.attr_to_fuse(attr), 0);
            }
            Err(e) => reply.error(errno_for(&e)),
        }
    }

    fn open(&mut self, _req: &Request, _ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        reply.opened(0, 0);
    }

    fn opendir(&mut self, _req: &Request, _ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        reply.opened(0, 0);
    }

    fn read(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, size: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyData) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.read(&path, size as usize, offset.max(0) as u64) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno_for(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, data: &[u8], _write_flags: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyWrite) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.write(&path, data, offset.max(0) as u64) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(errno_for(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.unlink(&PathTable::join(&parent_path, name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno_for(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let (Some(parent_path), Some(name)) = (self.path_of(parent), name.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.rmdir(&PathTable::join(&parent_path, name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno_for(&e)),
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::EINVAL);
            return;
        };

        let entries = match self.fs.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno_for(&e));
                return;
            }
        };

        for (i, (name, num)) in entries.iter().enumerate().skip(offset as usize) {
            if name != "." && name != ".." {
                self.paths.remember(to_fuse_ino(*num), PathTable::join(&path, name));
            }

            let kind = match self.fs.read_inode(*num) {
                Ok(inode) if inode.is_dir() => FuseFileType::Directory,
                Ok(_) => FuseFileType::RegularFile,
                Err(e) => {
                    warn!("readdir: corrupt entry {name} in {path}: {e}");
                    continue;
                }
            };

            if reply.add(to_fuse_ino(*num), (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }
}

#[derive(Parser, Debug)]
#[command(about = "Mounts a RAID-backed filesystem image over a directory")]
struct Args {
    /// Backing disk files followed by the mount point (last positional argument)
    #[arg(required = true, num_args = 2..)]
    paths: Vec<String>,

    /// Run in the foreground instead of daemonizing
    #[arg(short = 'f', long)]
    foreground: bool,
}

fn probe_and_sort_disks(disk_paths: &[String]) -> Result<DiskArray, String> {
    let mut probed = Vec::with_capacity(disk_paths.len());

    for path in disk_paths {
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(|e| format!("{path}: {e}"))?;
        let mmap = unsafe { memmap2::MmapMut::map_mut(&file).map_err(|e| format!("{path}: {e}"))? };
        let disk = Disk::from_mmap(mmap);

        let single = DiskArray::new(vec![disk]);
        let sb = SuperBlock::read_unverified(&single).map_err(|e| format!("{path}: {e}"))?;
        let mut disks = single.into_disks();
        probed.push((sb.disk_index, disks.pop().expect("single-disk array")));
    }

    probed.sort_by_key(|(index, _)| *index);
    Ok(DiskArray::new(probed.into_iter().map(|(_, disk)| disk).collect()))
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mountpoint = args.paths.last().expect("clap enforces >= 2 positionals").clone();
    let disk_paths = &args.paths[..args.paths.len() - 1];

    let disks = match probe_and_sort_disks(disk_paths) {
        Ok(disks) => disks,
        Err(e) => {
            error!("failed to probe disks: {e}");
            std::process::exit(1);
        }
    };

    let fs = match WfsFilesystem::mount(disks) {
        Ok(fs) => fs,
        Err(e) => {
            error!("mount failed: {e}");
            std::process::exit(1);
        }
    };

    let mut options = vec![MountOption::FSName("wfs".to_string())];
    if args.foreground {
        options.push(MountOption::AutoUnmount);
    }

    let daemon = WfsDaemon { fs, paths: PathTable::new() };
    info!("mounting {} disk(s) at {mountpoint}", disk_paths.len());

    if let Err(e) = fuser::mount2(daemon, &mountpoint, &options) {
        error!("fuse session ended with error: {e}");
        std::process::exit(1);
    }
}
