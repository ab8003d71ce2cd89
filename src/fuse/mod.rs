//! fuser binding for a [`FileSystem`].
//!
//! The kernel addresses nodes by inode; the adapter maps every inode to the
//! path it was first seen under and resolves that path on each call, so tree
//! refreshes never invalidate an inode. This is also the only place where
//! [`FsError`]s become errno values.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use fuser::{
    BackgroundSession, FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyWrite, Request, FUSE_ROOT_ID,
};
use libc::{ENOENT, ENOSYS};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info};
use crate::error::FsError;
use crate::fs::{DirEntry, FileMetadata, FileSystem};

const TTL: Duration = Duration::from_secs(1);

struct InodeTable {
    path_to_ino: HashMap<PathBuf, u64>,
    ino_to_path: HashMap<u64, PathBuf>,
    next_ino: u64,
}

impl InodeTable {
    fn new() -> Self {
        let root_path = PathBuf::from("/");
        let mut path_to_ino = HashMap::new();
        let mut ino_to_path = HashMap::new();
        path_to_ino.insert(root_path.clone(), FUSE_ROOT_ID);
        ino_to_path.insert(FUSE_ROOT_ID, root_path);
        Self {
            path_to_ino,
            ino_to_path,
            next_ino: FUSE_ROOT_ID + 1,
        }
    }
}

struct FuseState {
    fs: Arc<dyn FileSystem>,
    inodes: Mutex<InodeTable>,
    uid: u32,
    gid: u32,
}

impl FuseState {
    fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            inodes: Mutex::new(InodeTable::new()),
            uid: rustix::process::getuid().as_raw(),
            gid: rustix::process::getgid().as_raw(),
        }
    }

    fn make_file_attr(&self, ino: u64, metadata: &FileMetadata) -> FileAttr {
        let size = metadata.size;
        FileAttr {
            ino,
            size,
            blocks: (size + 511) / 512,
            atime: metadata.modified,
            mtime: metadata.modified,
            ctime: metadata.modified,
            crtime: metadata.modified,
            kind: file_type(metadata.is_dir),
            perm: metadata.permissions as u16,
            nlink: if metadata.is_dir { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            flags: 0,
            blksize: 512,
        }
    }

    fn get_path(&self, ino: u64, name: Option<&OsStr>) -> Option<PathBuf> {
        let inodes = self.inodes.lock();
        let mut path = inodes.ino_to_path.get(&ino)?.clone();
        if let Some(name) = name {
            path.push(name);
        }
        Some(path)
    }

    fn parent_ino(&self, path: &Path) -> Option<u64> {
        let parent = path.parent()?;
        self.inodes.lock().path_to_ino.get(parent).copied()
    }

    fn allocate_ino(&self, path: PathBuf) -> u64 {
        let mut inodes = self.inodes.lock();
        if let Some(&ino) = inodes.path_to_ino.get(&path) {
            return ino;
        }

        let ino = inodes.next_ino;
        inodes.next_ino += 1;
        inodes.path_to_ino.insert(path.clone(), ino);
        debug!("allocate_ino: new ino={} for path={:?}", ino, path);
        inodes.ino_to_path.insert(ino, path);
        ino
    }

    /// Entries of `dir` from `offset` on, as (ino, next offset, kind, name).
    fn directory_page(
        &self,
        dir: &Path,
        ino: u64,
        entries: Vec<DirEntry>,
        offset: i64,
    ) -> Vec<(u64, i64, FileType, String)> {
        let skip = usize::try_from(offset).unwrap_or(0);
        entries
            .into_iter()
            .enumerate()
            .skip(skip)
            .map(|(i, entry)| {
                let entry_ino = match entry.name.as_str() {
                    "." => ino,
                    ".." => self.parent_ino(dir).unwrap_or(ino),
                    name => self.allocate_ino(dir.join(name)),
                };
                (entry_ino, (i + 1) as i64, file_type(entry.is_dir), entry.name)
            })
            .collect()
    }
}

/// The mount is read-only; only existence is checked for other masks.
fn check_access(mask: i32) -> Result<(), i32> {
    if mask & libc::W_OK != 0 {
        Err(libc::EACCES)
    } else {
        Ok(())
    }
}

fn file_type(is_dir: bool) -> FileType {
    if is_dir {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}

fn errno(op: &str, path: &Path, e: &FsError) -> i32 {
    match e {
        FsError::NotFound(_) => debug!("{}: no such entry {:?}", op, path),
        _ => error!("{} error for path={:?}: {}", op, path, e),
    }
    e.to_errno()
}

pub struct FuseAdapter {
    state: Arc<FuseState>,
    runtime: Handle,
}

impl FuseAdapter {
    pub fn new(fs: Arc<dyn FileSystem>, runtime: Handle) -> Self {
        Self {
            state: Arc::new(FuseState::new(fs)),
            runtime,
        }
    }

    fn options() -> Vec<MountOption> {
        vec![
            MountOption::RO,
            MountOption::FSName("portalfs".to_string()),
            MountOption::NoExec,
        ]
    }

    /// Mounts in a background thread; dropping the session unmounts.
    pub fn spawn_mount(self, mount_point: &Path) -> std::io::Result<BackgroundSession> {
        info!("Mounting FUSE filesystem at {:?}", mount_point);
        fuser::spawn_mount2(self, mount_point, &Self::options())
    }

    /// Each operation runs as its own task so slow fetches do not block
    /// unrelated requests.
    fn spawn<F>(&self, op: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(op);
    }
}

impl Filesystem for FuseAdapter {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.state.get_path(parent, Some(name)) else {
            reply.error(ENOENT);
            return;
        };
        debug!("lookup: {:?}", path);
        let state = Arc::clone(&self.state);
        self.spawn(async move {
            match state.fs.get_metadata(&path).await {
                Ok(metadata) => {
                    let ino = state.allocate_ino(path);
                    reply.entry(&TTL, &state.make_file_attr(ino, &metadata), 0);
                }
                Err(e) => reply.error(errno("lookup", &path, &e)),
            }
        });
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.state.get_path(ino, None) else {
            reply.error(ENOENT);
            return;
        };
        debug!("getattr: ino={} path={:?}", ino, path);
        let state = Arc::clone(&self.state);
        self.spawn(async move {
            match state.fs.get_metadata(&path).await {
                Ok(metadata) => reply.attr(&TTL, &state.make_file_attr(ino, &metadata)),
                Err(e) => reply.error(errno("getattr", &path, &e)),
            }
        });
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.state.get_path(ino, None) else {
            reply.error(ENOENT);
            return;
        };
        debug!("access: {:?}, mask={:o}", path, mask);
        let state = Arc::clone(&self.state);
        self.spawn(async move {
            match state.fs.access(&path).await.map(|()| check_access(mask)) {
                Ok(Ok(())) => reply.ok(),
                Ok(Err(code)) => reply.error(code),
                Err(e) => reply.error(errno("access", &path, &e)),
            }
        });
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.state.get_path(ino, None) else {
            reply.error(ENOENT);
            return;
        };
        debug!("readdir: {:?}, offset={}", path, offset);
        let state = Arc::clone(&self.state);
        self.spawn(async move {
            let entries = match state.fs.list_directory(&path).await {
                Ok(entries) => entries,
                Err(e) => {
                    reply.error(errno("readdir", &path, &e));
                    return;
                }
            };

            for (entry_ino, next, kind, name) in state.directory_page(&path, ino, entries, offset) {
                if reply.add(entry_ino, next, kind, &name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.state.get_path(ino, None) else {
            reply.error(ENOENT);
            return;
        };
        debug!("read: {:?}, offset={}, size={}", path, offset, size);
        let state = Arc::clone(&self.state);
        self.spawn(async move {
            let offset = u64::try_from(offset).unwrap_or(0);
            match state.fs.read_file(&path, offset, size).await {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(errno("read", &path, &e)),
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write: ino={} declined", ino);
        reply.error(ENOSYS);
    }

    fn create(
        &mut self,
        _req: &Request,
        _parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create: {:?} declined", name);
        reply.error(ENOSYS);
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        _parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir: {:?} declined", name);
        reply.error(ENOSYS);
    }

    fn unlink(&mut self, _req: &Request, _parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink: {:?} declined", name);
        reply.error(ENOSYS);
    }

    fn rmdir(&mut self, _req: &Request, _parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir: {:?} declined", name);
        reply.error(ENOSYS);
    }

    fn rename(
        &mut self,
        _req: &Request,
        _parent: u64,
        name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!("rename: {:?} declined", name);
        reply.error(ENOSYS);
    }
}
