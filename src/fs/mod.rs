//! The filesystem dispatcher: adapts the kernel's mutable-inode protocol to
//! the store's opaque-id, write-once object model.
//!
//! Per-file logical states are NoHandle, OpenForRead, and OpenForWrite. The
//! namespace is flat (one root, flat children), objects are immutable once
//! finalized, and modifications are emulated by writing new versions under
//! the same filename.

mod attrs;
mod handle_table;
mod inode_bridge;
pub mod mount;

pub use mount::mount_foreground;

use fuser::{
    FileAttr, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
    FUSE_ROOT_ID,
};
use std::ffi::OsStr;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::{GridFuseError, Result};
use crate::store::{read_up_to, ObjectStore, DEFAULT_CHUNK_SIZE};
use attrs::{project, root_attr};
use handle_table::{HandleTable, Session};
use inode_bridge::InodeBridge;

/// Attribute and entry cache timeout. Zero: every kernel query revalidates
/// against the store, so out-of-band mutation is observed immediately at
/// the cost of a round-trip per call.
const TTL: Duration = Duration::ZERO;

/// Cross-cutting call trace applied at the dispatch boundary.
fn trace_op(op: &str, args: fmt::Arguments<'_>) {
    tracing::debug!(target: "gridfuse::ops", "{}({})", op, args);
}

pub struct GridFs {
    store: Arc<dyn ObjectStore>,
    inodes: InodeBridge,
    handles: HandleTable,
    uid: u32,
    gid: u32,
    mounted_at: SystemTime,
}

impl GridFs {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        GridFs {
            store,
            inodes: InodeBridge::new(),
            handles: HandleTable::new(),
            // Single-tenant mount: every object reports the mount
            // process's effective ids.
            uid: unsafe { libc::geteuid() },
            gid: unsafe { libc::getegid() },
            mounted_at: SystemTime::now(),
        }
    }

    fn name_to_str<'a>(&self, name: &'a OsStr) -> Result<&'a str> {
        name.to_str()
            .ok_or_else(|| GridFuseError::InvalidName(name.to_os_string()))
    }

    /// Resolve `name` under the flat root to its most recently uploaded
    /// version, binding an inode on first reference.
    pub fn lookup_entry(&self, parent: u64, name: &OsStr) -> Result<FileAttr> {
        if parent != FUSE_ROOT_ID {
            return Err(GridFuseError::NotFound(format!(
                "parent inode {parent} is not the root; the namespace is flat"
            )));
        }
        let name = self.name_to_str(name)?;
        let session = self.store.open_latest(name)?;
        let meta = session.meta().clone();
        let ino = self.inodes.inode_for(meta.id);
        Ok(project(&meta, ino, self.uid, self.gid))
    }

    /// Current attributes of `ino`, revalidated against the store.
    pub fn attr_of(&self, ino: u64) -> Result<FileAttr> {
        if ino == FUSE_ROOT_ID {
            return Ok(root_attr(
                self.uid,
                self.gid,
                self.mounted_at,
                DEFAULT_CHUNK_SIZE as u32,
            ));
        }
        let id = self.inodes.object_for(ino)?;
        let session = self.store.open_by_id(id)?;
        Ok(project(session.meta(), ino, self.uid, self.gid))
    }

    /// Create a committed zero-length file under the root and leave its
    /// (already finalized) write session bound to the returned handle. A
    /// later write on the handle starts a fresh version.
    pub fn create_file(&self, parent: u64, name: &OsStr) -> Result<(u64, FileAttr)> {
        if parent != FUSE_ROOT_ID {
            return Err(GridFuseError::NotFound(format!(
                "parent inode {parent} is not the root; the namespace is flat"
            )));
        }
        let name = self.name_to_str(name)?;
        let mut session = self.store.create_object(name)?;
        let meta = session.close()?;
        let ino = self.inodes.inode_for(meta.id);
        self.handles.put(ino, Session::Write(session));
        Ok((ino, project(&meta, ino, self.uid, self.gid)))
    }

    /// Open a read session over `ino`. The handle is the inode number, so
    /// an open of the same object replaces the cached session; if that
    /// session was a pending write, it is finalized first so the read
    /// observes it.
    pub fn open_file(&self, ino: u64) -> Result<u64> {
        let pending = match self.handles.get(ino) {
            Ok(slot) => {
                let mut session = slot.lock();
                match &mut *session {
                    Session::Write(w) => Some(w.close()?),
                    Session::Read(_) => None,
                }
            }
            Err(_) => None,
        };

        let session = match pending {
            Some(committed) => self.store.open_by_id(committed.id)?,
            None => {
                let id = self.inodes.object_for(ino)?;
                self.store.open_by_id(id)?
            }
        };
        self.handles.put(ino, Session::Read(session));
        Ok(ino)
    }

    /// Read up to `size` bytes at `offset`. Each call seeks independently;
    /// there is no sequential cursor across calls.
    ///
    /// If the handle still holds a write session, that pending write is
    /// finalized first and replaced with a read session over the committed
    /// object, so bytes written without an intervening close are the bytes
    /// read back.
    pub fn read_at(&self, fh: u64, offset: u64, size: u32) -> Result<Vec<u8>> {
        let slot = self.handles.get(fh)?;
        let mut session = slot.lock();

        if let Session::Write(w) = &mut *session {
            let committed = w.close()?;
            *session = Session::Read(self.store.open_by_id(committed.id)?);
        }
        let reader = match &mut *session {
            Session::Read(r) => r,
            Session::Write(_) => return Err(GridFuseError::StaleHandle(fh)),
        };

        reader.seek(offset);
        read_up_to(reader.as_mut(), size as u64)
    }

    /// Accept `data` on the handle. The store forbids in-place
    /// modification, so three cases apply:
    ///
    /// 1. handle holds a read session: copy the first `offset` bytes of
    ///    the existing content into a new object under the same filename,
    ///    append `data`, and bind the new write session (read-modify-write
    ///    by copy + new version);
    /// 2. handle holds a finalized write session: start a fresh version
    ///    under the same filename rather than erroring;
    /// 3. otherwise append at the open session's cursor. Offsets are
    ///    assumed append-ordered; mid-stream rewrites are unsupported.
    pub fn write_at(&self, fh: u64, offset: u64, data: &[u8]) -> Result<u32> {
        let slot = self.handles.get(fh)?;
        let mut session = slot.lock();

        match &mut *session {
            Session::Read(reader) => {
                reader.seek(0);
                let prefix = read_up_to(reader.as_mut(), offset)?;
                let name = reader.meta().filename.clone();
                let mut writer = self.store.create_object(&name)?;
                writer.append(&prefix)?;
                writer.append(data)?;
                *session = Session::Write(writer);
            }
            Session::Write(writer) => {
                if writer.is_closed() {
                    let name = writer.meta().filename.clone();
                    *writer = self.store.create_object(&name)?;
                }
                writer.append(data)?;
            }
        }
        Ok(data.len() as u32)
    }

    /// Finalize the bound write session, committing it as an immutable
    /// version. Idempotent; a no-op on read sessions.
    pub fn flush_handle(&self, fh: u64) -> Result<()> {
        let slot = self.handles.get(fh)?;
        let mut session = slot.lock();
        if let Session::Write(w) = &mut *session {
            w.close()?;
        }
        Ok(())
    }

    /// Drop the handle. Does not flush: release cannot report write
    /// errors, so callers must flush first if persistence matters.
    pub fn release_handle(&self, fh: u64) {
        self.handles.remove(fh);
    }

    /// Drop the inode mapping. Only called once the kernel holds no more
    /// references to `ino`.
    pub fn forget_inode(&self, ino: u64) {
        self.inodes.forget(ino);
    }

    /// Attribute mutation is a documented no-op: echo current attributes.
    pub fn echo_attr(&self, ino: u64) -> Result<FileAttr> {
        self.attr_of(ino)
    }

    /// Drop all live sessions and close the store connection. Invoked once
    /// at mount teardown, even on abnormal dispatch-loop exit.
    pub fn teardown(&self) {
        let dropped = self.handles.drain().len();
        if dropped > 0 {
            tracing::warn!("Dropping {} session(s) still open at teardown", dropped);
        }
        if let Err(e) = self.store.close() {
            tracing::warn!("Failed to close store connection: {}", e);
        }
    }
}

impl Filesystem for GridFs {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        tracing::info!("gridfuse filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        trace_op("destroy", format_args!(""));
        self.teardown();
        tracing::info!("gridfuse filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace_op("lookup", format_args!("parent={}, name={:?}", parent, name));
        match self.lookup_entry(parent, name) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        trace_op("forget", format_args!("ino={}, nlookup={}", ino, nlookup));
        self.forget_inode(ino);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace_op("getattr", format_args!("ino={}", ino));
        match self.attr_of(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
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
        trace_op(
            "setattr",
            format_args!("ino={}, mode={:?}, size={:?}", ino, mode, size),
        );
        // chmod/truncate/utimes are accepted but not persisted: objects are
        // immutable and modes are fixed. Echo the current attributes.
        match self.echo_attr(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        trace_op(
            "create",
            format_args!("parent={}, name={:?}, mode={:#o}", parent, name, mode),
        );
        match self.create_file(parent, name) {
            Ok((fh, attr)) => reply.created(&TTL, &attr, 0, fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        trace_op("open", format_args!("ino={}, flags={:#x}", ino, flags));
        // Always opens a read session at offset 0; a first write converts
        // it via the copy-forward path in write_at.
        match self.open_file(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace_op(
            "read",
            format_args!("ino={}, fh={}, offset={}, size={}", ino, fh, offset, size),
        );
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.read_at(fh, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace_op(
            "write",
            format_args!("ino={}, fh={}, offset={}, len={}", ino, fh, offset, data.len()),
        );
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.write_at(fh, offset as u64, data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace_op("flush", format_args!("ino={}, fh={}", ino, fh));
        match self.flush_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace_op("release", format_args!("ino={}, fh={}", ino, fh));
        self.release_handle(fh);
        reply.ok();
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace_op("access", format_args!("ino={}, mask={:#o}", ino, mask));
        // Fixed bits, single tenant: no enforcement here.
        reply.ok();
    }

    // Everything below is outside the supported operation set: the
    // namespace is permanently flat and objects are immutable-versioned
    // blobs. Each replies ENOSYS explicitly rather than relying on trait
    // defaults.

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        trace_op("mknod", format_args!("parent={}, name={:?}", parent, name));
        reply.error(GridFuseError::NotSupported("mknod").errno());
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace_op("mkdir", format_args!("parent={}, name={:?}", parent, name));
        reply.error(GridFuseError::NotSupported("mkdir").errno());
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace_op("unlink", format_args!("parent={}, name={:?}", parent, name));
        reply.error(GridFuseError::NotSupported("unlink").errno());
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace_op("rmdir", format_args!("parent={}, name={:?}", parent, name));
        reply.error(GridFuseError::NotSupported("rmdir").errno());
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        link: &std::path::Path,
        reply: ReplyEntry,
    ) {
        trace_op(
            "symlink",
            format_args!("parent={}, name={:?}, link={:?}", parent, name, link),
        );
        reply.error(GridFuseError::NotSupported("symlink").errno());
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        trace_op("readlink", format_args!("ino={}", ino));
        reply.error(GridFuseError::NotSupported("readlink").errno());
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        trace_op(
            "rename",
            format_args!(
                "parent={}, name={:?}, newparent={}, newname={:?}",
                parent, name, newparent, newname
            ),
        );
        reply.error(GridFuseError::NotSupported("rename").errno());
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        trace_op(
            "link",
            format_args!("ino={}, newparent={}, newname={:?}", ino, newparent, newname),
        );
        reply.error(GridFuseError::NotSupported("link").errno());
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace_op("opendir", format_args!("ino={}", ino));
        reply.error(GridFuseError::NotSupported("opendir").errno());
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        trace_op("readdir", format_args!("ino={}, offset={}", ino, offset));
        reply.error(GridFuseError::NotSupported("readdir").errno());
    }

    fn releasedir(&mut self, _req: &Request, ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        trace_op("releasedir", format_args!("ino={}", ino));
        reply.error(GridFuseError::NotSupported("releasedir").errno());
    }

    fn fsync(&mut self, _req: &Request, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        trace_op("fsync", format_args!("ino={}, fh={}", ino, fh));
        reply.error(GridFuseError::NotSupported("fsync").errno());
    }

    fn fsyncdir(&mut self, _req: &Request, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        trace_op("fsyncdir", format_args!("ino={}, fh={}", ino, fh));
        reply.error(GridFuseError::NotSupported("fsyncdir").errno());
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        trace_op("statfs", format_args!("ino={}", ino));
        reply.error(GridFuseError::NotSupported("statfs").errno());
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        trace_op("setxattr", format_args!("ino={}, name={:?}", ino, name));
        reply.error(GridFuseError::NotSupported("setxattr").errno());
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, _size: u32, reply: ReplyXattr) {
        trace_op("getxattr", format_args!("ino={}, name={:?}", ino, name));
        reply.error(GridFuseError::NotSupported("getxattr").errno());
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, _size: u32, reply: ReplyXattr) {
        trace_op("listxattr", format_args!("ino={}", ino));
        reply.error(GridFuseError::NotSupported("listxattr").errno());
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        trace_op("removexattr", format_args!("ino={}, name={:?}", ino, name));
        reply.error(GridFuseError::NotSupported("removexattr").errno());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    fn fs() -> GridFs {
        GridFs::new(Arc::new(MemoryStore::default()))
    }

    #[test]
    fn test_root_attr_is_directory_with_process_ids() {
        let fs = fs();
        let attr = fs.attr_of(FUSE_ROOT_ID).unwrap();
        assert_eq!(attr.kind, fuser::FileType::Directory);
        assert_eq!(attr.uid, unsafe { libc::geteuid() });
        assert_eq!(attr.gid, unsafe { libc::getegid() });
    }

    #[test]
    fn test_getattr_unknown_inode_is_not_found() {
        let fs = fs();
        assert!(matches!(fs.attr_of(42), Err(GridFuseError::NotFound(_))));
    }

    #[test]
    fn test_read_on_unopened_handle_is_stale() {
        let fs = fs();
        assert!(matches!(
            fs.read_at(5, 0, 16),
            Err(GridFuseError::StaleHandle(5))
        ));
        assert!(matches!(
            fs.write_at(5, 0, b"x"),
            Err(GridFuseError::StaleHandle(5))
        ));
        assert!(matches!(
            fs.flush_handle(5),
            Err(GridFuseError::StaleHandle(5))
        ));
    }

    #[test]
    fn test_non_utf8_name_is_rejected() {
        let fs = fs();
        let bad = OsString::from_vec(vec![0x66, 0x6f, 0x80]);
        assert!(matches!(
            fs.create_file(FUSE_ROOT_ID, &bad),
            Err(GridFuseError::InvalidName(_))
        ));
    }

    #[test]
    fn test_setattr_echoes_current_attributes() {
        let fs = fs();
        let (fh, attr) = fs.create_file(FUSE_ROOT_ID, OsStr::new("a.txt")).unwrap();
        let echoed = fs.echo_attr(attr.ino).unwrap();
        assert_eq!(echoed.size, attr.size);
        assert_eq!(echoed.perm, attr.perm);
        fs.release_handle(fh);
    }

    #[test]
    fn test_release_does_not_commit_pending_write() {
        let fs = fs();
        let (fh, _) = fs.create_file(FUSE_ROOT_ID, OsStr::new("a.txt")).unwrap();
        fs.write_at(fh, 0, b"never flushed").unwrap();
        fs.release_handle(fh);

        // Only the zero-length create commit is visible.
        let attr = fs.lookup_entry(FUSE_ROOT_ID, OsStr::new("a.txt")).unwrap();
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn test_teardown_closes_store_and_drops_sessions() {
        let store = Arc::new(MemoryStore::default());
        let fs = GridFs::new(store.clone());
        let (_fh, _) = fs.create_file(FUSE_ROOT_ID, OsStr::new("a.txt")).unwrap();
        fs.teardown();
        assert!(store.create_object("b.txt").is_err());
    }
}
