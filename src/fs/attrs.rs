use fuser::{FileAttr, FileType, FUSE_ROOT_ID};
use std::time::SystemTime;

use crate::store::ObjectMeta;

/// Fixed mode for every stored object: owner read/write, group read,
/// other read. The store has no per-object ownership or execute semantics.
const FILE_MODE: u16 = 0o644;

/// Project object metadata into the kernel attribute shape.
///
/// Pure function, recomputed per call and never cached: the dispatcher
/// replies with zero attribute/entry TTLs so every kernel query revalidates
/// against the store.
pub(crate) fn project(meta: &ObjectMeta, ino: u64, uid: u32, gid: u32) -> FileAttr {
    let uploaded: SystemTime = meta.upload_time.into();
    FileAttr {
        ino,
        size: meta.length,
        blocks: block_count(meta.length, meta.chunk_size),
        atime: uploaded,
        mtime: uploaded,
        ctime: uploaded,
        crtime: uploaded,
        kind: FileType::RegularFile,
        perm: FILE_MODE,
        nlink: meta.aliases.len() as u32 + 1,
        uid,
        gid,
        rdev: 0,
        blksize: meta.chunk_size as u32,
        flags: 0,
    }
}

/// ceil(length / chunk_size), minimum 1 - an empty file still occupies one
/// block for accounting purposes.
fn block_count(length: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 1;
    }
    length.div_ceil(chunk_size).max(1)
}

/// Synthesized attributes for the mount root. The store has no object for
/// the root; the flat namespace hangs off this single directory.
pub(crate) fn root_attr(uid: u32, gid: u32, mounted_at: SystemTime, blksize: u32) -> FileAttr {
    FileAttr {
        ino: FUSE_ROOT_ID,
        size: 0,
        blocks: 0,
        atime: mounted_at,
        mtime: mounted_at,
        ctime: mounted_at,
        crtime: mounted_at,
        kind: FileType::Directory,
        perm: 0o755,
        nlink: 2,
        uid,
        gid,
        rdev: 0,
        blksize,
        flags: 0,
    }
}
