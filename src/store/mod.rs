//! Storage client contract for the chunked object store.
//!
//! Objects are write-once: a `WriteSession` accepts appends until it is
//! closed, at which point the object becomes an immutable version under its
//! filename. Later versions under the same filename supersede earlier ones
//! for `open_latest`, but old versions stay addressable by id.

pub mod localfs;
pub mod memory;

pub use localfs::LocalFsStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{GridFuseError, Result};

/// Conventional chunk size for GridFS-style stores (255 KiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 255 * 1024;

/// Opaque 12-byte object key: 4 bytes of unix seconds followed by 8 bytes
/// of a process-global counter. Rendered as 24 hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

static NEXT_OBJECT_SEQ: AtomicU64 = AtomicU64::new(1);

impl ObjectId {
    pub fn generate() -> Self {
        let secs = Utc::now().timestamp().max(0) as u32;
        let seq = NEXT_OBJECT_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..].copy_from_slice(&seq.to_be_bytes());
        ObjectId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

impl FromStr for ObjectId {
    type Err = GridFuseError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 24 || !s.is_ascii() {
            return Err(GridFuseError::Storage(format!("bad object id: {s:?}")));
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk)
                .map_err(|_| GridFuseError::Storage(format!("bad object id: {s:?}")))?;
            bytes[i] = u8::from_str_radix(hex, 16)
                .map_err(|_| GridFuseError::Storage(format!("bad object id: {s:?}")))?;
        }
        Ok(ObjectId(bytes))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Metadata document describing one stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub id: ObjectId,
    pub filename: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub length: u64,
    pub chunk_size: u64,
    pub upload_time: DateTime<Utc>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Read access to a finalized object. Each `seek` positions the cursor
/// absolutely; `read` advances it.
pub trait ReadSession: Send {
    fn meta(&self) -> &ObjectMeta;

    fn seek(&mut self, pos: u64);

    /// Read up to `buf.len()` bytes at the current cursor. Returns 0 at
    /// end of data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Append access to an object that has not been finalized yet. `close`
/// commits the object as an immutable version and is idempotent.
pub trait WriteSession: Send {
    fn meta(&self) -> &ObjectMeta;

    fn append(&mut self, data: &[u8]) -> Result<()>;

    fn close(&mut self) -> Result<ObjectMeta>;

    fn is_closed(&self) -> bool;
}

/// The backing-store contract consumed by the filesystem dispatcher.
///
/// Implementations own versioning: multiple objects may share a filename,
/// and `open_latest` resolves to the most recently uploaded one.
pub trait ObjectStore: Send + Sync {
    /// Begin a new object under `name`. The object is invisible to
    /// `open_latest` until its write session is closed.
    fn create_object(&self, name: &str) -> Result<Box<dyn WriteSession>>;

    /// Open the most recently uploaded version of `name`.
    fn open_latest(&self, name: &str) -> Result<Box<dyn ReadSession>>;

    /// Open a specific object by id, regardless of supersedence.
    fn open_by_id(&self, id: ObjectId) -> Result<Box<dyn ReadSession>>;

    /// Release the store connection. Called once at mount teardown.
    fn close(&self) -> Result<()>;
}

/// Drain up to `len` bytes from a read session, stopping early at end of
/// data. Used by the write-emulation path to copy an existing prefix.
pub fn read_up_to(session: &mut dyn ReadSession, len: u64) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len.min(1 << 20) as usize);
    let mut buf = [0u8; 64 * 1024];
    while (out.len() as u64) < len {
        let want = ((len - out.len() as u64) as usize).min(buf.len());
        let n = session.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}
