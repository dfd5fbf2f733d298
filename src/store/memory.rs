//! In-memory chunked object store.
//!
//! Backs unit tests and `--memory` scratch mounts. Objects are chunked the
//! same way the persistent backends chunk them so block accounting behaves
//! identically, but nothing survives the process.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GridFuseError, Result};
use crate::store::{
    ObjectId, ObjectMeta, ObjectStore, ReadSession, WriteSession, DEFAULT_CHUNK_SIZE,
};

struct StoredObject {
    meta: ObjectMeta,
    chunks: Vec<Vec<u8>>,
}

#[derive(Default)]
struct MemoryInner {
    objects: HashMap<ObjectId, Arc<StoredObject>>,
    /// Version ids per filename, in upload order. Last entry wins for
    /// `open_latest`.
    versions: HashMap<String, Vec<ObjectId>>,
}

pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    chunk_size: u64,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new(chunk_size: u64) -> Self {
        MemoryStore {
            inner: Arc::new(Mutex::new(MemoryInner::default())),
            chunk_size,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GridFuseError::Storage("store connection closed".to_string()));
        }
        Ok(())
    }

    /// Number of committed versions under `name`. Test hook; the binary
    /// target never calls it.
    #[allow(dead_code)]
    pub fn version_count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .versions
            .get(name)
            .map_or(0, |v| v.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ObjectStore for MemoryStore {
    fn create_object(&self, name: &str) -> Result<Box<dyn WriteSession>> {
        self.ensure_open()?;
        let meta = ObjectMeta {
            id: ObjectId::generate(),
            filename: name.to_string(),
            aliases: Vec::new(),
            length: 0,
            chunk_size: self.chunk_size,
            upload_time: Utc::now(),
            content_type: None,
        };
        Ok(Box::new(MemoryWriter {
            inner: Arc::clone(&self.inner),
            meta,
            chunks: Vec::new(),
            closed: false,
        }))
    }

    fn open_latest(&self, name: &str) -> Result<Box<dyn ReadSession>> {
        self.ensure_open()?;
        let inner = self.inner.lock();
        let id = inner
            .versions
            .get(name)
            .and_then(|v| v.last().copied())
            .ok_or_else(|| GridFuseError::NotFound(format!("no object named {name:?}")))?;
        let object = Arc::clone(&inner.objects[&id]);
        Ok(Box::new(MemoryReader { object, pos: 0 }))
    }

    fn open_by_id(&self, id: ObjectId) -> Result<Box<dyn ReadSession>> {
        self.ensure_open()?;
        let inner = self.inner.lock();
        let object = inner
            .objects
            .get(&id)
            .cloned()
            .ok_or_else(|| GridFuseError::NotFound(format!("no object with id {id}")))?;
        Ok(Box::new(MemoryReader { object, pos: 0 }))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MemoryReader {
    object: Arc<StoredObject>,
    pos: u64,
}

impl ReadSession for MemoryReader {
    fn meta(&self) -> &ObjectMeta {
        &self.object.meta
    }

    fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let meta = &self.object.meta;
        if self.pos >= meta.length {
            return Ok(0);
        }
        let mut copied = 0;
        while copied < buf.len() && self.pos < meta.length {
            let chunk_idx = (self.pos / meta.chunk_size) as usize;
            let offset = (self.pos % meta.chunk_size) as usize;
            let chunk = &self.object.chunks[chunk_idx];
            let available = chunk.len() - offset;
            let n = available.min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&chunk[offset..offset + n]);
            copied += n;
            self.pos += n as u64;
        }
        Ok(copied)
    }
}

struct MemoryWriter {
    inner: Arc<Mutex<MemoryInner>>,
    meta: ObjectMeta,
    chunks: Vec<Vec<u8>>,
    closed: bool,
}

impl WriteSession for MemoryWriter {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(GridFuseError::Storage(format!(
                "object {} already finalized",
                self.meta.id
            )));
        }
        let chunk_size = self.meta.chunk_size as usize;
        let mut rest = data;
        while !rest.is_empty() {
            let needs_new = self.chunks.last().is_none_or(|c| c.len() >= chunk_size);
            if needs_new {
                self.chunks
                    .push(Vec::with_capacity(chunk_size.min(rest.len())));
            }
            let last = self.chunks.last_mut().expect("chunk pushed above");
            let n = (chunk_size - last.len()).min(rest.len());
            last.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
        }
        self.meta.length += data.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<ObjectMeta> {
        if !self.closed {
            self.meta.upload_time = Utc::now();
            let object = StoredObject {
                meta: self.meta.clone(),
                chunks: std::mem::take(&mut self.chunks),
            };
            let mut inner = self.inner.lock();
            inner.objects.insert(self.meta.id, Arc::new(object));
            inner
                .versions
                .entry(self.meta.filename.clone())
                .or_default()
                .push(self.meta.id);
            self.closed = true;
        }
        Ok(self.meta.clone())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::read_up_to;

    fn put(store: &MemoryStore, name: &str, data: &[u8]) -> ObjectMeta {
        let mut w = store.create_object(name).unwrap();
        w.append(data).unwrap();
        w.close().unwrap()
    }

    #[test]
    fn test_write_then_read_back() {
        let store = MemoryStore::new(4);
        let meta = put(&store, "a.txt", b"hello world");
        assert_eq!(meta.length, 11);

        let mut r = store.open_latest("a.txt").unwrap();
        assert_eq!(r.meta().id, meta.id);
        let data = read_up_to(r.as_mut(), 64).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn test_read_spans_chunk_boundaries_from_offset() {
        let store = MemoryStore::new(3);
        put(&store, "a.txt", b"abcdefghij");

        let mut r = store.open_latest("a.txt").unwrap();
        r.seek(2);
        let mut buf = [0u8; 5];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"cdefg");
    }

    #[test]
    fn test_read_past_end_returns_zero() {
        let store = MemoryStore::default();
        put(&store, "a.txt", b"abc");

        let mut r = store.open_latest("a.txt").unwrap();
        r.seek(100);
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_latest_version_wins() {
        let store = MemoryStore::default();
        put(&store, "a.txt", b"old");
        let newer = put(&store, "a.txt", b"newer");

        let r = store.open_latest("a.txt").unwrap();
        assert_eq!(r.meta().id, newer.id);
        assert_eq!(store.version_count("a.txt"), 2);
    }

    #[test]
    fn test_superseded_version_still_addressable_by_id() {
        let store = MemoryStore::default();
        let old = put(&store, "a.txt", b"old");
        put(&store, "a.txt", b"newer");

        let mut r = store.open_by_id(old.id).unwrap();
        let data = read_up_to(r.as_mut(), 16).unwrap();
        assert_eq!(data, b"old");
    }

    #[test]
    fn test_unclosed_object_is_invisible() {
        let store = MemoryStore::default();
        let mut w = store.create_object("a.txt").unwrap();
        w.append(b"pending").unwrap();
        assert!(store.open_latest("a.txt").is_err());
        w.close().unwrap();
        assert!(store.open_latest("a.txt").is_ok());
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = MemoryStore::default();
        let mut w = store.create_object("a.txt").unwrap();
        w.append(b"x").unwrap();
        let first = w.close().unwrap();
        let second = w.close().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.version_count("a.txt"), 1);
    }

    #[test]
    fn test_append_after_close_fails() {
        let store = MemoryStore::default();
        let mut w = store.create_object("a.txt").unwrap();
        w.close().unwrap();
        assert!(w.append(b"late").is_err());
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store = MemoryStore::default();
        store.close().unwrap();
        assert!(store.create_object("a.txt").is_err());
        assert!(store.open_latest("a.txt").is_err());
    }
}
