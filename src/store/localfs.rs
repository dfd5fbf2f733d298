//! Directory-backed chunked object store.
//!
//! One directory per object under `<root>/objects/<id>/`, holding numbered
//! chunk files plus a `meta.json` document. The metadata document is written
//! last, via a temp-file rename, so an object becomes visible exactly when
//! its write session is finalized; a crash mid-write leaves an orphan
//! directory that `open_latest` never sees.

use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{GridFuseError, Result};
use crate::store::{ObjectId, ObjectMeta, ObjectStore, ReadSession, WriteSession};

const META_FILE: &str = "meta.json";

pub struct LocalFsStore {
    objects_dir: PathBuf,
    chunk_size: u64,
}

impl LocalFsStore {
    /// Open (or initialize) a store rooted at `root`.
    pub fn open(root: &Path, chunk_size: u64) -> Result<Self> {
        let objects_dir = root.join("objects");
        fs::create_dir_all(&objects_dir).map_err(|e| {
            GridFuseError::Config(format!(
                "Failed to create store directory {}: {}",
                objects_dir.display(),
                e
            ))
        })?;
        Ok(LocalFsStore {
            objects_dir,
            chunk_size,
        })
    }

    fn object_dir(&self, id: ObjectId) -> PathBuf {
        self.objects_dir.join(id.to_string())
    }

    fn read_meta(&self, id: ObjectId) -> Result<ObjectMeta> {
        let path = self.object_dir(id).join(META_FILE);
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GridFuseError::NotFound(format!("no object with id {id}"))
            } else {
                GridFuseError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Scan all finalized objects and return the metadata of the most
    /// recently uploaded version of `name`, if any. Unreadable entries are
    /// skipped with a warning rather than failing the whole lookup.
    fn latest_meta(&self, name: &str) -> Result<Option<ObjectMeta>> {
        let mut best: Option<ObjectMeta> = None;
        for entry in fs::read_dir(&self.objects_dir)? {
            let entry = entry?;
            let Ok(id) = entry.file_name().to_string_lossy().parse::<ObjectId>() else {
                continue;
            };
            let meta = match self.read_meta(id) {
                Ok(meta) => meta,
                Err(GridFuseError::NotFound(_)) => continue, // not finalized yet
                Err(e) => {
                    tracing::warn!("Skipping unreadable object {}: {}", id, e);
                    continue;
                }
            };
            if meta.filename != name {
                continue;
            }
            let newer = match &best {
                None => true,
                Some(b) => (meta.upload_time, meta.id) > (b.upload_time, b.id),
            };
            if newer {
                best = Some(meta);
            }
        }
        Ok(best)
    }
}

impl ObjectStore for LocalFsStore {
    fn create_object(&self, name: &str) -> Result<Box<dyn WriteSession>> {
        let meta = ObjectMeta {
            id: ObjectId::generate(),
            filename: name.to_string(),
            aliases: Vec::new(),
            length: 0,
            chunk_size: self.chunk_size,
            upload_time: Utc::now(),
            content_type: None,
        };
        let dir = self.object_dir(meta.id);
        fs::create_dir_all(&dir)?;
        Ok(Box::new(LocalFsWriter {
            dir,
            meta,
            pending: Vec::new(),
            next_chunk: 0,
            closed: false,
        }))
    }

    fn open_latest(&self, name: &str) -> Result<Box<dyn ReadSession>> {
        let meta = self
            .latest_meta(name)?
            .ok_or_else(|| GridFuseError::NotFound(format!("no object named {name:?}")))?;
        let dir = self.object_dir(meta.id);
        Ok(Box::new(LocalFsReader::new(dir, meta)))
    }

    fn open_by_id(&self, id: ObjectId) -> Result<Box<dyn ReadSession>> {
        let meta = self.read_meta(id)?;
        let dir = self.object_dir(id);
        Ok(Box::new(LocalFsReader::new(dir, meta)))
    }

    fn close(&self) -> Result<()> {
        // Nothing held open between calls; the directory handle is the OS's.
        Ok(())
    }
}

struct LocalFsReader {
    dir: PathBuf,
    meta: ObjectMeta,
    pos: u64,
    /// Most recently loaded chunk, to avoid re-reading the same file on
    /// consecutive reads within one chunk.
    cached: Option<(u64, Vec<u8>)>,
}

impl LocalFsReader {
    fn new(dir: PathBuf, meta: ObjectMeta) -> Self {
        LocalFsReader {
            dir,
            meta,
            pos: 0,
            cached: None,
        }
    }

    fn chunk(&mut self, idx: u64) -> Result<&[u8]> {
        if self.cached.as_ref().map(|(i, _)| *i) != Some(idx) {
            let path = self.dir.join(idx.to_string());
            let mut data = Vec::with_capacity(self.meta.chunk_size as usize);
            File::open(&path)?.read_to_end(&mut data)?;
            self.cached = Some((idx, data));
        }
        Ok(&self.cached.as_ref().expect("chunk cached above").1)
    }
}

impl ReadSession for LocalFsReader {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let length = self.meta.length;
        let chunk_size = self.meta.chunk_size;
        let mut copied = 0;
        while copied < buf.len() && self.pos < length {
            let idx = self.pos / chunk_size;
            let offset = (self.pos % chunk_size) as usize;
            let chunk = self.chunk(idx)?;
            let available = chunk.len().saturating_sub(offset);
            if available == 0 {
                break;
            }
            let n = available.min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&chunk[offset..offset + n]);
            copied += n;
            self.pos += n as u64;
        }
        Ok(copied)
    }
}

struct LocalFsWriter {
    dir: PathBuf,
    meta: ObjectMeta,
    /// Bytes not yet flushed to a chunk file (always < chunk_size).
    pending: Vec<u8>,
    next_chunk: u64,
    closed: bool,
}

impl LocalFsWriter {
    fn flush_chunk(&mut self) -> Result<()> {
        let path = self.dir.join(self.next_chunk.to_string());
        let mut f = OpenOptions::new().write(true).create_new(true).open(&path)?;
        f.write_all(&self.pending)?;
        self.pending.clear();
        self.next_chunk += 1;
        Ok(())
    }
}

impl WriteSession for LocalFsWriter {
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
            let n = (chunk_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            if self.pending.len() == chunk_size {
                self.flush_chunk()?;
            }
        }
        self.meta.length += data.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<ObjectMeta> {
        if !self.closed {
            if !self.pending.is_empty() {
                self.flush_chunk()?;
            }
            self.meta.upload_time = Utc::now();

            // Rename makes finalization atomic: the object is either fully
            // committed or invisible.
            let tmp = self.dir.join("meta.json.tmp");
            fs::write(&tmp, serde_json::to_vec_pretty(&self.meta)?)?;
            fs::rename(&tmp, self.dir.join(META_FILE))?;
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

    fn put(store: &LocalFsStore, name: &str, data: &[u8]) -> ObjectMeta {
        let mut w = store.create_object(name).unwrap();
        w.append(data).unwrap();
        w.close().unwrap()
    }

    #[test]
    fn test_round_trip_across_chunk_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsStore::open(dir.path(), 4).unwrap();
        put(&store, "a.txt", b"hello chunked world");

        let mut r = store.open_latest("a.txt").unwrap();
        let data = read_up_to(r.as_mut(), 64).unwrap();
        assert_eq!(data, b"hello chunked world");

        // 19 bytes at chunk size 4 -> 5 chunk files
        let object_dir = dir
            .path()
            .join("objects")
            .join(r.meta().id.to_string());
        let chunk_files = fs::read_dir(&object_dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name() != META_FILE)
            .count();
        assert_eq!(chunk_files, 5);
    }

    #[test]
    fn test_persists_across_store_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let meta = {
            let store = LocalFsStore::open(dir.path(), 8).unwrap();
            put(&store, "persist.bin", b"durable")
        };

        let store = LocalFsStore::open(dir.path(), 8).unwrap();
        let mut r = store.open_by_id(meta.id).unwrap();
        assert_eq!(read_up_to(r.as_mut(), 16).unwrap(), b"durable");
    }

    #[test]
    fn test_latest_version_wins_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsStore::open(dir.path(), 8).unwrap();
        put(&store, "a.txt", b"old");
        let newer = put(&store, "a.txt", b"newer");

        let store = LocalFsStore::open(dir.path(), 8).unwrap();
        let r = store.open_latest("a.txt").unwrap();
        assert_eq!(r.meta().id, newer.id);
    }

    #[test]
    fn test_unfinalized_object_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsStore::open(dir.path(), 8).unwrap();
        let mut w = store.create_object("a.txt").unwrap();
        w.append(b"partial").unwrap();

        assert!(matches!(
            store.open_latest("a.txt"),
            Err(GridFuseError::NotFound(_))
        ));
        assert!(matches!(
            store.open_by_id(w.meta().id),
            Err(GridFuseError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_by_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsStore::open(dir.path(), 8).unwrap();
        assert!(matches!(
            store.open_by_id(ObjectId::generate()),
            Err(GridFuseError::NotFound(_))
        ));
    }

    #[test]
    fn test_empty_object_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsStore::open(dir.path(), 8).unwrap();
        let meta = put(&store, "empty", b"");
        assert_eq!(meta.length, 0);

        let mut r = store.open_latest("empty").unwrap();
        assert_eq!(read_up_to(r.as_mut(), 8).unwrap(), b"");
    }
}
