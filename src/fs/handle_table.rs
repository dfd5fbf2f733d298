use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{GridFuseError, Result};
use crate::store::{ReadSession, WriteSession};

/// The two mutually exclusive session kinds bindable to a handle.
pub enum Session {
    Read(Box<dyn ReadSession>),
    Write(Box<dyn WriteSession>),
}

/// Map from open handle to its active session.
///
/// Handles reuse the bound inode number, so there is at most one active
/// session per object; a concurrent open of the same object replaces the
/// cached session. The table lock only guards the map itself - callers
/// clone the session Arc out and do storage I/O under the per-session
/// mutex, never under the table lock.
pub struct HandleTable {
    sessions: Mutex<HashMap<u64, Arc<Mutex<Session>>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(&self, fh: u64, session: Session) {
        self.sessions
            .lock()
            .insert(fh, Arc::new(Mutex::new(session)));
    }

    /// Fetch the session bound to `fh`. A missing entry is a caller
    /// protocol violation: open/create must precede read/write/flush.
    pub fn get(&self, fh: u64) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .get(&fh)
            .cloned()
            .ok_or(GridFuseError::StaleHandle(fh))
    }

    pub fn remove(&self, fh: u64) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().remove(&fh)
    }

    /// Drain every live session. Used at mount teardown.
    pub fn drain(&self) -> Vec<Arc<Mutex<Session>>> {
        self.sessions.lock().drain().map(|(_, s)| s).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
