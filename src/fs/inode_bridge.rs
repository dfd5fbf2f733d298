use fuser::FUSE_ROOT_ID;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::{GridFuseError, Result};
use crate::store::ObjectId;

/// Bidirectional inode <-> object-id table.
///
/// The kernel speaks small stable integers; the store speaks large opaque
/// keys. This bridge owns the association: inode 1 is reserved for the
/// mount root, everything else is allocated densely from 2 and never reused
/// within a process lifetime. At most one inode per object id and vice
/// versa, until the kernel tells us to forget.
pub struct InodeBridge {
    inner: Mutex<BridgeInner>,
}

struct BridgeInner {
    next_ino: u64,
    by_inode: HashMap<u64, ObjectId>,
    by_object: HashMap<ObjectId, u64>,
}

impl InodeBridge {
    pub fn new() -> Self {
        InodeBridge {
            inner: Mutex::new(BridgeInner {
                // Start at 2 because FUSE reserves inode 1 (FUSE_ROOT_ID)
                // for the root directory
                next_ino: FUSE_ROOT_ID + 1,
                by_inode: HashMap::new(),
                by_object: HashMap::new(),
            }),
        }
    }

    /// Return the inode bound to `id`, allocating the next unused inode on
    /// first reference.
    pub fn inode_for(&self, id: ObjectId) -> u64 {
        let mut inner = self.inner.lock();
        if let Some(&ino) = inner.by_object.get(&id) {
            return ino;
        }
        let ino = inner.next_ino;
        // wrapping_add handles overflow gracefully - if we ever exhaust u64
        // (unlikely), we wrap rather than panicking. Very old inodes will
        // have been forgotten by then.
        inner.next_ino = inner.next_ino.wrapping_add(1);
        inner.by_object.insert(id, ino);
        inner.by_inode.insert(ino, id);
        ino
    }

    /// Resolve an inode back to its object id. Fails if the inode was never
    /// allocated or has been forgotten.
    pub fn object_for(&self, ino: u64) -> Result<ObjectId> {
        self.inner
            .lock()
            .by_inode
            .get(&ino)
            .copied()
            .ok_or_else(|| GridFuseError::NotFound(format!("inode {ino} is not mapped")))
    }

    /// Drop both directions of the mapping. Safe only once the kernel
    /// guarantees no outstanding references to `ino`.
    pub fn forget(&self, ino: u64) {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.by_inode.remove(&ino) {
            inner.by_object.remove(&id);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().by_inode.len()
    }
}

impl Default for InodeBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_allocation_starts_at_2_and_is_dense() {
        let bridge = InodeBridge::new();
        assert_eq!(bridge.inode_for(ObjectId::generate()), 2);
        assert_eq!(bridge.inode_for(ObjectId::generate()), 3);
        assert_eq!(bridge.inode_for(ObjectId::generate()), 4);
    }

    #[test]
    fn test_resolve_is_stable_for_same_id() {
        let bridge = InodeBridge::new();
        let id = ObjectId::generate();
        let ino = bridge.inode_for(id);
        assert_eq!(bridge.inode_for(id), ino);
        assert_eq!(bridge.object_for(ino).unwrap(), id);
    }

    #[test]
    fn test_unmapped_inode_is_not_found() {
        let bridge = InodeBridge::new();
        assert!(matches!(
            bridge.object_for(99),
            Err(GridFuseError::NotFound(_))
        ));
    }

    #[test]
    fn test_forget_removes_both_directions() {
        let bridge = InodeBridge::new();
        let id = ObjectId::generate();
        let ino = bridge.inode_for(id);

        bridge.forget(ino);
        assert!(bridge.object_for(ino).is_err());
        assert_eq!(bridge.len(), 0);

        // Re-resolving the same id allocates a fresh inode, never reusing
        // the forgotten one.
        let new_ino = bridge.inode_for(id);
        assert_ne!(new_ino, ino);
        assert!(new_ino > ino);
    }

    #[test]
    fn test_forget_unknown_inode_is_a_no_op() {
        let bridge = InodeBridge::new();
        bridge.forget(12345);
        assert_eq!(bridge.len(), 0);
    }

    proptest! {
        /// The mapping stays a bijection under any interleaving of resolves:
        /// round-tripping through both directions is the identity.
        #[test]
        fn prop_round_trip_bijection(seeds in proptest::collection::vec(any::<[u8; 12]>(), 1..64)) {
            let bridge = InodeBridge::new();
            let mut seen = std::collections::HashMap::new();
            for seed in seeds {
                let id = ObjectId::from_bytes(seed);
                let ino = bridge.inode_for(id);
                prop_assert_eq!(bridge.object_for(ino).unwrap(), id);
                if let Some(prev) = seen.insert(id, ino) {
                    prop_assert_eq!(prev, ino);
                }
            }
            // Distinct ids got distinct inodes.
            let distinct: std::collections::HashSet<_> = seen.values().collect();
            prop_assert_eq!(distinct.len(), seen.len());
        }
    }
}
