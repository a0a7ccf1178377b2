//! Hash-indexed object store shared by every policy.
//!
//! Records live in a [`SlotArena`] and are addressed by [`SlotId`]; the hash
//! index maps an object id to at most one live record and at most one ghost
//! record. Ghosts share the index (O(1) lookup) but never count towards the
//! store's live length or any byte accounting.
//!
//! ## Architecture
//!
//! ```text
//!   index: FxHashMap<ObjId, IndexEntry { live, ghost }>
//!   ┌────────┬──────────────────────────────┐
//!   │ obj 17 │ { live: Some(s3), ghost: None }│
//!   │ obj 42 │ { live: None, ghost: Some(s0) }│
//!   │ obj 99 │ { live: Some(s5), ghost: Some(s1) }   (GLCache training ghost)
//!   └────────┴──────────────────────────────┘
//!
//!   objects: SlotArena<CacheObject<M>>
//!     s0 ghost(42)  s1 ghost(99)  s3 live(17)  s5 live(99)
//! ```
//!
//! Records also carry one pair of intrusive links, so the store implements
//! [`LinkStorage`] and ordering lists thread directly through it.
//!
//! `delete` frees the record and its index entry; callers must unlink the
//! record from any list or segment first.

mod object;

pub use object::CacheObject;

use rustc_hash::FxHashMap;

use crate::ds::{LinkStorage, Links, SlotArena, SlotId};
use crate::error::InvariantError;
use crate::request::{ObjId, Request};

#[derive(Debug, Clone, Copy, Default)]
struct IndexEntry {
    live: Option<SlotId>,
    ghost: Option<SlotId>,
}

impl IndexEntry {
    fn is_empty(&self) -> bool {
        self.live.is_none() && self.ghost.is_none()
    }
}

#[derive(Debug)]
pub struct ObjectStore<M> {
    objects: SlotArena<CacheObject<M>>,
    index: FxHashMap<ObjId, IndexEntry>,
    n_live: usize,
}

impl<M> ObjectStore<M> {
    pub fn new() -> Self {
        Self {
            objects: SlotArena::new(),
            index: FxHashMap::default(),
            n_live: 0,
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.n_live
    }

    pub fn is_empty(&self) -> bool {
        self.n_live == 0
    }

    pub fn n_ghost(&self) -> usize {
        self.objects.len() - self.n_live
    }

    /// Admits a new live record for `req`.
    ///
    /// # Panics
    ///
    /// Panics if a live record with the same id already exists.
    pub fn insert(&mut self, req: &Request, vtime: i64, meta: M) -> SlotId {
        let entry = self.index.entry(req.id).or_default();
        assert!(
            entry.live.is_none(),
            "insert of object {} which is already cached",
            req.id
        );
        let slot = self
            .objects
            .insert(CacheObject::from_request(req, vtime, meta));
        entry.live = Some(slot);
        self.n_live += 1;
        slot
    }

    /// Live lookup.
    #[inline]
    pub fn find(&self, id: ObjId) -> Option<SlotId> {
        self.index.get(&id).and_then(|e| e.live)
    }

    /// Ghost lookup.
    #[inline]
    pub fn find_ghost(&self, id: ObjId) -> Option<SlotId> {
        self.index.get(&id).and_then(|e| e.ghost)
    }

    #[inline]
    pub fn get(&self, slot: SlotId) -> Option<&CacheObject<M>> {
        self.objects.get(slot)
    }

    #[inline]
    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut CacheObject<M>> {
        self.objects.get_mut(slot)
    }

    /// Removes a live or ghost record and its index entry.
    pub fn delete(&mut self, slot: SlotId) -> Option<CacheObject<M>> {
        let obj = self.objects.remove(slot)?;
        if let Some(entry) = self.index.get_mut(&obj.id) {
            if obj.ghost {
                debug_assert_eq!(entry.ghost, Some(slot));
                entry.ghost = None;
            } else {
                debug_assert_eq!(entry.live, Some(slot));
                entry.live = None;
                self.n_live -= 1;
            }
            if entry.is_empty() {
                self.index.remove(&obj.id);
            }
        }
        Some(obj)
    }

    /// Turns a live record into the id's ghost, keeping its slot and links.
    ///
    /// An existing ghost for the same id is displaced (freed) and returned.
    pub fn demote_to_ghost(&mut self, slot: SlotId) -> Option<CacheObject<M>> {
        let id = match self.objects.get_mut(slot) {
            Some(obj) if !obj.ghost => {
                obj.ghost = true;
                obj.id
            },
            _ => return None,
        };
        self.n_live -= 1;
        let entry = self.index.entry(id).or_default();
        entry.live = None;
        let displaced = entry.ghost.replace(slot);
        displaced.and_then(|old| self.objects.remove(old))
    }

    /// Iterates every record, live and ghost. Verification only.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &CacheObject<M>)> {
        self.objects.iter()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (SlotId, &CacheObject<M>)> {
        self.objects.iter().filter(|(_, obj)| !obj.ghost)
    }

    /// Checks that the index and the arena describe the same records.
    pub fn check_consistency(&self) -> Result<(), InvariantError> {
        let mut n_indexed = 0usize;
        let mut n_live = 0usize;
        for (id, entry) in &self.index {
            if entry.is_empty() {
                return Err(InvariantError::new(format!(
                    "empty index entry for object {id}"
                )));
            }
            for (slot, ghost) in [(entry.live, false), (entry.ghost, true)] {
                let Some(slot) = slot else { continue };
                let obj = self.objects.get(slot).ok_or_else(|| {
                    InvariantError::new(format!("object {id} indexed at a free slot"))
                })?;
                if obj.id != *id || obj.ghost != ghost {
                    return Err(InvariantError::new(format!(
                        "index entry for object {id} points at the wrong record"
                    )));
                }
                n_indexed += 1;
                n_live += usize::from(!ghost);
            }
        }
        if n_indexed != self.objects.len() || n_live != self.n_live {
            return Err(InvariantError::new(format!(
                "{} records stored but {} indexed ({} live, {} counted)",
                self.objects.len(),
                n_indexed,
                n_live,
                self.n_live
            )));
        }
        Ok(())
    }
}

impl<M: Clone> ObjectStore<M> {
    /// Leaves a ghost copy of a live record behind, e.g. when the record
    /// moves on but its old position must keep collecting history.
    ///
    /// Returns the ghost's slot. An existing ghost for the id is displaced.
    pub fn fork_ghost(&mut self, slot: SlotId) -> Option<SlotId> {
        let obj = self.objects.get(slot)?;
        if obj.ghost {
            return None;
        }
        let mut copy = obj.clone();
        copy.ghost = true;
        copy.links = Links::default();
        let id = copy.id;
        let ghost_slot = self.objects.insert(copy);
        let entry = self.index.entry(id).or_default();
        if let Some(old) = entry.ghost.replace(ghost_slot) {
            self.objects.remove(old);
        }
        Some(ghost_slot)
    }
}

impl<M> Default for ObjectStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> LinkStorage for ObjectStore<M> {
    fn links(&self, id: SlotId) -> Option<&Links> {
        self.objects.get(id).map(|obj| &obj.links)
    }

    fn links_mut(&mut self, id: SlotId) -> Option<&mut Links> {
        self.objects.get_mut(id).map(|obj| &mut obj.links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(id: ObjId, size: u64) -> Request {
        Request::new(id, size, 0)
    }

    mod basic_operations {
        use super::*;

        #[test]
        fn insert_find_delete() {
            let mut store: ObjectStore<()> = ObjectStore::new();
            let a = store.insert(&req(1, 10), 1, ());
            let b = store.insert(&req(2, 20), 2, ());
            assert_eq!(store.len(), 2);
            assert_eq!(store.find(1), Some(a));
            assert_eq!(store.get(b).map(|o| o.size), Some(20));
            assert_eq!(store.find(3), None);

            let removed = store.delete(a).unwrap();
            assert_eq!(removed.id, 1);
            assert_eq!(store.find(1), None);
            assert_eq!(store.len(), 1);
            store.check_consistency().unwrap();
        }

        #[test]
        #[should_panic(expected = "already cached")]
        fn duplicate_insert_panics() {
            let mut store: ObjectStore<()> = ObjectStore::new();
            store.insert(&req(1, 10), 1, ());
            store.insert(&req(1, 10), 2, ());
        }

        #[test]
        fn ttl_sets_expiry() {
            let mut store: ObjectStore<()> = ObjectStore::new();
            let slot = store.insert(&Request::new(5, 1, 100).with_ttl(10), 1, ());
            let obj = store.get(slot).unwrap();
            assert_eq!(obj.exp_time, Some(110));
            assert!(!obj.is_expired_at(110));
            assert!(obj.is_expired_at(111));
        }
    }

    mod ghosts {
        use super::*;

        #[test]
        fn demote_keeps_slot_but_not_live_count() {
            let mut store: ObjectStore<u8> = ObjectStore::new();
            let a = store.insert(&req(1, 10), 1, 7);
            assert!(store.demote_to_ghost(a).is_none());
            assert_eq!(store.len(), 0);
            assert_eq!(store.n_ghost(), 1);
            assert_eq!(store.find(1), None);
            assert_eq!(store.find_ghost(1), Some(a));
            assert!(store.get(a).unwrap().is_ghost());
            store.check_consistency().unwrap();

            // live and ghost coexist under one id
            let b = store.insert(&req(1, 10), 5, 8);
            assert_eq!(store.find(1), Some(b));
            assert_eq!(store.find_ghost(1), Some(a));
            store.check_consistency().unwrap();

            // a second ghost displaces the first
            let displaced = store.demote_to_ghost(b).unwrap();
            assert_eq!(displaced.meta, 7);
            assert_eq!(store.find_ghost(1), Some(b));
            assert_eq!(store.n_ghost(), 1);
            store.check_consistency().unwrap();

            store.delete(b);
            assert_eq!(store.find_ghost(1), None);
            store.check_consistency().unwrap();
        }

        #[test]
        fn fork_ghost_leaves_copy_behind() {
            let mut store: ObjectStore<u8> = ObjectStore::new();
            let a = store.insert(&req(9, 4), 1, 3);
            let g = store.fork_ghost(a).unwrap();
            assert_ne!(a, g);
            assert_eq!(store.find(9), Some(a));
            assert_eq!(store.find_ghost(9), Some(g));
            assert_eq!(store.len(), 1);
            assert_eq!(store.iter().count(), 2);
            assert_eq!(store.iter_live().count(), 1);
            assert!(store.fork_ghost(g).is_none());
            store.check_consistency().unwrap();
        }
    }
}
