//! First-In, First-Out eviction.
//!
//! Objects are queued in admission order; hits do not reorder anything.
//!
//! ```text
//!   insert ─► head [newest] ◄──► ... ◄──► [oldest] tail ─► evict
//! ```
//!
//! ## Example
//!
//! ```
//! use cachesim::policy::fifo::Fifo;
//! use cachesim::request::Request;
//! use cachesim::traits::EvictionPolicy;
//!
//! let mut cache = Fifo::new(2, 0);
//! assert!(!cache.get(&Request::new(1, 1, 0)));
//! assert!(!cache.get(&Request::new(2, 1, 1)));
//! assert!(cache.get(&Request::new(1, 1, 2)));
//! assert!(!cache.get(&Request::new(3, 1, 3))); // evicts 1, the oldest
//! assert!(!cache.get(&Request::new(1, 1, 4)));
//! ```

use crate::ds::{IntrusiveList, SlotId};
use crate::error::InvariantError;
use crate::policy::core::{CacheCore, Lookup, lookup};
use crate::request::{ObjId, Request};
use crate::store::ObjectStore;
use crate::traits::{CheckResult, EvictionPolicy};

#[derive(Debug)]
pub struct Fifo {
    core: CacheCore,
    store: ObjectStore<()>,
    queue: IntrusiveList,
}

impl Fifo {
    pub fn new(capacity: u64, per_obj_overhead: u64) -> Self {
        Self {
            core: CacheCore::new(capacity, per_obj_overhead),
            store: ObjectStore::new(),
            queue: IntrusiveList::new(),
        }
    }

    fn remove_slot(&mut self, slot: SlotId) {
        self.queue.unlink(&mut self.store, slot);
        if let Some(obj) = self.store.delete(slot) {
            self.core.release(obj.size);
        }
    }
}

impl EvictionPolicy for Fifo {
    fn name(&self) -> &str {
        "FIFO"
    }

    fn core(&self) -> &CacheCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CacheCore {
        &mut self.core
    }

    fn check(&mut self, req: &Request, update: bool) -> CheckResult {
        match lookup(&self.store, req) {
            Lookup::Missing => CheckResult::Miss,
            Lookup::Expired(slot) => {
                if update {
                    self.remove_slot(slot);
                    self.core.record_expired();
                }
                CheckResult::Expired
            },
            Lookup::Found(slot) => {
                if update {
                    let vtime = self.core.curr_vtime();
                    if let Some(obj) = self.store.get_mut(slot) {
                        obj.touch(req, vtime);
                    }
                }
                CheckResult::Hit
            },
        }
    }

    fn insert(&mut self, req: &Request) -> SlotId {
        let slot = self.store.insert(req, self.core.curr_vtime(), ());
        self.queue.push_front(&mut self.store, slot);
        self.core.charge(req.size);
        slot
    }

    fn to_evict(&self, _req: &Request) -> Result<Option<ObjId>, InvariantError> {
        Ok(self
            .queue
            .back()
            .and_then(|slot| self.store.get(slot))
            .map(|obj| obj.id))
    }

    fn evict(&mut self, _req: &Request) -> bool {
        let Some(slot) = self.queue.back() else {
            return false;
        };
        self.remove_slot(slot);
        true
    }

    fn remove(&mut self, id: ObjId) -> bool {
        match self.store.find(id) {
            Some(slot) => {
                self.remove_slot(slot);
                true
            },
            None => false,
        }
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        if self.queue.len() != self.store.len() {
            return Err(InvariantError::new(format!(
                "queue holds {} objects but the store holds {}",
                self.queue.len(),
                self.store.len()
            )));
        }
        for slot in self.queue.iter(&self.store) {
            let obj = self
                .store
                .get(slot)
                .ok_or_else(|| InvariantError::new("queued slot is free"))?;
            if self.store.find(obj.id) != Some(slot) {
                return Err(InvariantError::new(format!(
                    "object {} is queued but not indexed",
                    obj.id
                )));
            }
        }
        self.core.check_accounting(&self.store)
    }
}
