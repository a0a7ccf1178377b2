//! Least Recently Used eviction.
//!
//! Every hit moves the object to the head of the recency list; the tail is
//! the victim.
//!
//! ```text
//!   hit(x): unlink x, push x at head
//!
//!   head [MRU] ◄──► ... ◄──► [LRU] tail ─► evict
//! ```
//!
//! ## Example
//!
//! ```
//! use cachesim::policy::lru::Lru;
//! use cachesim::request::Request;
//! use cachesim::traits::EvictionPolicy;
//!
//! let mut cache = Lru::new(2, 0);
//! cache.get(&Request::new(1, 1, 0));
//! cache.get(&Request::new(2, 1, 1));
//! cache.get(&Request::new(1, 1, 2)); // 1 becomes MRU
//! cache.get(&Request::new(3, 1, 3)); // evicts 2
//! assert!(cache.get(&Request::new(1, 1, 4)));
//! assert!(!cache.get(&Request::new(2, 1, 5)));
//! ```

use crate::ds::{IntrusiveList, SlotId};
use crate::error::InvariantError;
use crate::policy::core::{CacheCore, Lookup, lookup};
use crate::request::{ObjId, Request};
use crate::store::ObjectStore;
use crate::traits::{CheckResult, EvictionPolicy};

#[derive(Debug)]
pub struct Lru {
    core: CacheCore,
    store: ObjectStore<()>,
    recency: IntrusiveList,
}

impl Lru {
    pub fn new(capacity: u64, per_obj_overhead: u64) -> Self {
        Self {
            core: CacheCore::new(capacity, per_obj_overhead),
            store: ObjectStore::new(),
            recency: IntrusiveList::new(),
        }
    }

    /// Object ids from most to least recently used.
    pub fn recency_order(&self) -> Vec<ObjId> {
        self.recency
            .iter(&self.store)
            .filter_map(|slot| self.store.get(slot).map(|obj| obj.id))
            .collect()
    }

    fn remove_slot(&mut self, slot: SlotId) {
        self.recency.unlink(&mut self.store, slot);
        if let Some(obj) = self.store.delete(slot) {
            self.core.release(obj.size);
        }
    }
}

impl EvictionPolicy for Lru {
    fn name(&self) -> &str {
        "LRU"
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
                    self.recency.move_to_front(&mut self.store, slot);
                }
                CheckResult::Hit
            },
        }
    }

    fn insert(&mut self, req: &Request) -> SlotId {
        let slot = self.store.insert(req, self.core.curr_vtime(), ());
        self.recency.push_front(&mut self.store, slot);
        self.core.charge(req.size);
        slot
    }

    fn to_evict(&self, _req: &Request) -> Result<Option<ObjId>, InvariantError> {
        Ok(self
            .recency
            .back()
            .and_then(|slot| self.store.get(slot))
            .map(|obj| obj.id))
    }

    fn evict(&mut self, _req: &Request) -> bool {
        let Some(slot) = self.recency.back() else {
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
        if self.recency.len() != self.store.len() {
            return Err(InvariantError::new(format!(
                "recency list holds {} objects but the store holds {}",
                self.recency.len(),
                self.store.len()
            )));
        }
        let mut last_vtime = i64::MAX;
        for slot in self.recency.iter(&self.store) {
            let obj = self
                .store
                .get(slot)
                .ok_or_else(|| InvariantError::new("listed slot is free"))?;
            if obj.last_access_vtime > last_vtime {
                return Err(InvariantError::new(format!(
                    "object {} is out of recency order",
                    obj.id
                )));
            }
            last_vtime = obj.last_access_vtime;
        }
        self.core.check_accounting(&self.store)
    }
}
