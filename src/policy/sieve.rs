//! SIEVE eviction.
//!
//! New objects enter at the head of a FIFO queue. A hit only sets a visited
//! bit. The hand moves from the tail toward the head, clearing visited bits
//! until it reaches an unvisited object, which is evicted in place. Survivors
//! are never moved, and the hand remembers where it stopped.
//!
//! ```text
//!   head                                         tail
//!   [E]  ◄──►  [D*]  ◄──►  [C]  ◄──►  [B*]  ◄──►  [A*]
//!                           ▲
//!                          hand          (* = visited)
//!
//!   evict(): C is unvisited → evicted, hand moves to D
//!   next evict(): D* cleared, E evicted, hand wraps to the tail
//! ```
//!
//! ## Example
//!
//! ```
//! use cachesim::policy::sieve::Sieve;
//! use cachesim::request::Request;
//! use cachesim::traits::EvictionPolicy;
//!
//! let mut cache = Sieve::new(2, 0);
//! cache.get(&Request::new(1, 1, 0));
//! cache.get(&Request::new(2, 1, 1));
//! cache.get(&Request::new(1, 1, 2)); // visited
//! cache.get(&Request::new(3, 1, 3)); // 1 keeps its place, 2 is evicted
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
pub struct Sieve {
    core: CacheCore,
    store: ObjectStore<bool>,
    queue: IntrusiveList,
    hand: Option<SlotId>,
}

impl Sieve {
    pub fn new(capacity: u64, per_obj_overhead: u64) -> Self {
        Self {
            core: CacheCore::new(capacity, per_obj_overhead),
            store: ObjectStore::new(),
            queue: IntrusiveList::new(),
            hand: None,
        }
    }

    /// Object under the hand, if it has stopped somewhere.
    pub fn hand(&self) -> Option<ObjId> {
        self.hand
            .and_then(|slot| self.store.get(slot))
            .map(|obj| obj.id)
    }

    pub fn is_visited(&self, id: ObjId) -> Option<bool> {
        self.store
            .find(id)
            .and_then(|slot| self.store.get(slot))
            .map(|obj| obj.meta)
    }

    /// Step toward the head, wrapping to the tail.
    fn advance(&self, slot: SlotId) -> Option<SlotId> {
        IntrusiveList::prev_of(&self.store, slot).or_else(|| self.queue.back())
    }

    fn remove_slot(&mut self, slot: SlotId) {
        if self.hand == Some(slot) {
            self.hand = IntrusiveList::prev_of(&self.store, slot);
        }
        self.queue.unlink(&mut self.store, slot);
        if let Some(obj) = self.store.delete(slot) {
            self.core.release(obj.size);
        }
    }
}

impl EvictionPolicy for Sieve {
    fn name(&self) -> &str {
        "Sieve"
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
                        obj.meta = true;
                    }
                }
                CheckResult::Hit
            },
        }
    }

    fn insert(&mut self, req: &Request) -> SlotId {
        let slot = self.store.insert(req, self.core.curr_vtime(), false);
        self.queue.push_front(&mut self.store, slot);
        self.core.charge(req.size);
        slot
    }

    fn to_evict(&self, _req: &Request) -> Result<Option<ObjId>, InvariantError> {
        let Some(start) = self.hand.or_else(|| self.queue.back()) else {
            return Ok(None);
        };
        // One lap finds the first unvisited object; if every object is
        // visited the sweep clears them all and stops back at `start`.
        let mut cur = start;
        for _ in 0..self.queue.len() {
            match self.store.get(cur) {
                Some(obj) if !obj.meta => return Ok(Some(obj.id)),
                _ => {},
            }
            match self.advance(cur) {
                Some(next) => cur = next,
                None => break,
            }
        }
        Ok(self.store.get(start).map(|obj| obj.id))
    }

    fn evict(&mut self, _req: &Request) -> bool {
        let mut cur = self.hand.or_else(|| self.queue.back());
        while let Some(slot) = cur {
            let visited = self.store.get(slot).is_some_and(|obj| obj.meta);
            if !visited {
                self.hand = IntrusiveList::prev_of(&self.store, slot);
                self.queue.unlink(&mut self.store, slot);
                if let Some(obj) = self.store.delete(slot) {
                    self.core.release(obj.size);
                }
                return true;
            }
            if let Some(obj) = self.store.get_mut(slot) {
                obj.meta = false;
            }
            cur = self.advance(slot);
        }
        false
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
                "sieve queue holds {} objects but the store holds {}",
                self.queue.len(),
                self.store.len()
            )));
        }
        if let Some(hand) = self.hand
            && self.store.get(hand).is_none()
        {
            return Err(InvariantError::new("sieve hand points at a free slot"));
        }
        self.core.check_accounting(&self.store)
    }
}
