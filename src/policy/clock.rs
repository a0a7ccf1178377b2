//! Clock (FIFO with reinsertion) eviction.
//!
//! Each object carries an `n`-bit access counter. Hits bump the counter up to
//! its ceiling; eviction scans from the tail, and an object with a non-zero
//! counter is decremented and reinserted at the head instead of evicted.
//!
//! ## Architecture
//!
//! ```text
//!   head                                                 tail
//!    │                                                    │
//!    ▼                                                    ▼
//!   [E f=0] ◄──► [D f=0] ◄──► [C f=1] ◄──► [B f=0] ◄──► [A f=2]
//!
//!   evict():
//!     A: f=2 → f=1, move to head
//!     B: f=0 → evicted
//! ```
//!
//! With `n-bit-counter=1` this is classic second-chance Clock. Larger counters
//! let frequently hit objects survive several sweeps.
//!
//! ## Parameters
//!
//! | Key             | Default | Range  |
//! |-----------------|---------|--------|
//! | `n-bit-counter` | 1       | 1..=16 |
//!
//! ## Example
//!
//! ```
//! use cachesim::policy::clock::Clock;
//! use cachesim::request::Request;
//! use cachesim::traits::EvictionPolicy;
//!
//! let mut cache = Clock::new(2, 0);
//! cache.get(&Request::new(1, 1, 0));
//! cache.get(&Request::new(2, 1, 1));
//! cache.get(&Request::new(1, 1, 2)); // second chance for 1
//! cache.get(&Request::new(3, 1, 3)); // 1 is reinserted, 2 evicted
//! assert!(cache.get(&Request::new(1, 1, 4)));
//! ```

use crate::config::Params;
use crate::ds::{IntrusiveList, SlotId};
use crate::error::{ConfigError, InvariantError};
use crate::policy::core::{CacheCore, Lookup, lookup};
use crate::request::{ObjId, Request};
use crate::store::ObjectStore;
use crate::traits::{CheckResult, EvictionPolicy};

const MAX_COUNTER_BITS: u32 = 16;

#[derive(Debug)]
pub struct Clock {
    core: CacheCore,
    store: ObjectStore<u32>,
    queue: IntrusiveList,
    max_freq: u32,
    n_reinserted: u64,
}

impl Clock {
    /// Second-chance Clock (one-bit counter).
    pub fn new(capacity: u64, per_obj_overhead: u64) -> Self {
        Self::with_counter_bits(capacity, per_obj_overhead, 1)
    }

    /// # Panics
    ///
    /// Panics unless `1 <= bits <= 16`.
    pub fn with_counter_bits(capacity: u64, per_obj_overhead: u64, bits: u32) -> Self {
        assert!(
            (1..=MAX_COUNTER_BITS).contains(&bits),
            "counter bits must be in 1..={MAX_COUNTER_BITS}, got {bits}"
        );
        Self {
            core: CacheCore::new(capacity, per_obj_overhead),
            store: ObjectStore::new(),
            queue: IntrusiveList::new(),
            max_freq: (1 << bits) - 1,
            n_reinserted: 0,
        }
    }

    pub fn from_params(
        capacity: u64,
        per_obj_overhead: u64,
        mut params: Params,
    ) -> Result<Self, ConfigError> {
        let bits = params.take_usize("n-bit-counter")?.unwrap_or(1);
        params.finish("Clock")?;
        if bits == 0 || bits > MAX_COUNTER_BITS as usize {
            return Err(ConfigError::new(format!(
                "n-bit-counter must be in 1..={MAX_COUNTER_BITS}, got {bits}"
            )));
        }
        Ok(Self::with_counter_bits(capacity, per_obj_overhead, bits as u32))
    }

    #[inline]
    pub fn max_freq(&self) -> u32 {
        self.max_freq
    }

    /// Objects given another lap instead of being evicted.
    pub fn n_reinserted(&self) -> u64 {
        self.n_reinserted
    }

    /// Current counter of a cached object.
    pub fn freq_of(&self, id: ObjId) -> Option<u32> {
        self.store
            .find(id)
            .and_then(|slot| self.store.get(slot))
            .map(|obj| obj.meta)
    }

    fn remove_slot(&mut self, slot: SlotId) {
        self.queue.unlink(&mut self.store, slot);
        if let Some(obj) = self.store.delete(slot) {
            self.core.release(obj.size);
        }
    }
}

impl EvictionPolicy for Clock {
    fn name(&self) -> &str {
        "Clock"
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
                    let max_freq = self.max_freq;
                    if let Some(obj) = self.store.get_mut(slot) {
                        obj.touch(req, vtime);
                        obj.meta = (obj.meta + 1).min(max_freq);
                    }
                }
                CheckResult::Hit
            },
        }
    }

    fn insert(&mut self, req: &Request) -> SlotId {
        let slot = self.store.insert(req, self.core.curr_vtime(), 0);
        self.queue.push_front(&mut self.store, slot);
        self.core.charge(req.size);
        slot
    }

    /// Simulates the sweep without changing any counter.
    fn to_evict(&self, _req: &Request) -> Result<Option<ObjId>, InvariantError> {
        // After a full lap every counter has dropped by one, so the victim
        // is the first object (tail to head) holding the smallest counter.
        let mut best: Option<(u32, ObjId)> = None;
        for slot in self.queue.iter_rev(&self.store) {
            if let Some(obj) = self.store.get(slot) {
                if obj.meta == 0 {
                    return Ok(Some(obj.id));
                }
                if best.is_none_or(|(freq, _)| obj.meta < freq) {
                    best = Some((obj.meta, obj.id));
                }
            }
        }
        Ok(best.map(|(_, id)| id))
    }

    fn evict(&mut self, _req: &Request) -> bool {
        while let Some(slot) = self.queue.back() {
            let freq = self.store.get(slot).map_or(0, |obj| obj.meta);
            if freq == 0 {
                self.remove_slot(slot);
                return true;
            }
            if let Some(obj) = self.store.get_mut(slot) {
                obj.meta = freq - 1;
            }
            self.queue.move_to_front(&mut self.store, slot);
            self.n_reinserted += 1;
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
                "clock queue holds {} objects but the store holds {}",
                self.queue.len(),
                self.store.len()
            )));
        }
        for (_, obj) in self.store.iter_live() {
            if obj.meta > self.max_freq {
                return Err(InvariantError::new(format!(
                    "object {} has counter {} above {}",
                    obj.id, obj.meta, self.max_freq
                )));
            }
        }
        self.core.check_accounting(&self.store)
    }
}
