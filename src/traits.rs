//! # Eviction Policy Contract
//!
//! Every simulated policy implements [`EvictionPolicy`]; the simulation
//! driver and the builder only ever hold a `Box<dyn EvictionPolicy>`.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌───────────────────────────────────────────┐
//!                  │            EvictionPolicy                 │
//!                  │                                           │
//!                  │  check(&mut, &Request, update) → Check    │
//!                  │  get(&mut, &Request) → bool   (provided)  │
//!                  │  insert(&mut, &Request) → SlotId          │
//!                  │  to_evict(&, &Request) → Option<ObjId>    │
//!                  │  evict(&mut, &Request) → bool             │
//!                  │  remove(&mut, ObjId) → bool               │
//!                  │  core(&) → &CacheCore  (counters)         │
//!                  └─────────────────────┬─────────────────────┘
//!                                        │
//!        ┌──────────┬──────────┬─────────┼─────────┬──────────┐
//!        ▼          ▼          ▼         ▼         ▼          ▼
//!      FIFO        LRU       Clock     Sieve      ARC      GLCache
//! ```
//!
//! ## Request flow ([`get_base`])
//!
//! ```text
//!   get(req):
//!     n_req += 1
//!     if check(req, update = true) == Hit: return true
//!     if size + overhead > capacity: return false      (rejected, logged once)
//!     while occupied + size + overhead > capacity:
//!       if !evict(req): return false                  (no progress, logged)
//!     insert(req)
//!     return false
//! ```
//!
//! Eviction happens before admission, so `occupied_bytes <= capacity` holds
//! after every completed `get`.
//!
//! ## Contract details
//!
//! | Operation  | Notes                                                       |
//! |------------|-------------------------------------------------------------|
//! | `check`    | `update = false` must not change any state                  |
//! | `insert`   | panics if the id is already cached                          |
//! | `to_evict` | merge-based policies return an [`InvariantError`]           |
//! | `evict`    | may evict several objects; `false` when nothing could go    |
//! | `remove`   | out-of-band removal, not counted as an eviction             |

use log::{trace, warn};

use crate::ds::SlotId;
use crate::error::InvariantError;
use crate::policy::core::CacheCore;
use crate::request::{ObjId, Request};

/// Outcome of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Hit,
    Miss,
    /// Found but past its TTL; treated as a miss by `get`.
    Expired,
}

impl CheckResult {
    #[inline]
    pub fn is_hit(self) -> bool {
        self == CheckResult::Hit
    }
}

/// Capability set shared by every eviction policy.
pub trait EvictionPolicy: Send {
    /// Policy name, e.g. `"LRU"`.
    fn name(&self) -> &str;

    fn core(&self) -> &CacheCore;

    fn core_mut(&mut self) -> &mut CacheCore;

    /// Looks up `req.id`. With `update`, applies the policy's hit
    /// bookkeeping (promotion, frequency, next-access hint) and drops
    /// expired objects.
    fn check(&mut self, req: &Request, update: bool) -> CheckResult;

    /// Admits `req`. The caller has already made room.
    ///
    /// # Panics
    ///
    /// Panics if `req.id` is already cached.
    fn insert(&mut self, req: &Request) -> SlotId;

    /// Names the victim `evict(req)` would pick, without evicting it.
    fn to_evict(&self, _req: &Request) -> Result<Option<ObjId>, InvariantError> {
        Err(InvariantError::new(format!(
            "{} cannot name a single eviction victim",
            self.name()
        )))
    }

    /// Evicts one victim (or one merge group). `req` is context only.
    ///
    /// Returns `false` when no victim could be selected.
    fn evict(&mut self, req: &Request) -> bool;

    /// Removes `id` outside of the eviction path.
    fn remove(&mut self, id: ObjId) -> bool;

    /// Verifies internal bookkeeping.
    fn check_invariants(&self) -> Result<(), InvariantError>;

    /// Request-level entry point; returns whether `req` hit.
    fn get(&mut self, req: &Request) -> bool {
        get_base(self, req)
    }

    fn capacity(&self) -> u64 {
        self.core().capacity()
    }

    fn occupied_bytes(&self) -> u64 {
        self.core().occupied_bytes()
    }

    fn n_obj(&self) -> u64 {
        self.core().n_obj()
    }

    fn n_req(&self) -> u64 {
        self.core().n_req()
    }
}

/// The shared check / admit / evict / insert sequence behind
/// [`EvictionPolicy::get`]. Policies that override `get` call this first.
pub fn get_base<P: EvictionPolicy + ?Sized>(cache: &mut P, req: &Request) -> bool {
    cache.core_mut().begin_request(req);

    let result = cache.check(req, true);
    trace!("{} req {} size {} -> {:?}", cache.name(), req.id, req.size, result);
    if result.is_hit() {
        return true;
    }

    if !cache.core_mut().can_insert(req) {
        return false;
    }

    while cache.core().needs_room(req) && cache.core().n_obj() > 0 {
        if !cache.evict(req) {
            warn!(
                "{} could not make room for object {} ({} objects cached), not admitted",
                cache.name(),
                req.id,
                cache.core().n_obj()
            );
            return false;
        }
    }
    cache.insert(req);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectStore;

    /// Admits everything and never gives anything up.
    struct Pinned {
        core: CacheCore,
        store: ObjectStore<()>,
    }

    impl Pinned {
        fn new(capacity: u64) -> Self {
            Self {
                core: CacheCore::new(capacity, 0),
                store: ObjectStore::new(),
            }
        }
    }

    impl EvictionPolicy for Pinned {
        fn name(&self) -> &str {
            "Pinned"
        }

        fn core(&self) -> &CacheCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut CacheCore {
            &mut self.core
        }

        fn check(&mut self, req: &Request, _update: bool) -> CheckResult {
            match self.store.find(req.id) {
                Some(_) => CheckResult::Hit,
                None => CheckResult::Miss,
            }
        }

        fn insert(&mut self, req: &Request) -> SlotId {
            let slot = self.store.insert(req, self.core.curr_vtime(), ());
            self.core.charge(req.size);
            slot
        }

        fn evict(&mut self, _req: &Request) -> bool {
            false
        }

        fn remove(&mut self, _id: ObjId) -> bool {
            false
        }

        fn check_invariants(&self) -> Result<(), InvariantError> {
            self.core.check_accounting(&self.store)
        }
    }

    mod admission {
        use super::*;

        #[test]
        fn test_stalled_eviction_rejects_instead_of_spinning() {
            let mut cache = Pinned::new(10);
            assert!(!cache.get(&Request::new(1, 6, 0)));
            assert!(!cache.get(&Request::new(2, 6, 1)));
            assert_eq!(cache.n_obj(), 1);
            assert_eq!(cache.occupied_bytes(), 6);
            assert_eq!(cache.check(&Request::new(2, 6, 2), false), CheckResult::Miss);
            assert!(cache.get(&Request::new(1, 6, 3)));
            assert_eq!(cache.n_req(), 3);
            cache.check_invariants().unwrap();
        }

        #[test]
        fn test_fitting_request_skips_eviction() {
            let mut cache = Pinned::new(10);
            assert!(!cache.get(&Request::new(1, 4, 0)));
            assert!(!cache.get(&Request::new(2, 6, 1)));
            assert_eq!(cache.n_obj(), 2);
            assert_eq!(cache.occupied_bytes(), 10);
        }
    }
}
