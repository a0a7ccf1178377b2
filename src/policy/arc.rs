//! Adaptive Replacement Cache (ARC), byte-based.
//!
//! Four LRU lists share one object store. `T1`/`T2` hold cached objects seen
//! once and more than once; `B1`/`B2` hold ghosts of objects evicted from
//! `T1`/`T2`. A ghost hit moves the target `p` (bytes of `T1`) toward the
//! list the ghost came from, and the readmitted object goes straight to `T2`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  store: ObjectStore<Tier>   (ghosts live in the same index)          │
//! │                                                                      │
//! │   B1 ghosts  ◄── T1 (seen once) ──┐   ┌── T2 (seen twice+) ──► B2    │
//! │   [g..g]        [MRU ... LRU]     │   │   [MRU ... LRU]    [g..g]    │
//! │                                   │   │                              │
//! │           ◄────── p bytes ───────►│   │                              │
//! │                                   └───┘                              │
//! │                                 capacity                             │
//! │                                                                      │
//! │  hit in T1 → move to T2 head        hit in T2 → move to T2 head      │
//! │  hit in B1 → p += max(|B2|/|B1|, 1) hit in B2 → p -= max(|B1|/|B2|,1)│
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Eviction
//!
//! ```text
//!   REPLACE:
//!     if (|T1| > 0 and (|T1| > p or (|T1| == p and request hit B2))) or |T2| == 0:
//!       T1 tail → B1 head
//!     else:
//!       T2 tail → B2 head
//!
//!   evict(req):
//!     if req hit a ghost this request: REPLACE
//!     else if |T1| + |B1| + size(req) > capacity:
//!       if |B1| > 0: drop B1 tail, REPLACE
//!       else:        drop T1 tail (no ghost)
//!     else:
//!       if |T1| + |T2| + |B1| + |B2| >= 2 * capacity and |B2| > 0: drop B2 tail
//!       REPLACE
//! ```
//!
//! All sizes are bytes including the per-object overhead. Ghost bytes never
//! count toward `occupied_bytes`.
//!
//! ## Example
//!
//! ```
//! use cachesim::policy::arc::Arc;
//! use cachesim::request::Request;
//! use cachesim::traits::EvictionPolicy;
//!
//! let mut cache = Arc::new(2, 0);
//! cache.get(&Request::new(1, 1, 0));
//! cache.get(&Request::new(1, 1, 1)); // 1 moves to T2
//! cache.get(&Request::new(2, 1, 2));
//! cache.get(&Request::new(3, 1, 3)); // 2 becomes a ghost in B1
//! assert!(!cache.get(&Request::new(2, 1, 4))); // ghost hit, p grows
//! assert!(cache.target_t1() > 0.0);
//! ```

use crate::ds::{IntrusiveList, SlotId};
use crate::error::InvariantError;
use crate::policy::core::CacheCore;
use crate::request::{ObjId, Request};
use crate::store::ObjectStore;
use crate::traits::{CheckResult, EvictionPolicy};

/// Which half of ARC an object (or ghost) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// `T1` when cached, `B1` when a ghost.
    Recent,
    /// `T2` when cached, `B2` when a ghost.
    Frequent,
}

/// Byte sizes of the four lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArcSizes {
    pub t1: u64,
    pub t2: u64,
    pub b1: u64,
    pub b2: u64,
}

#[derive(Debug)]
pub struct Arc {
    core: CacheCore,
    store: ObjectStore<Tier>,
    t1: IntrusiveList,
    t2: IntrusiveList,
    b1: IntrusiveList,
    b2: IntrusiveList,
    sizes: ArcSizes,
    p: f64,
    curr_in_b1: bool,
    curr_in_b2: bool,
    vtime_last_ghost_hit: Option<i64>,
}

impl Arc {
    pub fn new(capacity: u64, per_obj_overhead: u64) -> Self {
        Self {
            core: CacheCore::new(capacity, per_obj_overhead),
            store: ObjectStore::new(),
            t1: IntrusiveList::new(),
            t2: IntrusiveList::new(),
            b1: IntrusiveList::new(),
            b2: IntrusiveList::new(),
            sizes: ArcSizes::default(),
            p: 0.0,
            curr_in_b1: false,
            curr_in_b2: false,
            vtime_last_ghost_hit: None,
        }
    }

    /// Adaptive target size of `T1`, in bytes.
    pub fn target_t1(&self) -> f64 {
        self.p
    }

    pub fn sizes(&self) -> ArcSizes {
        self.sizes
    }

    /// Tier and ghost status of an id, if ARC knows it at all.
    pub fn tier_of(&self, id: ObjId) -> Option<(Tier, bool)> {
        let slot = self.store.find(id).or_else(|| self.store.find_ghost(id))?;
        self.store.get(slot).map(|obj| (obj.meta, obj.is_ghost()))
    }

    fn ghost_hit_this_request(&self) -> bool {
        self.vtime_last_ghost_hit == Some(self.core.curr_vtime())
            && (self.curr_in_b1 || self.curr_in_b2)
    }

    /// Unlinks and frees any record, live or ghost.
    fn drop_record(&mut self, slot: SlotId) {
        let Some((tier, ghost, size)) = self
            .store
            .get(slot)
            .map(|obj| (obj.meta, obj.is_ghost(), obj.size))
        else {
            return;
        };
        let bytes = self.core.footprint(size);
        let (list, list_bytes) = match (tier, ghost) {
            (Tier::Recent, false) => (&mut self.t1, &mut self.sizes.t1),
            (Tier::Frequent, false) => (&mut self.t2, &mut self.sizes.t2),
            (Tier::Recent, true) => (&mut self.b1, &mut self.sizes.b1),
            (Tier::Frequent, true) => (&mut self.b2, &mut self.sizes.b2),
        };
        list.unlink(&mut self.store, slot);
        *list_bytes -= bytes;
        self.store.delete(slot);
        if !ghost {
            self.core.release(size);
        }
    }

    fn drop_ghost_tail(&mut self, tier: Tier) {
        let tail = match tier {
            Tier::Recent => self.b1.back(),
            Tier::Frequent => self.b2.back(),
        };
        if let Some(slot) = tail {
            self.drop_record(slot);
        }
    }

    /// Moves the data tail of `tier` to the head of its ghost list.
    fn demote_tail(&mut self, tier: Tier) {
        let tail = match tier {
            Tier::Recent => self.t1.back(),
            Tier::Frequent => self.t2.back(),
        };
        let Some(slot) = tail else { return };
        let Some((id, size)) = self.store.get(slot).map(|obj| (obj.id, obj.size)) else {
            return;
        };
        if let Some(old_ghost) = self.store.find_ghost(id) {
            self.drop_record(old_ghost);
        }
        let bytes = self.core.footprint(size);
        match tier {
            Tier::Recent => {
                self.t1.unlink(&mut self.store, slot);
                self.sizes.t1 -= bytes;
                self.b1.push_front(&mut self.store, slot);
                self.sizes.b1 += bytes;
            },
            Tier::Frequent => {
                self.t2.unlink(&mut self.store, slot);
                self.sizes.t2 -= bytes;
                self.b2.push_front(&mut self.store, slot);
                self.sizes.b2 += bytes;
            },
        }
        self.store.demote_to_ghost(slot);
        self.core.release(size);
    }

    fn replace_tier(&self) -> Tier {
        let t1 = self.sizes.t1 as f64;
        let prefer_t1 = self.sizes.t1 > 0 && (t1 > self.p || (t1 == self.p && self.curr_in_b2));
        if prefer_t1 || self.sizes.t2 == 0 {
            Tier::Recent
        } else {
            Tier::Frequent
        }
    }

    fn replace(&mut self) {
        let tier = self.replace_tier();
        self.demote_tail(tier);
    }

    fn recent_side_full(&self, req: &Request) -> bool {
        self.sizes.t1 + self.sizes.b1 + self.core.footprint(req.size) > self.core.capacity()
    }

    fn tail_id(&self, list: &IntrusiveList) -> Option<ObjId> {
        list.back()
            .and_then(|slot| self.store.get(slot))
            .map(|obj| obj.id)
    }

    /// One ARC replacement step for a missed `req`.
    fn make_room(&mut self, req: &Request) {
        if self.ghost_hit_this_request() {
            self.replace();
            return;
        }
        if self.recent_side_full(req) {
            if self.sizes.b1 > 0 {
                self.drop_ghost_tail(Tier::Recent);
                self.replace();
            } else if let Some(slot) = self.t1.back() {
                self.drop_record(slot);
            } else {
                self.replace();
            }
            return;
        }
        let total = self.sizes.t1 + self.sizes.t2 + self.sizes.b1 + self.sizes.b2;
        if total >= 2 * self.core.capacity() && self.sizes.b2 > 0 {
            self.drop_ghost_tail(Tier::Frequent);
        }
        self.replace();
    }

    fn replace_candidate(&self) -> Option<ObjId> {
        match self.replace_tier() {
            Tier::Recent => self.tail_id(&self.t1),
            Tier::Frequent => self.tail_id(&self.t2),
        }
    }
}

impl EvictionPolicy for Arc {
    fn name(&self) -> &str {
        "ARC"
    }

    fn core(&self) -> &CacheCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CacheCore {
        &mut self.core
    }

    fn check(&mut self, req: &Request, update: bool) -> CheckResult {
        if update {
            self.curr_in_b1 = false;
            self.curr_in_b2 = false;
        }

        if let Some(slot) = self.store.find(req.id) {
            let Some((tier, expired, size)) = self
                .store
                .get(slot)
                .map(|obj| (obj.meta, obj.is_expired_at(req.clock_time), obj.size))
            else {
                return CheckResult::Miss;
            };
            if expired {
                if update {
                    self.drop_record(slot);
                    self.core.record_expired();
                }
                return CheckResult::Expired;
            }
            if update {
                let vtime = self.core.curr_vtime();
                let bytes = self.core.footprint(size);
                if let Some(obj) = self.store.get_mut(slot) {
                    obj.touch(req, vtime);
                    obj.meta = Tier::Frequent;
                }
                match tier {
                    Tier::Recent => {
                        self.t1.unlink(&mut self.store, slot);
                        self.t2.push_front(&mut self.store, slot);
                        self.sizes.t1 -= bytes;
                        self.sizes.t2 += bytes;
                    },
                    Tier::Frequent => self.t2.move_to_front(&mut self.store, slot),
                }
            }
            return CheckResult::Hit;
        }

        if update && let Some(ghost) = self.store.find_ghost(req.id) {
            let Some(tier) = self.store.get(ghost).map(|obj| obj.meta) else {
                return CheckResult::Miss;
            };
            self.vtime_last_ghost_hit = Some(self.core.curr_vtime());
            let (b1, b2) = (self.sizes.b1 as f64, self.sizes.b2 as f64);
            match tier {
                Tier::Recent => {
                    self.curr_in_b1 = true;
                    let delta = (b2 / b1).max(1.0);
                    self.p = (self.p + delta).min(self.core.capacity() as f64);
                },
                Tier::Frequent => {
                    self.curr_in_b2 = true;
                    let delta = (b1 / b2).max(1.0);
                    self.p = (self.p - delta).max(0.0);
                },
            }
            self.drop_record(ghost);
        }
        CheckResult::Miss
    }

    fn insert(&mut self, req: &Request) -> SlotId {
        let bytes = self.core.footprint(req.size);
        let tier = if self.ghost_hit_this_request() {
            self.curr_in_b1 = false;
            self.curr_in_b2 = false;
            self.vtime_last_ghost_hit = None;
            Tier::Frequent
        } else {
            Tier::Recent
        };
        let slot = self.store.insert(req, self.core.curr_vtime(), tier);
        match tier {
            Tier::Recent => {
                self.t1.push_front(&mut self.store, slot);
                self.sizes.t1 += bytes;
            },
            Tier::Frequent => {
                self.t2.push_front(&mut self.store, slot);
                self.sizes.t2 += bytes;
            },
        }
        self.core.charge(req.size);
        slot
    }

    fn to_evict(&self, req: &Request) -> Result<Option<ObjId>, InvariantError> {
        if self.ghost_hit_this_request() {
            return Ok(self.replace_candidate());
        }
        if self.recent_side_full(req) && self.sizes.b1 == 0 {
            return Ok(self.tail_id(&self.t1));
        }
        Ok(self.replace_candidate())
    }

    fn evict(&mut self, req: &Request) -> bool {
        let n_before = self.core.n_obj();
        self.make_room(req);
        self.core.n_obj() < n_before
    }

    fn remove(&mut self, id: ObjId) -> bool {
        match self.store.find(id) {
            Some(slot) => {
                self.drop_record(slot);
                true
            },
            None => false,
        }
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        let lists = [
            (&self.t1, Tier::Recent, false, self.sizes.t1, "T1"),
            (&self.t2, Tier::Frequent, false, self.sizes.t2, "T2"),
            (&self.b1, Tier::Recent, true, self.sizes.b1, "B1"),
            (&self.b2, Tier::Frequent, true, self.sizes.b2, "B2"),
        ];
        let mut n_listed = 0usize;
        for (list, tier, ghost, bytes, name) in lists {
            let mut sum = 0u64;
            for slot in list.iter(&self.store) {
                let obj = self
                    .store
                    .get(slot)
                    .ok_or_else(|| InvariantError::new(format!("{name} links a free slot")))?;
                if obj.meta != tier || obj.is_ghost() != ghost {
                    return Err(InvariantError::new(format!(
                        "object {} is on {name} but tagged {:?} (ghost: {})",
                        obj.id,
                        obj.meta,
                        obj.is_ghost()
                    )));
                }
                sum += self.core.footprint(obj.size);
                n_listed += 1;
            }
            if sum != bytes {
                return Err(InvariantError::new(format!(
                    "{name} tracks {bytes} bytes but holds {sum}"
                )));
            }
        }
        if n_listed != self.store.iter().count() {
            return Err(InvariantError::new("ARC store holds unlisted records"));
        }
        if self.sizes.t1 + self.sizes.t2 != self.core.occupied_bytes() {
            return Err(InvariantError::new(format!(
                "T1 + T2 = {} bytes but {} are occupied",
                self.sizes.t1 + self.sizes.t2,
                self.core.occupied_bytes()
            )));
        }
        if !(0.0..=self.core.capacity() as f64).contains(&self.p) {
            return Err(InvariantError::new(format!("p = {} is out of range", self.p)));
        }
        self.core.check_accounting(&self.store)
    }
}
