//! Counters and admission checks shared by every policy.

use log::warn;

use crate::ds::SlotId;
use crate::error::InvariantError;
use crate::request::Request;
use crate::store::ObjectStore;

/// Running state common to all cache instances: capacity, occupancy and
/// request counters.
///
/// Logical time (`vtime`) is the number of requests seen so far, so the
/// request currently being served has `vtime == n_req`.
#[derive(Debug, Clone)]
pub struct CacheCore {
    capacity: u64,
    per_obj_overhead: u64,
    occupied_bytes: u64,
    n_obj: u64,
    n_req: u64,
    n_expired: u64,
    curr_rtime: i64,
    warned_oversize: bool,
}

impl CacheCore {
    pub fn new(capacity: u64, per_obj_overhead: u64) -> Self {
        Self {
            capacity,
            per_obj_overhead,
            occupied_bytes: 0,
            n_obj: 0,
            n_req: 0,
            n_expired: 0,
            curr_rtime: 0,
            warned_oversize: false,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn per_obj_overhead(&self) -> u64 {
        self.per_obj_overhead
    }

    #[inline]
    pub fn occupied_bytes(&self) -> u64 {
        self.occupied_bytes
    }

    #[inline]
    pub fn n_obj(&self) -> u64 {
        self.n_obj
    }

    #[inline]
    pub fn n_req(&self) -> u64 {
        self.n_req
    }

    #[inline]
    pub fn n_expired(&self) -> u64 {
        self.n_expired
    }

    #[inline]
    pub fn curr_rtime(&self) -> i64 {
        self.curr_rtime
    }

    #[inline]
    pub fn curr_vtime(&self) -> i64 {
        self.n_req as i64
    }

    /// Bytes an object of `size` occupies, metadata included.
    #[inline]
    pub fn footprint(&self, size: u64) -> u64 {
        size + self.per_obj_overhead
    }

    pub(crate) fn begin_request(&mut self, req: &Request) {
        self.n_req += 1;
        self.curr_rtime = req.clock_time;
    }

    /// Whether `req` could ever fit. Oversized objects are rejected and
    /// counted as misses; the first one per instance is logged.
    pub fn can_insert(&mut self, req: &Request) -> bool {
        let fits = self.footprint(req.size) <= self.capacity;
        if !fits && !self.warned_oversize {
            self.warned_oversize = true;
            warn!(
                "object {} of {} bytes does not fit in a {} byte cache, not admitted",
                req.id, req.size, self.capacity
            );
        }
        fits
    }

    #[inline]
    pub fn needs_room(&self, req: &Request) -> bool {
        self.occupied_bytes + self.footprint(req.size) > self.capacity
    }

    #[inline]
    pub(crate) fn charge(&mut self, size: u64) {
        self.occupied_bytes += self.footprint(size);
        self.n_obj += 1;
    }

    #[inline]
    pub(crate) fn release(&mut self, size: u64) {
        let bytes = self.footprint(size);
        debug_assert!(self.occupied_bytes >= bytes && self.n_obj > 0);
        self.occupied_bytes -= bytes;
        self.n_obj -= 1;
    }

    #[inline]
    pub(crate) fn record_expired(&mut self) {
        self.n_expired += 1;
    }

    /// Compares the counters with what the store actually holds.
    pub fn check_accounting<M>(&self, store: &ObjectStore<M>) -> Result<(), InvariantError> {
        let (n_live, live_bytes) = store
            .iter_live()
            .fold((0u64, 0u64), |(n, bytes), (_, obj)| {
                (n + 1, bytes + self.footprint(obj.size))
            });
        if n_live != self.n_obj {
            return Err(InvariantError::new(format!(
                "n_obj is {} but {} live objects are stored",
                self.n_obj, n_live
            )));
        }
        if live_bytes != self.occupied_bytes {
            return Err(InvariantError::new(format!(
                "occupied_bytes is {} but live objects take {} bytes",
                self.occupied_bytes, live_bytes
            )));
        }
        if self.occupied_bytes > self.capacity {
            return Err(InvariantError::new(format!(
                "occupied_bytes {} exceeds capacity {}",
                self.occupied_bytes, self.capacity
            )));
        }
        store.check_consistency()
    }
}

/// Result of a live lookup for list-based policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    Found(SlotId),
    Expired(SlotId),
    Missing,
}

/// Finds the live record for `req`, flagging it if its TTL has passed.
pub(crate) fn lookup<M>(store: &ObjectStore<M>, req: &Request) -> Lookup {
    match store.find(req.id) {
        None => Lookup::Missing,
        Some(slot) => match store.get(slot) {
            Some(obj) if obj.is_expired_at(req.clock_time) => Lookup::Expired(slot),
            Some(_) => Lookup::Found(slot),
            None => Lookup::Missing,
        },
    }
}
