use crate::ds::{Linked, Links};
use crate::request::{ObjId, Request};

/// The cache's record of one object.
///
/// `M` is the policy's per-object metadata (Clock counter, Sieve visited bit,
/// ARC list membership, GLCache segment back-reference, ...).
#[derive(Debug, Clone)]
pub struct CacheObject<M> {
    pub id: ObjId,
    pub size: u64,
    pub create_rtime: i64,
    pub last_access_rtime: i64,
    pub last_access_vtime: i64,
    pub next_access_vtime: Option<i64>,
    pub exp_time: Option<i64>,
    pub(crate) links: Links,
    pub(crate) ghost: bool,
    pub meta: M,
}

impl<M> CacheObject<M> {
    pub(crate) fn from_request(req: &Request, vtime: i64, meta: M) -> Self {
        Self {
            id: req.id,
            size: req.size,
            create_rtime: req.clock_time,
            last_access_rtime: req.clock_time,
            last_access_vtime: vtime,
            next_access_vtime: req.next_access_vtime,
            exp_time: req.ttl.map(|ttl| req.clock_time + ttl),
            links: Links::default(),
            ghost: false,
            meta,
        }
    }

    /// Ghost records keep history only; they hold no cache space.
    #[inline]
    pub fn is_ghost(&self) -> bool {
        self.ghost
    }

    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp_time.is_some_and(|exp| exp < now)
    }

    /// Records an access at logical time `vtime`.
    pub(crate) fn touch(&mut self, req: &Request, vtime: i64) {
        self.last_access_rtime = req.clock_time;
        self.last_access_vtime = vtime;
        self.next_access_vtime = req.next_access_vtime;
    }
}

impl<M> Linked for CacheObject<M> {
    fn links(&self) -> &Links {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}
