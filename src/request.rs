//! Requests and traces.
//!
//! A [`Request`] is the only thing a policy ever sees from a trace: the
//! object id, its size, the wall-clock arrival time and, when the trace was
//! annotated, the logical time of the object's next access. Trace parsing is
//! the caller's business; anything that can replay its requests from the
//! start implements [`Trace`].
//!
//! ## Example
//!
//! ```
//! use cachesim::request::{InternedTrace, Trace};
//!
//! let mut trace = InternedTrace::new();
//! trace.push("/a", 100, 0);
//! trace.push("/b", 200, 1);
//! trace.push("/a", 100, 2);
//! trace.annotate_next_access();
//!
//! let reqs: Vec<_> = trace.requests().collect();
//! assert_eq!(reqs[0].id, reqs[2].id);
//! assert_eq!(reqs[0].next_access_vtime, Some(3));
//! assert_eq!(reqs[1].next_access_vtime, None);
//! ```

use rustc_hash::FxHashMap;

use crate::ds::KeyInterner;

/// Object identifier.
pub type ObjId = u64;

/// One object access.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Request {
    pub id: ObjId,
    /// Object size in bytes.
    pub size: u64,
    /// Arrival time in seconds.
    pub clock_time: i64,
    /// Logical time (1-based request number) of the next access to the same
    /// object, if known.
    pub next_access_vtime: Option<i64>,
    /// Time to live in seconds, if the object expires.
    pub ttl: Option<i64>,
}

impl Request {
    pub fn new(id: ObjId, size: u64, clock_time: i64) -> Self {
        Self {
            id,
            size,
            clock_time,
            next_access_vtime: None,
            ttl: None,
        }
    }

    pub fn with_next_access(mut self, vtime: Option<i64>) -> Self {
        self.next_access_vtime = vtime;
        self
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// A finite request sequence that can be replayed from the start any number
/// of times, independently by several readers.
pub trait Trace: Sync {
    fn requests(&self) -> impl Iterator<Item = Request> + '_;

    /// Number of requests, when cheap to know.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

impl Trace for [Request] {
    fn requests(&self) -> impl Iterator<Item = Request> + '_ {
        self.iter().copied()
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl Trace for Vec<Request> {
    fn requests(&self) -> impl Iterator<Item = Request> + '_ {
        self.iter().copied()
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.len())
    }
}

/// Fills `next_access_vtime` for every request in place.
///
/// Logical time is the 1-based position in the slice, matching the request
/// counter a cache keeps while replaying the same slice from the start.
pub fn annotate_next_access(requests: &mut [Request]) {
    let mut next_seen: FxHashMap<ObjId, i64> = FxHashMap::default();
    for (idx, req) in requests.iter_mut().enumerate().rev() {
        let vtime = idx as i64 + 1;
        req.next_access_vtime = next_seen.insert(req.id, vtime);
    }
}

/// In-memory trace whose objects are named by string keys.
#[derive(Debug, Default)]
pub struct InternedTrace {
    interner: KeyInterner,
    requests: Vec<Request>,
}

impl InternedTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request for `key`, assigning it an id on first sight.
    pub fn push(&mut self, key: &str, size: u64, clock_time: i64) -> ObjId {
        let id = self.interner.intern(key);
        self.requests.push(Request::new(id, size, clock_time));
        id
    }

    pub fn annotate_next_access(&mut self) {
        annotate_next_access(&mut self.requests);
    }

    pub fn key_of(&self, id: ObjId) -> Option<&str> {
        self.interner.resolve(id)
    }

    pub fn n_objects(&self) -> usize {
        self.interner.len()
    }

    pub fn as_slice(&self) -> &[Request] {
        &self.requests
    }
}

impl Trace for InternedTrace {
    fn requests(&self) -> impl Iterator<Item = Request> + '_ {
        self.requests.iter().copied()
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.requests.len())
    }
}
