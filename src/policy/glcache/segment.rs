//! Segments, buckets and the segment lifecycle.
//!
//! A segment is a fixed-capacity, append-only group of objects written
//! together. Segments are chained per bucket in creation order; a second,
//! independent chain (`next_ranked`) orders them by predicted utility after
//! each ranking.
//!
//! ## Architecture
//!
//! ```text
//!   buckets[0]   first ─► [S3] ◄─► [S7] ◄─► [S9] ◄─► [S12] ◄─ last
//!                          │                  ▲
//!                          └── next_ranked ───┘          (ranked order)
//!   buckets[1]   first ─► [S4] ◄─► [S10] ◄─ last
//!       ...
//!   TRAIN_BUCKET first ─► [S1] ◄─► [S5]   (quarantine: ghosts only)
//!
//!   ranked: [S9, None, S3, S10, ...]  pos ─► next candidate
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//!   allocate ─► append ─► (full) ─► merge / evict_one ─┬─► free
//!                                                       └─► quarantine (if sampled)
//!                                                               │
//!                                          clean_training ◄─────┘ after each training run
//! ```
//!
//! Objects live in the shared [`ObjectStore`]; a segment only holds their
//! slot handles, and every object's metadata points back at its segment.
//! Quarantined segments hold ghost records, which keep collecting the
//! segment's training label until the next training run cleans them up.

use log::trace;

use crate::ds::{SlotArena, SlotId};
use crate::error::InvariantError;
use crate::policy::core::CacheCore;
use crate::store::ObjectStore;

/// Rolling hit windows kept at each granularity.
pub const N_TIME_WINDOW: usize = 8;

/// Live buckets. Bucket `MAX_BUCKETS` is the training quarantine.
pub const MAX_BUCKETS: usize = 64;

pub(crate) const TRAIN_BUCKET: usize = MAX_BUCKETS;

/// Added to the utility of segments that cannot take part in a merge, so
/// ranking puts them last.
pub(crate) const UNMERGEABLE_PENALTY: f64 = (i32::MAX / 2) as f64;

/// Per-object GLCache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlObjMeta {
    /// Segment holding the object (or, for ghosts, the quarantined segment).
    pub segment: SlotId,
    pub freq: u32,
    /// Hit at least once since it was written to its segment.
    pub active: bool,
    /// Hit since its segment was sampled for training.
    pub seen_after_snapshot: bool,
}

impl GlObjMeta {
    pub(crate) fn new(segment: SlotId) -> Self {
        Self {
            segment,
            freq: 0,
            active: false,
            seen_after_snapshot: false,
        }
    }
}

/// Hit counts over the last [`N_TIME_WINDOW`] minutes, ten-minute spans and
/// hours. Index 0 is the current window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitWindows {
    pub per_min: [u32; N_TIME_WINDOW],
    pub per_ten_min: [u32; N_TIME_WINDOW],
    pub per_hour: [u32; N_TIME_WINDOW],
    last_min_ts: i64,
    last_ten_min_ts: i64,
    last_hour_ts: i64,
}

impl HitWindows {
    pub fn new(now: i64) -> Self {
        Self {
            last_min_ts: now,
            last_ten_min_ts: now,
            last_hour_ts: now,
            ..Self::default()
        }
    }

    pub fn record_hit(&mut self, now: i64) {
        if now - self.last_min_ts >= 60 {
            self.shift(now);
        }
        self.per_min[0] += 1;
        self.per_ten_min[0] += 1;
        self.per_hour[0] += 1;
    }

    /// Opens a new window at each granularity whose current window has
    /// ended. A coarser window only moves if every finer one did.
    fn shift(&mut self, now: i64) {
        if (now - self.last_min_ts) / 60 <= 0 {
            return;
        }
        shift_right(&mut self.per_min);
        self.last_min_ts = now;

        if (now - self.last_ten_min_ts) / 600 <= 0 {
            return;
        }
        shift_right(&mut self.per_ten_min);
        self.last_ten_min_ts = now;

        if (now - self.last_hour_ts) / 3600 <= 0 {
            return;
        }
        shift_right(&mut self.per_hour);
        self.last_hour_ts = now;
    }
}

fn shift_right(windows: &mut [u32; N_TIME_WINDOW]) {
    windows.copy_within(0..N_TIME_WINDOW - 1, 1);
    windows[0] = 0;
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub(crate) id: u64,
    pub(crate) objs: Vec<SlotId>,
    pub(crate) n_byte: u64,
    pub(crate) n_hit: u64,
    pub(crate) n_active: u32,
    pub(crate) n_merge: u32,
    pub(crate) create_rtime: i64,
    pub(crate) create_vtime: i64,
    pub(crate) req_rate: f64,
    pub(crate) write_rate: f64,
    pub(crate) miss_ratio: f64,
    pub(crate) pred_utility: f64,
    pub(crate) train_utility: f64,
    pub(crate) n_util_skipped: usize,
    pub(crate) rank: Option<usize>,
    pub(crate) selected_for_training: bool,
    pub(crate) train_row: Option<usize>,
    pub(crate) become_train_rtime: i64,
    pub(crate) become_train_vtime: i64,
    pub(crate) windows: HitWindows,
    pub(crate) bucket: usize,
    prev: Option<SlotId>,
    next: Option<SlotId>,
    pub(crate) next_ranked: Option<SlotId>,
}

impl Segment {
    fn new(id: u64, bucket: usize, capacity: usize, rtime: i64, vtime: i64) -> Self {
        Self {
            id,
            objs: Vec::with_capacity(capacity),
            n_byte: 0,
            n_hit: 0,
            n_active: 0,
            n_merge: 0,
            create_rtime: rtime,
            create_vtime: vtime,
            req_rate: 0.0,
            write_rate: 0.0,
            miss_ratio: 0.0,
            pred_utility: f64::from(i32::MAX),
            train_utility: 0.0,
            n_util_skipped: 0,
            rank: None,
            selected_for_training: false,
            train_row: None,
            become_train_rtime: 0,
            become_train_vtime: 0,
            windows: HitWindows::new(rtime),
            bucket,
            prev: None,
            next: None,
            next_ranked: None,
        }
    }

    /// Sequential allocation number.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn n_obj(&self) -> usize {
        self.objs.len()
    }

    /// Bytes held, per-object overhead included.
    pub fn n_byte(&self) -> u64 {
        self.n_byte
    }

    pub fn n_hit(&self) -> u64 {
        self.n_hit
    }

    pub fn n_active(&self) -> u32 {
        self.n_active
    }

    /// Merges this segment's contents have been through.
    pub fn n_merge(&self) -> u32 {
        self.n_merge
    }

    pub fn create_rtime(&self) -> i64 {
        self.create_rtime
    }

    pub fn bucket(&self) -> usize {
        self.bucket
    }

    pub fn pred_utility(&self) -> f64 {
        self.pred_utility
    }

    pub fn is_selected_for_training(&self) -> bool {
        self.selected_for_training
    }

    pub fn hit_windows(&self) -> &HitWindows {
        &self.windows
    }

    pub fn next(&self) -> Option<SlotId> {
        self.next
    }

    pub fn prev(&self) -> Option<SlotId> {
        self.prev
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bucket {
    pub(crate) first: Option<SlotId>,
    pub(crate) last: Option<SlotId>,
    pub(crate) n_in_use: usize,
    /// FIFO cursor; `None` means start from `first`.
    pub(crate) next_to_evict: Option<SlotId>,
    pub(crate) ranked_head: Option<SlotId>,
    pub(crate) ranked_tail: Option<SlotId>,
}

impl Bucket {
    pub fn n_in_use(&self) -> usize {
        self.n_in_use
    }

    pub fn first(&self) -> Option<SlotId> {
        self.first
    }

    pub fn last(&self) -> Option<SlotId> {
        self.last
    }
}

/// Segments sorted by ascending utility, consumed from `pos`.
#[derive(Debug, Clone, Default)]
pub(crate) struct RankState {
    pub(crate) slots: Vec<Option<SlotId>>,
    pub(crate) pos: usize,
    pub(crate) n_ranked: usize,
}

/// What a merge did with its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub new_segment: SlotId,
    pub n_retained: usize,
    pub n_evicted: usize,
    pub n_ghosted: usize,
}

#[derive(Debug)]
pub struct SegmentManager {
    segs: SlotArena<Segment>,
    buckets: Vec<Bucket>,
    n_in_use: usize,
    n_training: usize,
    next_id: u64,
    segment_size: usize,
    pub(crate) ranked: RankState,
}

impl SegmentManager {
    pub fn new(segment_size: usize) -> Self {
        Self {
            segs: SlotArena::new(),
            buckets: vec![Bucket::default(); MAX_BUCKETS + 1],
            n_in_use: 0,
            n_training: 0,
            next_id: 0,
            segment_size,
            ranked: RankState::default(),
        }
    }

    #[inline]
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Segments in live buckets.
    #[inline]
    pub fn n_in_use(&self) -> usize {
        self.n_in_use
    }

    /// Segments in quarantine.
    #[inline]
    pub fn n_training(&self) -> usize {
        self.n_training
    }

    #[inline]
    pub fn get(&self, id: SlotId) -> Option<&Segment> {
        self.segs.get(id)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: SlotId) -> Option<&mut Segment> {
        self.segs.get_mut(id)
    }

    /// # Panics
    ///
    /// Panics if `idx > MAX_BUCKETS`.
    pub fn bucket(&self, idx: usize) -> &Bucket {
        &self.buckets[idx]
    }

    pub(crate) fn bucket_mut(&mut self, idx: usize) -> &mut Bucket {
        &mut self.buckets[idx]
    }

    /// Segments of one bucket in creation order.
    pub fn iter_bucket(&self, idx: usize) -> BucketIter<'_> {
        BucketIter {
            segs: &self.segs,
            cur: self.buckets.get(idx).and_then(|b| b.first),
        }
    }

    /// Every live segment, bucket by bucket.
    pub fn iter_live(&self) -> impl Iterator<Item = (SlotId, &Segment)> + '_ {
        (0..MAX_BUCKETS).flat_map(move |bi| self.iter_bucket(bi))
    }

    /// Creates an unlinked segment for `bucket`.
    pub(crate) fn allocate(&mut self, bucket: usize, rtime: i64, vtime: i64) -> SlotId {
        let id = self.next_id;
        self.next_id += 1;
        self.segs
            .insert(Segment::new(id, bucket, self.segment_size, rtime, vtime))
    }

    fn count_in(&mut self, bucket: usize, delta: isize) {
        let n = if bucket == TRAIN_BUCKET {
            &mut self.n_training
        } else {
            &mut self.n_in_use
        };
        *n = n.wrapping_add_signed(delta);
        let b = &mut self.buckets[bucket];
        b.n_in_use = b.n_in_use.wrapping_add_signed(delta);
    }

    /// Links `id` at the tail of its bucket.
    pub(crate) fn append(&mut self, id: SlotId) {
        let Some(seg) = self.segs.get(id) else { return };
        let bucket = seg.bucket;
        let last = self.buckets[bucket].last;
        if let Some(seg) = self.segs.get_mut(id) {
            seg.prev = last;
            seg.next = None;
        }
        match last.and_then(|l| self.segs.get_mut(l)) {
            Some(tail) => tail.next = Some(id),
            None => self.buckets[bucket].first = Some(id),
        }
        self.buckets[bucket].last = Some(id);
        self.count_in(bucket, 1);
    }

    /// Links `id` into `anchor`'s bucket, just before `anchor`.
    pub(crate) fn link_before(&mut self, anchor: SlotId, id: SlotId) {
        let Some((bucket, prev)) = self.segs.get(anchor).map(|a| (a.bucket, a.prev)) else {
            return;
        };
        if let Some(seg) = self.segs.get_mut(id) {
            seg.bucket = bucket;
            seg.prev = prev;
            seg.next = Some(anchor);
        }
        if let Some(a) = self.segs.get_mut(anchor) {
            a.prev = Some(id);
        }
        match prev.and_then(|p| self.segs.get_mut(p)) {
            Some(p) => p.next = Some(id),
            None => self.buckets[bucket].first = Some(id),
        }
        self.count_in(bucket, 1);
    }

    /// Removes `id` from its bucket chain without freeing it.
    pub(crate) fn unlink(&mut self, id: SlotId) {
        let Some((bucket, prev, next)) = self.segs.get(id).map(|s| (s.bucket, s.prev, s.next))
        else {
            return;
        };
        match prev.and_then(|p| self.segs.get_mut(p)) {
            Some(p) => p.next = next,
            None => self.buckets[bucket].first = next,
        }
        match next.and_then(|n| self.segs.get_mut(n)) {
            Some(n) => n.prev = prev,
            None => self.buckets[bucket].last = prev,
        }
        let b = &mut self.buckets[bucket];
        if b.next_to_evict == Some(id) {
            b.next_to_evict = next;
        }
        if b.ranked_head == Some(id) {
            b.ranked_head = None;
        }
        if b.ranked_tail == Some(id) {
            b.ranked_tail = None;
        }
        if let Some(seg) = self.segs.get_mut(id) {
            seg.prev = None;
            seg.next = None;
        }
        self.count_in(bucket, -1);
    }

    /// Drops `id` from the ranked array.
    pub(crate) fn clear_rank(&mut self, id: SlotId) {
        let Some(seg) = self.segs.get_mut(id) else { return };
        if let Some(rank) = seg.rank.take()
            && let Some(slot) = self.ranked.slots.get_mut(rank)
            && *slot == Some(id)
        {
            *slot = None;
        }
    }

    /// Unlinks and frees a segment. Its objects must already be gone.
    pub(crate) fn free(&mut self, id: SlotId) -> Option<Segment> {
        self.clear_rank(id);
        self.unlink(id);
        self.segs.remove(id)
    }

    /// Moves a sampled segment to the quarantine bucket, restarting its
    /// label from `now`.
    pub(crate) fn transform_to_training(&mut self, id: SlotId, rtime: i64, vtime: i64) {
        self.clear_rank(id);
        self.unlink(id);
        if let Some(seg) = self.segs.get_mut(id) {
            seg.bucket = TRAIN_BUCKET;
            seg.become_train_rtime = rtime;
            seg.become_train_vtime = vtime;
            seg.train_utility = 0.0;
        }
        self.append(id);
    }

    /// Whether `min` segments, starting at `id`, can be merged: each must
    /// have a successor in creation order (the bucket's tail is still being
    /// written). With `consecutive` the candidates are creation-order
    /// neighbours, otherwise ranked-order neighbours.
    pub fn is_evictable(&self, id: Option<SlotId>, min: usize, consecutive: bool) -> bool {
        let mut n = 0;
        let mut cur = id;
        while let Some(sid) = cur
            && let Some(seg) = self.segs.get(sid)
            && seg.next.is_some()
        {
            n += 1;
            if n >= min {
                return true;
            }
            cur = if consecutive {
                seg.next
            } else {
                self.ranked_next(sid)
            };
        }
        n >= min
    }

    /// `next_ranked` of `id`, if it still names a ranked segment of the same
    /// bucket.
    pub(crate) fn ranked_next(&self, id: SlotId) -> Option<SlotId> {
        let seg = self.segs.get(id)?;
        let next = seg.next_ranked?;
        let target = self.segs.get(next)?;
        (target.bucket == seg.bucket && target.rank.is_some()).then_some(next)
    }

    /// Grows the ranked array when there are more segments than slots, and
    /// reports whether a re-rank is due.
    pub(crate) fn prepare_ranking(&mut self, rank_intvl: f64) -> bool {
        let mut resized = false;
        if self.ranked.slots.len() < self.n_in_use {
            self.ranked.slots = vec![None; self.n_in_use * 2];
            resized = true;
        }
        resized || self.ranked.pos as f64 >= self.ranked.n_ranked as f64 * rank_intvl
    }

    /// Sorts live segments by `(pred_utility, create_rtime, create_vtime)`,
    /// rebuilds the ranked array and each bucket's ranked chain.
    pub(crate) fn rank_by_utility(&mut self) {
        let mut order: Vec<SlotId> = self.iter_live().map(|(id, _)| id).collect();
        let segs = &self.segs;
        order.sort_by(|&a, &b| match (segs.get(a), segs.get(b)) {
            (Some(sa), Some(sb)) => sa
                .pred_utility
                .total_cmp(&sb.pred_utility)
                .then(sa.create_rtime.cmp(&sb.create_rtime))
                .then(sa.create_vtime.cmp(&sb.create_vtime)),
            _ => std::cmp::Ordering::Equal,
        });

        if self.ranked.slots.len() < order.len() {
            self.ranked.slots = vec![None; order.len() * 2];
        } else {
            self.ranked.slots.fill(None);
        }
        for bucket in self.buckets.iter_mut().take(MAX_BUCKETS) {
            bucket.ranked_head = None;
            bucket.ranked_tail = None;
        }

        for (rank, &id) in order.iter().enumerate() {
            self.ranked.slots[rank] = Some(id);
            let Some(seg) = self.segs.get_mut(id) else { continue };
            seg.rank = Some(rank);
            seg.next_ranked = None;
            let bucket = seg.bucket;
            match self.buckets[bucket].ranked_tail {
                Some(tail) => {
                    if let Some(t) = self.segs.get_mut(tail) {
                        t.next_ranked = Some(id);
                    }
                },
                None => self.buckets[bucket].ranked_head = Some(id),
            }
            self.buckets[bucket].ranked_tail = Some(id);
        }
        self.ranked.pos = 0;
        self.ranked.n_ranked = order.len();
        trace!("ranked {} segments", order.len());
    }

    /// Merges `parents` (same bucket, in order) into one new segment placed
    /// before `parents[0]`.
    ///
    /// `scores` holds one score per parent object, in parent order. Objects
    /// scoring at least `cutoff` move to the new segment while it has room;
    /// the rest are evicted. Objects of sampled parents that have not been
    /// hit since the snapshot leave a ghost in the parent, which then moves
    /// to quarantine.
    ///
    /// # Panics
    ///
    /// Panics if the parents are not all in the same live bucket.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn merge(
        &mut self,
        store: &mut ObjectStore<GlObjMeta>,
        core: &mut CacheCore,
        parents: &[SlotId],
        scores: &[f64],
        cutoff: f64,
        rtime: i64,
        vtime: i64,
    ) -> MergeOutcome {
        let bucket = parents
            .first()
            .and_then(|&p| self.segs.get(p))
            .map(|s| s.bucket)
            .unwrap_or(TRAIN_BUCKET);
        assert!(
            bucket != TRAIN_BUCKET
                && parents
                    .iter()
                    .all(|&p| self.segs.get(p).is_some_and(|s| s.bucket == bucket)),
            "merge of segments {parents:?} that are not in one live bucket"
        );

        let n = parents.len() as f64;
        let (mut req_rate, mut write_rate, mut miss_ratio, mut n_merge) = (0.0, 0.0, 0.0, 0);
        for seg in parents.iter().filter_map(|&p| self.segs.get(p)) {
            req_rate += seg.req_rate;
            write_rate += seg.write_rate;
            miss_ratio += seg.miss_ratio;
            n_merge = n_merge.max(seg.n_merge);
        }
        let new_id = self.allocate(bucket, rtime, vtime);
        if let Some(seg) = self.segs.get_mut(new_id) {
            seg.req_rate = req_rate / n;
            seg.write_rate = write_rate / n;
            seg.miss_ratio = miss_ratio / n;
            seg.n_merge = n_merge + 1;
        }
        self.link_before(parents[0], new_id);

        let mut outcome = MergeOutcome {
            new_segment: new_id,
            n_retained: 0,
            n_evicted: 0,
            n_ghosted: 0,
        };
        let mut retained = Vec::with_capacity(self.segment_size);
        let mut retained_bytes = 0;
        let mut k = 0;
        for &parent in parents {
            let Some(seg) = self.segs.get_mut(parent) else { continue };
            let training = seg.selected_for_training;
            let objs = std::mem::take(&mut seg.objs);
            let mut ghosts = Vec::new();

            for slot in objs {
                let score = scores.get(k).copied().unwrap_or(f64::NEG_INFINITY);
                k += 1;
                let Some(obj) = store.get(slot) else { continue };
                let (size, seen) = (obj.size, obj.meta.seen_after_snapshot);

                if retained.len() < self.segment_size && score >= cutoff {
                    if training
                        && !seen
                        && let Some(ghost) = store.fork_ghost(slot)
                    {
                        ghosts.push(ghost);
                    }
                    if let Some(obj) = store.get_mut(slot) {
                        obj.meta.segment = new_id;
                        obj.meta.freq = (obj.meta.freq + 1) / 2;
                        obj.meta.active = false;
                        obj.meta.seen_after_snapshot = false;
                    }
                    retained.push(slot);
                    retained_bytes += core.footprint(size);
                    outcome.n_retained += 1;
                } else {
                    core.release(size);
                    outcome.n_evicted += 1;
                    if training && !seen {
                        store.demote_to_ghost(slot);
                        ghosts.push(slot);
                    } else {
                        store.delete(slot);
                    }
                }
            }

            if training {
                outcome.n_ghosted += ghosts.len();
                if let Some(seg) = self.segs.get_mut(parent) {
                    seg.objs = ghosts;
                    seg.n_byte = 0;
                }
                self.transform_to_training(parent, rtime, vtime);
            } else {
                self.free(parent);
            }
        }

        if let Some(seg) = self.segs.get_mut(new_id) {
            seg.objs = retained;
            seg.n_byte = retained_bytes;
        }
        trace!(
            "merged {} segments into {:?}: {} retained, {} evicted",
            parents.len(),
            new_id,
            outcome.n_retained,
            outcome.n_evicted
        );
        outcome
    }

    /// Evicts every object of `id` without retaining any. Returns the number
    /// of objects evicted.
    pub(crate) fn evict_one(
        &mut self,
        store: &mut ObjectStore<GlObjMeta>,
        core: &mut CacheCore,
        id: SlotId,
        rtime: i64,
        vtime: i64,
    ) -> usize {
        let Some(seg) = self.segs.get_mut(id) else { return 0 };
        let training = seg.selected_for_training;
        let objs = std::mem::take(&mut seg.objs);
        seg.n_byte = 0;
        seg.n_active = 0;

        let mut ghosts = Vec::new();
        let mut n_evicted = 0;
        for slot in objs {
            let Some(obj) = store.get(slot) else { continue };
            let (size, seen) = (obj.size, obj.meta.seen_after_snapshot);
            core.release(size);
            n_evicted += 1;
            if training && !seen {
                store.demote_to_ghost(slot);
                ghosts.push(slot);
            } else {
                store.delete(slot);
            }
        }

        if training {
            if let Some(seg) = self.segs.get_mut(id) {
                seg.objs = ghosts;
            }
            self.transform_to_training(id, rtime, vtime);
        } else {
            self.free(id);
        }
        n_evicted
    }

    /// Frees every quarantined segment along with the ghosts it still owns.
    /// Returns the number of ghosts deleted.
    pub(crate) fn clean_training(&mut self, store: &mut ObjectStore<GlObjMeta>) -> usize {
        let mut n_deleted = 0;
        let mut cur = self.buckets[TRAIN_BUCKET].first;
        while let Some(id) = cur {
            let Some(seg) = self.segs.remove(id) else { break };
            cur = seg.next;
            for slot in seg.objs {
                // a ghost displaced by a newer one may have freed the slot
                let owned = store
                    .get(slot)
                    .is_some_and(|obj| obj.is_ghost() && obj.meta.segment == id);
                if owned {
                    store.delete(slot);
                    n_deleted += 1;
                }
            }
        }
        self.buckets[TRAIN_BUCKET] = Bucket::default();
        self.n_training = 0;
        n_deleted
    }

    /// Verifies chains, counters and object back-references.
    pub fn check_invariants(
        &self,
        store: &ObjectStore<GlObjMeta>,
        core: &CacheCore,
    ) -> Result<(), InvariantError> {
        let mut n_live_segs = 0;
        let mut n_live_objs = 0;
        for (bi, bucket) in self.buckets.iter().enumerate() {
            let mut n = 0;
            let mut prev = None;
            let mut cur = bucket.first;
            while let Some(id) = cur {
                let seg = self.segs.get(id).ok_or_else(|| {
                    InvariantError::new(format!("bucket {bi} links to a free segment slot"))
                })?;
                if seg.bucket != bi || seg.prev != prev {
                    return Err(InvariantError::new(format!(
                        "segment {} is mislinked in bucket {bi}",
                        seg.id
                    )));
                }
                if bi != TRAIN_BUCKET {
                    n_live_objs += seg.objs.len();
                    self.check_segment(id, seg, store, core)?;
                }
                n += 1;
                if n > self.segs.len() {
                    return Err(InvariantError::new(format!("bucket {bi} chain has a cycle")));
                }
                prev = cur;
                cur = seg.next;
            }
            if n != bucket.n_in_use || prev != bucket.last {
                return Err(InvariantError::new(format!(
                    "bucket {bi} counts {} segments but links {n}",
                    bucket.n_in_use
                )));
            }
            if bi != TRAIN_BUCKET {
                n_live_segs += n;
            }
        }
        if n_live_segs != self.n_in_use
            || self.buckets[TRAIN_BUCKET].n_in_use != self.n_training
            || self.segs.len() != self.n_in_use + self.n_training
        {
            return Err(InvariantError::new(format!(
                "{} segments allocated but {} live and {} training",
                self.segs.len(),
                self.n_in_use,
                self.n_training
            )));
        }
        if n_live_objs != store.len() {
            return Err(InvariantError::new(format!(
                "segments hold {n_live_objs} objects but the store holds {}",
                store.len()
            )));
        }
        for (rank, slot) in self.ranked.slots.iter().enumerate() {
            if let Some(id) = *slot
                && self.segs.get(id).is_none_or(|s| s.rank != Some(rank))
            {
                return Err(InvariantError::new(format!(
                    "ranked slot {rank} names a segment with a different rank"
                )));
            }
        }
        Ok(())
    }

    fn check_segment(
        &self,
        id: SlotId,
        seg: &Segment,
        store: &ObjectStore<GlObjMeta>,
        core: &CacheCore,
    ) -> Result<(), InvariantError> {
        if seg.objs.len() > self.segment_size {
            return Err(InvariantError::new(format!(
                "segment {} holds {} objects, capacity {}",
                seg.id,
                seg.objs.len(),
                self.segment_size
            )));
        }
        let mut bytes = 0;
        let mut n_active = 0;
        for &slot in &seg.objs {
            let obj = store
                .get(slot)
                .filter(|obj| !obj.is_ghost() && obj.meta.segment == id)
                .ok_or_else(|| {
                    InvariantError::new(format!(
                        "segment {} lists an object that does not point back at it",
                        seg.id
                    ))
                })?;
            bytes += core.footprint(obj.size);
            n_active += u32::from(obj.meta.active);
        }
        if bytes != seg.n_byte || n_active != seg.n_active {
            return Err(InvariantError::new(format!(
                "segment {} counts {} bytes / {} active, objects hold {bytes} / {n_active}",
                seg.id, seg.n_byte, seg.n_active
            )));
        }
        Ok(())
    }
}

/// Creation-order walk over one bucket.
pub struct BucketIter<'a> {
    segs: &'a SlotArena<Segment>,
    cur: Option<SlotId>,
}

impl<'a> Iterator for BucketIter<'a> {
    type Item = (SlotId, &'a Segment);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let seg = self.segs.get(id)?;
        self.cur = seg.next;
        Some((id, seg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    fn fill(
        mgr: &mut SegmentManager,
        store: &mut ObjectStore<GlObjMeta>,
        core: &mut CacheCore,
        seg: SlotId,
        ids: &[u64],
    ) {
        for &id in ids {
            let slot = store.insert(&Request::new(id, 1, 0), 0, GlObjMeta::new(seg));
            core.charge(1);
            let s = mgr.get_mut(seg).unwrap();
            s.objs.push(slot);
            s.n_byte += 1;
        }
    }

    fn setup(n_segs: usize, per_seg: usize) -> (SegmentManager, ObjectStore<GlObjMeta>, CacheCore, Vec<SlotId>) {
        let mut mgr = SegmentManager::new(per_seg);
        let mut store = ObjectStore::new();
        let mut core = CacheCore::new(1000, 0);
        let mut ids = Vec::new();
        for s in 0..n_segs {
            let seg = mgr.allocate(0, 0, 0);
            mgr.append(seg);
            let base = (s * per_seg) as u64;
            let objs: Vec<u64> = (base..base + per_seg as u64).collect();
            fill(&mut mgr, &mut store, &mut core, seg, &objs);
            ids.push(seg);
        }
        (mgr, store, core, ids)
    }

    mod windows {
        use super::*;

        #[test]
        fn test_minute_shift_only() {
            let mut w = HitWindows::new(0);
            w.record_hit(10);
            w.record_hit(70);
            assert_eq!(w.per_min[..2], [1, 1]);
            // ten-minute and hour windows have not ended
            assert_eq!(w.per_ten_min[..2], [2, 0]);
            assert_eq!(w.per_hour[..2], [2, 0]);
        }

        #[test]
        fn test_cascading_shift() {
            let mut w = HitWindows::new(0);
            w.record_hit(0);
            w.record_hit(3600);
            assert_eq!(w.per_min[..2], [1, 1]);
            assert_eq!(w.per_ten_min[..2], [1, 1]);
            assert_eq!(w.per_hour[..2], [1, 1]);
        }
    }

    mod chains {
        use super::*;

        #[test]
        fn test_append_and_link_before() {
            let (mut mgr, store, core, ids) = setup(3, 2);
            let new = mgr.allocate(0, 5, 5);
            mgr.link_before(ids[1], new);
            let order: Vec<_> = mgr.iter_bucket(0).map(|(id, _)| id).collect();
            assert_eq!(order, vec![ids[0], new, ids[1], ids[2]]);
            assert_eq!(mgr.n_in_use(), 4);
            assert_eq!(mgr.bucket(0).n_in_use(), 4);
            // empty new segment keeps the object count intact
            mgr.check_invariants(&store, &core).unwrap();
        }

        #[test]
        fn test_is_evictable_needs_successors() {
            let (mgr, _, _, ids) = setup(3, 2);
            assert!(mgr.is_evictable(Some(ids[0]), 2, true));
            // the tail is still being written
            assert!(!mgr.is_evictable(Some(ids[1]), 2, true));
            assert!(mgr.is_evictable(Some(ids[1]), 1, true));
            assert!(!mgr.is_evictable(Some(ids[2]), 1, true));
            assert!(!mgr.is_evictable(None, 1, true));
        }

        #[test]
        fn test_rank_by_utility_orders_and_chains() {
            let (mut mgr, store, core, ids) = setup(3, 2);
            for (&id, u) in ids.iter().zip([2.0, 1.0, 3.0]) {
                mgr.get_mut(id).unwrap().pred_utility = u;
            }
            mgr.rank_by_utility();
            assert_eq!(mgr.ranked.slots[..3], [Some(ids[1]), Some(ids[0]), Some(ids[2])]);
            assert_eq!(mgr.bucket(0).ranked_head, Some(ids[1]));
            assert_eq!(mgr.ranked_next(ids[1]), Some(ids[0]));
            assert_eq!(mgr.ranked_next(ids[0]), Some(ids[2]));
            assert!(mgr.is_evictable(Some(ids[1]), 2, false));
            // ranked neighbour of ids[0] is the bucket tail
            assert!(!mgr.is_evictable(Some(ids[0]), 2, false));
            mgr.check_invariants(&store, &core).unwrap();
        }

        #[test]
        fn test_ties_break_by_creation_time() {
            let mut mgr = SegmentManager::new(2);
            let late = mgr.allocate(0, 20, 2);
            mgr.append(late);
            let early = mgr.allocate(0, 10, 1);
            mgr.append(early);
            mgr.rank_by_utility();
            assert_eq!(mgr.ranked.slots[0], Some(early));
        }
    }

    mod merging {
        use super::*;

        #[test]
        fn test_merge_keeps_top_scores() {
            let (mut mgr, mut store, mut core, ids) = setup(3, 4);
            let scores = [1.0, 5.0, 2.0, 8.0, 3.0, 9.0, 4.0, 10.0];
            let out = mgr.merge(&mut store, &mut core, &ids[..2], &scores, 9.0, 10, 10);
            assert_eq!(out.n_retained, 2);
            assert_eq!(out.n_evicted, 6);
            assert_eq!(out.n_retained + out.n_evicted, 8);

            // object ids 5 and 7 carried scores 9 and 10
            let new = mgr.get(out.new_segment).unwrap();
            let kept: Vec<_> = new.objs.iter().map(|&s| store.get(s).unwrap().id).collect();
            assert_eq!(kept, vec![5, 7]);
            assert_eq!(new.n_merge(), 1);
            assert_eq!(mgr.n_in_use(), 2);
            assert_eq!(mgr.bucket(0).first(), Some(out.new_segment));
            assert_eq!(core.n_obj(), 6);
            mgr.check_invariants(&store, &core).unwrap();
        }

        #[test]
        fn test_merge_respects_capacity() {
            let (mut mgr, mut store, mut core, ids) = setup(3, 4);
            let scores = [1.0; 8];
            let out = mgr.merge(&mut store, &mut core, &ids[..2], &scores, 1.0, 1, 1);
            assert_eq!(out.n_retained, 4);
            assert_eq!(out.n_evicted, 4);
            mgr.check_invariants(&store, &core).unwrap();
        }

        #[test]
        fn test_training_parent_is_quarantined_with_ghosts() {
            let (mut mgr, mut store, mut core, ids) = setup(3, 2);
            mgr.get_mut(ids[0]).unwrap().selected_for_training = true;
            // object 1 was seen after the snapshot, object 0 was not
            let seen = store.find(1).unwrap();
            store.get_mut(seen).unwrap().meta.seen_after_snapshot = true;

            let scores = [0.0, 0.0, 5.0, 6.0];
            let out = mgr.merge(&mut store, &mut core, &ids[..2], &scores, 5.0, 7, 7);
            assert_eq!(out.n_retained, 2);
            assert_eq!(out.n_ghosted, 1);
            assert_eq!(mgr.n_training(), 1);
            assert!(store.find_ghost(0).is_some());
            assert!(store.find_ghost(1).is_none());
            assert_eq!(mgr.get(ids[0]).unwrap().become_train_vtime, 7);
            mgr.check_invariants(&store, &core).unwrap();

            assert_eq!(mgr.clean_training(&mut store), 1);
            assert_eq!(store.n_ghost(), 0);
            assert_eq!(mgr.n_training(), 0);
            mgr.check_invariants(&store, &core).unwrap();
        }

        #[test]
        fn test_retained_object_of_training_parent_forks_ghost() {
            let (mut mgr, mut store, mut core, ids) = setup(3, 2);
            mgr.get_mut(ids[0]).unwrap().selected_for_training = true;
            let scores = [9.0, 0.0, 9.0, 0.0];
            mgr.merge(&mut store, &mut core, &ids[..2], &scores, 9.0, 1, 1);
            // object 0 lives on and keeps a ghost in the quarantined parent
            assert!(store.find(0).is_some());
            let ghost = store.find_ghost(0).unwrap();
            assert_eq!(store.get(ghost).unwrap().meta.segment, ids[0]);
            mgr.check_invariants(&store, &core).unwrap();
        }

        #[test]
        fn test_evict_one_frees_segment() {
            let (mut mgr, mut store, mut core, ids) = setup(2, 3);
            assert_eq!(mgr.evict_one(&mut store, &mut core, ids[0], 0, 0), 3);
            assert_eq!(mgr.n_in_use(), 1);
            assert_eq!(core.n_obj(), 3);
            assert!(mgr.get(ids[0]).is_none());
            mgr.check_invariants(&store, &core).unwrap();
        }

        #[test]
        #[should_panic(expected = "not in one live bucket")]
        fn test_merge_across_buckets_panics() {
            let (mut mgr, mut store, mut core, ids) = setup(2, 2);
            let other = mgr.allocate(1, 0, 0);
            mgr.append(other);
            mgr.merge(&mut store, &mut core, &[ids[0], other], &[], 0.0, 0, 0);
        }
    }
}
