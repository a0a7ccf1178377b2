//! Choosing which segments the next eviction merges.
//!
//! | Strategy       | Picks                                                   |
//! |----------------|---------------------------------------------------------|
//! | `Fifo`         | oldest run of `n_merge` segments, round-robin buckets   |
//! | `WeightedFifo` | like `Fifo`, bucket drawn in proportion to its size     |
//! | `Random`       | a random run of `n_merge` segments                      |
//! | `Learned`      | lowest-utility segment from the ranked array and its    |
//! |                | creation-order (or ranked-order) neighbours             |
//!
//! Every strategy falls back to [`Selector::select_one`], which evicts a
//! single segment outright, when no bucket holds a mergeable run.

use log::trace;
use rand::Rng;
use rand::rngs::SmallRng;

use crate::ds::SlotId;
use crate::policy::glcache::segment::{MAX_BUCKETS, SegmentManager};

/// Segments chosen for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Picked {
    /// A run of segments of one bucket, to merge.
    Merge(Vec<SlotId>),
    /// One segment to evict whole.
    Single(SlotId),
}

/// Round-robin state shared by the FIFO-style strategies.
#[derive(Debug, Clone, Default)]
pub(crate) struct Selector {
    curr_bucket: usize,
}

impl Selector {
    fn cursor(segs: &SegmentManager, bucket: usize) -> Option<SlotId> {
        let b = segs.bucket(bucket);
        b.next_to_evict.or(b.first)
    }

    /// `n` segments starting at `start`, following creation order.
    fn run(segs: &SegmentManager, start: SlotId, n: usize) -> (Vec<SlotId>, Option<SlotId>) {
        let mut picked = Vec::with_capacity(n);
        let mut cur = Some(start);
        while picked.len() < n
            && let Some(id) = cur
        {
            picked.push(id);
            cur = segs.get(id).and_then(|s| s.next());
        }
        (picked, cur)
    }

    pub(crate) fn fifo(
        &mut self,
        segs: &mut SegmentManager,
        n_merge: usize,
        rng: &mut SmallRng,
    ) -> Option<Picked> {
        let mut bucket = self.curr_bucket;
        let mut cursor = Self::cursor(segs, bucket);
        let mut n_scanned = 0;
        while !segs.is_evictable(cursor, n_merge, true) {
            segs.bucket_mut(bucket).next_to_evict = None;
            bucket = (bucket + 1) % MAX_BUCKETS;
            cursor = Self::cursor(segs, bucket);
            n_scanned += 1;
            if n_scanned > MAX_BUCKETS + 1 {
                self.curr_bucket = bucket;
                return self.select_one(segs, rng);
            }
        }
        self.curr_bucket = bucket;

        let (picked, after) = Self::run(segs, cursor?, n_merge);
        if segs.bucket(bucket).n_in_use() > n_merge + 1 {
            segs.bucket_mut(bucket).next_to_evict = after;
        } else {
            segs.bucket_mut(bucket).next_to_evict = None;
            self.curr_bucket = (bucket + 1) % MAX_BUCKETS;
        }
        Some(Picked::Merge(picked))
    }

    pub(crate) fn weighted_fifo(
        &mut self,
        segs: &mut SegmentManager,
        n_merge: usize,
        rng: &mut SmallRng,
    ) -> Option<Picked> {
        if segs.n_in_use() == 0 {
            return None;
        }
        let mut r = rng.random_range(0..segs.n_in_use());
        let mut chosen = None;
        for i in 0..2 * MAX_BUCKETS {
            let bucket = i % MAX_BUCKETS;
            let n = segs.bucket(bucket).n_in_use();
            if n < n_merge + 1 {
                continue;
            }
            if r > n {
                r -= n;
                continue;
            }
            let cursor = Self::cursor(segs, bucket);
            if segs.is_evictable(cursor, n_merge, true) {
                chosen = cursor.map(|c| (bucket, c));
                break;
            }
            segs.bucket_mut(bucket).next_to_evict = None;
        }

        let Some((bucket, start)) = chosen else {
            return self.select_one(segs, rng);
        };
        let (picked, after) = Self::run(segs, start, n_merge);
        segs.bucket_mut(bucket).next_to_evict = if segs.bucket(bucket).n_in_use() > 2 * n_merge + 1 {
            after
        } else {
            None
        };
        Some(Picked::Merge(picked))
    }

    pub(crate) fn random(
        &mut self,
        segs: &mut SegmentManager,
        n_merge: usize,
        rng: &mut SmallRng,
    ) -> Option<Picked> {
        for _ in 0..=MAX_BUCKETS {
            let bucket = self.curr_bucket;
            self.curr_bucket = (bucket + 1) % MAX_BUCKETS;
            let n = segs.bucket(bucket).n_in_use();
            if n <= n_merge {
                continue;
            }
            let offset = rng.random_range(0..n - n_merge);
            let start = segs.iter_bucket(bucket).nth(offset).map(|(id, _)| id);
            if segs.is_evictable(start, n_merge, true)
                && let Some(start) = start
            {
                return Some(Picked::Merge(Self::run(segs, start, n_merge).0));
            }
        }
        self.select_one(segs, rng)
    }

    /// Takes the lowest-utility mergeable run from the ranked array.
    ///
    /// Candidates that cannot start a run are dropped from the array. Once
    /// more than `fallback_frac` of it has been consumed the first candidate
    /// of this call (the lowest utility left) is evicted whole and the array
    /// is marked stale, forcing a re-rank on the next eviction.
    pub(crate) fn learned(
        &mut self,
        segs: &mut SegmentManager,
        n_merge: usize,
        consecutive: bool,
        fallback_frac: f64,
        rng: &mut SmallRng,
    ) -> Option<Picked> {
        let n_ranked = segs.ranked.n_ranked;
        let mut first_candidate = None;
        let start = loop {
            let pos = segs.ranked.pos;
            let Some(&slot) = segs.ranked.slots.get(pos) else {
                segs.ranked.pos = usize::MAX;
                return self.select_one(segs, rng);
            };
            let Some(id) = slot else {
                segs.ranked.pos += 1;
                continue;
            };
            let first = *first_candidate.get_or_insert(id);
            if segs.is_evictable(Some(id), n_merge, consecutive) {
                break id;
            }
            if pos as f64 > n_ranked as f64 * fallback_frac {
                let bucket = segs.get(first)?.bucket();
                let b = segs.bucket_mut(bucket);
                b.ranked_head = None;
                b.ranked_tail = None;
                segs.clear_rank(first);
                segs.ranked.pos = usize::MAX;
                trace!("ranked array exhausted at {pos}/{n_ranked}, evicting segment {first:?} whole");
                return Some(Picked::Single(first));
            }
            segs.clear_rank(id);
            segs.ranked.pos += 1;
        };
        segs.ranked.pos += 1;

        let mut picked = Vec::with_capacity(n_merge);
        picked.push(start);
        let mut cur = start;
        while picked.len() < n_merge {
            let next = if consecutive {
                segs.get(cur).and_then(|s| s.next())
            } else {
                segs.ranked_next(cur)
            };
            let Some(next) = next else { break };
            picked.push(next);
            cur = next;
        }
        let bucket = segs.get(start)?.bucket();
        let head = segs.get(cur).and_then(|s| s.next_ranked);
        for &id in &picked {
            segs.clear_rank(id);
        }
        let b = segs.bucket_mut(bucket);
        b.ranked_head = head;
        if head.is_none() {
            b.ranked_tail = None;
        }
        Some(Picked::Merge(picked))
    }

    /// Oldest segment of a bucket drawn in proportion to its size.
    pub(crate) fn select_one(&mut self, segs: &mut SegmentManager, rng: &mut SmallRng) -> Option<Picked> {
        if segs.n_in_use() == 0 {
            return None;
        }
        let mut r = rng.random_range(0..segs.n_in_use());
        for bucket in 0..MAX_BUCKETS {
            let n = segs.bucket(bucket).n_in_use();
            if r < n {
                let b = segs.bucket_mut(bucket);
                b.next_to_evict = None;
                return b.first.map(Picked::Single);
            }
            r -= n;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn manager(per_bucket: &[usize]) -> (SegmentManager, Vec<Vec<SlotId>>) {
        let mut mgr = SegmentManager::new(4);
        let mut ids = Vec::new();
        for (bucket, &n) in per_bucket.iter().enumerate() {
            let mut bucket_ids = Vec::new();
            for i in 0..n {
                let id = mgr.allocate(bucket, i as i64, i as i64);
                mgr.append(id);
                bucket_ids.push(id);
            }
            ids.push(bucket_ids);
        }
        (mgr, ids)
    }

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    mod fifo {
        use super::*;

        #[test]
        fn test_walks_bucket_in_creation_order() {
            let (mut mgr, ids) = manager(&[6]);
            let mut sel = Selector::default();
            let mut rng = rng();
            let first = sel.fifo(&mut mgr, 2, &mut rng).unwrap();
            assert_eq!(first, Picked::Merge(vec![ids[0][0], ids[0][1]]));
            let second = sel.fifo(&mut mgr, 2, &mut rng).unwrap();
            assert_eq!(second, Picked::Merge(vec![ids[0][2], ids[0][3]]));
            // only the tail is left after the cursor, so it wraps to the front
            let third = sel.fifo(&mut mgr, 2, &mut rng).unwrap();
            assert_eq!(third, Picked::Merge(vec![ids[0][0], ids[0][1]]));
        }

        #[test]
        fn test_moves_to_next_bucket() {
            let (mut mgr, ids) = manager(&[1, 3]);
            let mut sel = Selector::default();
            let picked = sel.fifo(&mut mgr, 2, &mut rng()).unwrap();
            assert_eq!(picked, Picked::Merge(vec![ids[1][0], ids[1][1]]));
        }

        #[test]
        fn test_falls_back_to_single() {
            let (mut mgr, ids) = manager(&[2]);
            let mut sel = Selector::default();
            let picked = sel.fifo(&mut mgr, 2, &mut rng()).unwrap();
            assert_eq!(picked, Picked::Single(ids[0][0]));
        }

        #[test]
        fn test_empty_manager_picks_nothing() {
            let (mut mgr, _) = manager(&[]);
            assert!(Selector::default().fifo(&mut mgr, 2, &mut rng()).is_none());
        }
    }

    mod other {
        use super::*;

        #[test]
        fn test_weighted_fifo_picks_a_mergeable_run() {
            let (mut mgr, ids) = manager(&[5, 2, 7]);
            let mut sel = Selector::default();
            let mut rng = rng();
            for _ in 0..20 {
                let Some(Picked::Merge(run)) = sel.weighted_fifo(&mut mgr, 2, &mut rng) else {
                    panic!("expected a merge");
                };
                assert_eq!(run.len(), 2);
                // bucket 1 is too small to merge
                assert!(!ids[1].contains(&run[0]));
                assert!(mgr.is_evictable(Some(run[0]), 2, true));
            }
        }

        #[test]
        fn test_random_runs_never_include_tail() {
            let (mut mgr, ids) = manager(&[6]);
            let mut sel = Selector::default();
            let mut rng = rng();
            for _ in 0..50 {
                let Some(Picked::Merge(run)) = sel.random(&mut mgr, 3, &mut rng) else {
                    panic!("expected a merge");
                };
                assert_eq!(run.len(), 3);
                assert!(!run.contains(&ids[0][5]));
            }
        }

        #[test]
        fn test_select_one_takes_oldest() {
            let (mut mgr, ids) = manager(&[0, 3]);
            let picked = Selector::default().select_one(&mut mgr, &mut rng());
            assert_eq!(picked, Some(Picked::Single(ids[1][0])));
        }
    }

    mod learned {
        use super::*;
        use crate::policy::core::CacheCore;
        use crate::store::ObjectStore;

        fn ranked(utilities: &[f64]) -> (SegmentManager, Vec<SlotId>) {
            let (mut mgr, ids) = manager(&[utilities.len()]);
            for (&id, &u) in ids[0].iter().zip(utilities) {
                mgr.get_mut(id).unwrap().pred_utility = u;
            }
            mgr.rank_by_utility();
            (mgr, ids.into_iter().next().unwrap())
        }

        #[test]
        fn test_lowest_utility_starts_the_run() {
            let (mut mgr, ids) = ranked(&[5.0, 1.0, 3.0, 4.0, 9.0]);
            let picked = Selector::default()
                .learned(&mut mgr, 2, true, 0.8, &mut rng())
                .unwrap();
            assert_eq!(picked, Picked::Merge(vec![ids[1], ids[2]]));
            assert_eq!(mgr.ranked.pos, 1);
            assert!(mgr.ranked.slots.iter().all(|s| *s != Some(ids[1])));
            mgr.check_invariants(&ObjectStore::new(), &CacheCore::new(1, 0))
                .unwrap();
        }

        #[test]
        fn test_unmergeable_candidates_are_skipped() {
            // the lowest-utility segment is the tail
            let (mut mgr, ids) = ranked(&[5.0, 3.0, 4.0, 1.0]);
            let picked = Selector::default()
                .learned(&mut mgr, 2, true, 0.8, &mut rng())
                .unwrap();
            assert_eq!(picked, Picked::Merge(vec![ids[1], ids[2]]));
            assert_eq!(mgr.ranked.pos, 2);
        }

        #[test]
        fn test_ranked_order_neighbours() {
            let (mut mgr, ids) = ranked(&[1.0, 5.0, 2.0, 4.0, 9.0]);
            let picked = Selector::default()
                .learned(&mut mgr, 2, false, 0.8, &mut rng())
                .unwrap();
            assert_eq!(picked, Picked::Merge(vec![ids[0], ids[2]]));
            assert_eq!(mgr.bucket(0).ranked_head, Some(ids[3]));
        }

        #[test]
        fn test_exhausted_array_evicts_single() {
            // ranked: ids[2], ids[1], ids[3] (the tail), ids[0]
            let (mut mgr, ids) = ranked(&[5.0, 3.0, 1.0, 4.0]);
            mgr.ranked.pos = 2;
            let picked = Selector::default()
                .learned(&mut mgr, 2, true, 0.4, &mut rng())
                .unwrap();
            // ids[3] is the lowest-utility candidate left; the bucket head is not
            assert_eq!(picked, Picked::Single(ids[3]));
            assert_eq!(mgr.ranked.pos, usize::MAX);
            assert!(mgr.ranked.slots.iter().all(|s| *s != Some(ids[3])));
            assert!(mgr.prepare_ranking(0.05));
        }
    }
}
