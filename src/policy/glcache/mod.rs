//! Group-level learned cache (GLCache).
//!
//! Objects are written in arrival order into fixed-size segments. Eviction
//! works on groups: it picks `n_merge` segments of one bucket, keeps the
//! best-scoring objects of the group in one new segment and evicts the rest.
//! Which segments are picked is either FIFO-style or driven by a per-segment
//! utility: predicted by a model trained online, or computed from next-access
//! hints for the oracle variants.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │ GlCache                                                          │
//!   │                                                                  │
//!   │   store: ObjectStore<GlObjMeta>     (live objects + ghosts)      │
//!   │   segs:  SegmentManager             (buckets, ranked array)      │
//!   │   selector ── fifo / weighted-fifo / random / learned            │
//!   │   learner  ── snapshot ─► labels ─► train ─► inference           │
//!   │   state:   request rate / write rate / miss ratio window         │
//!   └──────────────────────────────────────────────────────────────────┘
//!
//!   insert ─► bucket.last (full? allocate) ─► append object
//!   evict  ─► select ─┬─ Merge(run)  ─► score objects ─► cutoff ─► merge
//!                     └─ Single(seg) ─► evict whole segment
//! ```
//!
//! ## Types
//!
//! | Type         | Segment ranking                 | Object retention     |
//! |--------------|---------------------------------|----------------------|
//! | `Learned`    | model on online labels          | `AgeByte`            |
//! | `LogOracle`  | oracle utility                  | `AgeByte`            |
//! | `ItemOracle` | model                           | `Oracle`             |
//! | `TwoOracle`  | oracle utility, oracle order    | `Oracle`             |
//!
//! Trained types use FIFO selection until the first model is ready, and
//! again whenever a training run fails.
//!
//! ## Example
//!
//! ```
//! use cachesim::policy::glcache::{GlCache, GlCacheConfig};
//! use cachesim::request::Request;
//! use cachesim::traits::EvictionPolicy;
//!
//! let config = GlCacheConfig::parse("segment-size=4,n-merge=2").unwrap();
//! let mut cache = GlCache::new(16, 0, config).unwrap();
//! for t in 0..100 {
//!     cache.get(&Request::new(t % 40, 1, t as i64));
//! }
//! assert!(cache.occupied_bytes() <= 16);
//! cache.check_invariants().unwrap();
//! ```

pub mod config;
mod learner;
pub mod score;
pub mod segment;
mod select;

use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::SmallRng;

pub use config::{BucketType, GlCacheConfig, GlCacheType, ObjScore, Selection, TrainSource};
pub use learner::{N_FEATURE, features};
pub use score::{ScoreClock, find_cutoff, obj_score};
pub use segment::{
    Bucket, GlObjMeta, HitWindows, MAX_BUCKETS, MergeOutcome, N_TIME_WINDOW, Segment,
    SegmentManager,
};

use crate::config::Params;
use crate::ds::SlotId;
use crate::error::{ConfigError, InvariantError};
use crate::policy::core::CacheCore;
use crate::regressor::{GradientBoostedTrees, Regressor};
use crate::request::{ObjId, Request};
use crate::store::ObjectStore;
use crate::traits::{CheckResult, EvictionPolicy, get_base};
use learner::{LabelConfig, Learner, TrainStep};
use score::{merge_scores, seg_utility};
use segment::UNMERGEABLE_PENALTY;
use select::{Picked, Selector};

/// Simulated seconds between two "evicting single segments" warnings.
const SINGLE_EVICT_WARN_INTVL: i64 = 6 * 3600;

/// Minimum window before the request-rate estimate is refreshed.
const STATE_MIN_RTIME: i64 = 10;
const STATE_MIN_VTIME: i64 = 1000;

/// Recent workload intensity, stamped on each segment when it fills.
#[derive(Debug, Clone)]
pub struct CacheState {
    pub req_rate: f64,
    pub write_rate: f64,
    pub miss_ratio: f64,
    last_update_rtime: i64,
    last_update_vtime: i64,
    n_window_req: u64,
    n_window_miss: u64,
}

impl Default for CacheState {
    fn default() -> Self {
        Self {
            req_rate: 1.0,
            write_rate: 1.0,
            miss_ratio: 0.5,
            last_update_rtime: 0,
            last_update_vtime: 0,
            n_window_req: 0,
            n_window_miss: 0,
        }
    }
}

impl CacheState {
    fn record(&mut self, hit: bool, rtime: i64, vtime: i64) {
        self.n_window_req += 1;
        if !hit {
            self.n_window_miss += 1;
        }
        let dt = rtime - self.last_update_rtime;
        if dt >= STATE_MIN_RTIME && vtime - self.last_update_vtime >= STATE_MIN_VTIME {
            let (n_req, n_miss) = (self.n_window_req as f64, self.n_window_miss as f64);
            self.req_rate = n_req / dt as f64;
            self.write_rate = n_miss / dt as f64;
            self.miss_ratio = n_miss / n_req;
            self.last_update_rtime = rtime;
            self.last_update_vtime = vtime;
            self.n_window_req = 0;
            self.n_window_miss = 0;
        }
    }
}

/// Eviction counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlCacheStats {
    pub n_merges: u64,
    /// Evictions that dropped a whole segment instead of merging.
    pub n_single_evictions: u64,
    pub n_evicted_objs: u64,
    pub n_evicted_bytes: u64,
    pub n_retained_objs: u64,
    pub n_ghosts: u64,
}

#[derive(Debug)]
pub struct GlCache {
    core: CacheCore,
    store: ObjectStore<GlObjMeta>,
    segs: SegmentManager,
    config: GlCacheConfig,
    selector: Selector,
    learner: Learner,
    state: CacheState,
    rng: SmallRng,
    stats: GlCacheStats,
    last_single_warn_rtime: Option<i64>,
}

impl GlCache {
    /// Creates a cache trained with the built-in gradient-boosted trees.
    pub fn new(
        capacity: u64,
        per_obj_overhead: u64,
        config: GlCacheConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "GLCache: {} bytes, type {}, segment size {}, merge {} retain {}, obj score {:?}",
            capacity,
            config.cache_type,
            config.segment_size,
            config.n_merge,
            config.n_retain,
            config.obj_score()
        );
        Ok(Self {
            core: CacheCore::new(capacity, per_obj_overhead),
            store: ObjectStore::new(),
            segs: SegmentManager::new(config.segment_size),
            selector: Selector::default(),
            learner: Learner::new(Box::new(GradientBoostedTrees::new()), config.max_training_rows),
            state: CacheState::default(),
            rng: SmallRng::seed_from_u64(config.seed),
            stats: GlCacheStats::default(),
            last_single_warn_rtime: None,
            config,
        })
    }

    pub fn from_params(
        capacity: u64,
        per_obj_overhead: u64,
        params: Params,
    ) -> Result<Self, ConfigError> {
        Self::new(capacity, per_obj_overhead, GlCacheConfig::from_params(params)?)
    }

    /// Replaces the model used by trained types.
    pub fn with_regressor(mut self, regressor: Box<dyn Regressor>) -> Self {
        debug!("GLCache regressor set to {}", regressor.name());
        self.learner = Learner::new(regressor, self.config.max_training_rows);
        self
    }

    pub fn config(&self) -> &GlCacheConfig {
        &self.config
    }

    pub fn segments(&self) -> &SegmentManager {
        &self.segs
    }

    pub fn stats(&self) -> &GlCacheStats {
        &self.stats
    }

    pub fn cache_state(&self) -> &CacheState {
        &self.state
    }

    /// Successful training runs.
    pub fn n_train(&self) -> u64 {
        self.learner.n_train()
    }

    pub fn n_train_failed(&self) -> u64 {
        self.learner.n_train_failed()
    }

    pub fn has_model(&self) -> bool {
        self.learner.has_model()
    }

    pub fn freq_of(&self, id: ObjId) -> Option<u32> {
        self.store
            .find(id)
            .and_then(|slot| self.store.get(slot))
            .map(|obj| obj.meta.freq)
    }

    /// Segment currently holding `id`.
    pub fn segment_of(&self, id: ObjId) -> Option<&Segment> {
        self.store
            .find(id)
            .and_then(|slot| self.store.get(slot))
            .and_then(|obj| self.segs.get(obj.meta.segment))
    }

    /// Strategy the next eviction will use.
    pub fn selection(&self) -> Selection {
        if let Some(selection) = self.config.selection {
            return selection;
        }
        match self.config.cache_type {
            GlCacheType::Learned | GlCacheType::ItemOracle if !self.learner.has_model() => {
                Selection::Fifo
            },
            _ => Selection::Learned,
        }
    }

    fn clock(&self) -> ScoreClock {
        ScoreClock {
            now_rtime: self.core.curr_rtime(),
            now_vtime: self.core.curr_vtime(),
        }
    }

    fn labels(&self) -> LabelConfig {
        let n_retain_per_seg = self.config.n_retain_per_seg();
        LabelConfig {
            source: self.config.train_source_y,
            obj_score: self.config.obj_score(),
            n_retained: if self.config.utility_consider_retain {
                n_retain_per_seg
            } else {
                0
            },
            skip_first: self.config.label_skip_retain.then_some(n_retain_per_seg),
        }
    }

    fn bucket_for(&self, size: u64) -> usize {
        match self.config.bucket_type {
            BucketType::None => 0,
            BucketType::Size => (size.max(1).ilog2() as usize).min(MAX_BUCKETS - 1),
        }
    }

    /// Credits the sampled segment holding `id`'s ghost and drops the ghost.
    fn credit_ghost(&mut self, id: ObjId, vtime: i64, labels: LabelConfig) {
        let Some(ghost) = self.store.find_ghost(id) else {
            return;
        };
        if let Some(obj) = self.store.get(ghost)
            && let Some(seg) = self.segs.get_mut(obj.meta.segment)
            && seg.selected_for_training
        {
            self.learner.update_train_y(seg, obj.size, vtime, labels);
        }
        self.store.delete(ghost);
    }

    /// Runs the snapshot / retrain schedule for trained types.
    fn maybe_train(&mut self) {
        let clock = self.clock();
        let step = self.learner.next_step(
            clock.now_rtime,
            self.config.warmup_rtime,
            self.config.retrain_intvl,
        );
        let labels = self.labels();
        match step {
            TrainStep::Wait => {},
            TrainStep::FirstSnapshot => {
                self.learner.start(clock.now_rtime);
                self.learner
                    .snapshot(&mut self.segs, &self.store, clock, labels);
            },
            TrainStep::Retrain => {
                if let Err(err) = self
                    .learner
                    .train(&mut self.segs, &mut self.store, clock.now_rtime)
                {
                    debug!(
                        "GLCache training at {}s failed, selection stays FIFO: {err}",
                        clock.now_rtime
                    );
                }
                self.learner
                    .snapshot(&mut self.segs, &self.store, clock, labels);
            },
        }
    }

    /// Computes every live segment's utility and rebuilds the ranking.
    fn rank_segs(&mut self) {
        let clock = self.clock();
        let n_merge = self.config.n_merge;
        if self.config.cache_type.is_trained() {
            self.learner
                .inference(&mut self.segs, clock.now_rtime, n_merge);
        } else {
            let oracle_selection = self.config.cache_type == GlCacheType::TwoOracle;
            let n_retained = if self.config.utility_consider_retain {
                self.config.n_retain_per_seg()
            } else {
                0
            };
            let kind = self.config.obj_score();
            let utilities: Vec<(SlotId, f64)> = self
                .segs
                .iter_live()
                .map(|(id, seg)| {
                    let mut u = seg_utility(seg, &self.store, kind, clock, oracle_selection, n_retained);
                    if !self.segs.is_evictable(Some(id), 1, true)
                        || self.segs.bucket(seg.bucket()).n_in_use() < n_merge + 1
                    {
                        u += UNMERGEABLE_PENALTY;
                    }
                    (id, u)
                })
                .collect();
            for (id, u) in utilities {
                if let Some(seg) = self.segs.get_mut(id) {
                    seg.pred_utility = u;
                }
            }
        }
        self.segs.rank_by_utility();
    }

    fn select(&mut self) -> Option<Picked> {
        let n_merge = self.config.n_merge;
        let picked = match self.selection() {
            Selection::Fifo => self.selector.fifo(&mut self.segs, n_merge, &mut self.rng),
            Selection::WeightedFifo => {
                self.selector
                    .weighted_fifo(&mut self.segs, n_merge, &mut self.rng)
            },
            Selection::Random => self.selector.random(&mut self.segs, n_merge, &mut self.rng),
            Selection::Learned => {
                if self.segs.prepare_ranking(self.config.rank_intvl) {
                    self.rank_segs();
                }
                self.selector.learned(
                    &mut self.segs,
                    n_merge,
                    self.config.merge_consecutive_segs,
                    self.config.rank_fallback_frac,
                    &mut self.rng,
                )
            },
        };
        match picked {
            Some(picked) => Some(picked),
            None => self.selector.select_one(&mut self.segs, &mut self.rng),
        }
    }

    fn evict_single(&mut self, seg: SlotId, clock: ScoreClock) {
        let warn_due = self
            .last_single_warn_rtime
            .is_none_or(|last| clock.now_rtime - last >= SINGLE_EVICT_WARN_INTVL);
        if warn_due {
            self.last_single_warn_rtime = Some(clock.now_rtime);
            warn!(
                "GLCache evicting a single segment at {}s: no bucket holds {} mergeable segments ({} in use)",
                clock.now_rtime,
                self.config.n_merge,
                self.segs.n_in_use()
            );
        }
        let bytes_before = self.core.occupied_bytes();
        let n_evicted = self.segs.evict_one(
            &mut self.store,
            &mut self.core,
            seg,
            clock.now_rtime,
            clock.now_vtime,
        );
        self.stats.n_single_evictions += 1;
        self.stats.n_evicted_objs += n_evicted as u64;
        self.stats.n_evicted_bytes += bytes_before - self.core.occupied_bytes();
    }

    fn evict_merge(&mut self, parents: &[SlotId], clock: ScoreClock) {
        let jitter = if self.config.randomize_merge {
            Some(&mut self.rng)
        } else {
            None
        };
        let scores = merge_scores(
            &self.segs,
            &self.store,
            parents,
            self.config.obj_score(),
            clock,
            jitter,
        );
        let cutoff = find_cutoff(&scores, self.config.n_retain);
        let bytes_before = self.core.occupied_bytes();
        let outcome = self.segs.merge(
            &mut self.store,
            &mut self.core,
            parents,
            &scores,
            cutoff,
            clock.now_rtime,
            clock.now_vtime,
        );
        self.stats.n_merges += 1;
        self.stats.n_evicted_objs += outcome.n_evicted as u64;
        self.stats.n_retained_objs += outcome.n_retained as u64;
        self.stats.n_ghosts += outcome.n_ghosted as u64;
        self.stats.n_evicted_bytes += bytes_before - self.core.occupied_bytes();
    }
}

impl EvictionPolicy for GlCache {
    fn name(&self) -> &str {
        "GLCache"
    }

    fn core(&self) -> &CacheCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CacheCore {
        &mut self.core
    }

    fn check(&mut self, req: &Request, update: bool) -> CheckResult {
        if !update {
            return match self.store.find(req.id) {
                Some(_) => CheckResult::Hit,
                None => CheckResult::Miss,
            };
        }
        let (rtime, vtime) = (self.core.curr_rtime(), self.core.curr_vtime());
        let labels = self.labels();

        if let Some(slot) = self.store.find(req.id) {
            let Some(obj) = self.store.get_mut(slot) else {
                return CheckResult::Miss;
            };
            let was_active = obj.meta.active;
            obj.meta.active = true;
            obj.meta.freq = obj.meta.freq.saturating_add(1);
            obj.touch(req, vtime);
            let (seg_id, size) = (obj.meta.segment, obj.size);

            if let Some(seg) = self.segs.get_mut(seg_id) {
                seg.n_hit += 1;
                seg.windows.record_hit(rtime);
                if !was_active {
                    seg.n_active += 1;
                }
                if seg.selected_for_training {
                    self.learner.update_train_y(seg, size, vtime, labels);
                    if let Some(obj) = self.store.get_mut(slot) {
                        obj.meta.seen_after_snapshot = true;
                    }
                }
            }
            // a retained object can still have a ghost in its old segment
            self.credit_ghost(req.id, vtime, labels);
            return CheckResult::Hit;
        }

        self.credit_ghost(req.id, vtime, labels);
        CheckResult::Miss
    }

    fn insert(&mut self, req: &Request) -> SlotId {
        let (rtime, vtime) = (self.core.curr_rtime(), self.core.curr_vtime());
        let bucket = self.bucket_for(req.size);
        let segment_size = self.segs.segment_size();

        let last = self.segs.bucket(bucket).last();
        let seg_id = match last {
            Some(last) if self.segs.get(last).is_some_and(|s| s.n_obj() < segment_size) => last,
            _ => {
                if let Some(full) = last.and_then(|l| self.segs.get_mut(l)) {
                    full.req_rate = self.state.req_rate;
                    full.write_rate = self.state.write_rate;
                    full.miss_ratio = self.state.miss_ratio;
                }
                let id = self.segs.allocate(bucket, rtime, vtime);
                self.segs.append(id);
                id
            },
        };

        let slot = self.store.insert(req, vtime, GlObjMeta::new(seg_id));
        let footprint = self.core.footprint(req.size);
        if let Some(seg) = self.segs.get_mut(seg_id) {
            seg.objs.push(slot);
            seg.n_byte += footprint;
        }
        self.core.charge(req.size);
        slot
    }

    fn evict(&mut self, _req: &Request) -> bool {
        let clock = self.clock();
        match self.select() {
            Some(Picked::Merge(parents)) => self.evict_merge(&parents, clock),
            Some(Picked::Single(seg)) => self.evict_single(seg, clock),
            None => {
                warn!(
                    "GLCache found no segment to evict with {} objects cached",
                    self.core.n_obj()
                );
                return false;
            },
        }
        true
    }

    fn remove(&mut self, id: ObjId) -> bool {
        let Some(slot) = self.store.find(id) else {
            return false;
        };
        let Some(obj) = self.store.delete(slot) else {
            return false;
        };
        let footprint = self.core.footprint(obj.size);
        if let Some(seg) = self.segs.get_mut(obj.meta.segment) {
            seg.objs.retain(|&s| s != slot);
            seg.n_byte -= footprint;
            if obj.meta.active {
                seg.n_active -= 1;
            }
        }
        self.core.release(obj.size);
        true
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        self.segs.check_invariants(&self.store, &self.core)?;
        self.core.check_accounting(&self.store)
    }

    fn get(&mut self, req: &Request) -> bool {
        let hit = get_base(self, req);
        if self.config.cache_type.is_trained() {
            self.maybe_train();
        }
        self.state
            .record(hit, self.core.curr_rtime(), self.core.curr_vtime());
        hit
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;
    use crate::error::RegressorError;
    use crate::regressor::TrainingData;
    use crate::request::annotate_next_access;

    fn cache(capacity: u64, params: &str) -> GlCache {
        GlCache::from_params(capacity, 0, Params::parse(params).unwrap()).unwrap()
    }

    fn run(cache: &mut GlCache, ids: &[ObjId]) -> Vec<bool> {
        ids.iter()
            .enumerate()
            .map(|(t, &id)| cache.get(&Request::new(id, 1, t as i64)))
            .collect()
    }

    /// `n` requests over `n_keys` keys, sizes 1..=8, ten requests per second.
    fn workload(n: usize, n_keys: u64, seed: u64) -> Vec<Request> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..n)
            .map(|t| {
                // skewed: half the traffic goes to a tenth of the keys
                let id = if rng.random::<f64>() < 0.5 {
                    rng.random_range(0..n_keys / 10)
                } else {
                    rng.random_range(0..n_keys)
                };
                Request::new(id, 1 + id % 8, t as i64 / 10)
            })
            .collect()
    }

    struct FailingRegressor;

    impl Regressor for FailingRegressor {
        fn name(&self) -> &str {
            "failing"
        }

        fn fit(&mut self, _data: &TrainingData) -> Result<(), RegressorError> {
            Err(RegressorError::new("no model"))
        }

        fn predict(&self, _features: &[f32]) -> f32 {
            0.0
        }

        fn is_fitted(&self) -> bool {
            false
        }
    }

    mod basic_operations {
        use super::*;

        #[test]
        fn test_objects_fill_segments_in_order() {
            let mut cache = cache(100, "segment-size=4,n-merge=2");
            run(&mut cache, &[1, 2, 3, 4, 5]);
            assert_eq!(cache.segments().n_in_use(), 2);
            assert_eq!(cache.segment_of(4).unwrap().n_obj(), 4);
            assert_eq!(cache.segment_of(5).unwrap().n_obj(), 1);
            cache.check_invariants().unwrap();
        }

        #[test]
        fn test_hit_updates_object_and_segment() {
            let mut cache = cache(100, "segment-size=4,n-merge=2");
            let hits = run(&mut cache, &[1, 2, 1, 1]);
            assert_eq!(hits, vec![false, false, true, true]);
            assert_eq!(cache.freq_of(1), Some(2));
            let seg = cache.segment_of(1).unwrap();
            assert_eq!(seg.n_hit(), 2);
            assert_eq!(seg.n_active(), 1);
            cache.check_invariants().unwrap();
        }

        #[test]
        fn test_check_without_update_is_pure() {
            let mut cache = cache(100, "segment-size=4,n-merge=2");
            run(&mut cache, &[1, 2]);
            assert_eq!(cache.check(&Request::new(1, 1, 5), false), CheckResult::Hit);
            assert_eq!(cache.check(&Request::new(9, 1, 5), false), CheckResult::Miss);
            assert_eq!(cache.freq_of(1), Some(0));
            assert_eq!(cache.segment_of(1).unwrap().n_hit(), 0);
        }

        #[test]
        fn test_remove() {
            let mut cache = cache(100, "segment-size=4,n-merge=2");
            run(&mut cache, &[1, 2, 3, 2]);
            assert!(cache.remove(2));
            assert!(!cache.remove(2));
            assert_eq!(cache.n_obj(), 2);
            assert_eq!(cache.segment_of(1).unwrap().n_obj(), 2);
            cache.check_invariants().unwrap();
        }

        #[test]
        fn test_size_buckets() {
            let mut cache = cache(10_000, "segment-size=4,n-merge=2,bucket-type=size");
            cache.get(&Request::new(1, 1, 0));
            cache.get(&Request::new(2, 1000, 0));
            assert_eq!(cache.segments().bucket(0).n_in_use(), 1);
            assert_eq!(cache.segments().bucket(9).n_in_use(), 1);
            assert_eq!(cache.segment_of(2).unwrap().bucket(), 9);
        }

        #[test]
        fn test_to_evict_is_unsupported() {
            let cache = cache(100, "");
            assert!(cache.to_evict(&Request::new(1, 1, 0)).is_err());
        }
    }

    mod eviction {
        use super::*;

        #[test]
        fn test_fifo_merge_keeps_recent_objects() {
            let mut cache = cache(16, "segment-size=4,n-merge=2");
            let ids: Vec<ObjId> = (1..=16).collect();
            run(&mut cache, &ids);
            assert_eq!(cache.stats().n_merges, 0);
            cache.get(&Request::new(17, 1, 17));

            // the two oldest segments merged; 5..=8 were accessed last
            assert_eq!(cache.stats().n_merges, 1);
            assert_eq!(cache.stats().n_evicted_objs, 4);
            for id in 1..=17 {
                let r = cache.check(&Request::new(id, 1, 0), false);
                assert_eq!(r.is_hit(), id > 4, "object {id}");
            }
            assert_eq!(cache.segment_of(5).unwrap().n_merge(), 1);
            assert_eq!(cache.occupied_bytes(), 13);
            cache.check_invariants().unwrap();
        }

        #[test]
        fn test_occupancy_bounded_under_load() {
            for selection in ["fifo", "weighted-fifo", "random", "learned"] {
                let mut cache = cache(
                    200,
                    &format!("segment-size=5,n-merge=2,n-retain=3,selection={selection}"),
                );
                for (i, req) in workload(5_000, 400, 3).iter().enumerate() {
                    cache.get(req);
                    assert!(cache.occupied_bytes() <= 200, "{selection}");
                    if i % 500 == 0 {
                        cache.check_invariants().unwrap();
                    }
                }
                cache.check_invariants().unwrap();
                assert!(cache.stats().n_merges > 0, "{selection}");
            }
        }

        #[test]
        fn test_single_segment_fallback() {
            // one full segment plus a partial one cannot be merged
            let mut cache = cache(6, "segment-size=4,n-merge=2");
            run(&mut cache, &[1, 2, 3, 4, 5, 6, 7]);
            assert_eq!(cache.stats().n_single_evictions, 1);
            assert_eq!(cache.n_obj(), 3);
            cache.check_invariants().unwrap();
        }

        #[test]
        fn test_evict_reports_whether_it_made_progress() {
            let mut cache = cache(100, "segment-size=4,n-merge=2");
            assert!(!cache.evict(&Request::new(1, 1, 0)));
            assert_eq!(cache.stats().n_merges + cache.stats().n_single_evictions, 0);

            run(&mut cache, &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
            assert!(cache.evict(&Request::new(10, 1, 9)));
            assert!(cache.n_obj() < 9);
            cache.check_invariants().unwrap();
        }

        #[test]
        fn test_randomized_merge_is_seeded() {
            let trace = workload(3_000, 300, 11);
            let run_with = |seed: u64| {
                let mut cache = cache(
                    150,
                    &format!("segment-size=5,n-merge=2,randomize-merge=true,seed={seed}"),
                );
                trace.iter().map(|r| cache.get(r)).collect::<Vec<_>>()
            };
            assert_eq!(run_with(1), run_with(1));
        }
    }

    mod oracle {
        use super::*;

        #[test]
        fn test_oracle_types_rank_by_hints() {
            for ty in ["logOracle", "twoOracle"] {
                let mut trace = workload(4_000, 300, 5);
                annotate_next_access(&mut trace);
                let mut cache = cache(200, &format!("segment-size=5,n-merge=2,type={ty}"));
                assert_eq!(cache.selection(), Selection::Learned);
                for req in &trace {
                    cache.get(req);
                }
                assert!(cache.stats().n_merges > 0, "{ty}");
                assert_eq!(cache.n_train(), 0);
                cache.check_invariants().unwrap();
            }
        }

        #[test]
        fn test_two_oracle_keeps_next_requested() {
            // 1 and 2 come back, nothing else does
            let ids: Vec<ObjId> = (1..=17).chain([1, 2]).collect();
            let mut trace: Vec<Request> = ids
                .iter()
                .enumerate()
                .map(|(t, &id)| Request::new(id, 1, t as i64))
                .collect();
            annotate_next_access(&mut trace);
            let mut cache = cache(16, "segment-size=4,n-merge=2,type=twoOracle");
            let hits: Vec<bool> = trace.iter().map(|r| cache.get(r)).collect();
            // FIFO would have merged the segment holding 1 and 2
            assert_eq!(&hits[17..], &[true, true]);
            cache.check_invariants().unwrap();
        }
    }

    mod ghosts {
        use super::*;

        fn segment_of(cache: &GlCache, id: ObjId) -> SlotId {
            let slot = cache.store.find(id).unwrap();
            cache.store.get(slot).unwrap().meta.segment
        }

        /// Merges the first two segments, keeping only object 1 and
        /// sampling its old segment for training.
        fn merge_keeping_first(cache: &mut GlCache) -> SlotId {
            let (parent, sibling) = (segment_of(cache, 1), segment_of(cache, 5));
            cache.segs.get_mut(parent).unwrap().selected_for_training = true;
            let scores = [9.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
            cache.segs.merge(
                &mut cache.store,
                &mut cache.core,
                &[parent, sibling],
                &scores,
                9.0,
                9,
                9,
            );
            parent
        }

        #[test]
        fn test_hit_on_retained_object_credits_its_ghost() {
            let mut cache = cache(100, "segment-size=4,n-merge=2");
            run(&mut cache, &[1, 2, 3, 4, 5, 6, 7, 8]);
            let parent = merge_keeping_first(&mut cache);
            assert!(cache.store.find(1).is_some());
            assert!(cache.store.find_ghost(1).is_some());

            assert!(cache.get(&Request::new(1, 1, 20)));
            assert!(cache.store.find_ghost(1).is_none());
            assert!(cache.segs.get(parent).unwrap().train_utility > 0.0);
            cache.check_invariants().unwrap();
        }

        #[test]
        fn test_miss_on_evicted_object_credits_its_ghost() {
            let mut cache = cache(100, "segment-size=4,n-merge=2");
            run(&mut cache, &[1, 2, 3, 4, 5, 6, 7, 8]);
            let parent = merge_keeping_first(&mut cache);
            assert!(cache.store.find(2).is_none());
            assert!(cache.store.find_ghost(2).is_some());

            assert!(!cache.get(&Request::new(2, 1, 20)));
            assert!(cache.store.find_ghost(2).is_none());
            assert!(cache.segs.get(parent).unwrap().train_utility > 0.0);
            cache.check_invariants().unwrap();
        }
    }

    mod training {
        use super::*;

        const TRAINED: &str = "segment-size=5,n-merge=2,warmup-rtime=20,retrain-intvl=60,\
                               max-training-rows=512";

        #[test]
        fn test_fifo_until_warmup() {
            let cache = cache(200, TRAINED);
            assert_eq!(cache.selection(), Selection::Fifo);
            assert!(!cache.has_model());
        }

        #[test]
        fn test_training_runs_on_schedule() {
            let mut cache = cache(200, TRAINED);
            for req in workload(8_000, 400, 9) {
                cache.get(&req);
            }
            // first snapshot at 21s, then a run every 61s until 799s
            assert_eq!(cache.n_train() + cache.n_train_failed(), 12);
            cache.check_invariants().unwrap();
        }

        #[test]
        fn test_failed_training_keeps_fifo() {
            let mut cache = cache(200, TRAINED).with_regressor(Box::new(FailingRegressor));
            for req in workload(4_000, 400, 9) {
                cache.get(&req);
            }
            assert_eq!(cache.n_train(), 0);
            assert!(cache.n_train_failed() > 0);
            assert_eq!(cache.selection(), Selection::Fifo);
            cache.check_invariants().unwrap();
        }

        #[test]
        fn test_cache_state_tracks_window() {
            let mut cache = cache(200, TRAINED);
            for req in workload(3_000, 400, 2) {
                cache.get(&req);
            }
            let state = cache.cache_state();
            assert!(state.miss_ratio > 0.0 && state.miss_ratio <= 1.0);
            assert!(state.req_rate > 1.0);
        }
    }
}
