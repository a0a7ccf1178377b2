//! Online training pipeline for learned segment ranking.
//!
//! ```text
//!   warmup ──► snapshot ──► (hits accumulate labels) ──► train ──► snapshot ──► ...
//!                │                                         │
//!                │ sample segments, copy features,         │ normalise labels, split
//!                │ mark them selected_for_training         │ 1/10 to validation, fit,
//!                ▼                                         ▼ clean quarantine
//!            sample_x / sample_y                       TrainingData ──► Regressor
//! ```
//!
//! Between a snapshot and the next training run, every hit on an object of a
//! sampled segment (live or ghost) adds `1e6 / (age_since_snapshot * size)`
//! to that segment's label: segments whose objects are requested soon after
//! the snapshot were worth keeping.
//!
//! ## Features
//!
//! | Column      | Value                                   |
//! |-------------|-----------------------------------------|
//! | 0           | age in seconds                          |
//! | 1           | mean object size                        |
//! | 2           | hits                                    |
//! | 3           | active objects                          |
//! | 4           | request rate when the segment filled    |
//! | 5           | miss ratio when the segment filled      |
//! | 6 + 3k      | hits in minute window `k`               |
//! | 6 + 3k + 1  | hits in ten-minute window `k`           |
//! | 6 + 3k + 2  | hits in hour window `k`                 |

use std::fmt;

use log::{debug, warn};

use crate::ds::SlotId;
use crate::error::RegressorError;
use crate::policy::glcache::config::{ObjScore, TrainSource};
use crate::policy::glcache::score::{ScoreClock, seg_utility};
use crate::policy::glcache::segment::{
    GlObjMeta, MAX_BUCKETS, N_TIME_WINDOW, Segment, SegmentManager, UNMERGEABLE_PENALTY,
};
use crate::regressor::{Regressor, TrainingData};
use crate::store::ObjectStore;

pub const N_FEATURE: usize = 6 + 3 * N_TIME_WINDOW;

/// Validation gets every `VALID_EVERY`-th sample.
const VALID_EVERY: usize = 10;

pub fn features(seg: &Segment, now_rtime: i64) -> [f32; N_FEATURE] {
    let mut x = [0.0f32; N_FEATURE];
    x[0] = (now_rtime - seg.create_rtime) as f32;
    x[1] = if seg.objs.is_empty() {
        0.0
    } else {
        seg.n_byte as f32 / seg.objs.len() as f32
    };
    x[2] = seg.n_hit as f32;
    x[3] = seg.n_active as f32;
    x[4] = seg.req_rate as f32;
    x[5] = seg.miss_ratio as f32;
    for k in 0..N_TIME_WINDOW {
        x[6 + 3 * k] = seg.windows.per_min[k] as f32;
        x[6 + 3 * k + 1] = seg.windows.per_ten_min[k] as f32;
        x[6 + 3 * k + 2] = seg.windows.per_hour[k] as f32;
    }
    x
}

/// What the trainer should do on this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrainStep {
    Wait,
    FirstSnapshot,
    Retrain,
}

/// Options that shape sampling and labelling.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LabelConfig {
    pub source: TrainSource,
    pub obj_score: ObjScore,
    /// Objects per segment a merge would keep; oracle labels leave them out.
    pub n_retained: usize,
    /// Hits per segment ignored before online labels accumulate.
    pub skip_first: Option<usize>,
}

pub struct Learner {
    regressor: Box<dyn Regressor>,
    sample_x: Vec<f32>,
    sample_y: Vec<f32>,
    max_rows: usize,
    data: TrainingData,
    started: bool,
    model_ready: bool,
    n_train: u64,
    n_train_failed: u64,
    n_inference: u64,
    last_train_rtime: i64,
}

impl Learner {
    pub fn new(regressor: Box<dyn Regressor>, max_rows: usize) -> Self {
        Self {
            regressor,
            sample_x: Vec::new(),
            sample_y: Vec::new(),
            max_rows,
            data: TrainingData::new(N_FEATURE),
            started: false,
            model_ready: false,
            n_train: 0,
            n_train_failed: 0,
            n_inference: 0,
            last_train_rtime: 0,
        }
    }

    /// Whether the last training run produced a usable model.
    pub fn has_model(&self) -> bool {
        self.model_ready
    }

    pub fn n_train(&self) -> u64 {
        self.n_train
    }

    pub fn n_train_failed(&self) -> u64 {
        self.n_train_failed
    }

    pub fn n_inference(&self) -> u64 {
        self.n_inference
    }

    pub(crate) fn next_step(&self, now_rtime: i64, warmup_rtime: i64, retrain_intvl: i64) -> TrainStep {
        if now_rtime <= warmup_rtime {
            TrainStep::Wait
        } else if !self.started {
            TrainStep::FirstSnapshot
        } else if now_rtime - self.last_train_rtime >= retrain_intvl + 1 {
            TrainStep::Retrain
        } else {
            TrainStep::Wait
        }
    }

    pub(crate) fn start(&mut self, now_rtime: i64) {
        self.started = true;
        self.last_train_rtime = now_rtime;
    }

    /// Samples live segments into the training matrix. Every bucket's tail
    /// is skipped (it is still being written). Returns the rows taken.
    pub(crate) fn snapshot(
        &mut self,
        segs: &mut SegmentManager,
        store: &ObjectStore<GlObjMeta>,
        clock: ScoreClock,
        labels: LabelConfig,
    ) -> usize {
        let ratio = (segs.n_in_use() as f64 / self.max_rows as f64).max(1.0);
        let mut credit = 0.0;
        let mut chosen: Vec<(SlotId, [f32; N_FEATURE], f32)> = Vec::new();
        for bi in 0..MAX_BUCKETS {
            let n = segs.bucket(bi).n_in_use();
            for (id, seg) in segs.iter_bucket(bi).take(n.saturating_sub(1)) {
                credit += 1.0;
                if credit >= ratio
                    && seg.next().is_some()
                    && self.sample_y.len() + chosen.len() < self.max_rows
                {
                    credit -= ratio;
                    let y = match labels.source {
                        TrainSource::Online => 0.0,
                        TrainSource::Oracle => {
                            seg_utility(seg, store, labels.obj_score, clock, true, labels.n_retained)
                                as f32
                        },
                    };
                    chosen.push((id, features(seg, clock.now_rtime), y));
                }
            }
        }

        let live: Vec<SlotId> = segs.iter_live().map(|(id, _)| id).collect();
        for id in live {
            if let Some(seg) = segs.get_mut(id) {
                seg.selected_for_training = false;
                seg.train_row = None;
                seg.train_utility = 0.0;
            }
        }
        let n_chosen = chosen.len();
        for (id, x, y) in chosen {
            let row = self.sample_y.len();
            self.sample_x.extend_from_slice(&x);
            self.sample_y.push(y);
            if let Some(seg) = segs.get_mut(id) {
                seg.selected_for_training = true;
                seg.train_row = Some(row);
                seg.become_train_rtime = clock.now_rtime;
                seg.become_train_vtime = clock.now_vtime;
                seg.train_utility = 0.0;
                seg.n_util_skipped = 0;
            }
        }
        debug!(
            "snapshot sampled {} of {} segments (ratio {:.2})",
            n_chosen,
            segs.n_in_use(),
            ratio
        );
        n_chosen
    }

    /// Credits a hit on an object of the sampled segment `seg`.
    pub(crate) fn update_train_y(
        &mut self,
        seg: &mut Segment,
        obj_size: u64,
        now_vtime: i64,
        labels: LabelConfig,
    ) {
        if labels.source == TrainSource::Oracle {
            return;
        }
        if let Some(n_skip) = labels.skip_first {
            let skipped = seg.n_util_skipped;
            seg.n_util_skipped += 1;
            if skipped < n_skip {
                return;
            }
        }
        let age = (now_vtime - seg.become_train_vtime + 1).max(1) as f64;
        seg.train_utility += 1.0e6 / age / obj_size.max(1) as f64;
        if let Some(row) = seg.train_row
            && let Some(y) = self.sample_y.get_mut(row)
        {
            *y = seg.train_utility as f32;
        }
    }

    /// Turns the samples into training and validation sets. Labels are
    /// min-max normalised; rows whose features are all zero are dropped.
    pub(crate) fn prepare(&mut self) {
        self.data.clear();
        let (min, max) = self
            .sample_y
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &y| (lo.min(y), hi.max(y)));
        let max_valid = self.max_rows / VALID_EVERY;
        for (i, &y) in self.sample_y.iter().enumerate() {
            let x = &self.sample_x[i * N_FEATURE..(i + 1) * N_FEATURE];
            if x.iter().all(|&v| v == 0.0) {
                continue;
            }
            let y = if max > min { (y - min) / (max - min) } else { y };
            if i % VALID_EVERY == 0 && self.data.n_valid() < max_valid {
                self.data.push_valid(x, y);
            } else {
                self.data.push_train(x, y);
            }
        }
    }

    /// Fits a new model on the samples taken since the last snapshot and
    /// drops the quarantined segments they came from.
    ///
    /// On failure the model is discarded, so ranking falls back to FIFO
    /// until a later run succeeds.
    pub(crate) fn train(
        &mut self,
        segs: &mut SegmentManager,
        store: &mut ObjectStore<GlObjMeta>,
        now_rtime: i64,
    ) -> Result<(), RegressorError> {
        self.prepare();
        let n_ghosts = segs.clean_training(store);
        self.sample_x.clear();
        self.sample_y.clear();
        self.last_train_rtime = now_rtime;

        let result = self.regressor.fit(&self.data);
        match &result {
            Ok(()) => {
                self.n_train += 1;
                self.model_ready = true;
                debug!(
                    "training run {} at {}s: {} train / {} valid rows, {} ghosts dropped",
                    self.n_train,
                    now_rtime,
                    self.data.n_train(),
                    self.data.n_valid(),
                    n_ghosts
                );
            },
            Err(err) => {
                self.n_train_failed += 1;
                self.model_ready = false;
                warn!(
                    "{} failed to fit at {}s ({} rows): {}, ranking falls back to FIFO",
                    self.regressor.name(),
                    now_rtime,
                    self.data.n_train(),
                    err
                );
            },
        }
        result
    }

    /// Predicts every live segment's utility.
    ///
    /// A positive prediction is scaled per byte, a negative one by size, so
    /// large segments with little value rank first either way. Segments in
    /// buckets too small to merge are pushed to the back.
    pub(crate) fn inference(&mut self, segs: &mut SegmentManager, now_rtime: i64, n_merge: usize) {
        let rows: Vec<(SlotId, [f32; N_FEATURE], u64, usize)> = segs
            .iter_live()
            .map(|(id, seg)| (id, features(seg, now_rtime), seg.n_byte, seg.bucket))
            .collect();
        for (id, x, n_byte, bucket) in rows {
            let pred = f64::from(self.regressor.predict(&x));
            let n_byte = n_byte.max(1) as f64;
            let mut utility = if pred > 0.0 {
                pred * 1.0e6 / n_byte
            } else if pred < 0.0 {
                pred * n_byte
            } else {
                0.0
            };
            if segs.bucket(bucket).n_in_use() < n_merge + 1 {
                utility += UNMERGEABLE_PENALTY;
            }
            if let Some(seg) = segs.get_mut(id) {
                seg.pred_utility = utility;
            }
        }
        self.n_inference += 1;
    }
}

impl fmt::Debug for Learner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Learner")
            .field("regressor", &self.regressor.name())
            .field("n_samples", &self.sample_y.len())
            .field("max_rows", &self.max_rows)
            .field("model_ready", &self.model_ready)
            .field("n_train", &self.n_train)
            .field("n_inference", &self.n_inference)
            .finish()
    }
}
