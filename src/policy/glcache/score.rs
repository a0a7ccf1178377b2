//! Object value formulas, merge cutoffs and segment utility.
//!
//! Every formula returns a finite, non-negative value where higher means
//! "keep longer". Ages are clamped to at least 1 so a just-touched object
//! never divides by zero.
//!
//! | Formula       | Value                                     |
//! |---------------|-------------------------------------------|
//! | `Freq`        | `freq`                                    |
//! | `FreqByte`    | `(freq + 0.01) * 1e6 / size`              |
//! | `AgeByte`     | `1e8 / size / age_vtime`                  |
//! | `FreqAgeByte` | `(freq + 0.01) * 1e8 / size / age_vtime`  |
//! | `FreqAge`     | `(freq + 0.01) * 1e6 / age_rtime`         |
//! | `Oracle`      | `1e8 / size / (next_access_vtime - now)`, 0 without a hint |

use rand::Rng;
use rand::rngs::SmallRng;

use crate::ds::SlotId;
use crate::policy::glcache::config::ObjScore;
use crate::policy::glcache::segment::{GlObjMeta, Segment, SegmentManager};
use crate::store::{CacheObject, ObjectStore};

/// Current simulated time, in seconds and in requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreClock {
    pub now_rtime: i64,
    pub now_vtime: i64,
}

/// Relative width of the optional merge-score jitter.
const MERGE_JITTER: f64 = 0.001;

pub fn obj_score(kind: ObjScore, obj: &CacheObject<GlObjMeta>, clock: ScoreClock) -> f64 {
    let size = obj.size.max(1) as f64;
    let freq = f64::from(obj.meta.freq);
    let age_vtime = (clock.now_vtime - obj.last_access_vtime).max(1) as f64;
    match kind {
        ObjScore::Freq => freq,
        ObjScore::FreqByte => (freq + 0.01) * 1.0e6 / size,
        ObjScore::AgeByte => 1.0e8 / size / age_vtime,
        ObjScore::FreqAgeByte => (freq + 0.01) * 1.0e8 / size / age_vtime,
        ObjScore::FreqAge => {
            let age_rtime = (clock.now_rtime - obj.last_access_rtime).max(1) as f64;
            (freq + 0.01) * 1.0e6 / age_rtime
        },
        ObjScore::Oracle => match obj.next_access_vtime {
            Some(next) => {
                let dist = (next - clock.now_vtime).max(1) as f64;
                1.0e8 / size / dist
            },
            None => 0.0,
        },
    }
}

/// Score that objects must reach to be kept when `n_retain` of them fit.
///
/// With ascending scores `s`, this is `s[len - n_retain]`; when everything
/// fits the cutoff is `-inf`.
pub fn find_cutoff(scores: &[f64], n_retain: usize) -> f64 {
    if scores.len() <= n_retain {
        return f64::NEG_INFINITY;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted[sorted.len() - n_retain]
}

/// Scores of every object of `parents`, in merge order.
pub(crate) fn merge_scores(
    segs: &SegmentManager,
    store: &ObjectStore<GlObjMeta>,
    parents: &[SlotId],
    kind: ObjScore,
    clock: ScoreClock,
    mut jitter: Option<&mut SmallRng>,
) -> Vec<f64> {
    let mut scores = Vec::with_capacity(parents.len() * segs.segment_size());
    for seg in parents.iter().filter_map(|&p| segs.get(p)) {
        for &slot in &seg.objs {
            let score = store.get(slot).map_or(0.0, |obj| obj_score(kind, obj, clock));
            let score = match jitter.as_deref_mut() {
                Some(rng) => score * (1.0 + (rng.random::<f64>() - 0.5) * MERGE_JITTER),
                None => score,
            };
            scores.push(score);
        }
    }
    scores
}

/// Oracle value destroyed by evicting `seg` now.
///
/// Objects are ordered by `kind` (or by the oracle score itself with
/// `oracle_selection`); the `n_retained` best of them would survive a merge
/// and are left out of the sum.
pub(crate) fn seg_utility(
    seg: &Segment,
    store: &ObjectStore<GlObjMeta>,
    kind: ObjScore,
    clock: ScoreClock,
    oracle_selection: bool,
    n_retained: usize,
) -> f64 {
    let mut pairs: Vec<(f64, f64)> = seg
        .objs
        .iter()
        .filter_map(|&slot| store.get(slot))
        .map(|obj| {
            let oracle = obj_score(ObjScore::Oracle, obj, clock);
            let sel = if oracle_selection {
                oracle
            } else {
                obj_score(kind, obj, clock)
            };
            (sel, oracle)
        })
        .collect();
    if n_retained > 0 {
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    }
    let n_evicted = pairs.len().saturating_sub(n_retained);
    pairs[..n_evicted].iter().map(|&(_, oracle)| oracle).sum()
}
