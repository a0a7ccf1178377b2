//! GLCache parameters.
//!
//! | Key                        | Default   | Constraint                        |
//! |----------------------------|-----------|-----------------------------------|
//! | `segment-size`             | 100       | `> 1`                             |
//! | `n-merge`                  | 2         | `1 < n <= 100`                    |
//! | `n-retain`                 | seg size  | `1..=segment-size`                |
//! | `rank-intvl`               | 0.05      | `(0, 1)`                          |
//! | `type`                     | learned   | learned, logOracle, itemOracle, twoOracle |
//! | `train-source-y`           | online    | online, oracle                    |
//! | `retrain-intvl`            | 172800    | seconds, `> 0`                    |
//! | `merge-consecutive-segs`   | true      |                                   |
//! | `selection`                | by type   | fifo, weighted-fifo, random, learned |
//! | `obj-score`                | by type   | freq, freq-byte, age-byte, freq-age-byte, freq-age, oracle |
//! | `bucket-type`              | none      | none, size                        |
//! | `rank-fallback-frac`       | 0.8       | `(0, 1]`                          |
//! | `randomize-merge`          | false     |                                   |
//! | `max-training-rows`        | 8192      | `>= 10`                           |
//! | `warmup-rtime`             | 86400     | seconds, `>= 0`                   |
//! | `utility-consider-retain`  | false     |                                   |
//! | `label-skip-retain`        | false     |                                   |
//! | `seed`                     | 0         | RNG seed for selection and jitter |
//!
//! `segment-size / n-merge` (objects retained per merged segment) must also
//! exceed 1.

use std::fmt;
use std::str::FromStr;

use crate::config::Params;
use crate::error::ConfigError;

/// Which ranking signal drives eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlCacheType {
    /// Trained model on online labels.
    #[default]
    Learned,
    /// Segments ranked by their oracle utility, objects retained by the
    /// online score.
    LogOracle,
    /// Trained model, oracle object scores.
    ItemOracle,
    /// Oracle segment ranking and oracle object retention.
    TwoOracle,
}

impl GlCacheType {
    /// Whether this type needs a trained model to rank segments.
    pub fn is_trained(self) -> bool {
        matches!(self, GlCacheType::Learned | GlCacheType::ItemOracle)
    }

    pub fn default_obj_score(self) -> ObjScore {
        match self {
            GlCacheType::Learned | GlCacheType::LogOracle => ObjScore::AgeByte,
            GlCacheType::ItemOracle | GlCacheType::TwoOracle => ObjScore::Oracle,
        }
    }
}

impl FromStr for GlCacheType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "learned" => Ok(GlCacheType::Learned),
            "logoracle" => Ok(GlCacheType::LogOracle),
            "itemoracle" => Ok(GlCacheType::ItemOracle),
            "twooracle" => Ok(GlCacheType::TwoOracle),
            _ => Err(ConfigError::new(format!(
                "parameter `type` must be one of learned, logOracle, itemOracle, twoOracle, got `{s}`"
            ))),
        }
    }
}

impl fmt::Display for GlCacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GlCacheType::Learned => "learned",
            GlCacheType::LogOracle => "logOracle",
            GlCacheType::ItemOracle => "itemOracle",
            GlCacheType::TwoOracle => "twoOracle",
        })
    }
}

/// Where training labels come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrainSource {
    /// Accumulated from hits observed after the snapshot.
    #[default]
    Online,
    /// Computed from next-access hints at snapshot time.
    Oracle,
}

impl FromStr for TrainSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(TrainSource::Online),
            "oracle" => Ok(TrainSource::Oracle),
            _ => Err(ConfigError::new(format!(
                "parameter `train-source-y` must be online or oracle, got `{s}`"
            ))),
        }
    }
}

/// How merge candidates are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Fifo,
    WeightedFifo,
    Random,
    Learned,
}

impl FromStr for Selection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "fifo" => Ok(Selection::Fifo),
            "weighted-fifo" => Ok(Selection::WeightedFifo),
            "random" | "rand" => Ok(Selection::Random),
            "learned" | "ranked" => Ok(Selection::Learned),
            _ => Err(ConfigError::new(format!(
                "parameter `selection` must be fifo, weighted-fifo, random or learned, got `{s}`"
            ))),
        }
    }
}

/// How segments are spread over buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketType {
    /// Every object in bucket 0.
    #[default]
    None,
    /// Bucket `floor(log2(size))`.
    Size,
}

impl FromStr for BucketType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "no" => Ok(BucketType::None),
            "size" => Ok(BucketType::Size),
            _ => Err(ConfigError::new(format!(
                "parameter `bucket-type` must be none or size, got `{s}`"
            ))),
        }
    }
}

/// Object-level value formula; higher means keep longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjScore {
    Freq,
    FreqByte,
    AgeByte,
    FreqAgeByte,
    FreqAge,
    Oracle,
}

impl FromStr for ObjScore {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "freq" => Ok(ObjScore::Freq),
            "freqbyte" => Ok(ObjScore::FreqByte),
            "agebyte" => Ok(ObjScore::AgeByte),
            "freqagebyte" => Ok(ObjScore::FreqAgeByte),
            "freqage" => Ok(ObjScore::FreqAge),
            "oracle" => Ok(ObjScore::Oracle),
            _ => Err(ConfigError::new(format!(
                "parameter `obj-score` is not a known score, got `{s}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlCacheConfig {
    pub segment_size: usize,
    pub n_merge: usize,
    /// Objects a merge keeps in the new segment.
    pub n_retain: usize,
    /// Fraction of ranked segments consumed before re-ranking.
    pub rank_intvl: f64,
    pub cache_type: GlCacheType,
    pub train_source_y: TrainSource,
    /// Seconds between training runs.
    pub retrain_intvl: i64,
    pub merge_consecutive_segs: bool,
    /// Overrides the selection the type would use.
    pub selection: Option<Selection>,
    /// Overrides the object score the type would use.
    pub obj_score: Option<ObjScore>,
    pub bucket_type: BucketType,
    pub rank_fallback_frac: f64,
    pub randomize_merge: bool,
    pub max_training_rows: usize,
    /// No training before the trace has run this many seconds.
    pub warmup_rtime: i64,
    pub utility_consider_retain: bool,
    pub label_skip_retain: bool,
    pub seed: u64,
}

impl Default for GlCacheConfig {
    fn default() -> Self {
        Self {
            segment_size: 100,
            n_merge: 2,
            n_retain: 100,
            rank_intvl: 0.05,
            cache_type: GlCacheType::Learned,
            train_source_y: TrainSource::Online,
            retrain_intvl: 86400 * 2,
            merge_consecutive_segs: true,
            selection: None,
            obj_score: None,
            bucket_type: BucketType::None,
            rank_fallback_frac: 0.8,
            randomize_merge: false,
            max_training_rows: 8192,
            warmup_rtime: 86400,
            utility_consider_retain: false,
            label_skip_retain: false,
            seed: 0,
        }
    }
}

impl GlCacheConfig {
    /// Parses and validates a `key=value,...` string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        Self::from_params(Params::parse(s)?)
    }

    pub fn from_params(mut params: Params) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = params.take_usize("segment-size")? {
            cfg.segment_size = v;
        }
        if let Some(v) = params.take_usize("n-merge")? {
            cfg.n_merge = v;
        }
        // n-retain follows segment-size unless given
        cfg.n_retain = params.take_usize("n-retain")?.unwrap_or(cfg.segment_size);
        if let Some(v) = params.take_f64("rank-intvl")? {
            cfg.rank_intvl = v;
        }
        if let Some(v) = params.take("type") {
            cfg.cache_type = v.parse()?;
        }
        if let Some(v) = params.take("train-source-y") {
            cfg.train_source_y = v.parse()?;
        }
        if let Some(v) = params.take_i64("retrain-intvl")? {
            cfg.retrain_intvl = v;
        }
        if let Some(v) = params.take_bool("merge-consecutive-segs")? {
            cfg.merge_consecutive_segs = v;
        }
        if let Some(v) = params.take("selection") {
            cfg.selection = Some(v.parse()?);
        }
        if let Some(v) = params.take("obj-score") {
            cfg.obj_score = Some(v.parse()?);
        }
        if let Some(v) = params.take("bucket-type") {
            cfg.bucket_type = v.parse()?;
        }
        if let Some(v) = params.take_f64("rank-fallback-frac")? {
            cfg.rank_fallback_frac = v;
        }
        if let Some(v) = params.take_bool("randomize-merge")? {
            cfg.randomize_merge = v;
        }
        if let Some(v) = params.take_usize("max-training-rows")? {
            cfg.max_training_rows = v;
        }
        if let Some(v) = params.take_i64("warmup-rtime")? {
            cfg.warmup_rtime = v;
        }
        if let Some(v) = params.take_bool("utility-consider-retain")? {
            cfg.utility_consider_retain = v;
        }
        if let Some(v) = params.take_bool("label-skip-retain")? {
            cfg.label_skip_retain = v;
        }
        if let Some(v) = params.take("seed") {
            cfg.seed = v.parse().map_err(|_| {
                ConfigError::new(format!("parameter `seed` must be an unsigned integer, got `{v}`"))
            })?;
        }
        params.finish("GLCache")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_size <= 1 {
            return Err(ConfigError::new(format!(
                "segment-size must be greater than 1, got {}",
                self.segment_size
            )));
        }
        if self.n_merge <= 1 || self.n_merge > 100 {
            return Err(ConfigError::new(format!(
                "n-merge must be in 2..=100, got {}",
                self.n_merge
            )));
        }
        if self.segment_size / self.n_merge <= 1 {
            return Err(ConfigError::new(format!(
                "segment-size / n-merge must be greater than 1, got {} / {}",
                self.segment_size, self.n_merge
            )));
        }
        if self.n_retain == 0 || self.n_retain > self.segment_size {
            return Err(ConfigError::new(format!(
                "n-retain must be in 1..={}, got {}",
                self.segment_size, self.n_retain
            )));
        }
        if !(self.rank_intvl > 0.0 && self.rank_intvl < 1.0) {
            return Err(ConfigError::new(format!(
                "rank-intvl must be in (0, 1), got {}",
                self.rank_intvl
            )));
        }
        if !(self.rank_fallback_frac > 0.0 && self.rank_fallback_frac <= 1.0) {
            return Err(ConfigError::new(format!(
                "rank-fallback-frac must be in (0, 1], got {}",
                self.rank_fallback_frac
            )));
        }
        if self.retrain_intvl <= 0 {
            return Err(ConfigError::new(format!(
                "retrain-intvl must be positive, got {}",
                self.retrain_intvl
            )));
        }
        if self.warmup_rtime < 0 {
            return Err(ConfigError::new(format!(
                "warmup-rtime must not be negative, got {}",
                self.warmup_rtime
            )));
        }
        if self.max_training_rows < 10 {
            return Err(ConfigError::new(format!(
                "max-training-rows must be at least 10, got {}",
                self.max_training_rows
            )));
        }
        Ok(())
    }

    /// Objects each merged segment contributes to the new one.
    #[inline]
    pub fn n_retain_per_seg(&self) -> usize {
        self.segment_size / self.n_merge
    }

    pub fn obj_score(&self) -> ObjScore {
        self.obj_score
            .unwrap_or_else(|| self.cache_type.default_obj_score())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GlCacheConfig::parse("").unwrap();
        assert_eq!(cfg, GlCacheConfig::default());
        assert_eq!(cfg.n_retain_per_seg(), 50);
        assert_eq!(cfg.obj_score(), ObjScore::AgeByte);
        assert!(cfg.cache_type.is_trained());
    }

    #[test]
    fn test_parses_every_key() {
        let cfg = GlCacheConfig::parse(
            "segment-size=64,n-merge=4,n-retain=32,rank-intvl=0.1,type=twoOracle,\
             train-source-y=oracle,retrain-intvl=3600,merge-consecutive-segs=false,\
             selection=weighted-fifo,obj-score=freq-byte,bucket-type=size,\
             rank-fallback-frac=0.5,randomize-merge=true,max-training-rows=100,\
             warmup-rtime=0,utility-consider-retain=true,label-skip-retain=yes,seed=7",
        )
        .unwrap();
        assert_eq!(cfg.segment_size, 64);
        assert_eq!(cfg.n_merge, 4);
        assert_eq!(cfg.n_retain, 32);
        assert_eq!(cfg.cache_type, GlCacheType::TwoOracle);
        assert_eq!(cfg.train_source_y, TrainSource::Oracle);
        assert_eq!(cfg.retrain_intvl, 3600);
        assert!(!cfg.merge_consecutive_segs);
        assert_eq!(cfg.selection, Some(Selection::WeightedFifo));
        assert_eq!(cfg.obj_score(), ObjScore::FreqByte);
        assert_eq!(cfg.bucket_type, BucketType::Size);
        assert!(cfg.randomize_merge && cfg.utility_consider_retain && cfg.label_skip_retain);
        assert_eq!(cfg.seed, 7);
    }

    #[test]
    fn test_n_retain_follows_segment_size() {
        let cfg = GlCacheConfig::parse("segment-size=20").unwrap();
        assert_eq!(cfg.n_retain, 20);
    }

    #[test]
    fn test_oracle_types_use_oracle_score() {
        let cfg = GlCacheConfig::parse("type=itemOracle").unwrap();
        assert_eq!(cfg.obj_score(), ObjScore::Oracle);
        assert!(cfg.cache_type.is_trained());
        let cfg = GlCacheConfig::parse("type=logOracle").unwrap();
        assert_eq!(cfg.obj_score(), ObjScore::AgeByte);
        assert!(!cfg.cache_type.is_trained());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        for bad in [
            "segment-size=1",
            "n-merge=1",
            "n-merge=101",
            "segment-size=4,n-merge=4",
            "rank-intvl=0",
            "rank-intvl=1",
            "rank-fallback-frac=0",
            "n-retain=0",
            "n-retain=101",
            "max-training-rows=9",
            "retrain-intvl=0",
            "type=lru",
            "selection=lfu",
        ] {
            assert!(GlCacheConfig::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_unknown_key_is_named() {
        let err = GlCacheConfig::parse("segment-size=64,bogus=1").unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }
}
