//! Unified factory for every eviction policy.
//!
//! The simulation driver only ever sees `Box<dyn EvictionPolicy>`; this
//! builder turns a policy kind, a capacity and a parameter string into one.
//!
//! ## Example
//!
//! ```rust
//! use cachesim::builder::{CacheBuilder, PolicyKind};
//! use cachesim::request::Request;
//!
//! let mut cache = CacheBuilder::new(100)
//!     .params("segment-size=10,n-merge=2")
//!     .build(PolicyKind::GlCache)
//!     .unwrap();
//! assert!(!cache.get(&Request::new(1, 10, 0)));
//! assert!(cache.get(&Request::new(1, 10, 1)));
//!
//! let kind: PolicyKind = "lru".parse().unwrap();
//! assert!(CacheBuilder::new(100).params("bogus=1").build(kind).is_err());
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Params;
use crate::error::ConfigError;
use crate::policy::arc::Arc as ArcCache;
use crate::policy::clock::Clock;
use crate::policy::fifo::Fifo;
use crate::policy::glcache::GlCache;
use crate::policy::lru::Lru;
use crate::policy::sieve::Sieve;
use crate::regressor::Regressor;
use crate::traits::EvictionPolicy;

/// Available eviction policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Fifo,
    Lru,
    /// FIFO-reinsertion with an n-bit access counter.
    Clock,
    Sieve,
    Arc,
    /// Segment-merging learned cache.
    GlCache,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 6] = [
        PolicyKind::Fifo,
        PolicyKind::Lru,
        PolicyKind::Clock,
        PolicyKind::Sieve,
        PolicyKind::Arc,
        PolicyKind::GlCache,
    ];
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "fifo" => Ok(PolicyKind::Fifo),
            "lru" => Ok(PolicyKind::Lru),
            "clock" => Ok(PolicyKind::Clock),
            "sieve" => Ok(PolicyKind::Sieve),
            "arc" => Ok(PolicyKind::Arc),
            "glcache" => Ok(PolicyKind::GlCache),
            _ => Err(ConfigError::new(format!("unknown eviction policy `{s}`"))),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyKind::Fifo => "FIFO",
            PolicyKind::Lru => "LRU",
            PolicyKind::Clock => "Clock",
            PolicyKind::Sieve => "Sieve",
            PolicyKind::Arc => "ARC",
            PolicyKind::GlCache => "GLCache",
        })
    }
}

/// Makes a fresh model for each GLCache instance.
pub type RegressorFactory = Arc<dyn Fn() -> Box<dyn Regressor> + Send + Sync>;

/// Builder for policy instances.
#[derive(Clone)]
pub struct CacheBuilder {
    capacity: u64,
    per_obj_overhead: u64,
    params: String,
    regressor: Option<RegressorFactory>,
}

impl CacheBuilder {
    /// Create a new builder for a cache of `capacity` bytes.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            per_obj_overhead: 0,
            params: String::new(),
            regressor: None,
        }
    }

    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Bytes of metadata charged per cached object.
    pub fn per_obj_overhead(mut self, bytes: u64) -> Self {
        self.per_obj_overhead = bytes;
        self
    }

    /// Policy parameters as `key=value,...`.
    pub fn params(mut self, params: impl Into<String>) -> Self {
        self.params = params.into();
        self
    }

    /// Model used by trained GLCache types instead of the built-in trees.
    pub fn regressor<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Regressor> + Send + Sync + 'static,
    {
        self.regressor = Some(Arc::new(factory));
        self
    }

    pub fn get_capacity(&self) -> u64 {
        self.capacity
    }

    /// Build a policy instance.
    ///
    /// Fails if the capacity is zero, a parameter is malformed, or the
    /// policy does not know a parameter.
    pub fn build(&self, kind: PolicyKind) -> Result<Box<dyn EvictionPolicy>, ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::new("cache capacity must be positive"));
        }
        let params = Params::parse(&self.params)?;
        let (capacity, overhead) = (self.capacity, self.per_obj_overhead);
        let cache: Box<dyn EvictionPolicy> = match kind {
            PolicyKind::Fifo => {
                params.finish("FIFO")?;
                Box::new(Fifo::new(capacity, overhead))
            },
            PolicyKind::Lru => {
                params.finish("LRU")?;
                Box::new(Lru::new(capacity, overhead))
            },
            PolicyKind::Clock => Box::new(Clock::from_params(capacity, overhead, params)?),
            PolicyKind::Sieve => {
                params.finish("Sieve")?;
                Box::new(Sieve::new(capacity, overhead))
            },
            PolicyKind::Arc => {
                params.finish("ARC")?;
                Box::new(ArcCache::new(capacity, overhead))
            },
            PolicyKind::GlCache => {
                let cache = GlCache::from_params(capacity, overhead, params)?;
                match &self.regressor {
                    Some(factory) => Box::new(cache.with_regressor(factory())),
                    None => Box::new(cache),
                }
            },
        };
        Ok(cache)
    }
}

impl fmt::Debug for CacheBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("capacity", &self.capacity)
            .field("per_obj_overhead", &self.per_obj_overhead)
            .field("params", &self.params)
            .field("custom_regressor", &self.regressor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regressor::GradientBoostedTrees;
    use crate::request::Request;

    #[test]
    fn test_all_policies_basic_ops() {
        for kind in PolicyKind::ALL {
            let mut cache = CacheBuilder::new(10).build(kind).unwrap();
            assert_eq!(cache.name(), kind.to_string());
            assert!(!cache.get(&Request::new(1, 4, 0)));
            assert!(!cache.get(&Request::new(2, 4, 1)));
            assert!(cache.get(&Request::new(1, 4, 2)));
            assert_eq!(cache.n_obj(), 2);
            assert_eq!(cache.occupied_bytes(), 8);
            cache.check_invariants().unwrap();
        }
    }

    #[test]
    fn test_capacity_enforcement() {
        for kind in PolicyKind::ALL {
            let mut cache = CacheBuilder::new(10).per_obj_overhead(1).build(kind).unwrap();
            for t in 0..50 {
                cache.get(&Request::new(t % 7, 2, t as i64));
                assert!(cache.occupied_bytes() <= 10, "{kind}");
            }
            cache.check_invariants().unwrap();
        }
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let err = CacheBuilder::new(0)
            .build(PolicyKind::Lru)
            .err()
            .expect("zero capacity must fail");
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_unknown_parameter_names_policy() {
        let err = CacheBuilder::new(10)
            .params("n-bit-counter=2")
            .build(PolicyKind::Fifo)
            .err()
            .expect("FIFO takes no parameters");
        assert!(err.to_string().contains("FIFO"));
        assert!(
            CacheBuilder::new(10)
                .params("n-bit-counter=2")
                .build(PolicyKind::Clock)
                .is_ok()
        );
    }

    #[test]
    fn test_policy_names_parse() {
        assert_eq!("GLCache".parse::<PolicyKind>().unwrap(), PolicyKind::GlCache);
        assert_eq!("gl-cache".parse::<PolicyKind>().unwrap(), PolicyKind::GlCache);
        assert_eq!("Sieve".parse::<PolicyKind>().unwrap(), PolicyKind::Sieve);
        assert!("belady".parse::<PolicyKind>().is_err());
        for kind in PolicyKind::ALL {
            assert_eq!(kind.to_string().parse::<PolicyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_custom_regressor_is_used() {
        let builder = CacheBuilder::new(100)
            .params("segment-size=4,n-merge=2")
            .regressor(|| Box::new(GradientBoostedTrees::new()));
        let cache = builder.build(PolicyKind::GlCache).unwrap();
        assert_eq!(cache.name(), "GLCache");
        assert!(format!("{builder:?}").contains("custom_regressor: true"));
    }
}
