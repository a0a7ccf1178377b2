//! Simulation driver: replays a trace through one cache per size.
//!
//! ## Architecture
//!
//! ```text
//!   sizes: [s0, s1, s2, ...]
//!      │ builder.capacity(si).build(kind)       (all validated up front)
//!      ▼
//!   [cache0] [cache1] [cache2] ...   ── rayon par_iter (or a dedicated pool)
//!      │        │        │
//!      └── each replays the whole trace: warmup, then counted requests
//!      ▼
//!   Vec<CacheStats>                  (same order as `sizes`)
//! ```
//!
//! Clock times are rebased so the first replayed request arrives at 0; with
//! a warmup trace its next-access hints are shifted past the warmup
//! requests.
//!
//! ## Example
//!
//! ```
//! use cachesim::builder::{CacheBuilder, PolicyKind};
//! use cachesim::sim::{Warmup, simulate_at_multi_sizes};
//! use cachesim::workload::{Workload, WorkloadSpec};
//!
//! let trace = WorkloadSpec::new(500, Workload::Zipfian { theta: 0.9 }, 1).trace(20_000);
//! let stats = simulate_at_multi_sizes(
//!     &trace,
//!     &CacheBuilder::new(1),
//!     PolicyKind::Lru,
//!     &[50, 200],
//!     &Warmup::Fraction(0.1),
//!     None,
//! )
//! .unwrap();
//! assert_eq!(stats[0].n_req, 18_000);
//! assert!(stats[1].miss_ratio() < stats[0].miss_ratio());
//! ```

use log::{debug, info};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::builder::{CacheBuilder, PolicyKind};
use crate::error::ConfigError;
use crate::request::{Request, Trace};
use crate::traits::EvictionPolicy;

/// Requests that warm the cache without being counted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Warmup<'a> {
    None,
    /// Leading fraction of the trace.
    Fraction(f64),
    /// Requests arriving in the first `n` seconds of the trace.
    Seconds(i64),
    /// A separate trace replayed first.
    Trace(&'a [Request]),
}

/// Counters for one simulated cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub policy: String,
    pub cache_size: u64,
    /// Counted requests (warmup excluded).
    pub n_req: u64,
    pub n_miss: u64,
    pub n_req_bytes: u64,
    pub n_miss_bytes: u64,
    pub n_warmup_req: u64,
    /// Objects found expired by counted requests.
    pub n_expired: u64,
    /// Objects cached at the end of the run.
    pub n_obj: u64,
    pub occupied_bytes: u64,
}

impl CacheStats {
    pub fn miss_ratio(&self) -> f64 {
        if self.n_req == 0 {
            0.0
        } else {
            self.n_miss as f64 / self.n_req as f64
        }
    }

    pub fn byte_miss_ratio(&self) -> f64 {
        if self.n_req_bytes == 0 {
            0.0
        } else {
            self.n_miss_bytes as f64 / self.n_req_bytes as f64
        }
    }

    pub fn hit_ratio(&self) -> f64 {
        if self.n_req == 0 { 0.0 } else { 1.0 - self.miss_ratio() }
    }
}

/// Maps trace time and hints onto the replay's timeline.
#[derive(Debug, Clone, Copy)]
struct Rebase {
    clock_base: i64,
    vtime_offset: i64,
}

impl Rebase {
    fn apply(self, mut req: Request) -> Request {
        req.clock_time -= self.clock_base;
        if let Some(next) = req.next_access_vtime.as_mut() {
            *next += self.vtime_offset;
        }
        req
    }
}

fn first_clock<T: Trace + ?Sized>(trace: &T) -> Option<i64> {
    trace.requests().next().map(|r| r.clock_time)
}

/// Replays `trace` through `cache` and returns its counters.
pub fn simulate<T: Trace + ?Sized>(
    trace: &T,
    cache: &mut dyn EvictionPolicy,
    warmup: &Warmup<'_>,
) -> CacheStats {
    let mut stats = CacheStats {
        policy: cache.name().to_string(),
        cache_size: cache.capacity(),
        ..CacheStats::default()
    };

    let mut clock_base = first_clock(trace).unwrap_or(0);
    let mut vtime_offset = 0;
    if let Warmup::Trace(warm) = warmup {
        let base = first_clock(*warm).unwrap_or(clock_base);
        clock_base = base;
        let rebase = Rebase {
            clock_base,
            vtime_offset: 0,
        };
        for req in warm.requests() {
            cache.get(&rebase.apply(req));
            stats.n_warmup_req += 1;
        }
        vtime_offset = warm.len() as i64;
    }
    let rebase = Rebase {
        clock_base,
        vtime_offset,
    };

    let n_warmup_reqs = match warmup {
        Warmup::Fraction(f) => {
            let len = trace
                .len_hint()
                .unwrap_or_else(|| trace.requests().count());
            (len as f64 * f.clamp(0.0, 1.0)) as usize
        },
        _ => 0,
    };
    let mut expired_before = cache.core().n_expired();
    for (i, req) in trace.requests().enumerate() {
        let req = rebase.apply(req);
        let hit = cache.get(&req);
        let warming = match warmup {
            Warmup::Fraction(_) => i < n_warmup_reqs,
            Warmup::Seconds(s) => req.clock_time < *s,
            Warmup::None | Warmup::Trace(_) => false,
        };
        if warming {
            stats.n_warmup_req += 1;
            expired_before = cache.core().n_expired();
            continue;
        }
        stats.n_req += 1;
        stats.n_req_bytes += req.size;
        if !hit {
            stats.n_miss += 1;
            stats.n_miss_bytes += req.size;
        }
    }

    stats.n_expired = cache.core().n_expired() - expired_before;
    stats.n_obj = cache.n_obj();
    stats.occupied_bytes = cache.occupied_bytes();
    debug!(
        "{} {} bytes: {} requests ({} warmup), miss ratio {:.4}, byte miss ratio {:.4}",
        stats.policy,
        stats.cache_size,
        stats.n_req,
        stats.n_warmup_req,
        stats.miss_ratio(),
        stats.byte_miss_ratio()
    );
    stats
}

/// Simulates one `kind` cache per entry of `sizes`, in parallel.
///
/// Every cache is built before any request is replayed, so a bad parameter
/// fails fast. With `n_threads` the run uses a dedicated pool of that size,
/// otherwise rayon's global pool. Results follow the order of `sizes`.
pub fn simulate_at_multi_sizes<T: Trace + ?Sized>(
    trace: &T,
    builder: &CacheBuilder,
    kind: PolicyKind,
    sizes: &[u64],
    warmup: &Warmup<'_>,
    n_threads: Option<usize>,
) -> Result<Vec<CacheStats>, ConfigError> {
    let caches = sizes
        .iter()
        .map(|&size| builder.clone().capacity(size).build(kind))
        .collect::<Result<Vec<_>, _>>()?;

    let run = move || -> Vec<CacheStats> {
        caches
            .into_par_iter()
            .map(|mut cache| simulate(trace, cache.as_mut(), warmup))
            .collect()
    };
    let stats = match n_threads {
        Some(n) => {
            let pool = ThreadPoolBuilder::new()
                .num_threads(n)
                .thread_name(|i| format!("cachesim-{i}"))
                .build()
                .map_err(|err| {
                    ConfigError::new(format!("cannot start {n} simulation threads: {err}"))
                })?;
            pool.install(run)
        },
        None => run(),
    };

    info!(
        "simulated {} at {} sizes: {}",
        kind,
        stats.len(),
        stats
            .iter()
            .map(|s| format!("{}={:.4}", s.cache_size, s.miss_ratio()))
            .collect::<Vec<_>>()
            .join(" ")
    );
    Ok(stats)
}

/// Like [`simulate_at_multi_sizes`] at `step, 2 * step, ...` up to
/// `max_size`.
pub fn simulate_at_multi_sizes_with_step_size<T: Trace + ?Sized>(
    trace: &T,
    builder: &CacheBuilder,
    kind: PolicyKind,
    step_size: u64,
    max_size: u64,
    warmup: &Warmup<'_>,
    n_threads: Option<usize>,
) -> Result<Vec<CacheStats>, ConfigError> {
    if step_size == 0 {
        return Err(ConfigError::new("step size must be positive"));
    }
    let sizes: Vec<u64> = (1..)
        .map(|i| i * step_size)
        .take_while(|&size| size <= max_size)
        .collect();
    simulate_at_multi_sizes(trace, builder, kind, &sizes, warmup, n_threads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::lru::Lru;

    fn trace(ids: &[u64]) -> Vec<Request> {
        ids.iter()
            .enumerate()
            .map(|(t, &id)| Request::new(id, 10, 1_000 + t as i64))
            .collect()
    }

    mod single {
        use super::*;

        #[test]
        fn test_counts_misses_and_bytes() {
            let mut cache = Lru::new(30, 0);
            let stats = simulate(&trace(&[1, 2, 1, 3, 4, 1]), &mut cache, &Warmup::None);
            assert_eq!(stats.policy, "LRU");
            assert_eq!(stats.n_req, 6);
            assert_eq!(stats.n_miss, 4);
            assert_eq!(stats.n_req_bytes, 60);
            assert_eq!(stats.n_miss_bytes, 40);
            assert_eq!(stats.n_obj, 3);
            assert_eq!(stats.occupied_bytes, 30);
            assert!((stats.miss_ratio() - 4.0 / 6.0).abs() < 1e-12);
        }

        #[test]
        fn test_fraction_warmup() {
            let mut cache = Lru::new(30, 0);
            let stats = simulate(&trace(&[1, 2, 1, 2]), &mut cache, &Warmup::Fraction(0.5));
            assert_eq!(stats.n_warmup_req, 2);
            assert_eq!(stats.n_req, 2);
            assert_eq!(stats.n_miss, 0);
        }

        #[test]
        fn test_seconds_warmup_uses_rebased_clock() {
            let mut cache = Lru::new(30, 0);
            // clock starts at 1000; the first three seconds warm up
            let stats = simulate(&trace(&[1, 2, 3, 1, 4]), &mut cache, &Warmup::Seconds(3));
            assert_eq!(stats.n_warmup_req, 3);
            assert_eq!(stats.n_req, 2);
            assert_eq!(stats.n_miss, 1);
        }

        #[test]
        fn test_warmup_trace() {
            let warm = trace(&[1, 2]);
            let mut cache = Lru::new(30, 0);
            let stats = simulate(&trace(&[1, 2, 3]), &mut cache, &Warmup::Trace(&warm));
            assert_eq!(stats.n_warmup_req, 2);
            assert_eq!(stats.n_req, 3);
            assert_eq!(stats.n_miss, 1);
        }

        #[test]
        fn test_empty_trace() {
            let mut cache = Lru::new(30, 0);
            let stats = simulate(&trace(&[]), &mut cache, &Warmup::Fraction(0.2));
            assert_eq!(stats.n_req, 0);
            assert_eq!(stats.miss_ratio(), 0.0);
            assert_eq!(stats.byte_miss_ratio(), 0.0);
        }

        #[test]
        fn test_expired_objects_are_counted() {
            let reqs = vec![
                Request::new(1, 10, 0).with_ttl(5),
                Request::new(1, 10, 3),
                Request::new(1, 10, 10),
            ];
            let mut cache = Lru::new(30, 0);
            let stats = simulate(&reqs, &mut cache, &Warmup::None);
            assert_eq!(stats.n_expired, 1);
            assert_eq!(stats.n_miss, 2);
        }
    }

    mod multi {
        use super::*;

        fn cyclic(n: usize, universe: u64) -> Vec<Request> {
            (0..n)
                .map(|t| Request::new((t as u64 * 7) % universe, 10, t as i64))
                .collect()
        }

        #[test]
        fn test_results_follow_size_order() {
            let reqs = cyclic(2_000, 50);
            let sizes = [400, 100, 250];
            let stats = simulate_at_multi_sizes(
                &reqs,
                &CacheBuilder::new(1),
                PolicyKind::Lru,
                &sizes,
                &Warmup::None,
                None,
            )
            .unwrap();
            let got: Vec<_> = stats.iter().map(|s| s.cache_size).collect();
            assert_eq!(got, sizes);
        }

        #[test]
        fn test_dedicated_pool_matches_global() {
            let reqs = cyclic(3_000, 80);
            let builder = CacheBuilder::new(1).params("segment-size=5,n-merge=2");
            let sizes = [100, 300, 500];
            let global = simulate_at_multi_sizes(
                &reqs,
                &builder,
                PolicyKind::GlCache,
                &sizes,
                &Warmup::None,
                None,
            )
            .unwrap();
            let pooled = simulate_at_multi_sizes(
                &reqs,
                &builder,
                PolicyKind::GlCache,
                &sizes,
                &Warmup::None,
                Some(2),
            )
            .unwrap();
            assert_eq!(global, pooled);
        }

        #[test]
        fn test_bad_parameters_fail_before_running() {
            let reqs = cyclic(10, 5);
            let err = simulate_at_multi_sizes(
                &reqs,
                &CacheBuilder::new(1).params("segment-size=1"),
                PolicyKind::GlCache,
                &[100],
                &Warmup::None,
                None,
            )
            .unwrap_err();
            assert!(err.to_string().contains("segment-size"));
        }

        #[test]
        fn test_step_sizes() {
            let reqs = cyclic(500, 30);
            let stats = simulate_at_multi_sizes_with_step_size(
                &reqs,
                &CacheBuilder::new(1),
                PolicyKind::Fifo,
                100,
                350,
                &Warmup::None,
                None,
            )
            .unwrap();
            let sizes: Vec<_> = stats.iter().map(|s| s.cache_size).collect();
            assert_eq!(sizes, vec![100, 200, 300]);
            assert!(
                simulate_at_multi_sizes_with_step_size(
                    &reqs,
                    &CacheBuilder::new(1),
                    PolicyKind::Fifo,
                    0,
                    350,
                    &Warmup::None,
                    None,
                )
                .is_err()
            );
        }
    }
}
