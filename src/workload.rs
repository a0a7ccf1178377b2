//! Synthetic request streams for tests, benchmarks and quick experiments.
//!
//! Keys follow one of a few access distributions; each key has a fixed size
//! for the whole stream, and clock time advances at a fixed request rate.
//!
//! ```
//! use cachesim::workload::{SizeDist, Workload, WorkloadSpec};
//!
//! let spec = WorkloadSpec::new(1_000, Workload::Zipfian { theta: 0.99 }, 42)
//!     .sizes(SizeDist::PerKey { min: 100, max: 4_000 })
//!     .req_per_sec(100);
//! let trace = spec.trace(10_000);
//! assert_eq!(trace.len(), 10_000);
//! assert_eq!(trace[9_999].clock_time, 99);
//! ```

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::request::{ObjId, Request};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Workload {
    /// Uniform random keys in `[0, universe)`.
    Uniform,
    /// A hot set of `hot_fraction` of the keys receives `hot_prob` of the
    /// requests.
    Hotset { hot_fraction: f64, hot_prob: f64 },
    /// Sequential scan over `[0, universe)`, wrapping.
    Scan,
    /// Zipfian popularity; `theta` 0.0 is uniform, 0.99 is the usual skew.
    Zipfian { theta: f64 },
}

/// Object sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeDist {
    Fixed(u64),
    /// Each key draws a size in `min..=max` once, from a hash of the key.
    PerKey { min: u64, max: u64 },
}

impl SizeDist {
    fn size_of(self, key: ObjId, seed: u64) -> u64 {
        match self {
            SizeDist::Fixed(size) => size.max(1),
            SizeDist::PerKey { min, max } => {
                let (min, max) = (min.max(1), max.max(min.max(1)));
                min + splitmix64(key ^ seed) % (max - min + 1)
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkloadSpec {
    pub universe: u64,
    pub workload: Workload,
    pub seed: u64,
    pub sizes: SizeDist,
    /// Requests per simulated second.
    pub req_per_sec: u64,
}

impl WorkloadSpec {
    pub fn new(universe: u64, workload: Workload, seed: u64) -> Self {
        Self {
            universe,
            workload,
            seed,
            sizes: SizeDist::Fixed(1),
            req_per_sec: 1,
        }
    }

    pub fn sizes(mut self, sizes: SizeDist) -> Self {
        self.sizes = sizes;
        self
    }

    pub fn req_per_sec(mut self, rate: u64) -> Self {
        self.req_per_sec = rate.max(1);
        self
    }

    pub fn generator(self) -> WorkloadGenerator {
        WorkloadGenerator::new(self)
    }

    /// The first `n` requests of the stream.
    pub fn trace(self, n: usize) -> Vec<Request> {
        let mut generator = self.generator();
        (0..n).map(|_| generator.next_request()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct WorkloadGenerator {
    spec: WorkloadSpec,
    rng: SmallRng,
    scan_pos: u64,
    n_generated: u64,
    zipfian: Option<ZipfianState>,
}

impl WorkloadGenerator {
    pub fn new(spec: WorkloadSpec) -> Self {
        let spec = WorkloadSpec {
            universe: spec.universe.max(1),
            req_per_sec: spec.req_per_sec.max(1),
            ..spec
        };
        let zipfian = match spec.workload {
            Workload::Zipfian { theta } => Some(ZipfianState::new(spec.universe, theta)),
            _ => None,
        };
        Self {
            rng: SmallRng::seed_from_u64(spec.seed),
            spec,
            scan_pos: 0,
            n_generated: 0,
            zipfian,
        }
    }

    pub fn next_key(&mut self) -> ObjId {
        let universe = self.spec.universe;
        match self.spec.workload {
            Workload::Uniform => self.rng.random_range(0..universe),
            Workload::Hotset {
                hot_fraction,
                hot_prob,
            } => {
                let hot_fraction = hot_fraction.clamp(0.0, 1.0);
                let hot_prob = hot_prob.clamp(0.0, 1.0);
                let hot_size = ((universe as f64) * hot_fraction).round() as u64;
                let hot_size = hot_size.clamp(1, universe);
                if self.rng.random::<f64>() < hot_prob {
                    self.rng.random_range(0..hot_size)
                } else if hot_size == universe {
                    self.rng.random_range(0..universe)
                } else {
                    self.rng.random_range(hot_size..universe)
                }
            },
            Workload::Scan => {
                let key = self.scan_pos;
                self.scan_pos = (self.scan_pos + 1) % universe;
                key
            },
            Workload::Zipfian { .. } => {
                let u = self.rng.random::<f64>();
                match &self.zipfian {
                    Some(zipf) => zipf.sample(u),
                    None => 0,
                }
            },
        }
    }

    pub fn next_request(&mut self) -> Request {
        let key = self.next_key();
        let clock_time = (self.n_generated / self.spec.req_per_sec) as i64;
        self.n_generated += 1;
        Request::new(key, self.spec.sizes.size_of(key, self.spec.seed), clock_time)
    }
}

impl Iterator for WorkloadGenerator {
    type Item = Request;

    fn next(&mut self) -> Option<Request> {
        Some(self.next_request())
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Zipfian inverse-CDF sampling (YCSB), with zeta values precomputed.
#[derive(Debug, Clone)]
struct ZipfianState {
    n: u64,
    theta: f64,
    zeta_n: f64,
    alpha: f64,
    eta: f64,
}

impl ZipfianState {
    fn new(n: u64, theta: f64) -> Self {
        // theta = 1 divides by zero
        let theta = theta.clamp(0.0, 0.9999);
        let zeta_2 = Self::zeta(2, theta);
        let zeta_n = Self::zeta(n, theta);
        let alpha = 1.0 / (1.0 - theta);
        let eta = (1.0 - (2.0 / n as f64).powf(1.0 - theta)) / (1.0 - zeta_2 / zeta_n);
        Self {
            n,
            theta,
            zeta_n,
            alpha,
            eta,
        }
    }

    fn zeta(n: u64, theta: f64) -> f64 {
        (1..=n).map(|i| 1.0 / (i as f64).powf(theta)).sum()
    }

    fn sample(&self, u: f64) -> u64 {
        let uz = u * self.zeta_n;
        if uz < 1.0 {
            return 0;
        }
        if uz < 1.0 + 0.5_f64.powf(self.theta) {
            return 1.min(self.n - 1);
        }
        let spread = (self.n as f64) * (self.eta * u - self.eta + 1.0).powf(self.alpha);
        (spread as u64).min(self.n - 1)
    }
}
