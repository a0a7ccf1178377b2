//! cachesim: cache replacement policies and a trace-driven simulator.
//!
//! Every policy implements [`traits::EvictionPolicy`] over a shared
//! [`store::ObjectStore`]; [`builder::CacheBuilder`] constructs them from a
//! policy kind and a `key=value` parameter string, and [`sim`] replays a
//! trace through one cache per size in parallel.
//!
//! ```
//! use cachesim::prelude::*;
//!
//! let trace = WorkloadSpec::new(200, Workload::Zipfian { theta: 0.99 }, 7).trace(5_000);
//! let mut cache = CacheBuilder::new(50).build(PolicyKind::Sieve).unwrap();
//! let stats = simulate(&trace, cache.as_mut(), &Warmup::None);
//! assert_eq!(stats.n_req, 5_000);
//! assert!(stats.miss_ratio() < 1.0);
//! ```

pub mod builder;
pub mod config;
pub mod ds;
pub mod error;
pub mod policy;
pub mod prelude;
pub mod regressor;
pub mod request;
pub mod sim;
pub mod store;
pub mod traits;
pub mod workload;
