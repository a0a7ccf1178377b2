pub use crate::builder::{CacheBuilder, PolicyKind};
pub use crate::error::{ConfigError, InvariantError, RegressorError};
pub use crate::policy::arc::Arc;
pub use crate::policy::clock::Clock;
pub use crate::policy::fifo::Fifo;
pub use crate::policy::glcache::{GlCache, GlCacheConfig};
pub use crate::policy::lru::Lru;
pub use crate::policy::sieve::Sieve;
pub use crate::regressor::{GradientBoostedTrees, Regressor};
pub use crate::request::{InternedTrace, ObjId, Request, Trace, annotate_next_access};
pub use crate::sim::{
    CacheStats, Warmup, simulate, simulate_at_multi_sizes, simulate_at_multi_sizes_with_step_size,
};
pub use crate::traits::{CheckResult, EvictionPolicy};
pub use crate::workload::{SizeDist, Workload, WorkloadSpec};
