//! Error types for the cachesim library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when a policy parameter string or a simulation
//!   setting is invalid (unknown key, out-of-range value, zero capacity).
//! - [`InvariantError`]: Returned by `check_invariants` methods when internal
//!   bookkeeping has drifted, and by operations a policy cannot support
//!   (e.g. `to_evict` on merge-based eviction).
//! - [`RegressorError`]: Returned by a [`Regressor`](crate::regressor::Regressor)
//!   when it cannot fit a model to the supplied training data.
//!
//! ## Example Usage
//!
//! ```
//! use cachesim::error::ConfigError;
//! use cachesim::policy::glcache::GlCacheConfig;
//!
//! // Fallible parsing of user-supplied parameters
//! let cfg: Result<GlCacheConfig, ConfigError> = GlCacheConfig::parse("segment-size=64,n-merge=2");
//! assert!(cfg.is_ok());
//!
//! // Unknown keys are rejected, never ignored
//! let bad = GlCacheConfig::parse("segment-size=64,bogus=1");
//! assert!(bad.unwrap_err().to_string().contains("bogus"));
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal cache invariants are violated.
///
/// Produced by `check_invariants` on policy types and by
/// [`EvictionPolicy::to_evict`](crate::traits::EvictionPolicy::to_evict) on
/// policies whose eviction decision cannot be separated from the eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by [`Params`](crate::config::Params) accessors, policy
/// constructors and [`CacheBuilder::build`](crate::builder::CacheBuilder::build).
/// The message always names the offending parameter.
///
/// # Example
///
/// ```
/// use cachesim::builder::{CacheBuilder, PolicyKind};
///
/// let Err(err) = CacheBuilder::new(0).build(PolicyKind::Lru) else {
///     panic!("zero capacity must fail");
/// };
/// assert!(err.to_string().contains("capacity"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// RegressorError
// ---------------------------------------------------------------------------

/// Error returned when a regressor cannot produce a model.
///
/// Never fatal to a simulation: the learned policy keeps (or returns to)
/// FIFO segment selection when fitting fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressorError(String);

impl RegressorError {
    /// Creates a new `RegressorError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegressorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for RegressorError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_error<T: std::error::Error>() {}

    // -- InvariantError ---------------------------------------------------

    #[test]
    fn invariant_display_shows_message() {
        let err = InvariantError::new("occupied bytes mismatch");
        assert_eq!(err.to_string(), "occupied bytes mismatch");
        assert_eq!(err.message(), "occupied bytes mismatch");
    }

    #[test]
    fn invariant_clone_and_eq() {
        let a = InvariantError::new("x");
        assert_eq!(a.clone(), a);
        assert_error::<InvariantError>();
    }

    // -- ConfigError ------------------------------------------------------

    #[test]
    fn config_display_shows_message() {
        let err = ConfigError::new("rank-intvl must be in (0, 1)");
        assert_eq!(err.to_string(), "rank-intvl must be in (0, 1)");
    }

    #[test]
    fn config_debug_includes_message() {
        let err = ConfigError::new("bad n-merge");
        assert!(format!("{:?}", err).contains("bad n-merge"));
        assert_error::<ConfigError>();
    }

    // -- RegressorError ---------------------------------------------------

    #[test]
    fn regressor_message_accessor() {
        let err = RegressorError::new("no training rows");
        assert_eq!(err.message(), "no training rows");
        assert_error::<RegressorError>();
    }
}
