//! Flat `key=value[,key=value...]` policy parameter strings.
//!
//! Keys are case-insensitive and `_` is accepted in place of `-`. Each policy
//! takes the keys it understands and then calls [`Params::finish`], which
//! rejects whatever is left, so a misspelled key fails construction instead
//! of being silently ignored.
//!
//! ## Example
//!
//! ```
//! use cachesim::config::Params;
//!
//! let mut params = Params::parse("segment_size=100, N-Merge=2").unwrap();
//! assert_eq!(params.take_usize("segment-size").unwrap(), Some(100));
//! assert_eq!(params.take_usize("n-merge").unwrap(), Some(2));
//! params.finish("GLCache").unwrap();
//! ```

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    /// Parses a parameter string. An empty string yields no parameters.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let mut pairs = Vec::new();
        for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let (key, value) = item.split_once('=').ok_or_else(|| {
                ConfigError::new(format!("parameter `{item}` is not of the form key=value"))
            })?;
            let key = normalize_key(key);
            if key.is_empty() {
                return Err(ConfigError::new(format!("parameter `{item}` has an empty key")));
            }
            if pairs.iter().any(|(k, _)| *k == key) {
                return Err(ConfigError::new(format!("parameter `{key}` given twice")));
            }
            pairs.push((key, value.trim().to_string()));
        }
        Ok(Self { pairs })
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Removes and returns the raw value of `key`.
    pub fn take(&mut self, key: &str) -> Option<String> {
        let pos = self.pairs.iter().position(|(k, _)| k == key)?;
        Some(self.pairs.remove(pos).1)
    }

    pub fn take_usize(&mut self, key: &str) -> Result<Option<usize>, ConfigError> {
        self.take_parsed(key, "a non-negative integer")
    }

    pub fn take_i64(&mut self, key: &str) -> Result<Option<i64>, ConfigError> {
        self.take_parsed(key, "an integer")
    }

    pub fn take_f64(&mut self, key: &str) -> Result<Option<f64>, ConfigError> {
        let value: Option<f64> = self.take_parsed(key, "a number")?;
        match value {
            Some(v) if !v.is_finite() => Err(ConfigError::new(format!(
                "parameter `{key}` must be finite, got {v}"
            ))),
            other => Ok(other),
        }
    }

    /// Accepts `true/false`, `1/0`, `yes/no`.
    pub fn take_bool(&mut self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(raw) = self.take(key) else {
            return Ok(None);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::new(format!(
                "parameter `{key}` must be a boolean, got `{raw}`"
            ))),
        }
    }

    /// Fails if any parameter was not consumed.
    pub fn finish(self, policy: &str) -> Result<(), ConfigError> {
        match self.pairs.first() {
            None => Ok(()),
            Some((key, _)) => Err(ConfigError::new(format!(
                "{policy} does not support parameter `{key}`"
            ))),
        }
    }

    fn take_parsed<T: std::str::FromStr>(
        &mut self,
        key: &str,
        expected: &str,
    ) -> Result<Option<T>, ConfigError> {
        let Some(raw) = self.take(key) else {
            return Ok(None);
        };
        raw.parse().map(Some).map_err(|_| {
            ConfigError::new(format!("parameter `{key}` must be {expected}, got `{raw}`"))
        })
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('_', "-")
}
