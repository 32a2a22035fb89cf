//! Runtime configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```rust
//! use observable_core::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_json(r#"{ "max_settle_rounds": 8 }"#).unwrap();
//! assert_eq!(config.max_settle_rounds, 8);
//! assert!(config.isolate_observer_panics);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Run each observer of a flush under `catch_unwind` so one panicking
    /// observer does not cancel its siblings.
    pub isolate_observer_panics: bool,

    /// Upper bound on the number of flushes `settle` runs before giving up.
    pub max_settle_rounds: usize,

    /// Drop registry and cache entries of unreachable containers after
    /// every flush.
    pub purge_on_flush: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            isolate_observer_panics: true,
            max_settle_rounds: 100,
            purge_on_flush: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }
}
