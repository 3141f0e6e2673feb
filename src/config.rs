#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "serde")]
use crate::error::ConfigError;

/// Default bound on nested clause activations.
pub const DEFAULT_MAX_DEPTH: usize = 100_000;

/// Limits and opt-in behaviors of the resolution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct EngineConfig {
    /// Maximum depth of nested clause activations before the query fails
    /// with [`EngineError::DepthExceeded`](crate::EngineError::DepthExceeded)
    pub max_depth: usize,
    /// Maximum number of predicate calls per query, unlimited when `None`
    pub max_inferences: Option<u64>,
    /// Reject bindings that would create cyclic terms
    pub occurs_check: bool,
    /// Drop bindings of abandoned branches when backtracking
    pub reclaim_bindings: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_inferences: None,
            occurs_check: false,
            reclaim_bindings: false,
        }
    }
}

impl EngineConfig {
    /// Sets the depth limit
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Sets the inference limit
    #[must_use]
    pub fn with_max_inferences(mut self, max_inferences: u64) -> Self {
        self.max_inferences = Some(max_inferences);
        self
    }

    /// Enables or disables the occurs check
    #[must_use]
    pub fn with_occurs_check(mut self, enabled: bool) -> Self {
        self.occurs_check = enabled;
        self
    }

    /// Enables or disables reclamation of abandoned bindings
    #[must_use]
    pub fn with_reclaim_bindings(mut self, enabled: bool) -> Self {
        self.reclaim_bindings = enabled;
        self
    }

    /// Decodes a configuration from JSON. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the text is not a valid configuration.
    #[cfg(feature = "serde")]
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}
