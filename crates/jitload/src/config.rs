//! Process-wide batching configuration.
//!
//! The configuration object is injected into the [`crate::Preloader`]
//! rather than read from ambient global state, so tests can run with
//! different settings side by side.

use std::fmt;

/// The process-wide default for batching.
pub enum Enabled {
    /// Batching is on for every multi-record fetch.
    Always,
    /// Batching happens only on explicit opt-in.
    Never,
    /// Batching is decided by a predicate, re-evaluated on each check
    /// (for instance "enabled only outside maintenance mode").
    When(Box<dyn Fn() -> bool + Send + Sync>),
}

/// Configuration for the batching layer.
pub struct Config {
    enabled: Enabled,
    max_batch_size: Option<usize>,
}

impl Config {
    /// Create a configuration with batching off by default and no
    /// aggregate slice bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: Enabled::Never,
            max_batch_size: None,
        }
    }

    /// Set the batching default.
    #[must_use]
    pub fn enabled(mut self, enabled: Enabled) -> Self {
        self.enabled = enabled;
        self
    }

    /// Turn batching on for every multi-record fetch.
    #[must_use]
    pub fn globally_enabled(self) -> Self {
        self.enabled(Enabled::Always)
    }

    /// Decide batching with a predicate evaluated on each check.
    #[must_use]
    pub fn enabled_when(self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.enabled(Enabled::When(Box::new(predicate)))
    }

    /// Bound the number of owner keys per aggregate query slice.
    ///
    /// Unset means unbounded: one query covers all owners.
    #[must_use]
    pub fn max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = Some(max);
        self
    }

    /// Replace the batching default in place.
    pub fn set_enabled(&mut self, enabled: Enabled) {
        self.enabled = enabled;
    }

    /// Whether batching is currently the process-wide default.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match &self.enabled {
            Enabled::Always => true,
            Enabled::Never => false,
            Enabled::When(predicate) => predicate(),
        }
    }

    /// The global aggregate slice bound, if any.
    #[must_use]
    pub fn max_batch_size_value(&self) -> Option<usize> {
        self.max_batch_size
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enabled = match &self.enabled {
            Enabled::Always => "Always",
            Enabled::Never => "Never",
            Enabled::When(_) => "When(<predicate>)",
        };
        f.debug_struct("Config")
            .field("enabled", &enabled)
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}
