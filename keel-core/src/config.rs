//! Engine Configuration
//!
//! Per-engine settings: the label used in tracing spans, an optional cap on
//! the number of passes one invocation may execute, and whether an external
//! invocation with unchanged arguments may reuse the previous result.

use serde::{Deserialize, Serialize};

/// Configuration for one engine
///
/// # Example
///
/// ```
/// use keel_core::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_label("counter")
///     .with_max_passes(16);
///
/// assert_eq!(config.label(), "counter");
/// assert_eq!(config.max_passes(), Some(16));
/// assert!(config.skip_unchanged_args());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name recorded on every `invoke` span.
    label: String,

    /// Maximum passes per invocation; `None` is unbounded.
    ///
    /// Clamped to at least 1.
    max_passes: Option<usize>,

    /// Reuse the previous result when an external invocation repeats the
    /// previous arguments and no state change is pending.
    skip_unchanged_args: bool,
}

impl EngineConfig {
    /// Set the tracing label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Cap the number of passes per invocation.
    ///
    /// The value is clamped to at least 1.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = Some(max_passes.max(1));
        self
    }

    /// Enable or disable reuse of the previous result.
    pub fn with_skip_unchanged_args(mut self, skip: bool) -> Self {
        self.skip_unchanged_args = skip;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get the pass cap, if any.
    pub fn max_passes(&self) -> Option<usize> {
        self.max_passes.map(|n| n.max(1))
    }

    pub fn skip_unchanged_args(&self) -> bool {
        self.skip_unchanged_args
    }
}

impl Default for EngineConfig {
    /// Unbounded passes, result reuse enabled, label `"engine"`.
    fn default() -> Self {
        Self {
            label: "engine".to_string(),
            max_passes: None,
            skip_unchanged_args: true,
        }
    }
}
