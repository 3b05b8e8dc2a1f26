use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure kinds of the import cost pipeline.
///
/// Only `Parse` is terminal for a whole file. Every other kind is reported
/// against a single import as a zero size. `Debounced` means a newer request
/// for the same location took over and the result should be ignored.
///
/// The serialized form carries a `type` tag (`"TimeoutError"`, ...) so that
/// results can cross the worker process boundary and be rendered by callers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CostError {
    #[error("failed to parse source: {message}")]
    #[serde(rename = "ParseError")]
    Parse { message: String },

    #[error("cannot resolve package '{package}': {message}")]
    #[serde(rename = "VersionResolutionError")]
    VersionResolution { package: String, message: String },

    #[error("bundling failed: {message}")]
    #[serde(rename = "BundleError")]
    Bundle { message: String },

    #[error("size calculation exceeded {limit_ms}ms")]
    #[serde(rename = "TimeoutError")]
    Timeout { limit_ms: u64 },

    #[error("superseded by a newer request for the same location")]
    #[serde(rename = "DebounceError")]
    Debounced,

    #[error("worker failed: {message}")]
    #[serde(rename = "WorkerError")]
    Worker { message: String },
}

impl CostError {
    pub fn bundle(err: impl std::fmt::Display) -> Self {
        Self::Bundle { message: err.to_string() }
    }

    pub fn worker(err: impl std::fmt::Display) -> Self {
        Self::Worker { message: err.to_string() }
    }

    pub fn version(package: &str, err: impl std::fmt::Display) -> Self {
        Self::VersionResolution { package: package.to_string(), message: err.to_string() }
    }

    /// The tag used in serialized output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "ParseError",
            Self::VersionResolution { .. } => "VersionResolutionError",
            Self::Bundle { .. } => "BundleError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Debounced => "DebounceError",
            Self::Worker { .. } => "WorkerError",
        }
    }

    pub fn is_debounce(&self) -> bool {
        matches!(self, Self::Debounced)
    }
}
