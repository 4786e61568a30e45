//! DSG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DsgError>;

/// Top-level error type for the disk space guard.
///
/// `Clone` so one failed scan can be delivered to every caller that was
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum DsgError {
    #[error("[DSG-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DSG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DSG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DSG-1004] invalid removable pattern {pattern:?}: {details}")]
    InvalidPattern { pattern: String, details: String },

    #[error("[DSG-2001] usage scan failed for {root}: {details}")]
    ScanFailure { root: PathBuf, details: String },

    #[error("[DSG-2002] usage scan of {root} exceeded {limit_ms}ms")]
    ScanTimeout { root: PathBuf, limit_ms: u64 },

    #[error("[DSG-2003] usage scan of {root} ended without a result")]
    ScanAborted { root: PathBuf },

    #[error("[DSG-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DSG-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("[DSG-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DsgError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DSG-1001",
            Self::MissingConfig { .. } => "DSG-1002",
            Self::ConfigParse { .. } => "DSG-1003",
            Self::InvalidPattern { .. } => "DSG-1004",
            Self::ScanFailure { .. } => "DSG-2001",
            Self::ScanTimeout { .. } => "DSG-2002",
            Self::ScanAborted { .. } => "DSG-2003",
            Self::Serialization { .. } => "DSG-2101",
            Self::Io { .. } => "DSG-3002",
            Self::Runtime { .. } => "DSG-3900",
        }
    }

    /// Whether retrying on the next triggering event might resolve the failure.
    ///
    /// Nothing in the guard retries on its own; this only informs the host.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ScanFailure { .. }
                | Self::ScanTimeout { .. }
                | Self::ScanAborted { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether this error came out of a usage scan attempt.
    #[must_use]
    pub const fn is_scan_error(&self) -> bool {
        matches!(
            self,
            Self::ScanFailure { .. } | Self::ScanTimeout { .. } | Self::ScanAborted { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source: Arc::new(source),
        }
    }
}

impl From<serde_json::Error> for DsgError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DsgError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
