//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings layer could not be turned into [`crate::SyncSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The merged settings document is not valid JSON or has the wrong shape.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A field parsed but holds a value the engine cannot run with.
    #[error("invalid setting `{field}`: {reason}")]
    InvalidValue {
        /// camelCase path of the offending field, e.g. `server.origin`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
