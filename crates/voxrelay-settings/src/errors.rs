//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
///
/// Every variant names where the problem is: the file for read and parse
/// failures, the camelCase key path for rejected values.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not JSON, or a value has the wrong type.
    #[error("invalid settings file {}: {source}", path.display())]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// A setting parsed but cannot be used.
    #[error("invalid setting `{key}`: {reason}")]
    Invalid {
        /// Key path, e.g. `server.maxSendQueue`.
        key: &'static str,
        /// What is wrong with the value.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }

    /// Key path of a rejected value, if that is what failed.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { key, .. } => Some(*key),
            Self::Read { .. } | Self::Parse { .. } => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
