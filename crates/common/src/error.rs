//! Configuration and manifest errors (thiserror-based).

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating export settings and manifests.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("Invalid frame #{sequence_id}: {reason}")]
    InvalidFrame { sequence_id: u32, reason: String },

    #[error("Failed to read manifest {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Convenience Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
