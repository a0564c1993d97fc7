//! Export error types.

use thiserror::Error;

use reel_common::ConfigError;
use reel_mux::MuxError;

/// Fatal export failures. Recoverable audio problems never surface here;
/// they are logged and the affected audio is left out.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Invalid export config: {0}")]
    Config(#[from] ConfigError),

    #[error("Frame render failed at frame {frame}: {reason}")]
    RenderFailed { frame: u32, reason: String },

    #[error("Mux failed: {0}")]
    Mux(#[from] MuxError),

    #[error("Export pipeline initialization failed: {0}")]
    InitFailed(String),

    /// A host codec or muxer reported an error on the hardware path.
    #[error("Codec pipeline failed: {0}")]
    Codec(String),

    #[error("Export thread panicked")]
    Panicked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_error_render_failed() {
        let err = ExportError::RenderFailed {
            frame: 42,
            reason: "unsupported image".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("unsupported image"));
    }

    #[test]
    fn export_error_wraps_mux_error() {
        let err = ExportError::from(MuxError::AudioAfterVideo);
        assert!(matches!(err, ExportError::Mux(MuxError::AudioAfterVideo)));
        assert!(err.to_string().starts_with("Mux failed"));
    }

    #[test]
    fn export_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = ExportError::from(io_err);
        assert!(err.to_string().contains("file missing"));
    }
}
