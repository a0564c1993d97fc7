//! Movie writer error types.

use thiserror::Error;

/// Errors that can occur while writing or inspecting a movie.
#[derive(Error, Debug)]
pub enum MuxError {
    /// I/O error during file write. The partial file is unusable.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A video frame's pixel size differs from the first frame's.
    #[error("Frame {index} is {actual_width}x{actual_height}, movie is {width}x{height}")]
    DimensionMismatch {
        index: usize,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Audio tracks must all be added before the first video frame.
    #[error("Audio track added after video data was started")]
    AudioAfterVideo,

    /// Invalid writer input (audio format, placements, durations, frames).
    #[error("Invalid muxer config: {0}")]
    InvalidConfig(String),

    /// The inspector found bytes that are not a well-formed atom tree.
    #[error("Malformed atom `{kind}` at offset {offset}: {reason}")]
    Malformed {
        kind: String,
        offset: u64,
        reason: String,
    },
}

/// Convenience Result type for mux operations.
pub type MuxResult<T> = Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let mux_err = MuxError::from(io_err);
        assert!(mux_err.to_string().contains("IO error"));
        assert!(mux_err.to_string().contains("file not found"));
    }

    #[test]
    fn mux_error_display_dimension_mismatch() {
        let err = MuxError::DimensionMismatch {
            index: 3,
            width: 640,
            height: 480,
            actual_width: 320,
            actual_height: 240,
        };
        assert_eq!(err.to_string(), "Frame 3 is 320x240, movie is 640x480");
    }

    #[test]
    fn mux_error_display_invalid_config() {
        let err = MuxError::InvalidConfig("zero duration".into());
        assert_eq!(err.to_string(), "Invalid muxer config: zero duration");
    }

    #[test]
    fn mux_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let mux_err: MuxError = io_err.into();
        assert!(matches!(mux_err, MuxError::Io(_)));
    }
}
