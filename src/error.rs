//! Error taxonomy for the recording pipeline
//!
//! Fatal errors end a session (or block its start). Advisory errors are
//! reported to the user but never abort a session that otherwise completed.

use std::path::PathBuf;
use std::time::Duration;

use crate::capture::Region;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("invalid capture region {0}: width and height must be positive")]
    InvalidRegion(Region),

    #[error("unsupported frame rate {0} (expected one of 30, 60, 100, 120)")]
    InvalidFrameRate(u32),

    #[error("audio input device '{0}' is not available")]
    DeviceUnavailable(String),

    #[error("screen capture failed: {0}")]
    CaptureSourceError(String),

    #[error("audio stream failed: {0}")]
    AudioStreamError(String),

    #[error("failed to open writer for {path:?}: {reason}")]
    WriterOpenError { path: PathBuf, reason: String },

    #[error("failed writing {path:?}: {reason}")]
    SinkWriteError { path: PathBuf, reason: String },

    #[error("{worker} loop did not stop within {timeout:?}")]
    JoinTimeout { worker: &'static str, timeout: Duration },

    #[error("external encoder '{0}' not found")]
    ExternalToolMissing(String),

    #[error("external encoder failed (exit code {code:?}): {stderr}")]
    ExternalToolFailed { code: Option<i32>, stderr: String },

    #[error("a recording session is already active")]
    AlreadyRecording,

    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: crate::session::SessionState,
    },

    #[error("capture target is gone: {0}")]
    TargetGone(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// Advisory errors are surfaced to the user but leave the session running
    /// (or let it complete).
    pub fn is_advisory(&self) -> bool {
        matches!(
            self,
            RecorderError::DeviceUnavailable(_)
                | RecorderError::JoinTimeout { .. }
                | RecorderError::ExternalToolMissing(_)
                | RecorderError::ExternalToolFailed { .. }
                | RecorderError::InvalidTransition { .. }
        )
    }
}

pub type RecorderResult<T> = std::result::Result<T, RecorderError>;
