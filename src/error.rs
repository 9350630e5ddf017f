//! Error taxonomy for capability resolution and session control.

use thiserror::Error;

use crate::capability::LensId;
use crate::settings::SettingField;

/// Hard resolver failures. A session cannot start with these settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintViolation {
    /// The requested lens is not available on this device.
    #[error("lens {0} is not available on this device")]
    LensUnavailable(LensId),
    /// Concurrent camera mode was requested but the device cannot run two lenses.
    #[error("concurrent camera mode is not supported on this device")]
    ConcurrentModeUnsupported,
}

/// A command was refused. The session continues unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionRejected {
    /// The update targets a setting that can only change by re-initializing.
    #[error("changing {0} requires rebuilding the session")]
    RequiresRebuild(SettingField),
    /// The command is not valid in the current state.
    #[error("{operation} is not valid while {state}")]
    InvalidStateForOperation {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the machine was in when the command arrived.
        state: String,
    },
    /// Video recording was requested in an image-only capture mode.
    #[error("the active capture mode does not support video")]
    CaptureModeUnsupportsVideo,
    /// Still capture was requested in a video-only capture mode.
    #[error("the active capture mode does not support still images")]
    CaptureModeUnsupportsImage,
    /// Lens switching is not available while two lenses are bound.
    #[error("lens cannot be switched live in concurrent camera mode")]
    LensSwitchDuringConcurrent,
}

/// The capture sink rejected an operation the resolver could not foresee.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkFailure {
    /// Binding the perpetual settings failed.
    #[error("binding the session failed: {0}")]
    BindFailed(String),
    /// A live settings update failed.
    #[error("live update failed: {0}")]
    LiveUpdateFailed(String),
    /// Still capture failed.
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    /// A recording operation failed.
    #[error("recording failed: {0}")]
    RecordingFailed(String),
}

/// Failure while querying a capability source.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Device with the given index was not found.
    #[error("device {0} not found")]
    DeviceNotFound(usize),
    /// Failed to open a device.
    #[error("failed to open device {index}: {message}")]
    DeviceOpenFailed {
        /// Device index.
        index: usize,
        /// Driver or OS message.
        message: String,
    },
    /// The device exists but cannot capture video.
    #[error("device {0} is not a video capture device")]
    NotACaptureDevice(usize),
    /// The requested backend was not compiled in.
    #[error("capability backend unavailable: {0}")]
    BackendUnavailable(&'static str),
    /// Capability data could not be decoded.
    #[error("invalid capability data: {0}")]
    Decode(#[from] serde_json::Error),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Any error surfaced by the session API.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Settings could not be resolved against the device.
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),
    /// The command was rejected; state is unchanged.
    #[error(transparent)]
    Rejected(#[from] TransitionRejected),
    /// The capture sink failed.
    #[error(transparent)]
    Sink(#[from] SinkFailure),
    /// The capability source failed.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// Configuration or settings could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// The operation was interrupted by cooperative shutdown.
    #[error("operation cancelled")]
    Cancelled,
    /// The session command loop is no longer running.
    #[error("session is closed")]
    SessionClosed,
}

impl SessionError {
    /// Whether the error left the session state untouched.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
