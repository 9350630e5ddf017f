//! Boundaries to the camera hardware.
//!
//! The session core never talks to a camera directly. A [`CapabilitySource`]
//! describes what the device can do and a [`CaptureSink`] binds, streams and
//! records. Production code wraps a platform camera stack; tests use the mocks.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityModel, LensId};
use crate::error::{CapabilityError, SinkFailure};
use crate::recording::InitialRecordingSettings;
use crate::settings::{PerpetualSettings, SettingField, TransientSettings};

/// Where a finished recording ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    /// Sink-specific location (path, URI, ...).
    pub location: String,
    /// Recorded duration, excluding pauses.
    pub duration: Duration,
}

/// A captured still image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StillCapture {
    /// Sink-specific location (path, URI, ...).
    pub location: String,
    /// Lens the image was taken with.
    pub lens: LensId,
}

/// Produces the capability model of a device.
///
/// Queried once per `initialize`; the model is assumed stable for the session.
pub trait CapabilitySource: Send {
    /// Query the current capability model.
    fn capabilities(&mut self) -> Result<CapabilityModel, CapabilityError>;
}

/// Binds sessions and performs capture on behalf of the state machine.
///
/// Every method is a suspension point; the session awaits completion before
/// processing its next command.
#[async_trait]
pub trait CaptureSink: Send {
    /// Build the camera pipeline for the given settings.
    async fn bind(
        &mut self,
        perpetual: &PerpetualSettings,
        transient: &TransientSettings,
    ) -> Result<(), SinkFailure>;

    /// Apply one changed transient field to the running pipeline.
    async fn apply_live(
        &mut self,
        field: SettingField,
        transient: &TransientSettings,
    ) -> Result<(), SinkFailure>;

    /// Begin recording video.
    async fn start_recording(
        &mut self,
        initial: &InitialRecordingSettings,
    ) -> Result<(), SinkFailure>;

    /// Pause the active recording.
    async fn pause_recording(&mut self) -> Result<(), SinkFailure>;

    /// Resume a paused recording.
    async fn resume_recording(&mut self) -> Result<(), SinkFailure>;

    /// Stop and finalize the active recording.
    async fn stop_recording(&mut self) -> Result<OutputDescriptor, SinkFailure>;

    /// Capture a single still image.
    async fn take_still(&mut self, transient: &TransientSettings)
        -> Result<StillCapture, SinkFailure>;

    /// Release the pipeline. Must not fail.
    async fn unbind(&mut self);
}
