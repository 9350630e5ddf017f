//! Mock capability source and capture sink for testing without hardware.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::capability::{
    CapabilityModel, DynamicRange, FlashMode, Illuminant, ImageFormat, LensCapabilities, LensId,
    StabilizationMode, StreamConfig, TestPattern, VideoQuality, ZoomRange,
};
use crate::error::{CapabilityError, SinkFailure};
use crate::recording::InitialRecordingSettings;
use crate::settings::{PerpetualSettings, SettingField, TransientSettings};
use crate::traits::{CapabilitySource, CaptureSink, OutputDescriptor, StillCapture};

/// A two-lens phone: the back lens has a flash unit and zoom, the front lens
/// only a screen illuminant.
pub fn phone_capabilities() -> CapabilityModel {
    let back = LensCapabilities::default()
        .with_stabilization_modes([StabilizationMode::Off, StabilizationMode::On])
        .with_frame_rates([15, 30, 60])
        .with_unsupported_stabilization_fps(StabilizationMode::On, [60])
        .with_dynamic_ranges([DynamicRange::Sdr, DynamicRange::Hlg10])
        .with_flash_modes([FlashMode::Off, FlashMode::On, FlashMode::Auto])
        .with_illuminants([Illuminant::FlashUnit])
        .with_test_patterns([TestPattern::ColorBars])
        .with_zoom_range(ZoomRange::new(0.5, 10.0))
        .with_video_qualities(DynamicRange::Sdr, [VideoQuality::Hd, VideoQuality::Fhd])
        .with_video_qualities(DynamicRange::Hlg10, [VideoQuality::Fhd])
        .with_image_formats(
            StreamConfig::MultipleStreams,
            [ImageFormat::Jpeg, ImageFormat::JpegR],
        )
        .with_image_formats(StreamConfig::SingleStream, [ImageFormat::Jpeg]);

    let front = LensCapabilities::default()
        .with_stabilization_modes([StabilizationMode::Off])
        .with_frame_rates([15, 30])
        .with_dynamic_ranges([DynamicRange::Sdr])
        .with_flash_modes([FlashMode::Off, FlashMode::On])
        .with_illuminants([Illuminant::Screen])
        .with_zoom_range(ZoomRange::new(1.0, 4.0))
        .with_video_qualities(DynamicRange::Sdr, [VideoQuality::Hd])
        .with_image_formats(StreamConfig::MultipleStreams, [ImageFormat::Jpeg]);

    CapabilityModel::new()
        .with_lens(LensId::Back, back)
        .with_lens(LensId::Front, front)
        .with_concurrent(true)
}

/// Capability source returning a fixed model.
pub struct MockCapabilitySource {
    model: CapabilityModel,
    fail: bool,
}

impl Default for MockCapabilitySource {
    fn default() -> Self {
        Self::new(phone_capabilities())
    }
}

impl MockCapabilitySource {
    /// Serve `model`.
    #[must_use]
    pub const fn new(model: CapabilityModel) -> Self {
        Self { model, fail: false }
    }

    /// Fail every query.
    #[must_use]
    pub const fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl CapabilitySource for MockCapabilitySource {
    fn capabilities(&mut self) -> Result<CapabilityModel, CapabilityError> {
        if self.fail {
            return Err(CapabilityError::DeviceNotFound(0));
        }
        Ok(self.model.clone())
    }
}

#[derive(Default)]
struct SinkState {
    calls: Vec<String>,
    bound: bool,
    recording: bool,
    paused: bool,
    recordings: u32,
    stills: u32,
    fail_bind: Option<String>,
    fail_live: Option<String>,
    fail_still: Option<String>,
    fail_stop: Option<String>,
}

/// Capture sink recording every call. Clones share state, so a test can keep a
/// clone for inspection after handing one to the session.
#[derive(Clone, Default)]
pub struct MockCaptureSink {
    state: Arc<Mutex<SinkState>>,
}

impl MockCaptureSink {
    /// A sink that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `bind` fail.
    pub fn fail_bind(&self, message: &str) {
        self.state.lock().fail_bind = Some(message.to_owned());
    }

    /// Make `apply_live` fail.
    pub fn fail_live_updates(&self, message: &str) {
        self.state.lock().fail_live = Some(message.to_owned());
    }

    /// Make `take_still` fail.
    pub fn fail_stills(&self, message: &str) {
        self.state.lock().fail_still = Some(message.to_owned());
    }

    /// Make `stop_recording` fail.
    pub fn fail_stop(&self, message: &str) {
        self.state.lock().fail_stop = Some(message.to_owned());
    }

    /// Every call so far, in order, plus entries added with [`note`](Self::note).
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Append an entry to the call log, e.g. from a UI task.
    pub fn note(&self, entry: &str) {
        self.state.lock().calls.push(entry.to_owned());
    }

    /// Whether a pipeline is bound.
    pub fn is_bound(&self) -> bool {
        self.state.lock().bound
    }

    /// Whether a recording is running or paused.
    pub fn is_recording(&self) -> bool {
        self.state.lock().recording
    }

    /// Offer a frame to the recorder; accepted only while actively recording.
    pub fn push_frame(&self) -> bool {
        let state = self.state.lock();
        state.recording && !state.paused
    }
}

#[async_trait]
impl CaptureSink for MockCaptureSink {
    async fn bind(
        &mut self,
        _perpetual: &PerpetualSettings,
        _transient: &TransientSettings,
    ) -> Result<(), SinkFailure> {
        let mut state = self.state.lock();
        state.calls.push("bind".to_owned());
        if let Some(message) = state.fail_bind.clone() {
            return Err(SinkFailure::BindFailed(message));
        }
        state.bound = true;
        Ok(())
    }

    async fn apply_live(
        &mut self,
        field: SettingField,
        _transient: &TransientSettings,
    ) -> Result<(), SinkFailure> {
        let mut state = self.state.lock();
        state.calls.push(format!("apply_live:{field}"));
        match state.fail_live.clone() {
            Some(message) => Err(SinkFailure::LiveUpdateFailed(message)),
            None => Ok(()),
        }
    }

    async fn start_recording(
        &mut self,
        _initial: &InitialRecordingSettings,
    ) -> Result<(), SinkFailure> {
        let mut state = self.state.lock();
        state.calls.push("start_recording".to_owned());
        state.recording = true;
        state.paused = false;
        state.recordings += 1;
        Ok(())
    }

    async fn pause_recording(&mut self) -> Result<(), SinkFailure> {
        let mut state = self.state.lock();
        state.calls.push("pause_recording".to_owned());
        state.paused = true;
        Ok(())
    }

    async fn resume_recording(&mut self) -> Result<(), SinkFailure> {
        let mut state = self.state.lock();
        state.calls.push("resume_recording".to_owned());
        state.paused = false;
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<OutputDescriptor, SinkFailure> {
        let mut state = self.state.lock();
        state.calls.push("stop_recording".to_owned());
        state.recording = false;
        state.paused = false;
        if let Some(message) = state.fail_stop.clone() {
            return Err(SinkFailure::RecordingFailed(message));
        }
        Ok(OutputDescriptor {
            location: format!("mock://video/{}", state.recordings),
            duration: Duration::ZERO,
        })
    }

    async fn take_still(
        &mut self,
        transient: &TransientSettings,
    ) -> Result<StillCapture, SinkFailure> {
        let mut state = self.state.lock();
        state.calls.push("take_still".to_owned());
        if let Some(message) = state.fail_still.clone() {
            return Err(SinkFailure::CaptureFailed(message));
        }
        state.stills += 1;
        Ok(StillCapture {
            location: format!("mock://image/{}", state.stills),
            lens: transient.lens,
        })
    }

    async fn unbind(&mut self) {
        let mut state = self.state.lock();
        state.calls.push("unbind".to_owned());
        state.bound = false;
        state.recording = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_capability_model;

    #[test]
    fn test_phone_capabilities_are_consistent() {
        let model = phone_capabilities();
        assert!(validate_capability_model(&model).is_empty());
        assert_eq!(model.available_lenses.len(), 2);
    }

    #[test]
    fn test_failing_source() {
        let mut source = MockCapabilitySource::default().failing();
        assert!(source.capabilities().is_err());
    }

    #[tokio::test]
    async fn test_mock_sink_frames_follow_recording_state() {
        let mut sink = MockCaptureSink::new();
        let observer = sink.clone();
        let initial = InitialRecordingSettings {
            audio_enabled: true,
            lens: LensId::Back,
            zoom_ratios: std::collections::BTreeMap::new(),
        };

        assert!(!observer.push_frame());
        sink.start_recording(&initial).await.expect("start");
        assert!(observer.push_frame());
        sink.pause_recording().await.expect("pause");
        assert!(!observer.push_frame());
        sink.resume_recording().await.expect("resume");
        let output = sink.stop_recording().await.expect("stop");
        assert_eq!(output.location, "mock://video/1");
        assert!(!observer.push_frame());
        assert_eq!(
            observer.calls(),
            vec![
                "start_recording",
                "pause_recording",
                "resume_recording",
                "stop_recording"
            ]
        );
    }
}
