//! Desired and validated session settings.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::{
    DynamicRange, FlashMode, FrameRate, ImageFormat, LensId, StabilizationMode, StreamConfig,
    TestPattern, VideoQuality,
};
use crate::zoom::ZoomChange;

/// Which use cases the session binds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Stills and video.
    #[default]
    Standard,
    /// Video only.
    VideoOnly,
    /// Stills only.
    ImageOnly,
}

impl CaptureMode {
    /// Whether video recording is possible in this mode.
    pub const fn allows_video(self) -> bool {
        !matches!(self, Self::ImageOnly)
    }

    /// Whether still capture is possible in this mode.
    pub const fn allows_images(self) -> bool {
        !matches!(self, Self::VideoOnly)
    }
}

/// UI theme preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DarkMode {
    /// Follow the system.
    #[default]
    System,
    /// Always light.
    Light,
    /// Always dark.
    Dark,
}

/// Output aspect ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    /// 3:4 portrait.
    #[default]
    ThreeFour,
    /// 9:16 portrait.
    NineSixteen,
    /// 1:1 square.
    OneOne,
}

/// Concurrent camera request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrentCameraMode {
    /// One lens.
    #[default]
    Off,
    /// Primary and secondary lens at once.
    Dual,
}

/// Physical orientation of the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRotation {
    /// Natural orientation.
    #[default]
    Natural,
    /// Rotated 90 degrees.
    Rotated90,
    /// Rotated 180 degrees.
    Rotated180,
    /// Rotated 270 degrees.
    Rotated270,
}

/// Developer options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Show the debug overlay.
    pub overlay_enabled: bool,
    /// Replace sensor output with a test pattern.
    pub test_pattern: TestPattern,
}

/// User-intended configuration.
///
/// No invariants hold at construction; validity is only established relative to
/// a capability model by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredSettings {
    /// Capture mode.
    pub capture_mode: CaptureMode,
    /// Active lens.
    pub lens: LensId,
    /// Theme preference.
    pub dark_mode: DarkMode,
    /// Flash mode.
    pub flash_mode: FlashMode,
    /// Stream configuration.
    pub stream_config: StreamConfig,
    /// Aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// Stabilization mode.
    pub stabilization_mode: StabilizationMode,
    /// Dynamic range.
    pub dynamic_range: DynamicRange,
    /// Video quality.
    pub video_quality: VideoQuality,
    /// Zoom ratio per lens.
    pub zoom_ratios: BTreeMap<LensId, f32>,
    /// Target frame rate.
    pub target_frame_rate: FrameRate,
    /// Still image format.
    pub image_format: ImageFormat,
    /// Record audio with video.
    pub audio_enabled: bool,
    /// Device orientation.
    pub device_rotation: DeviceRotation,
    /// Concurrent camera request.
    pub concurrent_mode: ConcurrentCameraMode,
    /// Automatic recording stop in milliseconds, 0 for unlimited.
    pub max_video_duration_ms: u64,
    /// Developer options.
    pub debug: DebugSettings,
}

impl Default for DesiredSettings {
    fn default() -> Self {
        Self {
            capture_mode: CaptureMode::Standard,
            lens: LensId::Back,
            dark_mode: DarkMode::System,
            flash_mode: FlashMode::Off,
            stream_config: StreamConfig::MultipleStreams,
            aspect_ratio: AspectRatio::ThreeFour,
            stabilization_mode: StabilizationMode::Off,
            dynamic_range: DynamicRange::Sdr,
            video_quality: VideoQuality::Unspecified,
            zoom_ratios: BTreeMap::new(),
            target_frame_rate: FrameRate::AUTO,
            image_format: ImageFormat::Jpeg,
            audio_enabled: true,
            device_rotation: DeviceRotation::Natural,
            concurrent_mode: ConcurrentCameraMode::Off,
            max_video_duration_ms: 0,
            debug: DebugSettings::default(),
        }
    }
}

impl DesiredSettings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Lens pair bound in concurrent camera mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcurrentLenses {
    /// Lens shown full screen.
    pub primary: LensId,
    /// Lens shown picture-in-picture.
    pub secondary: LensId,
}

/// Settings proven consistent with a capability model.
///
/// Only the resolver constructs these from user input; [`partition`](crate::partition::partition)
/// splits them for binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedSessionSettings {
    /// Capture mode. Always `VideoOnly` when `concurrent` is set.
    pub capture_mode: CaptureMode,
    /// Active lens. Equal to the primary lens in concurrent mode.
    pub lens: LensId,
    /// Theme preference.
    pub dark_mode: DarkMode,
    /// Flash mode.
    pub flash_mode: FlashMode,
    /// Stream configuration.
    pub stream_config: StreamConfig,
    /// Aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// Stabilization mode.
    pub stabilization_mode: StabilizationMode,
    /// Dynamic range.
    pub dynamic_range: DynamicRange,
    /// Video quality.
    pub video_quality: VideoQuality,
    /// Zoom ratio per lens; always has an entry for every bound lens.
    pub zoom_ratios: BTreeMap<LensId, f32>,
    /// Target frame rate.
    pub target_frame_rate: FrameRate,
    /// Still image format.
    pub image_format: ImageFormat,
    /// Record audio with video.
    pub audio_enabled: bool,
    /// Device orientation.
    pub device_rotation: DeviceRotation,
    /// Bound lens pair in concurrent mode.
    pub concurrent: Option<ConcurrentLenses>,
    /// Automatic recording stop in milliseconds, 0 for unlimited.
    pub max_video_duration_ms: u64,
    /// Developer options.
    pub debug: DebugSettings,
}

impl ValidatedSessionSettings {
    /// Zoom ratio of `lens`, 1.0 if none is recorded.
    pub fn zoom_ratio(&self, lens: LensId) -> f32 {
        self.zoom_ratios.get(&lens).copied().unwrap_or(1.0)
    }
}

impl From<ValidatedSessionSettings> for DesiredSettings {
    fn from(settings: ValidatedSessionSettings) -> Self {
        Self {
            capture_mode: settings.capture_mode,
            lens: settings.lens,
            dark_mode: settings.dark_mode,
            flash_mode: settings.flash_mode,
            stream_config: settings.stream_config,
            aspect_ratio: settings.aspect_ratio,
            stabilization_mode: settings.stabilization_mode,
            dynamic_range: settings.dynamic_range,
            video_quality: settings.video_quality,
            zoom_ratios: settings.zoom_ratios,
            target_frame_rate: settings.target_frame_rate,
            image_format: settings.image_format,
            audio_enabled: settings.audio_enabled,
            device_rotation: settings.device_rotation,
            concurrent_mode: if settings.concurrent.is_some() {
                ConcurrentCameraMode::Dual
            } else {
                ConcurrentCameraMode::Off
            },
            max_video_duration_ms: settings.max_video_duration_ms,
            debug: settings.debug,
        }
    }
}

/// Settings that need a session rebuild to change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpetualSettings {
    /// Capture mode.
    pub capture_mode: CaptureMode,
    /// Aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// Stream configuration.
    pub stream_config: StreamConfig,
    /// Target frame rate.
    pub target_frame_rate: FrameRate,
    /// Stabilization mode.
    pub stabilization_mode: StabilizationMode,
    /// Dynamic range.
    pub dynamic_range: DynamicRange,
    /// Video quality.
    pub video_quality: VideoQuality,
    /// Still image format.
    pub image_format: ImageFormat,
    /// Bound lens pair in concurrent mode.
    pub concurrent: Option<ConcurrentLenses>,
}

/// Settings applied live to a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransientSettings {
    /// Active lens.
    pub lens: LensId,
    /// Record audio with video.
    pub audio_enabled: bool,
    /// Device orientation.
    pub device_rotation: DeviceRotation,
    /// Flash mode.
    pub flash_mode: FlashMode,
    /// Zoom ratio per lens.
    pub zoom_ratios: BTreeMap<LensId, f32>,
    /// Developer options, including the test pattern.
    pub debug: DebugSettings,
    /// Theme preference.
    pub dark_mode: DarkMode,
    /// Automatic recording stop in milliseconds, 0 for unlimited.
    pub max_video_duration_ms: u64,
}

/// Names every field of [`ValidatedSessionSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingField {
    /// Capture mode.
    CaptureMode,
    /// Aspect ratio.
    AspectRatio,
    /// Stream configuration.
    StreamConfig,
    /// Target frame rate.
    TargetFrameRate,
    /// Stabilization mode.
    StabilizationMode,
    /// Dynamic range.
    DynamicRange,
    /// Video quality.
    VideoQuality,
    /// Image format.
    ImageFormat,
    /// Concurrent lens pair.
    ConcurrentLenses,
    /// Active lens.
    Lens,
    /// Audio enabled.
    AudioEnabled,
    /// Device rotation.
    DeviceRotation,
    /// Flash mode.
    FlashMode,
    /// Zoom ratio.
    ZoomRatio,
    /// Debug settings and test pattern.
    Debug,
    /// Dark mode.
    DarkMode,
    /// Maximum video duration.
    MaxVideoDuration,
}

impl SettingField {
    /// Every field, in declaration order.
    pub const ALL: [Self; 17] = [
        Self::CaptureMode,
        Self::AspectRatio,
        Self::StreamConfig,
        Self::TargetFrameRate,
        Self::StabilizationMode,
        Self::DynamicRange,
        Self::VideoQuality,
        Self::ImageFormat,
        Self::ConcurrentLenses,
        Self::Lens,
        Self::AudioEnabled,
        Self::DeviceRotation,
        Self::FlashMode,
        Self::ZoomRatio,
        Self::Debug,
        Self::DarkMode,
        Self::MaxVideoDuration,
    ];

    /// Whether changing this field requires rebuilding the session.
    pub const fn is_perpetual(self) -> bool {
        matches!(
            self,
            Self::CaptureMode
                | Self::AspectRatio
                | Self::StreamConfig
                | Self::TargetFrameRate
                | Self::StabilizationMode
                | Self::DynamicRange
                | Self::VideoQuality
                | Self::ImageFormat
                | Self::ConcurrentLenses
        )
    }
}

impl fmt::Display for SettingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CaptureMode => "capture mode",
            Self::AspectRatio => "aspect ratio",
            Self::StreamConfig => "stream config",
            Self::TargetFrameRate => "target frame rate",
            Self::StabilizationMode => "stabilization mode",
            Self::DynamicRange => "dynamic range",
            Self::VideoQuality => "video quality",
            Self::ImageFormat => "image format",
            Self::ConcurrentLenses => "concurrent lenses",
            Self::Lens => "lens",
            Self::AudioEnabled => "audio",
            Self::DeviceRotation => "device rotation",
            Self::FlashMode => "flash mode",
            Self::ZoomRatio => "zoom ratio",
            Self::Debug => "debug settings",
            Self::DarkMode => "dark mode",
            Self::MaxVideoDuration => "max video duration",
        };
        f.write_str(name)
    }
}

/// A single-field change requested on a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsUpdate {
    /// Change the capture mode.
    CaptureMode(CaptureMode),
    /// Change the aspect ratio.
    AspectRatio(AspectRatio),
    /// Change the stream configuration.
    StreamConfig(StreamConfig),
    /// Change the target frame rate.
    TargetFrameRate(FrameRate),
    /// Change the stabilization mode.
    StabilizationMode(StabilizationMode),
    /// Change the dynamic range.
    DynamicRange(DynamicRange),
    /// Change the video quality.
    VideoQuality(VideoQuality),
    /// Change the image format.
    ImageFormat(ImageFormat),
    /// Enter or leave concurrent camera mode.
    ConcurrentMode(ConcurrentCameraMode),
    /// Switch the active lens.
    Lens(LensId),
    /// Toggle audio.
    AudioEnabled(bool),
    /// Report a new device orientation.
    DeviceRotation(DeviceRotation),
    /// Change the flash mode.
    FlashMode(FlashMode),
    /// Change a lens's zoom ratio.
    Zoom(ZoomChange),
    /// Change developer options.
    Debug(DebugSettings),
    /// Change the theme preference.
    DarkMode(DarkMode),
    /// Change the automatic recording stop.
    MaxVideoDuration(u64),
}

impl SettingsUpdate {
    /// The field this update targets.
    pub const fn field(&self) -> SettingField {
        match self {
            Self::CaptureMode(_) => SettingField::CaptureMode,
            Self::AspectRatio(_) => SettingField::AspectRatio,
            Self::StreamConfig(_) => SettingField::StreamConfig,
            Self::TargetFrameRate(_) => SettingField::TargetFrameRate,
            Self::StabilizationMode(_) => SettingField::StabilizationMode,
            Self::DynamicRange(_) => SettingField::DynamicRange,
            Self::VideoQuality(_) => SettingField::VideoQuality,
            Self::ImageFormat(_) => SettingField::ImageFormat,
            Self::ConcurrentMode(_) => SettingField::ConcurrentLenses,
            Self::Lens(_) => SettingField::Lens,
            Self::AudioEnabled(_) => SettingField::AudioEnabled,
            Self::DeviceRotation(_) => SettingField::DeviceRotation,
            Self::FlashMode(_) => SettingField::FlashMode,
            Self::Zoom(_) => SettingField::ZoomRatio,
            Self::Debug(_) => SettingField::Debug,
            Self::DarkMode(_) => SettingField::DarkMode,
            Self::MaxVideoDuration(_) => SettingField::MaxVideoDuration,
        }
    }

    /// Apply a transient update to desired settings built from the current session.
    ///
    /// Perpetual updates are ignored; callers reject them before getting here.
    pub(crate) fn apply_to(&self, desired: &mut DesiredSettings) {
        match self {
            Self::Lens(lens) => desired.lens = *lens,
            Self::AudioEnabled(enabled) => desired.audio_enabled = *enabled,
            Self::DeviceRotation(rotation) => desired.device_rotation = *rotation,
            Self::FlashMode(mode) => desired.flash_mode = *mode,
            Self::Zoom(change) => {
                let lens = change.lens.unwrap_or(desired.lens);
                let current = desired.zoom_ratios.get(&lens).copied().unwrap_or(1.0);
                desired.zoom_ratios.insert(lens, change.apply(current));
            }
            Self::Debug(debug) => desired.debug = *debug,
            Self::DarkMode(mode) => desired.dark_mode = *mode,
            Self::MaxVideoDuration(millis) => desired.max_video_duration_ms = *millis,
            Self::CaptureMode(_)
            | Self::AspectRatio(_)
            | Self::StreamConfig(_)
            | Self::TargetFrameRate(_)
            | Self::StabilizationMode(_)
            | Self::DynamicRange(_)
            | Self::VideoQuality(_)
            | Self::ImageFormat(_)
            | Self::ConcurrentMode(_) => {}
        }
    }
}
