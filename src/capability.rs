//! Per-lens capability model.
//!
//! A [`CapabilityModel`] is an immutable snapshot of what a device and each of
//! its lenses can do. It is produced by a capability source and is read-only to
//! the rest of the crate. All sets are ordered so that every "first supported
//! value" choice made during resolution is deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a physical lens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensId {
    /// Front-facing lens.
    Front,
    /// Rear-facing lens.
    Back,
    /// Externally attached camera.
    External,
}

impl fmt::Display for LensId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Front => "front",
            Self::Back => "back",
            Self::External => "external",
        };
        f.write_str(name)
    }
}

/// Video stabilization mode.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StabilizationMode {
    /// No stabilization.
    #[default]
    Off,
    /// Let the device decide.
    Auto,
    /// Preview and recording stabilization.
    On,
    /// Recording-only high quality stabilization.
    HighQuality,
    /// Optical stabilization only.
    OpticalOnly,
}

/// Dynamic range of the video pipeline.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DynamicRange {
    /// Standard dynamic range.
    #[default]
    Sdr,
    /// 10-bit HLG.
    Hlg10,
}

/// Flash mode requested for still capture.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FlashMode {
    /// No flash.
    #[default]
    Off,
    /// Always fire.
    On,
    /// Fire when the scene is dark.
    Auto,
    /// Brighten the sensor output instead of firing a flash.
    LowLightBoost,
}

/// A light source a lens can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Illuminant {
    /// Hardware flash unit.
    FlashUnit,
    /// Full-screen brightness as a software flash.
    Screen,
    /// Low light boost processing.
    LowLightBoost,
}

/// Sensor test pattern.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TestPattern {
    /// Normal sensor output.
    #[default]
    Off,
    /// Solid color.
    SolidColor,
    /// Eight vertical color bars.
    ColorBars,
    /// Horizontal luminance gradient.
    Gradient,
    /// Pseudo-random noise.
    Pn9,
}

/// Video quality tier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    /// Let the sink choose.
    #[default]
    Unspecified,
    /// 480p.
    Sd,
    /// 720p.
    Hd,
    /// 1080p.
    Fhd,
    /// 2160p.
    Uhd,
}

/// Still image output format.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    /// Baseline JPEG.
    #[default]
    Jpeg,
    /// JPEG with an HDR gain map.
    JpegR,
    /// Uncompressed YUV.
    Yuv,
}

/// How preview, video and still streams are laid out.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StreamConfig {
    /// Separate streams per use case.
    #[default]
    MultipleStreams,
    /// One shared stream.
    SingleStream,
}

/// Fixed target frame rate in frames per second. [`FrameRate::AUTO`] lets the sink choose.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FrameRate(pub u32);

impl FrameRate {
    /// No fixed frame rate.
    pub const AUTO: Self = Self(0);

    /// Whether this is [`FrameRate::AUTO`].
    pub const fn is_auto(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_auto() {
            f.write_str("auto")
        } else {
            write!(f, "{}fps", self.0)
        }
    }
}

/// Inclusive zoom ratio range of a lens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomRange {
    /// Smallest supported ratio.
    pub min: f32,
    /// Largest supported ratio.
    pub max: f32,
}

impl ZoomRange {
    /// Create a range, or `None` if the bounds are not finite or `min > max`.
    pub fn new(min: f32, max: f32) -> Option<Self> {
        let range = Self { min, max };
        range.is_valid().then_some(range)
    }

    /// Whether both bounds are finite and ordered.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    /// Clamp `ratio` into the range. NaN is treated as 1.0.
    pub fn clamp(&self, ratio: f32) -> f32 {
        let ratio = if ratio.is_nan() { 1.0 } else { ratio };
        ratio.max(self.min).min(self.max)
    }
}

/// What a single lens supports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensCapabilities {
    /// Supported stabilization modes.
    pub supported_stabilization_modes: BTreeSet<StabilizationMode>,
    /// Supported fixed frame rates.
    pub supported_fixed_frame_rates: BTreeSet<FrameRate>,
    /// Supported dynamic ranges.
    pub supported_dynamic_ranges: BTreeSet<DynamicRange>,
    /// Supported flash modes.
    pub supported_flash_modes: BTreeSet<FlashMode>,
    /// Available illuminants.
    pub supported_illuminants: BTreeSet<Illuminant>,
    /// Supported sensor test patterns.
    pub supported_test_patterns: BTreeSet<TestPattern>,
    /// Zoom ratio range, `None` if zoom is unsupported.
    pub zoom_range: Option<ZoomRange>,
    /// Video qualities available per dynamic range.
    pub supported_video_qualities: BTreeMap<DynamicRange, BTreeSet<VideoQuality>>,
    /// Image formats available per stream configuration.
    pub supported_image_formats: BTreeMap<StreamConfig, BTreeSet<ImageFormat>>,
    /// Frame rates that cannot be combined with a stabilization mode.
    ///
    /// A blocklist: a missing entry means no known restriction.
    pub unsupported_stabilization_fps: BTreeMap<StabilizationMode, BTreeSet<FrameRate>>,
}

impl LensCapabilities {
    /// Set the supported stabilization modes.
    #[must_use]
    pub fn with_stabilization_modes<I>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = StabilizationMode>,
    {
        self.supported_stabilization_modes = modes.into_iter().collect();
        self
    }

    /// Set the supported fixed frame rates.
    #[must_use]
    pub fn with_frame_rates<I>(mut self, rates: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        self.supported_fixed_frame_rates = rates.into_iter().map(FrameRate).collect();
        self
    }

    /// Set the supported dynamic ranges.
    #[must_use]
    pub fn with_dynamic_ranges<I>(mut self, ranges: I) -> Self
    where
        I: IntoIterator<Item = DynamicRange>,
    {
        self.supported_dynamic_ranges = ranges.into_iter().collect();
        self
    }

    /// Set the supported flash modes.
    #[must_use]
    pub fn with_flash_modes<I>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = FlashMode>,
    {
        self.supported_flash_modes = modes.into_iter().collect();
        self
    }

    /// Set the available illuminants.
    #[must_use]
    pub fn with_illuminants<I>(mut self, illuminants: I) -> Self
    where
        I: IntoIterator<Item = Illuminant>,
    {
        self.supported_illuminants = illuminants.into_iter().collect();
        self
    }

    /// Set the supported test patterns.
    #[must_use]
    pub fn with_test_patterns<I>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = TestPattern>,
    {
        self.supported_test_patterns = patterns.into_iter().collect();
        self
    }

    /// Set the zoom range.
    #[must_use]
    pub fn with_zoom_range(mut self, range: Option<ZoomRange>) -> Self {
        self.zoom_range = range;
        self
    }

    /// Set the video qualities available for a dynamic range.
    #[must_use]
    pub fn with_video_qualities<I>(mut self, range: DynamicRange, qualities: I) -> Self
    where
        I: IntoIterator<Item = VideoQuality>,
    {
        self.supported_video_qualities
            .insert(range, qualities.into_iter().collect());
        self
    }

    /// Set the image formats available for a stream configuration.
    #[must_use]
    pub fn with_image_formats<I>(mut self, config: StreamConfig, formats: I) -> Self
    where
        I: IntoIterator<Item = ImageFormat>,
    {
        self.supported_image_formats
            .insert(config, formats.into_iter().collect());
        self
    }

    /// Disallow frame rates while a stabilization mode is active.
    #[must_use]
    pub fn with_unsupported_stabilization_fps<I>(mut self, mode: StabilizationMode, rates: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        self.unsupported_stabilization_fps
            .insert(mode, rates.into_iter().map(FrameRate).collect());
        self
    }

    /// Zoom range if present and well formed.
    pub fn valid_zoom_range(&self) -> Option<ZoomRange> {
        self.zoom_range.filter(ZoomRange::is_valid)
    }

    /// Image formats for `config`, empty if the configuration is unknown.
    pub fn image_formats_for(&self, config: StreamConfig) -> BTreeSet<ImageFormat> {
        self.supported_image_formats
            .get(&config)
            .cloned()
            .unwrap_or_default()
    }

    /// Video qualities for `range`, empty if the range is unknown.
    pub fn video_qualities_for(&self, range: DynamicRange) -> BTreeSet<VideoQuality> {
        self.supported_video_qualities
            .get(&range)
            .cloned()
            .unwrap_or_default()
    }

    /// Frame rates disallowed with `mode`.
    pub fn disallowed_frame_rates(&self, mode: StabilizationMode) -> BTreeSet<FrameRate> {
        self.unsupported_stabilization_fps
            .get(&mode)
            .cloned()
            .unwrap_or_default()
    }
}

/// What a device can do, per lens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityModel {
    /// Lenses that can be opened.
    pub available_lenses: BTreeSet<LensId>,
    /// Whether two lenses can stream at the same time.
    pub concurrent_supported: bool,
    /// Capabilities keyed by lens.
    pub per_lens: BTreeMap<LensId, LensCapabilities>,
}

impl CapabilityModel {
    /// Create an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lens and mark it available.
    #[must_use]
    pub fn with_lens(mut self, lens: LensId, capabilities: LensCapabilities) -> Self {
        self.available_lenses.insert(lens);
        self.per_lens.insert(lens, capabilities);
        self
    }

    /// Set concurrent camera support.
    #[must_use]
    pub fn with_concurrent(mut self, supported: bool) -> Self {
        self.concurrent_supported = supported;
        self
    }

    /// Capabilities of `lens` if it is both available and described.
    pub fn lens(&self, lens: LensId) -> Option<&LensCapabilities> {
        if self.available_lenses.contains(&lens) {
            self.per_lens.get(&lens)
        } else {
            None
        }
    }

    /// Union of a capability field across every lens in `per_lens`.
    ///
    /// Answers "is this value offerable anywhere on the device", independent of
    /// which lens is active.
    pub fn for_device<'a, T, I, F>(&'a self, selector: F) -> BTreeSet<T>
    where
        T: Ord + Clone + 'a,
        I: IntoIterator<Item = &'a T>,
        F: Fn(&'a LensCapabilities) -> I,
    {
        self.per_lens
            .values()
            .flat_map(selector)
            .cloned()
            .collect()
    }
}
