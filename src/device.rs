//! Capability sources backed by a capability file or V4L2 devices.
//!
//! V4L2 reports pixel formats, frame sizes and frame intervals. Those map onto
//! image formats, video qualities and fixed frame rates; everything V4L2 cannot
//! describe (stabilization, flash, HDR, zoom) is left at its always-allowed
//! default.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::capability::{
    CapabilityModel, DynamicRange, FlashMode, ImageFormat, LensCapabilities, StabilizationMode,
    StreamConfig, VideoQuality,
};
use crate::error::CapabilityError;
use crate::traits::CapabilitySource;

/// One pixel format at one frame size, with the rates the driver offers for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMode {
    /// Pixel format code, e.g. `*b"MJPG"`.
    pub fourcc: [u8; 4],
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Whole frame rates offered at this size.
    pub frame_rates: Vec<u32>,
}

/// Image format produced by a pixel format, if it is one stills can use.
pub fn image_format_for(fourcc: [u8; 4]) -> Option<ImageFormat> {
    match &fourcc {
        b"MJPG" | b"JPEG" => Some(ImageFormat::Jpeg),
        b"YUYV" | b"NV12" | b"YU12" | b"UYVY" => Some(ImageFormat::Yuv),
        _ => None,
    }
}

/// Quality class of a frame height.
pub const fn video_quality_for(height: u32) -> Option<VideoQuality> {
    match height {
        2160.. => Some(VideoQuality::Uhd),
        1080.. => Some(VideoQuality::Fhd),
        720.. => Some(VideoQuality::Hd),
        480.. => Some(VideoQuality::Sd),
        _ => None,
    }
}

/// Whole frames per second for an interval of `numerator / denominator` seconds.
pub fn frame_rate_for(numerator: u32, denominator: u32) -> Option<u32> {
    if numerator == 0 || denominator == 0 {
        return None;
    }
    let rate = denominator.saturating_add(numerator / 2) / numerator;
    (rate > 0).then_some(rate)
}

/// Build lens capabilities from the modes a device enumerates.
///
/// A single-planar V4L2 node streams one format at a time, so image formats
/// are reported for [`StreamConfig::SingleStream`] only.
pub fn lens_capabilities_from_modes(modes: &[DeviceMode]) -> LensCapabilities {
    let frame_rates: BTreeSet<u32> = modes
        .iter()
        .flat_map(|mode| mode.frame_rates.iter().copied())
        .collect();
    let qualities: BTreeSet<VideoQuality> = modes
        .iter()
        .filter_map(|mode| video_quality_for(mode.height))
        .collect();
    let formats: BTreeSet<ImageFormat> = modes
        .iter()
        .filter_map(|mode| image_format_for(mode.fourcc))
        .collect();

    LensCapabilities::default()
        .with_stabilization_modes([StabilizationMode::Off])
        .with_dynamic_ranges([DynamicRange::Sdr])
        .with_flash_modes([FlashMode::Off])
        .with_frame_rates(frame_rates)
        .with_video_qualities(DynamicRange::Sdr, qualities)
        .with_image_formats(StreamConfig::SingleStream, formats)
}

/// Reads a JSON-encoded capability model from disk on every query.
#[derive(Debug, Clone)]
pub struct JsonCapabilitySource {
    path: PathBuf,
}

impl JsonCapabilitySource {
    /// Serve the model stored at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl CapabilitySource for JsonCapabilitySource {
    fn capabilities(&mut self) -> Result<CapabilityModel, CapabilityError> {
        let contents = fs::read_to_string(&self.path)?;
        let model = serde_json::from_str(&contents)?;
        debug!(path = %self.path.display(), "Loaded capability model");
        Ok(model)
    }
}

#[cfg(feature = "v4l2")]
pub use self::v4l2::V4L2CapabilitySource;

#[cfg(feature = "v4l2")]
mod v4l2 {
    use std::collections::BTreeMap;

    use tracing::{debug, info};
    use v4l::frameinterval::FrameIntervalEnum;
    use v4l::framesize::FrameSizeEnum;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    use super::{frame_rate_for, lens_capabilities_from_modes, DeviceMode};
    use crate::capability::{CapabilityModel, LensId};
    use crate::error::CapabilityError;
    use crate::traits::CapabilitySource;

    /// Frame rates probed inside a stepwise interval range.
    const STEPWISE_PROBE_RATES: [u32; 5] = [15, 24, 25, 30, 60];

    /// Derives a capability model from V4L2 capture devices, one device per lens.
    #[derive(Debug, Clone, Default)]
    pub struct V4L2CapabilitySource {
        devices: BTreeMap<LensId, usize>,
    }

    impl V4L2CapabilitySource {
        /// A source with no devices.
        pub fn new() -> Self {
            Self::default()
        }

        /// Describe `lens` with the device at `/dev/video{index}`.
        #[must_use]
        pub fn with_device(mut self, lens: LensId, index: usize) -> Self {
            self.devices.insert(lens, index);
            self
        }

        /// Enumerate every format, size and interval of one device.
        ///
        /// # Arguments
        ///
        /// * `index` - Device index (e.g., 0 for /dev/video0)
        pub fn enumerate_modes(index: usize) -> Result<Vec<DeviceMode>, CapabilityError> {
            let device = Device::new(index).map_err(|err| CapabilityError::DeviceOpenFailed {
                index,
                message: err.to_string(),
            })?;

            let caps = device
                .query_caps()
                .map_err(|err| CapabilityError::DeviceOpenFailed {
                    index,
                    message: err.to_string(),
                })?;
            if !caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
                return Err(CapabilityError::NotACaptureDevice(index));
            }
            debug!(index, card = %caps.card, driver = %caps.driver, "Enumerating device");

            let mut modes = Vec::new();
            for format in Capture::enum_formats(&device)? {
                for (width, height) in frame_sizes(&device, format.fourcc)? {
                    let frame_rates = frame_rates(&device, format.fourcc, width, height)?;
                    modes.push(DeviceMode {
                        fourcc: format.fourcc.repr,
                        width,
                        height,
                        frame_rates,
                    });
                }
            }
            Ok(modes)
        }
    }

    impl CapabilitySource for V4L2CapabilitySource {
        fn capabilities(&mut self) -> Result<CapabilityModel, CapabilityError> {
            let mut model = CapabilityModel::new().with_concurrent(self.devices.len() > 1);
            for (&lens, &index) in &self.devices {
                let modes = Self::enumerate_modes(index)?;
                info!(%lens, index, modes = modes.len(), "Described lens from V4L2 device");
                model = model.with_lens(lens, lens_capabilities_from_modes(&modes));
            }
            Ok(model)
        }
    }

    fn frame_sizes(device: &Device, fourcc: FourCC) -> Result<Vec<(u32, u32)>, CapabilityError> {
        let mut sizes = Vec::new();
        for size in Capture::enum_framesizes(device, fourcc)? {
            match size.size {
                FrameSizeEnum::Discrete(discrete) => sizes.push((discrete.width, discrete.height)),
                // Only the bounds matter for quality classes.
                FrameSizeEnum::Stepwise(stepwise) => {
                    sizes.push((stepwise.min_width, stepwise.min_height));
                    sizes.push((stepwise.max_width, stepwise.max_height));
                }
            }
        }
        Ok(sizes)
    }

    fn frame_rates(
        device: &Device,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> Result<Vec<u32>, CapabilityError> {
        let mut rates = Vec::new();
        for interval in Capture::enum_frameintervals(device, fourcc, width, height)? {
            match interval.interval {
                FrameIntervalEnum::Discrete(fraction) => {
                    rates.extend(frame_rate_for(fraction.numerator, fraction.denominator));
                }
                FrameIntervalEnum::Stepwise(stepwise) => {
                    // The longest interval is the slowest rate.
                    let slowest = frame_rate_for(stepwise.max.numerator, stepwise.max.denominator);
                    let fastest = frame_rate_for(stepwise.min.numerator, stepwise.min.denominator);
                    if let (Some(slowest), Some(fastest)) = (slowest, fastest) {
                        rates.extend(
                            STEPWISE_PROBE_RATES
                                .iter()
                                .copied()
                                .filter(|rate| (slowest..=fastest).contains(rate)),
                        );
                    }
                }
            }
        }
        Ok(rates)
    }
}
