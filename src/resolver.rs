//! Settings resolution.
//!
//! Maps [`DesiredSettings`] and a [`CapabilityModel`] to [`ValidatedSessionSettings`].
//! Only a missing lens or unsupported concurrent mode fails resolution; every
//! other unsupported value is clamped to a documented default and reported as a
//! [`ClampedAdjustment`].
//!
//! Defaults that are accepted even when a lens does not list them:
//!
//! | field              | default        |
//! |--------------------|----------------|
//! | stabilization mode | `Off`          |
//! | dynamic range      | `Sdr`          |
//! | flash mode         | `Off`          |
//! | test pattern       | `Off`          |
//! | frame rate         | `FrameRate::AUTO` |
//! | video quality      | `Unspecified`  |
//!
//! Image format falls back to `Jpeg` when supported for the stream config (or when
//! nothing is known about it), otherwise to the first supported format.
//!
//! In concurrent mode a value must be supported by both lenses.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability::{
    CapabilityModel, FrameRate, ImageFormat, LensCapabilities, LensId, VideoQuality,
};
use crate::error::ConstraintViolation;
use crate::settings::{
    CaptureMode, ConcurrentCameraMode, ConcurrentLenses, DebugSettings, DesiredSettings,
    SettingField, ValidatedSessionSettings,
};
use crate::zoom::clamp_zoom_ratio;

/// A silent substitution of an unsupported value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClampedAdjustment {
    /// Field that was adjusted.
    pub field: SettingField,
    /// Value that was asked for.
    pub requested: String,
    /// Value that was applied instead.
    pub applied: String,
}

impl fmt::Display for ClampedAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.requested, self.applied)
    }
}

/// Validated settings together with every adjustment made to reach them.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The validated settings.
    pub settings: ValidatedSessionSettings,
    /// Substitutions made, in resolution order.
    pub adjustments: Vec<ClampedAdjustment>,
}

/// Resolve desired settings against a capability model.
pub fn resolve(
    desired: DesiredSettings,
    caps: &CapabilityModel,
) -> Result<ValidatedSessionSettings, ConstraintViolation> {
    let resolution = resolve_with_report(desired, caps)?;
    for adjustment in &resolution.adjustments {
        debug!(
            field = %adjustment.field,
            requested = %adjustment.requested,
            applied = %adjustment.applied,
            "Clamped unsupported setting"
        );
    }
    Ok(resolution.settings)
}

/// Resolve desired settings and report every clamped adjustment.
pub fn resolve_with_report(
    desired: DesiredSettings,
    caps: &CapabilityModel,
) -> Result<Resolution, ConstraintViolation> {
    let primary = caps
        .lens(desired.lens)
        .ok_or(ConstraintViolation::LensUnavailable(desired.lens))?;

    let concurrent = match desired.concurrent_mode {
        ConcurrentCameraMode::Off => None,
        ConcurrentCameraMode::Dual => Some(concurrent_pair(desired.lens, caps)?),
    };

    let mut bound = vec![primary];
    if let Some(pair) = concurrent {
        bound.extend(caps.lens(pair.secondary));
    }
    let supported = Supported { lenses: &bound };
    let mut report = Report::default();

    let capture_mode = if concurrent.is_some() && desired.capture_mode != CaptureMode::VideoOnly {
        report.substitute(
            SettingField::CaptureMode,
            desired.capture_mode,
            CaptureMode::VideoOnly,
        )
    } else {
        desired.capture_mode
    };

    let stabilization_mode = report.member(
        SettingField::StabilizationMode,
        desired.stabilization_mode,
        &supported.common(|c| c.supported_stabilization_modes.clone()),
    );
    let dynamic_range = report.member(
        SettingField::DynamicRange,
        desired.dynamic_range,
        &supported.common(|c| c.supported_dynamic_ranges.clone()),
    );
    let flash_mode = report.member(
        SettingField::FlashMode,
        desired.flash_mode,
        &supported.common(|c| c.supported_flash_modes.clone()),
    );
    let test_pattern = report.member(
        SettingField::Debug,
        desired.debug.test_pattern,
        &supported.common(|c| c.supported_test_patterns.clone()),
    );
    let image_format = resolve_image_format(
        &mut report,
        desired.image_format,
        &supported.common(|c| c.image_formats_for(desired.stream_config)),
    );

    let frame_rates = supported.common(|c| c.supported_fixed_frame_rates.clone());
    let frame_rate = report.member(
        SettingField::TargetFrameRate,
        desired.target_frame_rate,
        &frame_rates,
    );
    let disallowed = supported.any(|c| c.disallowed_frame_rates(stabilization_mode));
    let target_frame_rate = if disallowed.contains(&frame_rate) {
        let fallback = frame_rates
            .iter()
            .copied()
            .find(|rate| !disallowed.contains(rate))
            .unwrap_or(FrameRate::AUTO);
        if fallback == frame_rate {
            frame_rate
        } else {
            report.substitute(SettingField::TargetFrameRate, frame_rate, fallback)
        }
    } else {
        frame_rate
    };

    let zoom_ratios = resolve_zoom_ratios(&mut report, &desired, caps, concurrent);

    let video_quality = report.member(
        SettingField::VideoQuality,
        desired.video_quality,
        &supported.common(|c| c.video_qualities_for(dynamic_range)),
    );

    let settings = ValidatedSessionSettings {
        capture_mode,
        lens: desired.lens,
        dark_mode: desired.dark_mode,
        flash_mode,
        stream_config: desired.stream_config,
        aspect_ratio: desired.aspect_ratio,
        stabilization_mode,
        dynamic_range,
        video_quality,
        zoom_ratios,
        target_frame_rate,
        image_format,
        audio_enabled: desired.audio_enabled,
        device_rotation: desired.device_rotation,
        concurrent,
        max_video_duration_ms: desired.max_video_duration_ms,
        debug: DebugSettings {
            overlay_enabled: desired.debug.overlay_enabled,
            test_pattern,
        },
    };

    Ok(Resolution {
        settings,
        adjustments: report.adjustments,
    })
}

/// Pick the secondary lens for concurrent mode.
fn concurrent_pair(
    primary: LensId,
    caps: &CapabilityModel,
) -> Result<ConcurrentLenses, ConstraintViolation> {
    if !caps.concurrent_supported {
        return Err(ConstraintViolation::ConcurrentModeUnsupported);
    }
    caps.available_lenses
        .iter()
        .copied()
        .find(|lens| *lens != primary && caps.lens(*lens).is_some())
        .map(|secondary| ConcurrentLenses { primary, secondary })
        .ok_or(ConstraintViolation::ConcurrentModeUnsupported)
}

fn resolve_image_format(
    report: &mut Report,
    requested: ImageFormat,
    formats: &BTreeSet<ImageFormat>,
) -> ImageFormat {
    if formats.contains(&requested) {
        return requested;
    }
    let fallback = if formats.is_empty() || formats.contains(&ImageFormat::Jpeg) {
        ImageFormat::Jpeg
    } else {
        formats.iter().copied().next().unwrap_or(ImageFormat::Jpeg)
    };
    if fallback == requested {
        return requested;
    }
    report.substitute(SettingField::ImageFormat, requested, fallback)
}

/// Clamp the ratio of every described lens; bound lenses always get an entry.
fn resolve_zoom_ratios(
    report: &mut Report,
    desired: &DesiredSettings,
    caps: &CapabilityModel,
    concurrent: Option<ConcurrentLenses>,
) -> BTreeMap<LensId, f32> {
    let mut ratios = BTreeMap::new();

    for (lens, requested) in &desired.zoom_ratios {
        let Some(lens_caps) = caps.lens(*lens) else {
            debug!(%lens, "Dropping zoom ratio for unavailable lens");
            continue;
        };
        let applied = clamp_zoom_ratio(lens_caps, *requested);
        if applied.to_bits() != requested.to_bits() {
            report.substitute(SettingField::ZoomRatio, *requested, applied);
        }
        ratios.insert(*lens, applied);
    }

    let bound = std::iter::once(desired.lens).chain(concurrent.map(|pair| pair.secondary));
    for lens in bound {
        if let Some(lens_caps) = caps.lens(lens) {
            ratios
                .entry(lens)
                .or_insert_with(|| clamp_zoom_ratio(lens_caps, 1.0));
        }
    }

    ratios
}

/// Capability sets of the bound lenses.
struct Supported<'a> {
    lenses: &'a [&'a LensCapabilities],
}

impl Supported<'_> {
    /// Values supported by every bound lens.
    fn common<T, F>(&self, select: F) -> BTreeSet<T>
    where
        T: Ord + Clone,
        F: Fn(&LensCapabilities) -> BTreeSet<T>,
    {
        let mut sets = self.lenses.iter().map(|caps| select(caps));
        let first = sets.next().unwrap_or_default();
        sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect())
    }

    /// Values listed by any bound lens.
    fn any<T, F>(&self, select: F) -> BTreeSet<T>
    where
        T: Ord,
        F: Fn(&LensCapabilities) -> BTreeSet<T>,
    {
        self.lenses.iter().flat_map(|caps| select(caps)).collect()
    }
}

#[derive(Default)]
struct Report {
    adjustments: Vec<ClampedAdjustment>,
}

impl Report {
    /// Keep `requested` if it is the field default or supported, else fall back to the default.
    fn member<T>(&mut self, field: SettingField, requested: T, supported: &BTreeSet<T>) -> T
    where
        T: Ord + Copy + Default + fmt::Debug,
    {
        if requested == T::default() || supported.contains(&requested) {
            requested
        } else {
            self.substitute(field, requested, T::default())
        }
    }

    fn substitute<T: fmt::Debug>(&mut self, field: SettingField, requested: T, applied: T) -> T {
        self.adjustments.push(ClampedAdjustment {
            field,
            requested: format!("{requested:?}"),
            applied: format!("{applied:?}"),
        });
        applied
    }
}

/// Video qualities offerable anywhere on the device.
pub fn device_video_qualities(caps: &CapabilityModel) -> BTreeSet<VideoQuality> {
    caps.for_device(|lens| lens.supported_video_qualities.values().flatten())
}
