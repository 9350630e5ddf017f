//! Perpetual/transient split of validated settings.
//!
//! Rebuilding a session is expensive and visibly disruptive, so only the fields
//! a capture sink cannot reconfigure live are perpetual. See
//! [`SettingField::is_perpetual`](crate::settings::SettingField::is_perpetual) for the
//! field list.

use crate::settings::{PerpetualSettings, TransientSettings, ValidatedSessionSettings};

/// Split validated settings into the rebuild-only and live-appliable groups.
pub fn partition(settings: ValidatedSessionSettings) -> (PerpetualSettings, TransientSettings) {
    // Exhaustive destructuring: a new field fails to compile until it is placed.
    let ValidatedSessionSettings {
        capture_mode,
        lens,
        dark_mode,
        flash_mode,
        stream_config,
        aspect_ratio,
        stabilization_mode,
        dynamic_range,
        video_quality,
        zoom_ratios,
        target_frame_rate,
        image_format,
        audio_enabled,
        device_rotation,
        concurrent,
        max_video_duration_ms,
        debug,
    } = settings;

    let perpetual = PerpetualSettings {
        capture_mode,
        aspect_ratio,
        stream_config,
        target_frame_rate,
        stabilization_mode,
        dynamic_range,
        video_quality,
        image_format,
        concurrent,
    };
    let transient = TransientSettings {
        lens,
        audio_enabled,
        device_rotation,
        flash_mode,
        zoom_ratios,
        debug,
        dark_mode,
        max_video_duration_ms,
    };
    (perpetual, transient)
}

/// Inverse of [`partition`].
pub fn merge(perpetual: PerpetualSettings, transient: TransientSettings) -> ValidatedSessionSettings {
    let PerpetualSettings {
        capture_mode,
        aspect_ratio,
        stream_config,
        target_frame_rate,
        stabilization_mode,
        dynamic_range,
        video_quality,
        image_format,
        concurrent,
    } = perpetual;
    let TransientSettings {
        lens,
        audio_enabled,
        device_rotation,
        flash_mode,
        zoom_ratios,
        debug,
        dark_mode,
        max_video_duration_ms,
    } = transient;

    ValidatedSessionSettings {
        capture_mode,
        lens,
        dark_mode,
        flash_mode,
        stream_config,
        aspect_ratio,
        stabilization_mode,
        dynamic_range,
        video_quality,
        zoom_ratios,
        target_frame_rate,
        image_format,
        audio_enabled,
        device_rotation,
        concurrent,
        max_video_duration_ms,
        debug,
    }
}
