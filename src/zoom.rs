//! Zoom ratio changes.
//!
//! Zoom is always live: a [`ZoomChange`] travels the transient update path as
//! [`SettingsUpdate::Zoom`](crate::settings::SettingsUpdate::Zoom) and is clamped
//! into the target lens's range by the resolver.

use crate::capability::{LensCapabilities, LensId};

/// How a zoom change relates to the current ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomChangeKind {
    /// Set the ratio outright.
    Absolute(f32),
    /// Multiply the current ratio, e.g. from a pinch gesture.
    Scale(f32),
    /// Add to the current ratio.
    Increment(f32),
}

/// A zoom change for one lens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomChange {
    /// Target lens; `None` means the active lens.
    pub lens: Option<LensId>,
    /// The change itself.
    pub kind: ZoomChangeKind,
}

impl ZoomChange {
    /// Set the active lens's ratio.
    pub const fn absolute(ratio: f32) -> Self {
        Self {
            lens: None,
            kind: ZoomChangeKind::Absolute(ratio),
        }
    }

    /// Scale the active lens's ratio.
    pub const fn scale(factor: f32) -> Self {
        Self {
            lens: None,
            kind: ZoomChangeKind::Scale(factor),
        }
    }

    /// Increment the active lens's ratio.
    pub const fn increment(delta: f32) -> Self {
        Self {
            lens: None,
            kind: ZoomChangeKind::Increment(delta),
        }
    }

    /// Target a specific lens instead of the active one.
    #[must_use]
    pub const fn for_lens(mut self, lens: LensId) -> Self {
        self.lens = Some(lens);
        self
    }

    /// The unclamped ratio this change produces from `current`.
    pub fn apply(&self, current: f32) -> f32 {
        match self.kind {
            ZoomChangeKind::Absolute(ratio) => ratio,
            ZoomChangeKind::Scale(factor) => current * factor,
            ZoomChangeKind::Increment(delta) => current + delta,
        }
    }
}

/// Clamp `ratio` for a lens. Lenses without a usable zoom range stay at 1.0.
pub fn clamp_zoom_ratio(capabilities: &LensCapabilities, ratio: f32) -> f32 {
    capabilities
        .valid_zoom_range()
        .map_or(1.0, |range| range.clamp(ratio))
}
