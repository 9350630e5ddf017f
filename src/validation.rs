//! Capability model consistency checks.
//!
//! Capability models come from outside the crate and may be sloppy. These checks
//! report inconsistencies without rejecting the model; resolution stays total
//! regardless, and callers log the issues.

use std::fmt;

use crate::capability::{CapabilityModel, FrameRate, LensId, StabilizationMode};

/// One inconsistency found in a capability model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityIssue {
    /// A lens is listed as available but has no capability entry.
    MissingLensCapabilities(LensId),
    /// A capability entry exists for a lens that is not available.
    UnavailableLensDescribed(LensId),
    /// The zoom range is inverted or not finite; zoom is treated as unsupported.
    InvalidZoomRange(LensId),
    /// A frame rate is disallowed for a stabilization mode but never offered.
    DisallowedRateNotOffered {
        /// Lens owning the entry.
        lens: LensId,
        /// Stabilization mode of the entry.
        mode: StabilizationMode,
        /// The rate that is not in the supported set.
        rate: FrameRate,
    },
}

impl fmt::Display for CapabilityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLensCapabilities(lens) => {
                write!(f, "lens {lens} is available but has no capabilities")
            }
            Self::UnavailableLensDescribed(lens) => {
                write!(f, "lens {lens} has capabilities but is not available")
            }
            Self::InvalidZoomRange(lens) => write!(f, "lens {lens} has an invalid zoom range"),
            Self::DisallowedRateNotOffered { lens, mode, rate } => write!(
                f,
                "lens {lens} disallows {rate} with {mode:?} stabilization but never offers it"
            ),
        }
    }
}

/// Check a capability model for internal inconsistencies.
///
/// # Returns
///
/// Every issue found, in lens order. An empty vector means the model is consistent.
pub fn validate_capability_model(model: &CapabilityModel) -> Vec<CapabilityIssue> {
    let mut issues = Vec::new();

    for lens in &model.available_lenses {
        if !model.per_lens.contains_key(lens) {
            issues.push(CapabilityIssue::MissingLensCapabilities(*lens));
        }
    }

    for (lens, caps) in &model.per_lens {
        if !model.available_lenses.contains(lens) {
            issues.push(CapabilityIssue::UnavailableLensDescribed(*lens));
        }

        if caps.zoom_range.is_some() && caps.valid_zoom_range().is_none() {
            issues.push(CapabilityIssue::InvalidZoomRange(*lens));
        }

        for (mode, rates) in &caps.unsupported_stabilization_fps {
            for rate in rates {
                if !caps.supported_fixed_frame_rates.contains(rate) {
                    issues.push(CapabilityIssue::DisallowedRateNotOffered {
                        lens: *lens,
                        mode: *mode,
                        rate: *rate,
                    });
                }
            }
        }
    }

    issues
}
