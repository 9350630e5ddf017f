//! Lens-Session: capability-constrained camera session control
//!
//! This library resolves desired camera settings against a per-lens capability
//! model, splits the result into settings that need a rebuild and settings that
//! apply live, and drives the session and recording lifecycle against an
//! abstract capture sink. Hardware stays behind the traits in [`traits`], so the
//! whole core runs against mocks in tests.

pub mod capability;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod flash;
pub mod partition;
pub mod recording;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod traits;
pub mod validation;
pub mod zoom;

#[cfg(test)]
pub mod mock;

pub use capability::{CapabilityModel, LensCapabilities, LensId};
pub use config::SessionConfig;
pub use controller::{spawn, SessionHandle};
pub use error::{Result, SessionError};
pub use resolver::{resolve, resolve_with_report};
pub use session::{SessionEvent, SessionSnapshot, SessionState, SessionStateMachine};
pub use settings::{DesiredSettings, SettingsUpdate, ValidatedSessionSettings};
pub use traits::{CapabilitySource, CaptureSink};
