//! Video recording state machine.
//!
//! Nested inside a running session. Pure state and timing; the session performs
//! the sink calls and commits transitions here only after the sink agrees.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::capability::LensId;
use crate::error::TransitionRejected;
use crate::settings::{CaptureMode, TransientSettings};
use crate::traits::OutputDescriptor;

/// Recording lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress.
    #[default]
    Idle,
    /// Recording.
    Recording,
    /// Recording is paused.
    Paused,
}

impl RecordingState {
    /// Whether a recording is in progress, paused or not.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Snapshot taken when a recording starts.
///
/// Later live changes do not alter it; it is what the recording reports as used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialRecordingSettings {
    /// Audio enabled at start.
    pub audio_enabled: bool,
    /// Active lens at start.
    pub lens: LensId,
    /// Zoom ratio per lens at start.
    pub zoom_ratios: BTreeMap<LensId, f32>,
}

impl InitialRecordingSettings {
    /// Snapshot the live settings.
    pub fn capture(transient: &TransientSettings) -> Self {
        Self {
            audio_enabled: transient.audio_enabled,
            lens: transient.lens,
            zoom_ratios: transient.zoom_ratios.clone(),
        }
    }
}

/// Why a successful recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStopReason {
    /// The caller stopped it.
    Manual,
    /// The maximum duration elapsed.
    MaxDurationReached,
}

/// Why a recording failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingFailure {
    /// Cooperative shutdown force-stopped the recording.
    Cancelled,
    /// The sink reported an error.
    Sink(String),
}

/// Terminal result of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordingOutcome {
    /// The recording was finalized.
    Success {
        /// Where the output went.
        output: OutputDescriptor,
        /// What the recording used.
        initial: InitialRecordingSettings,
        /// Why it stopped.
        reason: RecordingStopReason,
    },
    /// The recording did not finish cleanly.
    Failure {
        /// What went wrong.
        failure: RecordingFailure,
        /// What the recording used.
        initial: InitialRecordingSettings,
    },
}

impl RecordingOutcome {
    /// The settings snapshot taken at start.
    pub const fn initial(&self) -> &InitialRecordingSettings {
        match self {
            Self::Success { initial, .. } | Self::Failure { initial, .. } => initial,
        }
    }
}

/// Recording progress reported to the session owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordingEvent {
    /// Recording started with these settings.
    Started(InitialRecordingSettings),
    /// Recording paused.
    Paused,
    /// Recording resumed.
    Resumed,
    /// Recording ended. Emitted exactly once per started recording.
    Finalized(RecordingOutcome),
}

struct ActiveRecording {
    initial: InitialRecordingSettings,
    started_at: Instant,
    deadline: Option<Instant>,
}

/// Tracks the recording lifecycle and its automatic stop deadline.
#[derive(Default)]
pub struct RecordingStateMachine {
    state: RecordingState,
    active: Option<ActiveRecording>,
}

impl RecordingStateMachine {
    /// A machine in [`RecordingState::Idle`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub const fn state(&self) -> RecordingState {
        self.state
    }

    /// Snapshot of the active recording, if any.
    pub fn initial(&self) -> Option<&InitialRecordingSettings> {
        self.active.as_ref().map(|active| &active.initial)
    }

    /// When the active recording must stop automatically.
    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().and_then(|active| active.deadline)
    }

    /// Time since the active recording started, pauses included.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.active
            .as_ref()
            .map(|active| now.saturating_duration_since(active.started_at))
    }

    /// Check that a recording may start in `capture_mode`.
    pub fn ensure_can_start(&self, capture_mode: CaptureMode) -> Result<(), TransitionRejected> {
        self.expect(RecordingState::Idle, "start recording")?;
        if capture_mode.allows_video() {
            Ok(())
        } else {
            Err(TransitionRejected::CaptureModeUnsupportsVideo)
        }
    }

    /// Check that the recording may pause.
    pub fn ensure_can_pause(&self) -> Result<(), TransitionRejected> {
        self.expect(RecordingState::Recording, "pause recording")
    }

    /// Check that the recording may resume.
    pub fn ensure_can_resume(&self) -> Result<(), TransitionRejected> {
        self.expect(RecordingState::Paused, "resume recording")
    }

    /// Check that the recording may stop.
    pub fn ensure_can_stop(&self) -> Result<(), TransitionRejected> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(self.rejected("stop recording"))
        }
    }

    /// `Idle -> Recording`. A `max_duration_ms` of 0 means no deadline.
    pub fn start(
        &mut self,
        capture_mode: CaptureMode,
        initial: InitialRecordingSettings,
        max_duration_ms: u64,
        now: Instant,
    ) -> Result<(), TransitionRejected> {
        self.ensure_can_start(capture_mode)?;
        let deadline = (max_duration_ms > 0).then(|| now + Duration::from_millis(max_duration_ms));
        self.active = Some(ActiveRecording {
            initial,
            started_at: now,
            deadline,
        });
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// `Recording -> Paused`.
    pub fn pause(&mut self) -> Result<(), TransitionRejected> {
        self.ensure_can_pause()?;
        self.state = RecordingState::Paused;
        Ok(())
    }

    /// `Paused -> Recording`.
    pub fn resume(&mut self) -> Result<(), TransitionRejected> {
        self.ensure_can_resume()?;
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// `Recording | Paused -> Idle`. Returns the start snapshot and clears the deadline.
    pub fn stop(&mut self) -> Result<InitialRecordingSettings, TransitionRejected> {
        self.ensure_can_stop()?;
        let active = self.active.take().ok_or_else(|| self.rejected("stop recording"))?;
        self.state = RecordingState::Idle;
        Ok(active.initial)
    }

    fn expect(&self, expected: RecordingState, operation: &'static str) -> Result<(), TransitionRejected> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.rejected(operation))
        }
    }

    fn rejected(&self, operation: &'static str) -> TransitionRejected {
        TransitionRejected::InvalidStateForOperation {
            operation,
            state: format!("recording is {:?}", self.state).to_lowercase(),
        }
    }
}
