//! Session lifecycle state machine.
//!
//! Owns the validated settings, the nested recording machine and the capture
//! sink. Every command runs to completion before the next one starts; the
//! [`controller`](crate::controller) module provides the queue that enforces this.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::CapabilityModel;
use crate::config::SessionConfig;
use crate::error::{ConstraintViolation, Result, SessionError, TransitionRejected};
use crate::flash::{
    flash_behavior, screen_flash_channel, FlashBehavior, ScreenFlashKind, ScreenFlashReceiver,
    ScreenFlashSender,
};
use crate::partition::{merge, partition};
use crate::recording::{
    InitialRecordingSettings, RecordingEvent, RecordingFailure, RecordingOutcome, RecordingState,
    RecordingStateMachine, RecordingStopReason,
};
use crate::resolver::{resolve_with_report, ClampedAdjustment};
use crate::settings::{
    DesiredSettings, PerpetualSettings, SettingsUpdate, TransientSettings,
    ValidatedSessionSettings,
};
use crate::traits::{CapabilitySource, CaptureSink, StillCapture};
use crate::validation::validate_capability_model;

/// Why a session ended up in [`SessionState::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFailure {
    /// The desired settings cannot run on this device.
    #[error(transparent)]
    Constraint(ConstraintViolation),
    /// The capability source could not be queried.
    #[error("capability query failed: {0}")]
    CapabilityQuery(String),
    /// The sink refused to bind the settings.
    #[error("bind failed: {0}")]
    BindFailed(String),
    /// An external fatal error was reported.
    #[error("fatal error: {0}")]
    Fatal(String),
}

/// Session lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing configured yet.
    #[default]
    Uninitialized,
    /// Querying capabilities and resolving settings.
    Initializing,
    /// Settings resolved, not bound.
    Ready,
    /// Bound to the sink.
    Running,
    /// Released. Terminal.
    Closed,
    /// Failed. Only a fresh `initialize` leaves this state.
    Error(SessionFailure),
}

impl SessionState {
    /// Whether no further commands except `initialize` (from `Error`) are accepted.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Initializing => f.write_str("initializing"),
            Self::Ready => f.write_str("ready"),
            Self::Running => f.write_str("running"),
            Self::Closed => f.write_str("closed"),
            Self::Error(reason) => write!(f, "error ({reason})"),
        }
    }
}

/// Event published to the session owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged(SessionState),
    /// Recording progress.
    Recording(RecordingEvent),
    /// A still image was captured.
    StillCaptured(StillCapture),
    /// Resolution substituted unsupported values.
    SettingsAdjusted(Vec<ClampedAdjustment>),
}

/// Read-only view of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Current validated settings, once initialized.
    pub settings: Option<ValidatedSessionSettings>,
    /// Recording state.
    pub recording: RecordingState,
    /// Start snapshot of the active recording.
    pub initial_recording: Option<InitialRecordingSettings>,
    /// Substitutions made by the last resolution.
    pub adjustments: Vec<ClampedAdjustment>,
    /// Whether the sink has a bound pipeline to present.
    pub surface_available: bool,
}

/// Receiving ends handed to the presentation layer.
#[derive(Debug)]
pub struct SessionChannels {
    /// Session events in the order they happened.
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    /// Screen flash requests.
    pub screen_flash: ScreenFlashReceiver,
}

#[derive(Clone, Copy)]
enum StopCause {
    Manual,
    MaxDuration,
    Cancelled,
}

struct Configured {
    caps: CapabilityModel,
    perpetual: PerpetualSettings,
    transient: TransientSettings,
}

/// Drives one capture session against a capability source and a capture sink.
pub struct SessionStateMachine<C, S> {
    source: C,
    sink: S,
    config: SessionConfig,
    state: SessionState,
    configured: Option<Configured>,
    adjustments: Vec<ClampedAdjustment>,
    recording: RecordingStateMachine,
    bound: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
    screen_flash: ScreenFlashSender,
    cancel: CancellationToken,
}

impl<C: CapabilitySource, S: CaptureSink> SessionStateMachine<C, S> {
    /// Create an uninitialized session.
    ///
    /// # Returns
    ///
    /// The machine and the channels its owner listens on.
    pub fn new(source: C, sink: S, config: SessionConfig) -> (Self, SessionChannels) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (screen_flash, screen_flash_rx) = screen_flash_channel();
        let machine = Self {
            source,
            sink,
            config,
            state: SessionState::Uninitialized,
            configured: None,
            adjustments: Vec::new(),
            recording: RecordingStateMachine::new(),
            bound: false,
            events,
            screen_flash,
            cancel: CancellationToken::new(),
        };
        let channels = SessionChannels {
            events: events_rx,
            screen_flash: screen_flash_rx,
        };
        (machine, channels)
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current recording state.
    pub const fn recording_state(&self) -> RecordingState {
        self.recording.state()
    }

    /// Capability model queried by the last `initialize`.
    pub fn capabilities(&self) -> Option<&CapabilityModel> {
        self.configured.as_ref().map(|configured| &configured.caps)
    }

    /// Runtime configuration.
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Token that interrupts in-flight flash cycles when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// When the active recording must stop automatically.
    pub fn recording_deadline(&self) -> Option<Instant> {
        self.recording.deadline()
    }

    /// Read-only view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            settings: self
                .configured
                .as_ref()
                .map(|configured| merge(configured.perpetual.clone(), configured.transient.clone())),
            recording: self.recording.state(),
            initial_recording: self.recording.initial().cloned(),
            adjustments: self.adjustments.clone(),
            surface_available: self.bound,
        }
    }

    /// Query capabilities, resolve `desired` and move to `Ready`.
    ///
    /// Allowed from every state except `Initializing` and `Closed`, and not
    /// while recording. A running session is unbound first.
    ///
    /// # Errors
    ///
    /// Returns the capability or constraint failure, after moving to `Error`.
    pub async fn initialize(&mut self, desired: DesiredSettings) -> Result<()> {
        if matches!(self.state, SessionState::Initializing | SessionState::Closed) {
            return Err(self.rejected("initialize").into());
        }
        if self.recording.state().is_active() {
            return Err(TransitionRejected::InvalidStateForOperation {
                operation: "initialize",
                state: "recording is active".to_owned(),
            }
            .into());
        }

        self.release_binding().await;
        self.configured = None;
        self.adjustments.clear();
        self.set_state(SessionState::Initializing);

        let caps = match self.source.capabilities() {
            Ok(caps) => caps,
            Err(err) => {
                warn!(error = %err, "Capability query failed");
                self.set_state(SessionState::Error(SessionFailure::CapabilityQuery(
                    err.to_string(),
                )));
                return Err(err.into());
            }
        };
        for issue in validate_capability_model(&caps) {
            warn!(%issue, "Inconsistent capability model");
        }

        let resolution = match resolve_with_report(desired, &caps) {
            Ok(resolution) => resolution,
            Err(violation) => {
                warn!(%violation, "Desired settings cannot run on this device");
                self.set_state(SessionState::Error(SessionFailure::Constraint(
                    violation.clone(),
                )));
                return Err(violation.into());
            }
        };
        for adjustment in &resolution.adjustments {
            debug!(%adjustment, "Clamped unsupported setting");
        }

        let (perpetual, transient) = partition(resolution.settings);
        info!(
            lens = %transient.lens,
            capture_mode = ?perpetual.capture_mode,
            frame_rate = %perpetual.target_frame_rate,
            concurrent = perpetual.concurrent.is_some(),
            "Session settings resolved"
        );
        self.configured = Some(Configured {
            caps,
            perpetual,
            transient,
        });
        if !resolution.adjustments.is_empty() {
            self.emit(SessionEvent::SettingsAdjusted(resolution.adjustments.clone()));
        }
        self.adjustments = resolution.adjustments;
        self.set_state(SessionState::Ready);
        Ok(())
    }

    /// Bind the resolved settings and move to `Running`.
    ///
    /// # Errors
    ///
    /// Rejected outside `Ready`. A sink bind failure moves to `Error`.
    pub async fn run(&mut self) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(self.rejected("run").into());
        }
        let Some(configured) = &self.configured else {
            return Err(self.rejected("run").into());
        };

        match self
            .sink
            .bind(&configured.perpetual, &configured.transient)
            .await
        {
            Ok(()) => {
                self.bound = true;
                self.set_state(SessionState::Running);
                Ok(())
            }
            Err(failure) => {
                warn!(%failure, "Sink refused the session");
                self.set_state(SessionState::Error(SessionFailure::BindFailed(
                    failure.to_string(),
                )));
                Err(failure.into())
            }
        }
    }

    /// Apply a transient change to the running session.
    ///
    /// # Errors
    ///
    /// Perpetual fields are rejected with `RequiresRebuild`; a lens switch in
    /// concurrent mode with `LensSwitchDuringConcurrent`; a lens switch that
    /// would change perpetual settings with `RequiresRebuild(Lens)`. Sink
    /// failures leave the settings unchanged.
    pub async fn apply_transient(&mut self, update: SettingsUpdate) -> Result<()> {
        self.ensure_running("apply settings")?;
        let field = update.field();
        if field.is_perpetual() {
            return Err(TransitionRejected::RequiresRebuild(field).into());
        }
        let Some(configured) = &self.configured else {
            return Err(self.rejected("apply settings").into());
        };

        match &update {
            SettingsUpdate::Lens(_) if configured.perpetual.concurrent.is_some() => {
                return Err(TransitionRejected::LensSwitchDuringConcurrent.into());
            }
            SettingsUpdate::Zoom(change) => {
                if let Some(lens) = change.lens {
                    if configured.caps.lens(lens).is_none() {
                        return Err(ConstraintViolation::LensUnavailable(lens).into());
                    }
                }
            }
            _ => {}
        }

        let mut desired = DesiredSettings::from(merge(
            configured.perpetual.clone(),
            configured.transient.clone(),
        ));
        update.apply_to(&mut desired);
        let resolution = resolve_with_report(desired, &configured.caps)?;
        let (perpetual, transient) = partition(resolution.settings);

        if perpetual != configured.perpetual {
            debug!(%field, "Update would change perpetual settings");
            return Err(TransitionRejected::RequiresRebuild(field).into());
        }
        if transient == configured.transient {
            debug!(%field, "Update is already in effect");
            return Ok(());
        }

        if let Err(failure) = self.sink.apply_live(field, &transient).await {
            warn!(%field, %failure, "Live update failed");
            return Err(failure.into());
        }

        debug!(%field, "Applied live update");
        if let Some(configured) = &mut self.configured {
            configured.transient = transient;
        }
        if !resolution.adjustments.is_empty() {
            self.emit(SessionEvent::SettingsAdjusted(resolution.adjustments));
        }
        Ok(())
    }

    /// Capture a still image, running a screen flash cycle when the lens needs one.
    ///
    /// # Errors
    ///
    /// Rejected outside `Running` or in a video-only capture mode. Sink failures,
    /// flash acknowledgement timeouts and cancellation leave the session running.
    pub async fn take_still(&mut self) -> Result<StillCapture> {
        self.ensure_running("take still")?;
        let Some(configured) = &self.configured else {
            return Err(self.rejected("take still").into());
        };
        if !configured.perpetual.capture_mode.allows_images() {
            return Err(TransitionRejected::CaptureModeUnsupportsImage.into());
        }

        let transient = configured.transient.clone();
        let illuminants = configured
            .caps
            .lens(transient.lens)
            .map(|lens| lens.supported_illuminants.clone())
            .unwrap_or_default();
        let behavior = flash_behavior(transient.flash_mode, &illuminants);
        debug!(lens = %transient.lens, ?behavior, "Taking still");

        let result = match behavior {
            FlashBehavior::Screen => self.capture_with_screen_flash(&transient).await,
            FlashBehavior::None | FlashBehavior::FlashUnit => self
                .sink
                .take_still(&transient)
                .await
                .map_err(SessionError::from),
        };

        match result {
            Ok(still) => {
                info!(location = %still.location, lens = %still.lens, "Still captured");
                self.emit(SessionEvent::StillCaptured(still.clone()));
                Ok(still)
            }
            Err(err) => {
                warn!(error = %err, "Still capture failed");
                Err(err)
            }
        }
    }

    async fn capture_with_screen_flash(
        &mut self,
        transient: &TransientSettings,
    ) -> Result<StillCapture> {
        let timeout = self.config.screen_flash_timeout();
        let cancel = self.cancel.clone();

        if let Err(err) = self.flash_step(ScreenFlashKind::ApplyUi, timeout).await {
            self.screen_flash.clear_detached(timeout);
            return Err(err);
        }

        let captured = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SessionError::Cancelled),
            still = self.sink.take_still(transient) => still.map_err(SessionError::from),
        };
        let still = match captured {
            Ok(still) => still,
            Err(err) => {
                self.screen_flash.clear_detached(timeout);
                return Err(err);
            }
        };

        if let Err(err) = self.flash_step(ScreenFlashKind::ClearUi, timeout).await {
            self.screen_flash.clear_detached(timeout);
            return Err(err);
        }
        Ok(still)
    }

    /// Signal one half of a flash cycle. A recording that reaches its maximum
    /// duration during the wait is stopped on time.
    async fn flash_step(&mut self, kind: ScreenFlashKind, timeout: Duration) -> Result<()> {
        let flash = self.screen_flash.clone();
        let cancel = self.cancel.clone();
        let signal = flash.signal(kind, &cancel, timeout);
        tokio::pin!(signal);

        loop {
            let deadline = self.recording_deadline();
            tokio::select! {
                biased;
                result = &mut signal => return result,
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire_recording().await;
                }
            }
        }
    }

    /// Start recording with a snapshot of the live settings.
    ///
    /// # Errors
    ///
    /// Rejected outside `Running`, while already recording, or in an image-only
    /// capture mode. A sink failure leaves the recording idle.
    pub async fn start_recording(&mut self) -> Result<InitialRecordingSettings> {
        self.ensure_running("start recording")?;
        let Some(configured) = &self.configured else {
            return Err(self.rejected("start recording").into());
        };
        let capture_mode = configured.perpetual.capture_mode;
        self.recording.ensure_can_start(capture_mode)?;

        let initial = InitialRecordingSettings::capture(&configured.transient);
        let max_duration_ms = configured.transient.max_video_duration_ms;

        if let Err(failure) = self.sink.start_recording(&initial).await {
            warn!(%failure, "Recording did not start");
            return Err(failure.into());
        }
        self.recording
            .start(capture_mode, initial.clone(), max_duration_ms, Instant::now())?;

        info!(
            lens = %initial.lens,
            audio = initial.audio_enabled,
            max_duration_ms,
            "Recording started"
        );
        self.emit(SessionEvent::Recording(RecordingEvent::Started(
            initial.clone(),
        )));
        Ok(initial)
    }

    /// Pause the active recording.
    ///
    /// # Errors
    ///
    /// Rejected unless recording. Sink failures leave the recording running.
    pub async fn pause_recording(&mut self) -> Result<()> {
        self.ensure_running("pause recording")?;
        self.recording.ensure_can_pause()?;
        self.sink.pause_recording().await?;
        self.recording.pause()?;
        debug!("Recording paused");
        self.emit(SessionEvent::Recording(RecordingEvent::Paused));
        Ok(())
    }

    /// Resume a paused recording.
    ///
    /// # Errors
    ///
    /// Rejected unless paused. Sink failures leave the recording paused.
    pub async fn resume_recording(&mut self) -> Result<()> {
        self.ensure_running("resume recording")?;
        self.recording.ensure_can_resume()?;
        self.sink.resume_recording().await?;
        self.recording.resume()?;
        debug!("Recording resumed");
        self.emit(SessionEvent::Recording(RecordingEvent::Resumed));
        Ok(())
    }

    /// Stop and finalize the active recording.
    ///
    /// # Errors
    ///
    /// Rejected with `InvalidStateForOperation` when no recording is active. A
    /// sink failure while finalizing is reported in the outcome, not as an error.
    pub async fn stop_recording(&mut self) -> Result<RecordingOutcome> {
        self.recording.ensure_can_stop()?;
        self.finish_recording(StopCause::Manual).await
    }

    /// Stop the active recording if its deadline has passed.
    pub async fn expire_recording(&mut self) -> Option<RecordingOutcome> {
        let deadline = self.recording.deadline()?;
        if Instant::now() < deadline {
            return None;
        }
        info!("Maximum recording duration reached");
        self.finish_recording(StopCause::MaxDuration).await.ok()
    }

    async fn finish_recording(&mut self, cause: StopCause) -> Result<RecordingOutcome> {
        let elapsed = self.recording.elapsed(Instant::now());
        let initial = self.recording.stop()?;

        let outcome = match cause {
            StopCause::Cancelled => {
                let cleanup = self.config.cleanup_timeout();
                match tokio::time::timeout(cleanup, self.sink.stop_recording()).await {
                    Ok(Err(failure)) => warn!(%failure, "Sink failed to stop cancelled recording"),
                    Err(_) => warn!(?cleanup, "Sink did not stop cancelled recording in time"),
                    Ok(Ok(_)) => {}
                }
                RecordingOutcome::Failure {
                    failure: RecordingFailure::Cancelled,
                    initial,
                }
            }
            StopCause::Manual | StopCause::MaxDuration => {
                let reason = if matches!(cause, StopCause::MaxDuration) {
                    RecordingStopReason::MaxDurationReached
                } else {
                    RecordingStopReason::Manual
                };
                match self.sink.stop_recording().await {
                    Ok(output) => RecordingOutcome::Success {
                        output,
                        initial,
                        reason,
                    },
                    Err(failure) => {
                        warn!(%failure, "Recording failed to finalize");
                        RecordingOutcome::Failure {
                            failure: RecordingFailure::Sink(failure.to_string()),
                            initial,
                        }
                    }
                }
            }
        };

        match &outcome {
            RecordingOutcome::Success { output, reason, .. } => {
                info!(location = %output.location, ?reason, ?elapsed, "Recording finalized");
            }
            RecordingOutcome::Failure { failure, .. } => {
                info!(?failure, ?elapsed, "Recording ended without output");
            }
        }
        self.emit(SessionEvent::Recording(RecordingEvent::Finalized(
            outcome.clone(),
        )));
        Ok(outcome)
    }

    /// Move to `Error` after an external fatal error.
    ///
    /// An active recording is force-stopped and the sink unbound.
    ///
    /// # Errors
    ///
    /// Rejected once the session is closed.
    pub async fn report_fatal(&mut self, message: &str) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(self.rejected("report fatal error").into());
        }
        warn!(reason = message, "Fatal session error");
        self.wind_down().await;
        self.set_state(SessionState::Error(SessionFailure::Fatal(
            message.to_owned(),
        )));
        Ok(())
    }

    /// Release everything and move to `Closed`.
    ///
    /// An active recording is finalized with [`RecordingFailure::Cancelled`].
    /// Calling it again is a no-op.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.wind_down().await;
        self.configured = None;
        self.set_state(SessionState::Closed);
    }

    async fn wind_down(&mut self) {
        if self.recording.state().is_active() {
            // Cancellation always finalizes; the outcome is published as an event.
            let _ = self.finish_recording(StopCause::Cancelled).await;
        }
        self.release_binding().await;
    }

    async fn release_binding(&mut self) {
        if !self.bound {
            return;
        }
        let cleanup = self.config.cleanup_timeout();
        if tokio::time::timeout(cleanup, self.sink.unbind()).await.is_err() {
            warn!(?cleanup, "Sink did not unbind in time");
        }
        self.bound = false;
        debug!("Sink unbound");
    }

    fn ensure_running(&self, operation: &'static str) -> std::result::Result<(), TransitionRejected> {
        if self.state == SessionState::Running {
            Ok(())
        } else {
            Err(self.rejected(operation))
        }
    }

    fn rejected(&self, operation: &'static str) -> TransitionRejected {
        TransitionRejected::InvalidStateForOperation {
            operation,
            state: self.state.to_string(),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "Session state changed");
        self.state = state.clone();
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event dropped, nobody is listening");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        DynamicRange, FlashMode, FrameRate, ImageFormat, LensId, StabilizationMode, StreamConfig,
        VideoQuality,
    };
    use crate::error::SinkFailure;
    use crate::mock::{MockCapabilitySource, MockCaptureSink};
    use crate::settings::{AspectRatio, CaptureMode, ConcurrentCameraMode, SettingField};
    use crate::zoom::ZoomChange;

    type Machine = SessionStateMachine<MockCapabilitySource, MockCaptureSink>;

    fn machine() -> (Machine, SessionChannels, MockCaptureSink) {
        let sink = MockCaptureSink::new();
        let (machine, channels) = SessionStateMachine::new(
            MockCapabilitySource::default(),
            sink.clone(),
            SessionConfig::default(),
        );
        (machine, channels, sink)
    }

    async fn running(desired: DesiredSettings) -> (Machine, SessionChannels, MockCaptureSink) {
        let (mut machine, channels, sink) = machine();
        machine.initialize(desired).await.expect("initialize");
        machine.run().await.expect("run");
        (machine, channels, sink)
    }

    fn drain(channels: &mut SessionChannels) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = channels.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn states(events: &[SessionEvent]) -> Vec<SessionState> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::StateChanged(state) => Some(state.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_and_run() {
        let (mut machine, mut channels, sink) = running(DesiredSettings::default()).await;

        assert_eq!(machine.state(), &SessionState::Running);
        assert!(sink.is_bound());
        assert_eq!(
            states(&drain(&mut channels)),
            vec![
                SessionState::Initializing,
                SessionState::Ready,
                SessionState::Running
            ]
        );

        let snapshot = machine.snapshot();
        assert!(snapshot.surface_available);
        let settings = snapshot.settings.expect("settings");
        assert_eq!(settings.lens, LensId::Back);
        assert!((settings.zoom_ratio(LensId::Back) - 1.0).abs() < f32::EPSILON);

        machine.close().await;
        assert!(!sink.is_bound());
    }

    #[tokio::test]
    async fn test_unavailable_lens_moves_to_error() {
        let (mut machine, _channels, _sink) = machine();
        let desired = DesiredSettings {
            lens: LensId::External,
            ..DesiredSettings::default()
        };

        let err = machine.initialize(desired).await.expect_err("lens missing");
        assert!(matches!(
            err,
            SessionError::Constraint(ConstraintViolation::LensUnavailable(LensId::External))
        ));
        assert_eq!(
            machine.state(),
            &SessionState::Error(SessionFailure::Constraint(
                ConstraintViolation::LensUnavailable(LensId::External)
            ))
        );
        assert!(machine.snapshot().settings.is_none());
    }

    #[tokio::test]
    async fn test_capability_query_failure_moves_to_error() {
        let (mut machine, _channels) = SessionStateMachine::new(
            MockCapabilitySource::default().failing(),
            MockCaptureSink::new(),
            SessionConfig::default(),
        );

        let err = machine
            .initialize(DesiredSettings::default())
            .await
            .expect_err("query fails");
        assert!(matches!(err, SessionError::Capability(_)));
        assert!(matches!(
            machine.state(),
            SessionState::Error(SessionFailure::CapabilityQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_failure_then_recovery() {
        let (mut machine, _channels, sink) = machine();
        sink.fail_bind("camera busy");
        machine
            .initialize(DesiredSettings::default())
            .await
            .expect("initialize");

        let err = machine.run().await.expect_err("bind fails");
        assert!(matches!(err, SessionError::Sink(_)));
        assert_eq!(
            machine.state(),
            &SessionState::Error(SessionFailure::BindFailed(
                "binding the session failed: camera busy".to_owned()
            ))
        );
        assert!(!sink.is_bound());

        machine
            .initialize(DesiredSettings::default())
            .await
            .expect("error is recoverable by initialize");
        assert_eq!(machine.state(), &SessionState::Ready);
    }

    #[tokio::test]
    async fn test_run_before_initialize_is_rejected() {
        let (mut machine, mut channels, sink) = machine();

        let err = machine.run().await.expect_err("not ready");
        assert!(err.is_rejection());
        assert_eq!(machine.state(), &SessionState::Uninitialized);
        assert!(sink.calls().is_empty());
        assert!(drain(&mut channels).is_empty());
    }

    #[tokio::test]
    async fn test_reinitialize_unbinds_running_session() {
        let (mut machine, _channels, sink) = running(DesiredSettings::default()).await;

        machine
            .initialize(DesiredSettings {
                aspect_ratio: AspectRatio::NineSixteen,
                ..DesiredSettings::default()
            })
            .await
            .expect("reinitialize");

        assert_eq!(machine.state(), &SessionState::Ready);
        assert_eq!(sink.calls(), vec!["bind", "unbind"]);
    }

    #[tokio::test]
    async fn test_clamped_settings_are_reported() {
        let desired = DesiredSettings {
            lens: LensId::Front,
            stabilization_mode: StabilizationMode::On,
            ..DesiredSettings::default()
        };
        let (machine, mut channels, _sink) = running(desired).await;

        let snapshot = machine.snapshot();
        assert_eq!(snapshot.adjustments.len(), 1);
        assert_eq!(snapshot.adjustments[0].field, SettingField::StabilizationMode);
        assert!(drain(&mut channels)
            .iter()
            .any(|event| matches!(event, SessionEvent::SettingsAdjusted(list) if list.len() == 1)));
    }

    #[tokio::test]
    async fn test_perpetual_updates_require_rebuild() {
        let (mut machine, mut channels, sink) = running(DesiredSettings::default()).await;
        drain(&mut channels);
        let before = machine.snapshot();

        let updates = [
            SettingsUpdate::CaptureMode(CaptureMode::VideoOnly),
            SettingsUpdate::AspectRatio(AspectRatio::OneOne),
            SettingsUpdate::StreamConfig(StreamConfig::SingleStream),
            SettingsUpdate::TargetFrameRate(FrameRate(30)),
            SettingsUpdate::StabilizationMode(StabilizationMode::On),
            SettingsUpdate::DynamicRange(DynamicRange::Hlg10),
            SettingsUpdate::VideoQuality(VideoQuality::Fhd),
            SettingsUpdate::ImageFormat(ImageFormat::JpegR),
            SettingsUpdate::ConcurrentMode(ConcurrentCameraMode::Dual),
        ];
        for update in updates {
            let field = update.field();
            let err = machine
                .apply_transient(update)
                .await
                .expect_err("perpetual");
            assert!(matches!(
                err,
                SessionError::Rejected(TransitionRejected::RequiresRebuild(f)) if f == field
            ));
        }

        assert_eq!(machine.snapshot(), before);
        assert!(drain(&mut channels).is_empty());
        assert_eq!(sink.calls(), vec!["bind"]);
    }

    #[tokio::test]
    async fn test_zoom_is_clamped_and_applied_live() {
        let (mut machine, _channels, sink) = running(DesiredSettings::default()).await;

        machine
            .apply_transient(SettingsUpdate::Zoom(ZoomChange::absolute(99.0)))
            .await
            .expect("zoom");

        let settings = machine.snapshot().settings.expect("settings");
        assert!((settings.zoom_ratio(LensId::Back) - 10.0).abs() < f32::EPSILON);
        assert_eq!(sink.calls(), vec!["bind", "apply_live:zoom ratio"]);
    }

    #[tokio::test]
    async fn test_zoom_on_unavailable_lens() {
        let (mut machine, _channels, _sink) = running(DesiredSettings::default()).await;

        let err = machine
            .apply_transient(SettingsUpdate::Zoom(
                ZoomChange::absolute(2.0).for_lens(LensId::External),
            ))
            .await
            .expect_err("no such lens");
        assert!(matches!(
            err,
            SessionError::Constraint(ConstraintViolation::LensUnavailable(LensId::External))
        ));
    }

    #[tokio::test]
    async fn test_live_lens_switch() {
        let (mut machine, _channels, sink) = running(DesiredSettings::default()).await;

        machine
            .apply_transient(SettingsUpdate::Lens(LensId::Front))
            .await
            .expect("switch");

        let settings = machine.snapshot().settings.expect("settings");
        assert_eq!(settings.lens, LensId::Front);
        assert!(settings.zoom_ratios.contains_key(&LensId::Front));
        assert_eq!(sink.calls(), vec!["bind", "apply_live:lens"]);
    }

    #[tokio::test]
    async fn test_lens_switch_that_changes_perpetual_settings_is_rejected() {
        let desired = DesiredSettings {
            stabilization_mode: StabilizationMode::On,
            ..DesiredSettings::default()
        };
        let (mut machine, _channels, sink) = running(desired).await;
        let before = machine.snapshot();

        let err = machine
            .apply_transient(SettingsUpdate::Lens(LensId::Front))
            .await
            .expect_err("front has no stabilization");
        assert!(matches!(
            err,
            SessionError::Rejected(TransitionRejected::RequiresRebuild(SettingField::Lens))
        ));
        assert_eq!(machine.snapshot(), before);
        assert_eq!(sink.calls(), vec!["bind"]);
    }

    #[tokio::test]
    async fn test_lens_switch_rejected_in_concurrent_mode() {
        let desired = DesiredSettings {
            concurrent_mode: ConcurrentCameraMode::Dual,
            ..DesiredSettings::default()
        };
        let (mut machine, _channels, _sink) = running(desired).await;

        let settings = machine.snapshot().settings.expect("settings");
        assert_eq!(settings.capture_mode, CaptureMode::VideoOnly);

        let err = machine
            .apply_transient(SettingsUpdate::Lens(LensId::Front))
            .await
            .expect_err("concurrent");
        assert!(matches!(
            err,
            SessionError::Rejected(TransitionRejected::LensSwitchDuringConcurrent)
        ));
    }

    #[tokio::test]
    async fn test_live_update_failure_keeps_settings() {
        let (mut machine, _channels, sink) = running(DesiredSettings::default()).await;
        sink.fail_live_updates("torch busy");
        let before = machine.snapshot();

        let err = machine
            .apply_transient(SettingsUpdate::FlashMode(FlashMode::On))
            .await
            .expect_err("sink fails");
        assert!(matches!(err, SessionError::Sink(_)));
        assert_eq!(machine.snapshot(), before);
        assert_eq!(machine.state(), &SessionState::Running);
    }

    #[tokio::test]
    async fn test_updates_rejected_when_not_running() {
        let (mut machine, _channels, _sink) = machine();
        machine
            .initialize(DesiredSettings::default())
            .await
            .expect("initialize");

        let err = machine
            .apply_transient(SettingsUpdate::AudioEnabled(false))
            .await
            .expect_err("ready is not running");
        assert!(matches!(
            err,
            SessionError::Rejected(TransitionRejected::InvalidStateForOperation {
                operation: "apply settings",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_recording_snapshot_ignores_live_changes() {
        let desired = DesiredSettings {
            zoom_ratios: [(LensId::Back, 2.0)].into(),
            ..DesiredSettings::default()
        };
        let (mut machine, mut channels, sink) = running(desired).await;
        drain(&mut channels);

        let initial = machine.start_recording().await.expect("start");
        assert!(sink.push_frame());
        machine
            .apply_transient(SettingsUpdate::Zoom(ZoomChange::absolute(4.0)))
            .await
            .expect("zoom while recording");
        machine
            .apply_transient(SettingsUpdate::AudioEnabled(false))
            .await
            .expect("mute while recording");
        machine.pause_recording().await.expect("pause");
        assert!(!sink.push_frame());
        machine.resume_recording().await.expect("resume");

        let outcome = machine.stop_recording().await.expect("stop");
        assert_eq!(outcome.initial(), &initial);
        assert!((initial.zoom_ratios[&LensId::Back] - 2.0).abs() < f32::EPSILON);
        assert!(initial.audio_enabled);
        assert!(matches!(
            outcome,
            RecordingOutcome::Success {
                reason: RecordingStopReason::Manual,
                ..
            }
        ));
        assert!(!sink.push_frame());

        let recording_events: Vec<_> = drain(&mut channels)
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Recording(event) => Some(event),
                _ => None,
            })
            .collect();
        assert_eq!(recording_events.len(), 4);
        assert_eq!(recording_events[0], RecordingEvent::Started(initial));
        assert_eq!(recording_events[1], RecordingEvent::Paused);
        assert_eq!(recording_events[2], RecordingEvent::Resumed);
        assert!(matches!(recording_events[3], RecordingEvent::Finalized(_)));
    }

    #[tokio::test]
    async fn test_stop_on_idle_is_rejected() {
        let (mut machine, mut channels, sink) = running(DesiredSettings::default()).await;
        drain(&mut channels);

        let err = machine.stop_recording().await.expect_err("idle");
        assert!(matches!(
            err,
            SessionError::Rejected(TransitionRejected::InvalidStateForOperation {
                operation: "stop recording",
                ..
            })
        ));
        assert_eq!(machine.state(), &SessionState::Running);
        assert_eq!(machine.recording_state(), RecordingState::Idle);
        assert!(drain(&mut channels).is_empty());
        assert_eq!(sink.calls(), vec!["bind"]);
    }

    #[tokio::test]
    async fn test_image_only_rejects_recording() {
        let desired = DesiredSettings {
            capture_mode: CaptureMode::ImageOnly,
            ..DesiredSettings::default()
        };
        let (mut machine, _channels, _sink) = running(desired).await;

        let err = machine.start_recording().await.expect_err("image only");
        assert!(matches!(
            err,
            SessionError::Rejected(TransitionRejected::CaptureModeUnsupportsVideo)
        ));
    }

    #[tokio::test]
    async fn test_video_only_rejects_stills() {
        let desired = DesiredSettings {
            capture_mode: CaptureMode::VideoOnly,
            ..DesiredSettings::default()
        };
        let (mut machine, _channels, _sink) = running(desired).await;

        let err = machine.take_still().await.expect_err("video only");
        assert!(matches!(
            err,
            SessionError::Rejected(TransitionRejected::CaptureModeUnsupportsImage)
        ));
    }

    #[tokio::test]
    async fn test_still_with_flash_unit_skips_screen_flash() {
        let desired = DesiredSettings {
            flash_mode: FlashMode::On,
            ..DesiredSettings::default()
        };
        let (mut machine, mut channels, sink) = running(desired).await;

        let still = machine.take_still().await.expect("still");
        assert_eq!(still.lens, LensId::Back);
        assert!(channels.screen_flash.try_recv().is_none());
        assert_eq!(sink.calls(), vec!["bind", "take_still"]);
    }

    #[tokio::test]
    async fn test_screen_flash_wraps_capture() {
        let desired = DesiredSettings {
            lens: LensId::Front,
            flash_mode: FlashMode::On,
            ..DesiredSettings::default()
        };
        let (mut machine, channels, sink) = running(desired).await;
        let mut screen_flash = channels.screen_flash;

        let ui_log = sink.clone();
        let ui = tokio::spawn(async move {
            for _ in 0..2 {
                let event = screen_flash.recv().await.expect("flash event");
                ui_log.note(&format!("{:?}", event.kind));
                event.complete();
            }
        });

        machine.take_still().await.expect("still");
        ui.await.expect("ui task");
        assert_eq!(
            sink.calls(),
            vec!["bind", "ApplyUi", "take_still", "ClearUi"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_screen_flash_fails_each_still_within_timeout() {
        let sink = MockCaptureSink::new();
        let config = SessionConfig {
            screen_flash_timeout_ms: 500,
            ..SessionConfig::default()
        };
        let (mut machine, mut channels) =
            SessionStateMachine::new(MockCapabilitySource::default(), sink.clone(), config);
        let desired = DesiredSettings {
            lens: LensId::Front,
            flash_mode: FlashMode::On,
            ..DesiredSettings::default()
        };
        machine.initialize(desired).await.expect("initialize");
        machine.run().await.expect("run");

        for _ in 0..2 {
            let started = tokio::time::Instant::now();
            let err = machine.take_still().await.expect_err("flash not acknowledged");
            assert!(matches!(
                err,
                SessionError::Sink(SinkFailure::CaptureFailed(_))
            ));
            assert!(started.elapsed() <= Duration::from_millis(500));
        }
        assert_eq!(machine.state(), &SessionState::Running);
        assert_eq!(sink.calls(), vec!["bind"]);

        let mut kinds = Vec::new();
        while let Some(event) = channels.screen_flash.try_recv() {
            kinds.push(event.kind);
        }
        assert!(!kinds.contains(&ScreenFlashKind::ApplyUi));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_stops_on_time_during_screen_flash() {
        let desired = DesiredSettings {
            lens: LensId::Front,
            flash_mode: FlashMode::On,
            max_video_duration_ms: 1_000,
            ..DesiredSettings::default()
        };
        let (mut machine, mut channels, sink) = running(desired).await;
        machine.start_recording().await.expect("start");
        drain(&mut channels);

        let started = tokio::time::Instant::now();
        let result = machine.take_still().await;
        assert!(result.is_err(), "nobody acknowledges the flash");
        assert!(started.elapsed() >= Duration::from_millis(3_000));

        assert_eq!(machine.recording_state(), RecordingState::Idle);
        assert!(!sink.is_recording());
        let finalized: Vec<_> = drain(&mut channels)
            .into_iter()
            .filter(|event| matches!(event, SessionEvent::Recording(RecordingEvent::Finalized(_))))
            .collect();
        assert!(matches!(
            finalized.as_slice(),
            [SessionEvent::Recording(RecordingEvent::Finalized(RecordingOutcome::Success {
                reason: RecordingStopReason::MaxDurationReached,
                ..
            }))]
        ));
    }

    #[tokio::test]
    async fn test_failed_still_keeps_running() {
        let (mut machine, _channels, sink) = running(DesiredSettings::default()).await;
        sink.fail_stills("sensor error");

        let err = machine.take_still().await.expect_err("capture fails");
        assert!(matches!(err, SessionError::Sink(_)));
        assert_eq!(machine.state(), &SessionState::Running);
    }

    #[tokio::test]
    async fn test_close_while_recording_cancels_it() {
        let (mut machine, mut channels, sink) = running(DesiredSettings::default()).await;
        machine.start_recording().await.expect("start");
        assert!(sink.is_recording());
        drain(&mut channels);

        machine.close().await;
        machine.close().await;

        let events = drain(&mut channels);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            SessionEvent::Recording(RecordingEvent::Finalized(RecordingOutcome::Failure {
                failure: RecordingFailure::Cancelled,
                ..
            }))
        ));
        assert_eq!(events[1], SessionEvent::StateChanged(SessionState::Closed));
        assert!(!sink.is_bound());
        assert!(!sink.is_recording());
        assert!(!sink.push_frame());

        let err = machine
            .initialize(DesiredSettings::default())
            .await
            .expect_err("closed is terminal");
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_sink_stop_failure_is_reported_in_outcome() {
        let (mut machine, _channels, sink) = running(DesiredSettings::default()).await;
        machine.start_recording().await.expect("start");
        sink.fail_stop("disk full");

        let outcome = machine.stop_recording().await.expect("finalized");
        assert!(matches!(
            outcome,
            RecordingOutcome::Failure {
                failure: RecordingFailure::Sink(_),
                ..
            }
        ));
        assert_eq!(machine.recording_state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_report_fatal() {
        let (mut machine, _channels, sink) = running(DesiredSettings::default()).await;
        machine.start_recording().await.expect("start");

        machine.report_fatal("camera disconnected").await.expect("fatal");
        assert_eq!(
            machine.state(),
            &SessionState::Error(SessionFailure::Fatal("camera disconnected".to_owned()))
        );
        assert_eq!(machine.recording_state(), RecordingState::Idle);
        assert!(!sink.is_bound());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_recording_after_deadline() {
        let desired = DesiredSettings {
            max_video_duration_ms: 5_000,
            ..DesiredSettings::default()
        };
        let (mut machine, _channels, _sink) = running(desired).await;
        machine.start_recording().await.expect("start");

        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert!(machine.expire_recording().await.is_none());

        tokio::time::advance(Duration::from_millis(1)).await;
        let outcome = machine.expire_recording().await.expect("expired");
        assert!(matches!(
            outcome,
            RecordingOutcome::Success {
                reason: RecordingStopReason::MaxDurationReached,
                ..
            }
        ));
        assert!(machine.recording_deadline().is_none());
    }
}
