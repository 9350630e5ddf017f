//! Single-writer command loop around a [`SessionStateMachine`].
//!
//! [`spawn`] moves the machine onto a task that owns it exclusively. Callers
//! talk to it through a cloneable [`SessionHandle`]; each command carries a
//! oneshot reply and runs to completion before the next is taken. The loop
//! also fires the automatic recording stop and observes cancellation.

use std::ops::ControlFlow;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capability::FlashMode;
use crate::error::{Result, SessionError};
use crate::recording::{InitialRecordingSettings, RecordingOutcome};
use crate::session::{SessionSnapshot, SessionStateMachine};
use crate::settings::{DesiredSettings, SettingsUpdate};
use crate::traits::{CapabilitySource, CaptureSink, StillCapture};
use crate::zoom::ZoomChange;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Initialize(Box<DesiredSettings>, Reply<()>),
    Run(Reply<()>),
    ApplyTransient(SettingsUpdate, Reply<()>),
    TakeStill(Reply<StillCapture>),
    StartRecording(Reply<InitialRecordingSettings>),
    PauseRecording(Reply<()>),
    ResumeRecording(Reply<()>),
    StopRecording(Reply<RecordingOutcome>),
    ReportFatal(String, Reply<()>),
    Close(oneshot::Sender<()>),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initialize(..) => "initialize",
            Self::Run(_) => "run",
            Self::ApplyTransient(..) => "apply_transient",
            Self::TakeStill(_) => "take_still",
            Self::StartRecording(_) => "start_recording",
            Self::PauseRecording(_) => "pause_recording",
            Self::ResumeRecording(_) => "resume_recording",
            Self::StopRecording(_) => "stop_recording",
            Self::ReportFatal(..) => "report_fatal",
            Self::Close(_) => "close",
        };
        f.write_str(name)
    }
}

/// Cloneable handle to a spawned session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
}

/// Move `machine` onto its own task.
///
/// # Returns
///
/// A handle for sending commands and the task, which resolves to the final
/// snapshot once the session is closed.
pub fn spawn<C, S>(machine: SessionStateMachine<C, S>) -> (SessionHandle, JoinHandle<SessionSnapshot>)
where
    C: CapabilitySource + 'static,
    S: CaptureSink + 'static,
{
    let (commands, receiver) = mpsc::channel(machine.config().queue_capacity());
    let (publisher, snapshots) = watch::channel(machine.snapshot());
    let cancel = machine.cancellation_token();

    let server = Server {
        machine,
        snapshots: publisher,
    };
    let task = tokio::spawn(server.serve(receiver));

    let handle = SessionHandle {
        commands,
        snapshots,
        cancel,
    };
    (handle, task)
}

impl SessionHandle {
    /// Query capabilities and resolve `desired`.
    pub async fn initialize(&self, desired: DesiredSettings) -> Result<()> {
        self.request(|reply| Command::Initialize(Box::new(desired), reply))
            .await
    }

    /// Bind the resolved settings.
    pub async fn run(&self) -> Result<()> {
        self.request(Command::Run).await
    }

    /// Apply a transient change.
    pub async fn apply_transient(&self, update: SettingsUpdate) -> Result<()> {
        self.request(|reply| Command::ApplyTransient(update, reply))
            .await
    }

    /// Change a lens's zoom ratio.
    pub async fn set_zoom(&self, change: ZoomChange) -> Result<()> {
        self.apply_transient(SettingsUpdate::Zoom(change)).await
    }

    /// Change the flash mode.
    pub async fn set_flash_mode(&self, mode: FlashMode) -> Result<()> {
        self.apply_transient(SettingsUpdate::FlashMode(mode)).await
    }

    /// Capture a still image.
    pub async fn take_still(&self) -> Result<StillCapture> {
        self.request(Command::TakeStill).await
    }

    /// Start recording.
    pub async fn start_recording(&self) -> Result<InitialRecordingSettings> {
        self.request(Command::StartRecording).await
    }

    /// Pause recording.
    pub async fn pause_recording(&self) -> Result<()> {
        self.request(Command::PauseRecording).await
    }

    /// Resume recording.
    pub async fn resume_recording(&self) -> Result<()> {
        self.request(Command::ResumeRecording).await
    }

    /// Stop recording.
    pub async fn stop_recording(&self) -> Result<RecordingOutcome> {
        self.request(Command::StopRecording).await
    }

    /// Report an external fatal error.
    pub async fn report_fatal(&self, message: &str) -> Result<()> {
        let message = message.to_owned();
        self.request(|reply| Command::ReportFatal(message, reply))
            .await
    }

    /// Close the session and wait until it is released. Closing twice is fine.
    pub async fn close(&self) {
        let (done, closed) = oneshot::channel();
        if self.commands.send(Command::Close(done)).await.is_ok() {
            // A dropped sender means the loop already finished.
            let _ = closed.await;
        }
    }

    /// Cancel the session without waiting for queued commands.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Whether the sink currently has a pipeline to present.
    pub fn surface_available(&self) -> bool {
        self.snapshots.borrow().surface_available
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    async fn request<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(Reply<T>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }
}

struct Server<C, S> {
    machine: SessionStateMachine<C, S>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl<C: CapabilitySource, S: CaptureSink> Server<C, S> {
    async fn serve(mut self, mut commands: mpsc::Receiver<Command>) -> SessionSnapshot {
        let cancel = self.machine.cancellation_token();
        debug!("Session loop started");

        loop {
            let deadline = self.machine.recording_deadline();
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("Session cancelled");
                    break;
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.machine.expire_recording().await;
                    self.publish();
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("All session handles dropped");
                        break;
                    };
                    if self.handle(command).await.is_break() {
                        break;
                    }
                }
            }
        }

        self.machine.close().await;
        self.publish();
        debug!("Session loop finished");
        self.machine.snapshot()
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        debug!(?command, "Processing command");
        match command {
            Command::Initialize(desired, reply) => {
                let result = self.machine.initialize(*desired).await;
                self.reply(reply, result);
            }
            Command::Run(reply) => {
                let result = self.machine.run().await;
                self.reply(reply, result);
            }
            Command::ApplyTransient(update, reply) => {
                let result = self.machine.apply_transient(update).await;
                self.reply(reply, result);
            }
            Command::TakeStill(reply) => {
                let result = self.machine.take_still().await;
                self.reply(reply, result);
            }
            Command::StartRecording(reply) => {
                let result = self.machine.start_recording().await;
                self.reply(reply, result);
            }
            Command::PauseRecording(reply) => {
                let result = self.machine.pause_recording().await;
                self.reply(reply, result);
            }
            Command::ResumeRecording(reply) => {
                let result = self.machine.resume_recording().await;
                self.reply(reply, result);
            }
            Command::StopRecording(reply) => {
                let result = self.machine.stop_recording().await;
                self.reply(reply, result);
            }
            Command::ReportFatal(message, reply) => {
                let result = self.machine.report_fatal(&message).await;
                self.reply(reply, result);
            }
            Command::Close(done) => {
                self.machine.close().await;
                self.publish();
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Publish the new snapshot before the caller sees the result.
    fn reply<T>(&self, reply: Reply<T>, result: Result<T>) {
        self.publish();
        if reply.send(result).is_err() {
            debug!("Caller stopped waiting for the reply");
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.machine.snapshot());
    }
}
