//! Screen flash side channel.
//!
//! Screen flash is a software fallback for lenses without a flash unit: the UI
//! turns the screen bright for the exposure. Each cycle is an `ApplyUi` event
//! followed by a `ClearUi` event. The UI acknowledges each event once it has
//! visibly taken effect, and the session waits for that acknowledgement.
//!
//! The channel holds one event, and delivery plus acknowledgement share one
//! timeout, so a UI that stops reading fails captures instead of stalling them.
//! An `ApplyUi` whose cycle was abandoned is dropped by the receiver rather than
//! brightening the screen after the fact.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capability::{FlashMode, Illuminant};
use crate::error::{SessionError, SinkFailure};

/// Which half of a flash cycle an event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenFlashKind {
    /// Brighten the screen.
    ApplyUi,
    /// Restore the screen.
    ClearUi,
}

/// How a still capture is lit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashBehavior {
    /// No flash.
    None,
    /// Fire the hardware flash unit.
    FlashUnit,
    /// Run a screen flash cycle.
    Screen,
}

/// Decide how `mode` is realized on a lens with `illuminants`.
///
/// A hardware flash unit wins over the screen. Low light boost is handled by the
/// sink and never flashes.
pub fn flash_behavior(mode: FlashMode, illuminants: &BTreeSet<Illuminant>) -> FlashBehavior {
    match mode {
        FlashMode::Off | FlashMode::LowLightBoost => FlashBehavior::None,
        FlashMode::On | FlashMode::Auto => {
            if illuminants.contains(&Illuminant::FlashUnit) {
                FlashBehavior::FlashUnit
            } else if illuminants.contains(&Illuminant::Screen) {
                FlashBehavior::Screen
            } else {
                FlashBehavior::None
            }
        }
    }
}

/// Acknowledgement handle carried by a [`ScreenFlashEvent`].
///
/// Dropping it without calling [`complete`](Self::complete) still acknowledges,
/// so a discarded event never stalls the session.
#[derive(Debug)]
pub struct FlashCompletion(Option<oneshot::Sender<()>>);

impl FlashCompletion {
    /// Report that the UI change is visible.
    pub fn complete(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(done) = self.0.take() {
            // The session may have stopped waiting; nothing to do then.
            let _ = done.send(());
        }
    }
}

impl Drop for FlashCompletion {
    fn drop(&mut self) {
        self.fire();
    }
}

/// One half of a screen flash cycle.
#[derive(Debug)]
pub struct ScreenFlashEvent {
    /// Apply or clear.
    pub kind: ScreenFlashKind,
    /// Must be completed once the change is visible.
    pub completion: FlashCompletion,
    cycle: u64,
}

impl ScreenFlashEvent {
    /// Acknowledge the event.
    pub fn complete(self) {
        self.completion.complete();
    }
}

/// Create a screen flash channel.
pub fn screen_flash_channel() -> (ScreenFlashSender, ScreenFlashReceiver) {
    let (events, receiver) = mpsc::channel(1);
    let cycles = Arc::new(FlashCycles::default());
    (
        ScreenFlashSender {
            events,
            cycles: Arc::clone(&cycles),
        },
        ScreenFlashReceiver {
            events: receiver,
            cycles,
        },
    )
}

/// Cycle ids shared by both ends. Zero means no cycle is live.
#[derive(Debug, Default)]
struct FlashCycles {
    next: AtomicU64,
    live: AtomicU64,
}

impl FlashCycles {
    fn begin(&self) -> u64 {
        let cycle = self.next.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        self.live.store(cycle, Ordering::Release);
        cycle
    }

    fn abandon(&self, cycle: u64) {
        let _ = self
            .live
            .compare_exchange(cycle, 0, Ordering::AcqRel, Ordering::Acquire);
    }

    fn is_stale(&self, event: &ScreenFlashEvent) -> bool {
        event.kind == ScreenFlashKind::ApplyUi && self.live.load(Ordering::Acquire) != event.cycle
    }
}

/// Session side of the screen flash channel.
#[derive(Debug, Clone)]
pub struct ScreenFlashSender {
    events: mpsc::Sender<ScreenFlashEvent>,
    cycles: Arc<FlashCycles>,
}

impl ScreenFlashSender {
    /// Deliver `kind` and wait for the UI to acknowledge it.
    ///
    /// Returns `Ok` without waiting when no UI is listening. Fails with
    /// [`SessionError::Cancelled`] if `cancel` fires first, or with a capture
    /// failure if the event is not delivered and acknowledged within `timeout`.
    /// A failed `ApplyUi` is never shown.
    pub async fn signal(
        &self,
        kind: ScreenFlashKind,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let cycle = match kind {
            ScreenFlashKind::ApplyUi => self.cycles.begin(),
            ScreenFlashKind::ClearUi => 0,
        };
        let (done, acknowledged) = oneshot::channel();
        let event = ScreenFlashEvent {
            kind,
            completion: FlashCompletion(Some(done)),
            cycle,
        };

        let exchange = async {
            if self.events.send(event).await.is_err() {
                return false;
            }
            // Dropping the completion acknowledges too, so either outcome counts.
            let _ = acknowledged.await;
            true
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SessionError::Cancelled),
            exchanged = tokio::time::timeout(timeout, exchange) => match exchanged {
                Ok(true) => {
                    debug!(?kind, "Screen flash acknowledged");
                    Ok(())
                }
                Ok(false) => {
                    warn!(?kind, "No screen flash listener, continuing without UI change");
                    Ok(())
                }
                Err(_) => Err(SinkFailure::CaptureFailed(format!(
                    "screen flash {kind:?} not acknowledged within {timeout:?}"
                ))
                .into()),
            },
        };
        if result.is_err() {
            self.cycles.abandon(cycle);
        }
        result
    }

    /// Queue a `ClearUi` without waiting for it, so an interrupted cycle never
    /// leaves the screen bright.
    pub fn clear_detached(&self, timeout: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let (done, _acknowledged) = oneshot::channel();
            let event = ScreenFlashEvent {
                kind: ScreenFlashKind::ClearUi,
                completion: FlashCompletion(Some(done)),
                cycle: 0,
            };
            if tokio::time::timeout(timeout, events.send(event)).await.is_err() {
                warn!("Screen flash clear was not picked up");
            }
        });
    }
}

/// UI side of the screen flash channel.
#[derive(Debug)]
pub struct ScreenFlashReceiver {
    events: mpsc::Receiver<ScreenFlashEvent>,
    cycles: Arc<FlashCycles>,
}

impl ScreenFlashReceiver {
    /// Next event, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<ScreenFlashEvent> {
        loop {
            let event = self.events.recv().await?;
            if !self.skip_stale(&event) {
                return Some(event);
            }
        }
    }

    /// Next event if one is already pending.
    pub fn try_recv(&mut self) -> Option<ScreenFlashEvent> {
        loop {
            let event = self.events.try_recv().ok()?;
            if !self.skip_stale(&event) {
                return Some(event);
            }
        }
    }

    fn skip_stale(&self, event: &ScreenFlashEvent) -> bool {
        let stale = self.cycles.is_stale(event);
        if stale {
            debug!(cycle = event.cycle, "Dropping abandoned screen flash");
        }
        stale
    }
}
