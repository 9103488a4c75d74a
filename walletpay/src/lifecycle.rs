//! Relays host application foreground/background signals to the machine.
//!
//! Backgrounding pauses the status poll; foregrounding resumes it. Other
//! states ignore both signals.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::IntegrationError;
use crate::machine::{Event, EventSender};

/// Visibility change of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleSignal {
    /// The app became visible.
    Foreground,
    /// The app was hidden.
    Background,
}

impl LifecycleSignal {
    /// Returns the machine event for this signal.
    #[must_use]
    pub const fn event(self) -> Event {
        match self {
            Self::Foreground => Event::Resume,
            Self::Background => Event::Pause,
        }
    }
}

/// Task forwarding a stream of signals into a machine.
#[derive(Debug)]
pub struct LifecycleBridge {
    task: JoinHandle<()>,
}

impl LifecycleBridge {
    /// Forwards every signal from `signals` until the stream closes or the
    /// machine stops.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(sender: EventSender, mut signals: mpsc::Receiver<LifecycleSignal>) -> Self {
        let task = tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                tracing::debug!(?signal, "lifecycle signal");
                match sender.send(signal.event()).await {
                    Ok(()) => {}
                    Err(IntegrationError::MachineStopped) => break,
                    Err(error) => tracing::warn!(%error, ?signal, "lifecycle signal rejected"),
                }
            }
        });
        Self { task }
    }

    /// Stops forwarding.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for LifecycleBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}
