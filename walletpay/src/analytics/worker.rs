//! The single background task that runs delivery passes.
//!
//! Scheduled passes and manual dispatches go through the same task, so two
//! passes never overlap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use super::delivery::{DeliveryEngine, RunReport};

/// Handle to the delivery task.
#[derive(Debug)]
pub struct DeliveryWorker {
    requests: mpsc::UnboundedSender<oneshot::Sender<RunReport>>,
    shutdown: Arc<AtomicBool>,
}

impl DeliveryWorker {
    /// Spawns the task. The first scheduled pass runs after `initial_delay`,
    /// then every `interval`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(engine: Arc<DeliveryEngine>, initial_delay: Duration, interval: Duration) -> Self {
        let (requests, inbox) = mpsc::unbounded_channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        tokio::spawn(run(
            engine,
            inbox,
            Arc::clone(&shutdown),
            initial_delay,
            interval.max(Duration::from_millis(1)),
        ));
        Self { requests, shutdown }
    }

    /// Runs a pass now and waits for it.
    ///
    /// Returns `None` once the worker is shut down.
    pub async fn dispatch(&self) -> Option<RunReport> {
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }
        let (reply, done) = oneshot::channel();
        self.requests.send(reply).ok()?;
        done.await.ok()
    }

    /// Asks the worker to stop. A pass already running finishes; the task
    /// exits on its next tick.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

async fn run(
    engine: Arc<DeliveryEngine>,
    mut inbox: mpsc::UnboundedReceiver<oneshot::Sender<RunReport>>,
    shutdown: Arc<AtomicBool>,
    initial_delay: Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                let report = engine.run().await;
                if report.claimed > 0 {
                    tracing::debug!(
                        claimed = report.claimed,
                        delivered = report.delivered,
                        failed = report.failed,
                        "scheduled analytics delivery"
                    );
                }
            }
            request = inbox.recv() => match request {
                Some(reply) => {
                    let report = engine.run().await;
                    let _ = reply.send(report);
                }
                None => break,
            },
        }
    }
    tracing::debug!("analytics delivery worker stopped");
}
