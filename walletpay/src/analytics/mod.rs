//! Durable, at-least-once analytics delivery.
//!
//! Rows are scheduled into an [`EventStore`] and drained by a single
//! [`DeliveryWorker`] that runs the [`DeliveryEngine`] on a fixed schedule
//! and on demand. Each row type is delivered by one registered
//! [`DeliveryHandler`].
//!
//! ```text
//! schedule() ─▶ EventStore ◀─ claim/page/reconcile ─ DeliveryEngine ─▶ DeliveryHandler
//!                                                        ▲
//!                                    tick / dispatch() ─ DeliveryWorker
//! ```

pub mod delivery;
pub mod entry;
pub mod eventstream;
pub mod store;
pub mod telemetry;
pub mod worker;

use std::sync::Arc;

pub use delivery::{DeliveryEngine, DeliveryHandler, DeliveryListener, RunReport};
pub use entry::{AnalyticEntry, EntryState};
pub use eventstream::{EVENTSTREAM_TYPE, EventStreamHandler};
pub use store::EventStore;
pub use telemetry::TransactionTelemetry;
pub use worker::DeliveryWorker;

use crate::config::AnalyticsOptions;
use crate::error::StoreError;

/// Analytics queue: store, delivery engine and its worker.
///
/// Clones share the same queue.
#[derive(Debug, Clone)]
pub struct Analytics {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    engine: Arc<DeliveryEngine>,
    worker: DeliveryWorker,
    version: String,
}

impl Analytics {
    /// Opens the store named by `options` (in memory when no path is set)
    /// and starts the delivery worker.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(options: &AnalyticsOptions) -> Result<Self, StoreError> {
        let store = match &options.database_path {
            Some(path) => EventStore::open(path)?,
            None => EventStore::open_in_memory()?,
        };
        Ok(Self::with_store(store, options))
    }

    /// Starts the delivery worker over an already opened store.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn with_store(store: EventStore, options: &AnalyticsOptions) -> Self {
        let engine = Arc::new(DeliveryEngine::new(
            store,
            options.batch_size,
            options.page_size,
        ));
        let worker = DeliveryWorker::spawn(
            Arc::clone(&engine),
            options.initial_delay,
            options.interval,
        );
        Self {
            inner: Arc::new(Inner {
                engine,
                worker,
                version: options.version.clone(),
            }),
        }
    }

    /// Registers a handler for its row type.
    pub fn register(&self, handler: Arc<dyn DeliveryHandler>) {
        self.inner.engine.register(handler);
    }

    /// Queues a row for delivery and returns its id.
    ///
    /// Store failures are logged and yield `None`.
    pub async fn schedule(
        &self,
        entry_type: impl Into<String>,
        content: impl Into<String>,
        metadata: Option<String>,
    ) -> Option<i64> {
        let entry_type = entry_type.into();
        let content = content.into();
        let version = self.inner.version.clone();
        let store = self.inner.engine.store().clone();
        let kind = entry_type.clone();
        match delivery::run_blocking(store, move |store| {
            store.insert(&kind, &content, metadata.as_deref(), &version)
        })
        .await
        {
            Ok(id) => {
                tracing::trace!(id, %entry_type, "scheduled analytics row");
                Some(id)
            }
            Err(error) => {
                tracing::warn!(%error, %entry_type, "failed to schedule analytics row");
                None
            }
        }
    }

    /// Runs a delivery pass now and waits for it.
    ///
    /// Returns `None` after [`shutdown`](Self::shutdown).
    pub async fn dispatch(&self) -> Option<RunReport> {
        self.inner.worker.dispatch().await
    }

    /// Stops scheduled delivery. Rows stay in the store.
    pub fn shutdown(&self) {
        self.inner.worker.shutdown();
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &EventStore {
        self.inner.engine.store()
    }
}
