//! Claim, deliver and reconcile analytics rows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngExt;
use rand::rng;

use super::entry::AnalyticEntry;
use super::store::EventStore;
use crate::error::StoreError;
use crate::gateway::BoxFuture;

/// Delivers analytics rows of one type to their destination.
///
/// The handler reports each row through the [`DeliveryListener`]. Rows it
/// reports as delivered are deleted, rows reported as failed are retried on
/// a later run. Rows it never reports stay in progress and are not claimed
/// again by this process.
pub trait DeliveryHandler: Send + Sync {
    /// The row type this handler consumes.
    fn deliverable_type(&self) -> &str;

    /// Delivers one page of rows.
    fn deliver<'a>(
        &'a self,
        entries: Vec<AnalyticEntry>,
        listener: &'a dyn DeliveryListener,
    ) -> BoxFuture<'a, ()>;
}

/// Receives the verdict of a [`DeliveryHandler`].
pub trait DeliveryListener: Send + Sync {
    /// The rows were delivered.
    fn on_success(&self, entries: &[AnalyticEntry]);

    /// The rows could not be delivered.
    fn on_failure(&self, entries: &[AnalyticEntry]);
}

#[derive(Debug, Default)]
struct Verdicts {
    delivered: Vec<i64>,
    failed: Vec<i64>,
}

#[derive(Debug, Default)]
struct RecordingListener {
    verdicts: Mutex<Verdicts>,
}

impl RecordingListener {
    fn take(&self) -> Verdicts {
        self.verdicts
            .lock()
            .map(|mut v| std::mem::take(&mut *v))
            .unwrap_or_default()
    }
}

impl DeliveryListener for RecordingListener {
    fn on_success(&self, entries: &[AnalyticEntry]) {
        if let Ok(mut v) = self.verdicts.lock() {
            v.delivered.extend(entries.iter().map(|e| e.id));
        }
    }

    fn on_failure(&self, entries: &[AnalyticEntry]) {
        if let Ok(mut v) = self.verdicts.lock() {
            v.failed.extend(entries.iter().map(|e| e.id));
        }
    }
}

/// Totals of one [`DeliveryEngine::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Rows claimed across all handlers.
    pub claimed: usize,
    /// Rows deleted after successful delivery.
    pub delivered: usize,
    /// Rows marked failed.
    pub failed: usize,
}

/// Drains the event store through the registered handlers.
pub struct DeliveryEngine {
    store: EventStore,
    handlers: RwLock<Vec<Arc<dyn DeliveryHandler>>>,
    batch_size: usize,
    page_size: usize,
    instance: u32,
    sequence: AtomicU64,
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("batch_size", &self.batch_size)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl DeliveryEngine {
    /// Creates an engine over `store` with no handlers.
    #[must_use]
    pub fn new(store: EventStore, batch_size: usize, page_size: usize) -> Self {
        Self {
            store,
            handlers: RwLock::new(Vec::new()),
            batch_size: batch_size.max(1),
            page_size: page_size.max(1),
            instance: rng().random(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &EventStore {
        &self.store
    }

    /// Adds a handler. Handlers run in registration order.
    pub fn register(&self, handler: Arc<dyn DeliveryHandler>) {
        match self.handlers.write() {
            Ok(mut handlers) => {
                tracing::debug!(
                    deliverable_type = handler.deliverable_type(),
                    "registered delivery handler"
                );
                handlers.push(handler);
            }
            Err(_) => tracing::error!("handler registry poisoned; handler dropped"),
        }
    }

    /// Runs one delivery pass over every handler.
    ///
    /// Store failures are logged and end the pass for that handler.
    pub async fn run(&self) -> RunReport {
        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(_) => {
                tracing::error!("handler registry poisoned; skipping delivery");
                return RunReport::default();
            }
        };
        let mut report = RunReport::default();
        for handler in handlers {
            self.run_handler(handler.as_ref(), &mut report).await;
        }
        report
    }

    async fn run_handler(&self, handler: &dyn DeliveryHandler, report: &mut RunReport) {
        let entry_type = handler.deliverable_type().to_owned();
        let claim_id = self.next_claim_id();
        let claimed = {
            let (ty, id, limit) = (entry_type.clone(), claim_id.clone(), self.batch_size);
            match self
                .blocking(move |store| store.claim(&ty, &id, limit))
                .await
            {
                Ok(n) => n,
                Err(error) => {
                    tracing::warn!(%error, %entry_type, "failed to claim analytics rows");
                    return;
                }
            }
        };
        if claimed == 0 {
            return;
        }
        report.claimed += claimed;
        tracing::debug!(%entry_type, %claim_id, claimed, "claimed analytics rows");

        loop {
            let page = {
                let (ty, id, limit) = (entry_type.clone(), claim_id.clone(), self.page_size);
                match self
                    .blocking(move |store| store.take_page(&ty, &id, limit))
                    .await
                {
                    Ok(page) => page,
                    Err(error) => {
                        tracing::warn!(%error, %entry_type, "failed to read analytics page");
                        return;
                    }
                }
            };
            if page.is_empty() {
                break;
            }

            let listener = RecordingListener::default();
            handler.deliver(page, &listener).await;
            let Verdicts { delivered, failed } = listener.take();

            if !delivered.is_empty() {
                let count = delivered.len();
                match self.blocking(move |store| store.delete(&delivered)).await {
                    Ok(_) => report.delivered += count,
                    Err(error) => {
                        tracing::warn!(%error, %entry_type, "failed to delete delivered rows");
                    }
                }
            }
            if !failed.is_empty() {
                let count = failed.len();
                match self.blocking(move |store| store.mark_failed(&failed)).await {
                    Ok(_) => report.failed += count,
                    Err(error) => {
                        tracing::warn!(%error, %entry_type, "failed to mark rows for retry");
                    }
                }
            }
        }
    }

    fn next_claim_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{millis}-{:08x}-{seq}", self.instance)
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&EventStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(self.store.clone(), op).await
    }
}

/// Runs a store operation on the blocking pool.
pub(crate) async fn run_blocking<T, F>(store: EventStore, op: F) -> Result<T, StoreError>
where
    F: FnOnce(&EventStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::analytics::entry::EntryState;

    pub(crate) const TYPE: &str = "EVENTSTREAM";

    /// Handler that records pages and reports a fixed verdict.
    #[derive(Default)]
    pub(crate) struct ScriptedHandler {
        pub(crate) fail: AtomicBool,
        pub(crate) silent: AtomicBool,
        pub(crate) pages: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedHandler {
        pub(crate) fn page_sizes(&self) -> Vec<usize> {
            self.pages.lock().unwrap().iter().map(Vec::len).collect()
        }
    }

    impl DeliveryHandler for ScriptedHandler {
        fn deliverable_type(&self) -> &str {
            TYPE
        }

        fn deliver<'a>(
            &'a self,
            entries: Vec<AnalyticEntry>,
            listener: &'a dyn DeliveryListener,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.pages
                    .lock()
                    .unwrap()
                    .push(entries.iter().map(|e| e.content.clone()).collect());
                if self.silent.load(Ordering::SeqCst) {
                    return;
                }
                if self.fail.load(Ordering::SeqCst) {
                    listener.on_failure(&entries);
                } else {
                    listener.on_success(&entries);
                }
            })
        }
    }

    fn engine_with(rows: usize, batch: usize, page: usize) -> (DeliveryEngine, Arc<ScriptedHandler>) {
        let store = EventStore::open_in_memory().unwrap();
        for i in 0..rows {
            store.insert(TYPE, &format!("e{i}"), None, "0.1.0").unwrap();
        }
        let engine = DeliveryEngine::new(store, batch, page);
        let handler = Arc::new(ScriptedHandler::default());
        engine.register(handler.clone());
        (engine, handler)
    }

    #[tokio::test]
    async fn successful_delivery_deletes_rows() {
        let (engine, handler) = engine_with(3, 30, 10);
        let report = engine.run().await;
        assert_eq!(
            report,
            RunReport {
                claimed: 3,
                delivered: 3,
                failed: 0
            }
        );
        assert_eq!(handler.page_sizes(), vec![3]);
        assert!(engine.store().entries(TYPE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_is_paged() {
        let (engine, handler) = engine_with(25, 30, 10);
        engine.run().await;
        assert_eq!(handler.page_sizes(), vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn batch_size_caps_one_run() {
        let (engine, handler) = engine_with(5, 3, 2);
        let report = engine.run().await;
        assert_eq!(report.claimed, 3);
        assert_eq!(handler.page_sizes(), vec![2, 1]);
        assert_eq!(engine.store().entries(TYPE).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_next_run() {
        let (engine, handler) = engine_with(2, 30, 10);
        handler.fail.store(true, Ordering::SeqCst);
        let report = engine.run().await;
        assert_eq!(report.failed, 2);
        for entry in engine.store().entries(TYPE).unwrap() {
            assert_eq!(entry.state, EntryState::DeliveryFailed);
            assert_eq!(entry.process_id, None);
        }

        handler.fail.store(false, Ordering::SeqCst);
        let report = engine.run().await;
        assert_eq!(report.delivered, 2);
        assert!(engine.store().entries(TYPE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreported_rows_stay_in_progress() {
        let (engine, handler) = engine_with(2, 30, 10);
        handler.silent.store(true, Ordering::SeqCst);
        engine.run().await;
        engine.run().await;
        assert_eq!(handler.page_sizes(), vec![2]);
        for entry in engine.store().entries(TYPE).unwrap() {
            assert_eq!(entry.state, EntryState::DeliveryInProgress);
        }
    }

    #[tokio::test]
    async fn rows_of_other_types_are_untouched() {
        let (engine, _handler) = engine_with(1, 30, 10);
        engine.store().insert("OTHER", "x", None, "0.1.0").unwrap();
        engine.run().await;
        let other = engine.store().entries("OTHER").unwrap();
        assert_eq!(other[0].state, EntryState::New);
    }

    #[tokio::test]
    async fn store_failure_ends_the_pass_without_delivering() {
        let (engine, handler) = engine_with(2, 30, 10);
        engine.store().execute_batch("DROP TABLE analytics").unwrap();
        let report = engine.run().await;
        assert_eq!(report, RunReport::default());
        assert!(handler.page_sizes().is_empty());
    }

    #[test]
    fn claim_ids_differ_within_one_millisecond() {
        let engine = DeliveryEngine::new(EventStore::open_in_memory().unwrap(), 30, 10);
        assert_ne!(engine.next_claim_id(), engine.next_claim_id());
    }
}
