//! Uploads `EVENTSTREAM` rows through the network gateway.

use std::sync::Arc;

use super::delivery::{DeliveryHandler, DeliveryListener};
use super::entry::AnalyticEntry;
use crate::gateway::{BoxFuture, NetworkGateway};

/// Row type consumed by [`EventStreamHandler`].
pub const EVENTSTREAM_TYPE: &str = "EVENTSTREAM";

/// Sends each page of rows as one event stream upload.
///
/// A page is delivered only when the endpoint accepts every event; any
/// rejection or gateway error fails the whole page so it is retried.
pub struct EventStreamHandler {
    gateway: Arc<dyn NetworkGateway>,
    client_id: String,
}

impl std::fmt::Debug for EventStreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamHandler")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl EventStreamHandler {
    /// Creates a handler that uploads on behalf of `client_id`.
    #[must_use]
    pub fn new(gateway: Arc<dyn NetworkGateway>, client_id: impl Into<String>) -> Self {
        Self {
            gateway,
            client_id: client_id.into(),
        }
    }
}

impl DeliveryHandler for EventStreamHandler {
    fn deliverable_type(&self) -> &str {
        EVENTSTREAM_TYPE
    }

    fn deliver<'a>(
        &'a self,
        entries: Vec<AnalyticEntry>,
        listener: &'a dyn DeliveryListener,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let events: Vec<String> = entries.iter().map(|e| e.content.clone()).collect();
            match self.gateway.upload_events(&self.client_id, &events).await {
                Ok(summary) if summary.is_complete() => listener.on_success(&entries),
                Ok(summary) => {
                    tracing::warn!(
                        success_count = summary.success_count,
                        failure_count = summary.failure_count,
                        "event stream rejected part of the batch"
                    );
                    listener.on_failure(&entries);
                }
                Err(error) => {
                    tracing::warn!(%error, count = entries.len(), "event stream upload failed");
                    listener.on_failure(&entries);
                }
            }
        })
    }
}
