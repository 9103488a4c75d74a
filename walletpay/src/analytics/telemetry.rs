//! Checkout telemetry recorded as `EVENTSTREAM` rows.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::Analytics;
use super::eventstream::EVENTSTREAM_TYPE;
use crate::config::{ClientConfig, Environment, SDK_VERSION};

/// Event name recorded when a client is built.
pub const INITIALIZE_EVENT: &str = "walletpay.initialize";
/// Event name recorded when a listener is registered or removed.
pub const LISTENER_EVENT: &str = "walletpay.listener";
/// Event name recorded for every state the host application observes.
pub const STATE_EVENT: &str = "walletpay.state";

#[derive(Debug, Serialize)]
struct TelemetryEvent<'a> {
    event: &'a str,
    client_id: &'a str,
    environment: Environment,
    sdk_version: &'a str,
    occurred_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    listener_registered: Option<bool>,
}

/// Records client telemetry into an [`Analytics`] queue.
#[derive(Debug, Clone)]
pub struct TransactionTelemetry {
    analytics: Analytics,
    client_id: String,
    environment: Environment,
}

impl TransactionTelemetry {
    /// Creates a recorder for the client described by `config`.
    #[must_use]
    pub fn new(analytics: Analytics, config: &ClientConfig) -> Self {
        Self {
            analytics,
            client_id: config.client_id.clone(),
            environment: config.environment,
        }
    }

    /// Returns the queue events are recorded into.
    #[must_use]
    pub const fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    /// Records client construction.
    pub async fn initialized(&self) {
        self.record(self.event(INITIALIZE_EVENT)).await;
    }

    /// Records listener registration (`true`) or removal (`false`).
    pub async fn listener(&self, registered: bool) {
        let mut event = self.event(LISTENER_EVENT);
        event.listener_registered = Some(registered);
        self.record(event).await;
    }

    /// Records an observed state.
    pub async fn state(&self, state: &str, request_id: Option<&str>) {
        let mut event = self.event(STATE_EVENT);
        event.state = Some(state);
        event.request_id = request_id;
        self.record(event).await;
    }

    fn event<'a>(&'a self, name: &'a str) -> TelemetryEvent<'a> {
        TelemetryEvent {
            event: name,
            client_id: &self.client_id,
            environment: self.environment,
            sdk_version: SDK_VERSION,
            occurred_at_ms: now_millis(),
            state: None,
            request_id: None,
            listener_registered: None,
        }
    }

    async fn record(&self, event: TelemetryEvent<'_>) {
        let content = match serde_json::to_string(&event) {
            Ok(content) => content,
            Err(error) => {
                tracing::warn!(%error, event = event.event, "failed to encode telemetry event");
                return;
            }
        };
        self.analytics
            .schedule(EVENTSTREAM_TYPE, content, None)
            .await;
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::analytics::store::EventStore;
    use crate::config::AnalyticsOptions;

    fn analytics() -> Analytics {
        let options = AnalyticsOptions {
            initial_delay: Duration::from_secs(3600),
            ..AnalyticsOptions::default()
        };
        Analytics::with_store(EventStore::open_in_memory().unwrap(), &options)
    }

    #[tokio::test]
    async fn state_event_carries_request_id() {
        let analytics = analytics();
        let telemetry = TransactionTelemetry::new(
            analytics.clone(),
            &ClientConfig::sandbox("CAS-CI_TEST"),
        );
        telemetry.state("ReadyToAuthorize", Some("GRR_1")).await;

        let rows = analytics.store().entries(EVENTSTREAM_TYPE).unwrap();
        assert_eq!(rows.len(), 1);
        let json: serde_json::Value = serde_json::from_str(&rows[0].content).unwrap();
        assert_eq!(json["event"], STATE_EVENT);
        assert_eq!(json["client_id"], "CAS-CI_TEST");
        assert_eq!(json["environment"], "sandbox");
        assert_eq!(json["state"], "ReadyToAuthorize");
        assert_eq!(json["request_id"], "GRR_1");
        assert_eq!(rows[0].version, SDK_VERSION);
    }

    #[tokio::test]
    async fn listener_event_omits_state() {
        let analytics = analytics();
        let telemetry =
            TransactionTelemetry::new(analytics.clone(), &ClientConfig::new("CAS-CI_TEST"));
        telemetry.listener(false).await;

        let rows = analytics.store().entries(EVENTSTREAM_TYPE).unwrap();
        let json: serde_json::Value = serde_json::from_str(&rows[0].content).unwrap();
        assert_eq!(json["event"], LISTENER_EVENT);
        assert_eq!(json["listener_registered"], false);
        assert!(json.get("state").is_none());
    }
}
