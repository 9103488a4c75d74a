//! Public entry point for one checkout.
//!
//! [`WalletPayClient`] turns caller calls into machine events and forwards
//! every entered state to the registered [`StateListener`]. A client drives a
//! single customer request; once it is approved, declined or failed, build a
//! new one.
//!
//! # Strict and lenient mode
//!
//! Misuse of the client (no listener, empty actions, an operation that is not
//! legal in the current state) is decided in one place,
//! [`WalletPayClient::enforce`]. In strict mode the error is returned to the
//! caller. Otherwise it is logged and the request moves to the exception
//! state, which the listener observes like any other failure. Calls made
//! after the request finished always fail.

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use walletpay_proto::{Action, Channel, RequestParams, ResponseSnapshot};

use crate::analytics::{Analytics, EventStreamHandler, TransactionTelemetry};
use crate::config::ClientConfig;
use crate::error::IntegrationError;
use crate::gateway::NetworkGateway;
use crate::handoff::HandoffLauncher;
use crate::lifecycle::{LifecycleBridge, LifecycleSignal};
use crate::listener::{ClientState, StateListener};
use crate::machine::{
    DriverConfig, Event, MachineDriver, MachineHandle, MachineState, StateChange, StateId,
};

type SharedListener = Arc<RwLock<Option<Arc<dyn StateListener>>>>;

/// Builder for [`WalletPayClient`].
pub struct WalletPayClientBuilder {
    config: ClientConfig,
    gateway: Arc<dyn NetworkGateway>,
    launcher: Arc<dyn HandoffLauncher>,
    analytics: Option<Analytics>,
}

impl std::fmt::Debug for WalletPayClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletPayClientBuilder")
            .field("config", &self.config)
            .field("analytics", &self.analytics.is_some())
            .finish_non_exhaustive()
    }
}

impl WalletPayClientBuilder {
    /// Records telemetry into `analytics` and uploads it through the
    /// client's gateway.
    ///
    /// Without this call the client starts its own queue from
    /// [`ClientConfig::analytics`] unless that is disabled.
    #[must_use]
    pub fn with_analytics(mut self, analytics: Analytics) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Starts the machine and returns the client.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn build(self) -> WalletPayClient {
        let Self {
            config,
            gateway,
            launcher,
            analytics,
        } = self;

        let analytics = analytics.or_else(|| start_analytics(&config));
        let telemetry = analytics.map(|analytics| {
            analytics.register(Arc::new(EventStreamHandler::new(
                Arc::clone(&gateway),
                config.client_id.clone(),
            )));
            TransactionTelemetry::new(analytics, &config)
        });

        let (machine, changes) = MachineDriver::spawn(
            DriverConfig {
                client_id: config.client_id.clone(),
                ready_poll_interval: config.ready_poll_interval,
                authorizing_poll_interval: config.authorizing_poll_interval,
            },
            gateway,
            launcher,
        );
        let listener: SharedListener = Arc::new(RwLock::new(None));
        tokio::spawn(forward(changes, Arc::clone(&listener), telemetry.clone()));

        tracing::info!(
            client_id = %config.client_id,
            environment = config.environment.as_str(),
            strict_mode = config.strict_mode,
            "walletpay client started"
        );
        WalletPayClient {
            config,
            machine,
            listener,
            telemetry,
        }
    }
}

fn start_analytics(config: &ClientConfig) -> Option<Analytics> {
    if !config.analytics.enabled {
        return None;
    }
    match Analytics::start(&config.analytics) {
        Ok(analytics) => Some(analytics),
        Err(error) => {
            tracing::warn!(%error, "failed to open analytics store; telemetry disabled");
            None
        }
    }
}

/// Client for one external wallet checkout.
pub struct WalletPayClient {
    config: ClientConfig,
    machine: MachineHandle,
    listener: SharedListener,
    telemetry: Option<TransactionTelemetry>,
}

impl std::fmt::Debug for WalletPayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletPayClient")
            .field("config", &self.config)
            .field("state", &self.machine.state())
            .finish_non_exhaustive()
    }
}

impl WalletPayClient {
    /// Starts building a client.
    #[must_use]
    pub fn builder(
        config: ClientConfig,
        gateway: Arc<dyn NetworkGateway>,
        launcher: Arc<dyn HandoffLauncher>,
    ) -> WalletPayClientBuilder {
        WalletPayClientBuilder {
            config,
            gateway,
            launcher,
            analytics: None,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the analytics queue telemetry is recorded into, if any.
    #[must_use]
    pub fn analytics(&self) -> Option<&Analytics> {
        self.telemetry.as_ref().map(TransactionTelemetry::analytics)
    }

    /// Creates a customer request for `actions`.
    ///
    /// The result arrives through the listener: `CreatingRequest`, then
    /// `ReadyToAuthorize` or `Exception`.
    ///
    /// # Errors
    ///
    /// See [`enforce`](Self::enforce).
    pub async fn create_request(
        &self,
        actions: Vec<Action>,
        redirect_uri: impl Into<String>,
        reference_id: Option<String>,
    ) -> Result<(), IntegrationError> {
        if let Err(error) = self.precheck("create_request", Some(actions.as_slice())) {
            return self.enforce(error).await;
        }
        let params = RequestParams {
            actions,
            redirect_url: redirect_uri.into(),
            reference_id,
            channel: Channel::InApp,
        };
        self.submit(Event::CreateRequest(params)).await
    }

    /// Replaces the actions of the current request.
    ///
    /// Legal while the request is ready, authorizing or already updating.
    ///
    /// # Errors
    ///
    /// See [`enforce`](Self::enforce).
    pub async fn update_request(
        &self,
        request_id: impl Into<String>,
        actions: Vec<Action>,
    ) -> Result<(), IntegrationError> {
        if let Err(error) = self.precheck("update_request", Some(actions.as_slice())) {
            return self.enforce(error).await;
        }
        self.submit(Event::UpdateRequest {
            request_id: request_id.into(),
            actions,
        })
        .await
    }

    /// Continues with a request created elsewhere, for example by the
    /// merchant's backend.
    ///
    /// # Errors
    ///
    /// See [`enforce`](Self::enforce).
    pub async fn start_with_existing(
        &self,
        request_id: impl Into<String>,
    ) -> Result<(), IntegrationError> {
        if let Err(error) = self.precheck("start_with_existing", None) {
            return self.enforce(error).await;
        }
        self.submit(Event::StartWithExisting {
            request_id: request_id.into(),
        })
        .await
    }

    /// Sends the customer to the wallet app for the current request.
    ///
    /// # Errors
    ///
    /// See [`enforce`](Self::enforce).
    pub async fn authorize(&self) -> Result<(), IntegrationError> {
        self.authorize_inner(None).await
    }

    /// Sends the customer to the wallet app using `snapshot`, which replaces
    /// the client's copy of the request.
    ///
    /// # Errors
    ///
    /// See [`enforce`](Self::enforce).
    pub async fn authorize_with(&self, snapshot: ResponseSnapshot) -> Result<(), IntegrationError> {
        self.authorize_inner(Some(snapshot)).await
    }

    async fn authorize_inner(
        &self,
        snapshot: Option<ResponseSnapshot>,
    ) -> Result<(), IntegrationError> {
        if let Err(error) = self.precheck("authorize", None) {
            return self.enforce(error).await;
        }
        self.submit(Event::Authorize { snapshot }).await
    }

    /// Registers the listener, replacing any previous one.
    pub async fn register_listener(&self, listener: Arc<dyn StateListener>) {
        self.set_listener(Some(listener));
        if let Some(telemetry) = &self.telemetry {
            telemetry.listener(true).await;
        }
    }

    /// Removes the listener. Later states are not reported.
    pub async fn unregister_listener(&self) {
        self.set_listener(None);
        if let Some(telemetry) = &self.telemetry {
            telemetry.listener(false).await;
        }
    }

    /// Relays a foreground/background change of the host application.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::MachineStopped`] if the machine is gone.
    pub async fn on_lifecycle(&self, signal: LifecycleSignal) -> Result<(), IntegrationError> {
        self.machine.send(signal.event()).await
    }

    /// Forwards a stream of lifecycle signals until it closes.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn bridge_lifecycle(&self, signals: mpsc::Receiver<LifecycleSignal>) -> LifecycleBridge {
        LifecycleBridge::spawn(self.machine.sender(), signals)
    }

    /// Returns the current machine state.
    #[must_use]
    pub fn state(&self) -> MachineState {
        self.machine.state()
    }

    /// Returns the active states, outermost first.
    #[must_use]
    pub fn active_states(&self) -> Vec<StateId> {
        self.machine.active_states()
    }

    fn set_listener(&self, listener: Option<Arc<dyn StateListener>>) {
        match self.listener.write() {
            Ok(mut slot) => *slot = listener,
            Err(poisoned) => *poisoned.into_inner() = listener,
        }
    }

    fn precheck(
        &self,
        op: &'static str,
        actions: Option<&[Action]>,
    ) -> Result<(), IntegrationError> {
        let registered = self.listener.read().is_ok_and(|slot| slot.is_some());
        if !registered {
            return Err(IntegrationError::ListenerNotRegistered(op));
        }
        if actions.is_some_and(<[Action]>::is_empty) {
            return Err(IntegrationError::EmptyActions);
        }
        Ok(())
    }

    async fn submit(&self, event: Event) -> Result<(), IntegrationError> {
        match self.machine.send(event).await {
            Ok(()) => Ok(()),
            Err(error) => self.enforce(error).await,
        }
    }

    /// Decides what a caller sees for an integration error.
    ///
    /// Strict mode returns it. Lenient mode logs it and moves the request to
    /// the exception state. [`IntegrationError::AlreadyFinished`] and
    /// [`IntegrationError::MachineStopped`] are returned in both modes since
    /// there is no live request left to fail.
    ///
    /// # Errors
    ///
    /// Returns `error` as described above.
    pub async fn enforce(&self, error: IntegrationError) -> Result<(), IntegrationError> {
        let always_returned = matches!(
            error,
            IntegrationError::AlreadyFinished { .. } | IntegrationError::MachineStopped
        );
        if self.config.strict_mode || always_returned {
            tracing::debug!(%error, "returning integration error to caller");
            return Err(error);
        }
        tracing::error!(%error, "integration error; moving request to exception state");
        self.machine.send(Event::Failed(error.into())).await
    }
}

async fn forward(
    mut changes: mpsc::UnboundedReceiver<StateChange>,
    listener: SharedListener,
    telemetry: Option<TransactionTelemetry>,
) {
    if let Some(telemetry) = &telemetry {
        telemetry.initialized().await;
    }
    while let Some(change) = changes.recv().await {
        let state = ClientState::from_change(&change);
        if let Some(telemetry) = &telemetry {
            let request_id = change.response.as_ref().map(|r| r.id.as_str());
            telemetry.state(state.name(), request_id).await;
        }
        let current = listener
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(Arc::clone));
        match current {
            Some(listener) => listener.on_state_changed(state),
            None => {
                tracing::debug!(state = state.name(), "no listener registered; state not reported");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use url::Url;
    use walletpay_proto::{Money, RequestStatus, UpdateRequestParams, UploadSummary};

    use super::*;
    use crate::analytics::EVENTSTREAM_TYPE;
    use crate::config::AnalyticsOptions;
    use crate::error::{ApiError, GatewayError, HandoffError, TransactionError};
    use crate::gateway::{BoxFuture, GatewayResult};

    fn snapshot(status: &str, grants: usize) -> ResponseSnapshot {
        let action = serde_json::json!({
            "type": "ONE_TIME_PAYMENT",
            "scope_id": "BRAND_1",
            "amount": 500,
            "currency": "USD",
        });
        let grants: Vec<_> = (0..grants)
            .map(|i| {
                serde_json::json!({
                    "id": format!("GRG_{i}"),
                    "customer_id": "CST_1",
                    "action": action,
                    "status": "ACTIVE",
                    "type": "ONE_TIME",
                })
            })
            .collect();
        serde_json::from_value(serde_json::json!({
            "id": "GRR_1",
            "status": status,
            "actions": [action],
            "auth_flow_triggers": { "mobile_url": "https://cash.app/authorize/GRR_1" },
            "reference_id": "order-7",
            "grants": grants,
        }))
        .unwrap()
    }

    #[derive(Default)]
    struct FakeGateway {
        creates: Mutex<VecDeque<GatewayResult>>,
        updates: Mutex<VecDeque<GatewayResult>>,
        retrieves: Mutex<VecDeque<GatewayResult>>,
        created: Mutex<Vec<RequestParams>>,
        updated: Mutex<Vec<(String, UpdateRequestParams)>>,
        retrieve_calls: Mutex<usize>,
        uploads: Mutex<Vec<String>>,
    }

    impl FakeGateway {
        fn retrieve_calls(&self) -> usize {
            *self.retrieve_calls.lock().unwrap()
        }
    }

    fn pop(queue: &Mutex<VecDeque<GatewayResult>>) -> GatewayResult {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(snapshot("PENDING", 0)))
    }

    impl NetworkGateway for FakeGateway {
        fn create<'a>(
            &'a self,
            _client_id: &'a str,
            params: &'a RequestParams,
        ) -> BoxFuture<'a, GatewayResult> {
            self.created.lock().unwrap().push(params.clone());
            let result = pop(&self.creates);
            Box::pin(async move { result })
        }

        fn update<'a>(
            &'a self,
            _client_id: &'a str,
            request_id: &'a str,
            params: &'a UpdateRequestParams,
        ) -> BoxFuture<'a, GatewayResult> {
            self.updated
                .lock()
                .unwrap()
                .push((request_id.to_owned(), params.clone()));
            let result = pop(&self.updates);
            Box::pin(async move { result })
        }

        fn retrieve<'a>(
            &'a self,
            _client_id: &'a str,
            _request_id: &'a str,
        ) -> BoxFuture<'a, GatewayResult> {
            *self.retrieve_calls.lock().unwrap() += 1;
            let result = pop(&self.retrieves);
            Box::pin(async move { result })
        }

        fn upload_events<'a>(
            &'a self,
            _client_id: &'a str,
            events: &'a [String],
        ) -> BoxFuture<'a, Result<UploadSummary, GatewayError>> {
            self.uploads.lock().unwrap().extend(events.iter().cloned());
            let accepted = u32::try_from(events.len()).unwrap();
            Box::pin(async move {
                Ok(UploadSummary {
                    success_count: accepted,
                    failure_count: 0,
                })
            })
        }
    }

    fn accept(_: &Url) -> Result<(), HandoffError> {
        Ok(())
    }

    fn refuse(url: &Url) -> Result<(), HandoffError> {
        Err(HandoffError::NoHandler(url.to_string()))
    }

    struct Harness {
        client: WalletPayClient,
        gateway: Arc<FakeGateway>,
        states: mpsc::UnboundedReceiver<ClientState>,
    }

    impl Harness {
        async fn new(strict: bool, gateway: FakeGateway) -> Self {
            Self::with_launcher(strict, gateway, Arc::new(accept)).await
        }

        async fn with_launcher(
            strict: bool,
            gateway: FakeGateway,
            launcher: Arc<dyn HandoffLauncher>,
        ) -> Self {
            let gateway = Arc::new(gateway);
            let mut config = ClientConfig::new("CAS-CI_TEST").with_strict_mode(strict);
            config.analytics.enabled = false;
            let client = WalletPayClient::builder(config, gateway.clone(), launcher).build();
            let (tx, states) = mpsc::unbounded_channel();
            client
                .register_listener(Arc::new(move |state: ClientState| {
                    let _ = tx.send(state);
                }))
                .await;
            Self {
                client,
                gateway,
                states,
            }
        }

        async fn next(&mut self) -> ClientState {
            tokio::time::timeout(Duration::from_secs(600), self.states.recv())
                .await
                .expect("timed out waiting for a state")
                .expect("listener channel closed")
        }
    }

    fn one_time_500() -> Vec<Action> {
        vec![Action::one_time("BRAND_1", Some(Money::usd(500)))]
    }

    #[tokio::test(start_paused = true)]
    async fn create_request_reaches_ready_with_snapshot() {
        let mut h = Harness::new(true, FakeGateway::default()).await;
        h.client
            .create_request(one_time_500(), "shop://done", Some("order-7".to_owned()))
            .await
            .unwrap();

        assert_eq!(h.next().await, ClientState::CreatingRequest);
        let ClientState::ReadyToAuthorize(snap) = h.next().await else {
            panic!("expected ReadyToAuthorize");
        };
        assert_eq!(snap.id, "GRR_1");
        assert_eq!(snap.status, RequestStatus::Pending);

        let created = h.gateway.created.lock().unwrap().clone();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].actions, one_time_500());
        assert_eq!(created[0].redirect_url, "shop://done");
        assert_eq!(created[0].reference_id.as_deref(), Some("order-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn authorize_polls_until_approved() {
        let gateway = FakeGateway::default();
        gateway
            .retrieves
            .lock()
            .unwrap()
            .extend([Ok(snapshot("PROCESSING", 0)), Ok(snapshot("APPROVED", 1))]);
        let mut h = Harness::new(true, gateway).await;
        h.client
            .create_request(one_time_500(), "shop://done", None)
            .await
            .unwrap();
        assert_eq!(h.next().await, ClientState::CreatingRequest);
        assert!(matches!(h.next().await, ClientState::ReadyToAuthorize(_)));

        h.client.authorize().await.unwrap();
        assert_eq!(h.next().await, ClientState::Authorizing);
        assert_eq!(h.next().await, ClientState::PollingStatus);
        let ClientState::Approved(snap) = h.next().await else {
            panic!("expected Approved");
        };
        assert_eq!(snap.grants.len(), 1);
        assert_eq!(h.gateway.retrieve_calls(), 2);
        assert_eq!(h.client.state(), MachineState::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_state_poll_detects_decline() {
        let gateway = FakeGateway::default();
        gateway
            .retrieves
            .lock()
            .unwrap()
            .push_back(Ok(snapshot("DECLINED", 0)));
        let mut h = Harness::new(true, gateway).await;
        h.client
            .create_request(one_time_500(), "shop://done", None)
            .await
            .unwrap();
        assert_eq!(h.next().await, ClientState::CreatingRequest);
        assert!(matches!(h.next().await, ClientState::ReadyToAuthorize(_)));
        assert_eq!(h.next().await, ClientState::Declined);
    }

    #[tokio::test(start_paused = true)]
    async fn existing_processing_request_polls_directly() {
        let gateway = FakeGateway::default();
        gateway
            .retrieves
            .lock()
            .unwrap()
            .push_back(Ok(snapshot("PROCESSING", 0)));
        let mut h = Harness::new(true, gateway).await;
        h.client.start_with_existing("GRR_1").await.unwrap();
        assert_eq!(h.next().await, ClientState::RetrievingExistingRequest);
        assert_eq!(h.next().await, ClientState::PollingStatus);
        assert_eq!(
            h.client.active_states(),
            vec![StateId::Authorizing, StateId::Polling]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_failure_moves_to_exception() {
        let gateway = FakeGateway::default();
        gateway
            .creates
            .lock()
            .unwrap()
            .push_back(Err(GatewayError::connectivity(Some(503), "HTTP 503")));
        let mut h = Harness::new(false, gateway).await;
        h.client
            .create_request(one_time_500(), "shop://done", None)
            .await
            .unwrap();
        assert_eq!(h.next().await, ClientState::CreatingRequest);
        let ClientState::Exception(TransactionError::Gateway(error)) = h.next().await else {
            panic!("expected a gateway exception");
        };
        assert!(error.is_connectivity());
    }

    #[tokio::test(start_paused = true)]
    async fn api_failure_exposes_server_fields() {
        let api = ApiError::new("INVALID_REQUEST_ERROR", "INVALID_VALUE")
            .with_detail("amount must be positive")
            .with_field("amount");
        let gateway = FakeGateway::default();
        gateway
            .creates
            .lock()
            .unwrap()
            .push_back(Err(api.clone().into()));
        let mut h = Harness::new(true, gateway).await;
        h.client
            .create_request(one_time_500(), "shop://done", None)
            .await
            .unwrap();
        assert_eq!(h.next().await, ClientState::CreatingRequest);
        assert_eq!(
            h.next().await,
            ClientState::Exception(TransactionError::Gateway(GatewayError::Api(api)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn update_uses_current_reference_and_returns_to_ready() {
        let mut h = Harness::new(true, FakeGateway::default()).await;
        h.client
            .create_request(one_time_500(), "shop://done", Some("order-7".to_owned()))
            .await
            .unwrap();
        assert_eq!(h.next().await, ClientState::CreatingRequest);
        assert!(matches!(h.next().await, ClientState::ReadyToAuthorize(_)));

        let actions = vec![Action::one_time("BRAND_1", Some(Money::usd(750)))];
        h.client
            .update_request("GRR_1", actions.clone())
            .await
            .unwrap();
        assert_eq!(h.next().await, ClientState::UpdatingRequest);
        assert!(matches!(h.next().await, ClientState::ReadyToAuthorize(_)));

        let updated = h.gateway.updated.lock().unwrap().clone();
        assert_eq!(updated[0].0, "GRR_1");
        assert_eq!(updated[0].1.actions, actions);
        assert_eq!(updated[0].1.reference_id.as_deref(), Some("order-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn strict_mode_returns_illegal_update() {
        let h = Harness::new(true, FakeGateway::default()).await;
        let error = h
            .client
            .update_request("GRR_1", one_time_500())
            .await
            .unwrap_err();
        assert!(matches!(error, IntegrationError::IllegalTransition { .. }));
        assert_eq!(h.client.state(), MachineState::NotStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn lenient_mode_moves_illegal_update_to_exception() {
        let mut h = Harness::new(false, FakeGateway::default()).await;
        h.client
            .update_request("GRR_1", one_time_500())
            .await
            .unwrap();
        let ClientState::Exception(TransactionError::Integration(error)) = h.next().await else {
            panic!("expected an integration exception");
        };
        assert!(matches!(error, IntegrationError::IllegalTransition { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_actions_are_rejected() {
        let h = Harness::new(true, FakeGateway::default()).await;
        assert_eq!(
            h.client.create_request(Vec::new(), "shop://done", None).await,
            Err(IntegrationError::EmptyActions)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn operations_need_a_listener() {
        let gateway = Arc::new(FakeGateway::default());
        let client = WalletPayClient::builder(
            ClientConfig::sandbox("CAS-CI_TEST"),
            gateway,
            Arc::new(accept),
        )
        .build();
        assert_eq!(
            client.start_with_existing("GRR_1").await,
            Err(IntegrationError::ListenerNotRegistered("start_with_existing"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn finished_request_rejects_calls_in_both_modes() {
        for strict in [true, false] {
            let gateway = FakeGateway::default();
            gateway
                .retrieves
                .lock()
                .unwrap()
                .push_back(Ok(snapshot("APPROVED", 1)));
            let mut h = Harness::new(strict, gateway).await;
            h.client.start_with_existing("GRR_1").await.unwrap();
            assert_eq!(h.next().await, ClientState::RetrievingExistingRequest);
            assert!(matches!(h.next().await, ClientState::Approved(_)));
            assert!(matches!(
                h.client.authorize().await,
                Err(IntegrationError::AlreadyFinished { .. })
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handoff_moves_to_exception() {
        let mut h = Harness::with_launcher(true, FakeGateway::default(), Arc::new(refuse)).await;
        h.client
            .create_request(one_time_500(), "shop://done", None)
            .await
            .unwrap();
        assert_eq!(h.next().await, ClientState::CreatingRequest);
        assert!(matches!(h.next().await, ClientState::ReadyToAuthorize(_)));
        h.client.authorize().await.unwrap();
        assert_eq!(h.next().await, ClientState::Authorizing);
        assert!(matches!(
            h.next().await,
            ClientState::Exception(TransactionError::Handoff(HandoffError::NoHandler(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn background_pauses_polling() {
        let gateway = FakeGateway::default();
        gateway
            .retrieves
            .lock()
            .unwrap()
            .push_back(Ok(snapshot("PROCESSING", 0)));
        let mut h = Harness::new(true, gateway).await;
        h.client.start_with_existing("GRR_1").await.unwrap();
        assert_eq!(h.next().await, ClientState::RetrievingExistingRequest);
        assert_eq!(h.next().await, ClientState::PollingStatus);
        let before = h.gateway.retrieve_calls();

        h.client
            .on_lifecycle(LifecycleSignal::Background)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.gateway.retrieve_calls(), before);

        h.client
            .on_lifecycle(LifecycleSignal::Foreground)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.gateway.retrieve_calls() > before);
        assert_eq!(
            h.client.state(),
            MachineState::Authorizing(crate::machine::AuthorizingState::Polling)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_bridge_pauses_and_resumes_polling() {
        let gateway = FakeGateway::default();
        gateway
            .retrieves
            .lock()
            .unwrap()
            .push_back(Ok(snapshot("PROCESSING", 0)));
        let mut h = Harness::new(true, gateway).await;
        let (signals, rx) = mpsc::channel(4);
        let bridge = h.client.bridge_lifecycle(rx);
        h.client.start_with_existing("GRR_1").await.unwrap();
        assert_eq!(h.next().await, ClientState::RetrievingExistingRequest);
        assert_eq!(h.next().await, ClientState::PollingStatus);
        let before = h.gateway.retrieve_calls();

        signals.send(LifecycleSignal::Background).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.gateway.retrieve_calls(), before);

        signals.send(LifecycleSignal::Foreground).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.gateway.retrieve_calls() > before);

        bridge.stop();
        signals.send(LifecycleSignal::Background).await.ok();
        let after_stop = h.gateway.retrieve_calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.gateway.retrieve_calls() > after_stop);
    }

    #[tokio::test]
    async fn telemetry_is_uploaded_through_gateway() {
        let options = AnalyticsOptions {
            initial_delay: Duration::from_secs(3600),
            ..AnalyticsOptions::default()
        };
        let analytics = Analytics::start(&options).unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let client = WalletPayClient::builder(
            ClientConfig::sandbox("CAS-CI_TEST"),
            gateway.clone(),
            Arc::new(accept),
        )
        .with_analytics(analytics.clone())
        .build();
        let (tx, mut states) = mpsc::unbounded_channel();
        client
            .register_listener(Arc::new(move |state: ClientState| {
                let _ = tx.send(state);
            }))
            .await;
        client
            .create_request(one_time_500(), "shop://done", None)
            .await
            .unwrap();
        while let Some(state) = states.recv().await {
            if matches!(state, ClientState::ReadyToAuthorize(_)) {
                break;
            }
        }

        analytics.dispatch().await.unwrap();
        let events: Vec<serde_json::Value> = gateway
            .uploads
            .lock()
            .unwrap()
            .iter()
            .map(|e| serde_json::from_str(e).unwrap())
            .collect();
        let names: Vec<&str> = events.iter().filter_map(|e| e["event"].as_str()).collect();
        assert!(names.contains(&"walletpay.initialize"));
        assert!(names.contains(&"walletpay.listener"));
        let states: Vec<&str> = events.iter().filter_map(|e| e["state"].as_str()).collect();
        assert_eq!(states, vec!["CreatingRequest", "ReadyToAuthorize"]);
        assert!(analytics.store().entries(EVENTSTREAM_TYPE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn analytics_starts_from_config_options() {
        let mut config = ClientConfig::sandbox("CAS-CI_TEST");
        config.analytics.initial_delay = Duration::from_secs(3600);
        let gateway = Arc::new(FakeGateway::default());
        let client = WalletPayClient::builder(config, gateway.clone(), Arc::new(accept)).build();
        client
            .register_listener(Arc::new(|_: ClientState| {}))
            .await;

        let analytics = client.analytics().expect("analytics started from config");
        analytics.dispatch().await.unwrap();
        let uploads = gateway.uploads.lock().unwrap().clone();
        assert!(uploads.iter().any(|e| e.contains("walletpay.listener")));
    }

    #[tokio::test]
    async fn disabled_analytics_records_nothing() {
        let mut config = ClientConfig::sandbox("CAS-CI_TEST");
        config.analytics.enabled = false;
        let client = WalletPayClient::builder(
            config,
            Arc::new(FakeGateway::default()),
            Arc::new(accept),
        )
        .build();
        assert!(client.analytics().is_none());
    }
}
