//! Runs the machine: owns state and context on one task, executes effects.
//!
//! Commands arrive over a channel and are handled one at a time, so the
//! context is never mutated concurrently. Effects that need I/O run on
//! worker tasks. Each worker gets a [`CancellationToken`] and the generation
//! number current when it was spawned; exiting a state cancels the token and
//! bumps the generation, and events from older generations are dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use walletpay_proto::ResponseSnapshot;

use super::context::TransactionContext;
use super::effect::{Effect, GatewayCall, PollKind};
use super::event::Event;
use super::state::{MachineState, StateId};
use super::transition::transition;
use crate::error::{IntegrationError, TransactionError};
use crate::gateway::NetworkGateway;
use crate::handoff::{self, HandoffLauncher};

/// Shortest delay between two status polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Settings the driver needs from the client configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Merchant client id passed to every gateway call.
    pub client_id: String,
    /// Poll interval in `ReadyToAuthorize`. Raised to [`MIN_POLL_INTERVAL`].
    pub ready_poll_interval: Duration,
    /// Poll interval in `Authorizing.Polling`. Raised to [`MIN_POLL_INTERVAL`].
    pub authorizing_poll_interval: Duration,
}

/// A state the machine entered, with the snapshot current at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// The entered state.
    pub state: MachineState,
    /// The latest response snapshot.
    pub response: Option<ResponseSnapshot>,
}

enum Command {
    Dispatch {
        event: Event,
        reply: Option<oneshot::Sender<Result<(), IntegrationError>>>,
    },
    Worker {
        generation: u64,
        event: Event,
    },
}

/// Cloneable sender of events into a running machine.
#[derive(Debug, Clone)]
pub struct EventSender {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dispatch { event, .. } => f.debug_tuple("Dispatch").field(event).finish(),
            Self::Worker { generation, event } => f
                .debug_struct("Worker")
                .field("generation", generation)
                .field("event", event)
                .finish(),
        }
    }
}

impl EventSender {
    /// Sends an event and waits until the machine has handled it.
    ///
    /// # Errors
    ///
    /// Returns the rejection produced by the transition, or
    /// [`IntegrationError::MachineStopped`] if the driver is gone.
    pub async fn send(&self, event: Event) -> Result<(), IntegrationError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Dispatch {
                event,
                reply: Some(reply),
            })
            .map_err(|_| IntegrationError::MachineStopped)?;
        answer.await.map_err(|_| IntegrationError::MachineStopped)?
    }

    /// Sends an event without waiting. Rejections are logged by the driver.
    pub fn post(&self, event: Event) {
        if self
            .commands
            .send(Command::Dispatch { event, reply: None })
            .is_err()
        {
            tracing::debug!("machine stopped; event dropped");
        }
    }
}

/// Owner handle of a running machine. Dropping it stops the driver and
/// cancels any worker.
#[derive(Debug)]
pub struct MachineHandle {
    sender: EventSender,
    state: watch::Receiver<MachineState>,
    _stop: DropGuard,
}

impl MachineHandle {
    /// Returns a sender for feeding events from elsewhere.
    #[must_use]
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Sends an event and waits until the machine has handled it.
    ///
    /// # Errors
    ///
    /// See [`EventSender::send`].
    pub async fn send(&self, event: Event) -> Result<(), IntegrationError> {
        self.sender.send(event).await
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> MachineState {
        self.state.borrow().clone()
    }

    /// Returns the active state set.
    #[must_use]
    pub fn active_states(&self) -> Vec<StateId> {
        self.state.borrow().active_states()
    }

    /// Returns a receiver that observes the current state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<MachineState> {
        self.state.clone()
    }
}

/// The task that owns a machine.
pub struct MachineDriver {
    config: DriverConfig,
    gateway: Arc<dyn NetworkGateway>,
    launcher: Arc<dyn HandoffLauncher>,
    state: MachineState,
    ctx: TransactionContext,
    generation: u64,
    worker: Option<CancellationToken>,
    commands: mpsc::UnboundedSender<Command>,
    published: watch::Sender<MachineState>,
    changes: mpsc::UnboundedSender<StateChange>,
}

impl std::fmt::Debug for MachineDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineDriver")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl MachineDriver {
    /// Spawns a machine in [`MachineState::NotStarted`].
    ///
    /// Returns the owner handle and a stream of entered states, in order.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(
        config: DriverConfig,
        gateway: Arc<dyn NetworkGateway>,
        launcher: Arc<dyn HandoffLauncher>,
    ) -> (MachineHandle, mpsc::UnboundedReceiver<StateChange>) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (published, state) = watch::channel(MachineState::NotStarted);
        let (changes, change_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let driver = Self {
            config,
            gateway,
            launcher,
            state: MachineState::NotStarted,
            ctx: TransactionContext::default(),
            generation: 0,
            worker: None,
            commands: commands.clone(),
            published,
            changes,
        };
        tokio::spawn(driver.run(inbox, stop.clone()));

        let handle = MachineHandle {
            sender: EventSender { commands },
            state,
            _stop: stop.drop_guard(),
        };
        (handle, change_rx)
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>, stop: CancellationToken) {
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                command = inbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        self.cancel_worker();
        tracing::debug!(state = self.state.name(), "machine stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Dispatch { event, reply } => {
                let result = self.apply(event);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(error) = result {
                            tracing::warn!(%error, "event rejected");
                        }
                    }
                }
            }
            Command::Worker { generation, event } => {
                if generation != self.generation {
                    tracing::trace!(
                        generation,
                        current = self.generation,
                        event = event.name(),
                        "dropping stale worker event"
                    );
                    return;
                }
                if let Err(error) = self.apply(event) {
                    tracing::warn!(%error, "worker event rejected");
                }
            }
        }
    }

    fn apply(&mut self, event: Event) -> Result<(), IntegrationError> {
        let from = self.state.name();
        let event_name = event.name();
        let outcome = transition(&mut self.state, &mut self.ctx, event)?;
        for effect in outcome.effects {
            self.execute(effect);
        }
        if outcome.entered {
            tracing::info!(from, to = self.state.name(), event = event_name, "state entered");
            if let MachineState::Exception(error) = &self.state {
                tracing::error!(%error, "request moved to exception state");
            }
            self.published.send_replace(self.state.clone());
            let _ = self.changes.send(StateChange {
                state: self.state.clone(),
                response: self.ctx.snapshot().cloned(),
            });
        }
        Ok(())
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::CancelWorker => self.cancel_worker(),
            Effect::Call(call) => {
                let (token, tx) = self.start_worker();
                let gateway = Arc::clone(&self.gateway);
                let client_id = self.config.client_id.clone();
                tokio::spawn(async move {
                    let result = tokio::select! {
                        () = token.cancelled() => return,
                        result = call_gateway(gateway.as_ref(), &client_id, &call) => result,
                    };
                    let event = match result {
                        Ok(snapshot) => Event::RequestSucceeded(snapshot),
                        Err(error) => Event::Failed(error),
                    };
                    tx.send(event);
                });
            }
            Effect::StartPolling { kind, request_id } => {
                let (token, tx) = self.start_worker();
                let gateway = Arc::clone(&self.gateway);
                let client_id = self.config.client_id.clone();
                let interval = match kind {
                    PollKind::Ready => self.config.ready_poll_interval,
                    PollKind::Authorizing => self.config.authorizing_poll_interval,
                }
                .max(MIN_POLL_INTERVAL);
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            () = token.cancelled() => return,
                            () = tokio::time::sleep(interval) => {}
                        }
                        let result = tokio::select! {
                            () = token.cancelled() => return,
                            result = gateway.retrieve(&client_id, &request_id) => result,
                        };
                        match result {
                            Ok(snapshot) => tx.send(Event::PollSucceeded(snapshot)),
                            Err(error) => {
                                tx.send(Event::Failed(error.into()));
                                return;
                            }
                        }
                    }
                });
            }
            Effect::LaunchHandoff { url } => {
                let (token, tx) = self.start_worker();
                let launcher = Arc::clone(&self.launcher);
                tokio::spawn(async move {
                    if token.is_cancelled() {
                        return;
                    }
                    let event = match handoff::launch(launcher.as_ref(), url.as_deref()) {
                        Ok(()) => Event::HandoffLaunched,
                        Err(error) => Event::Failed(error.into()),
                    };
                    tx.send(event);
                });
            }
        }
    }

    fn start_worker(&mut self) -> (CancellationToken, WorkerSender) {
        let token = CancellationToken::new();
        self.worker = Some(token.clone());
        let tx = WorkerSender {
            generation: self.generation,
            commands: self.commands.clone(),
        };
        (token, tx)
    }

    fn cancel_worker(&mut self) {
        self.generation += 1;
        if let Some(token) = self.worker.take() {
            token.cancel();
        }
    }
}

struct WorkerSender {
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl WorkerSender {
    fn send(&self, event: Event) {
        let _ = self.commands.send(Command::Worker {
            generation: self.generation,
            event,
        });
    }
}

async fn call_gateway(
    gateway: &dyn NetworkGateway,
    client_id: &str,
    call: &GatewayCall,
) -> Result<ResponseSnapshot, TransactionError> {
    let result = match call {
        GatewayCall::Create(params) => gateway.create(client_id, params).await,
        GatewayCall::Update { request_id, params } => {
            gateway.update(client_id, request_id, params).await
        }
        GatewayCall::Retrieve { request_id } => gateway.retrieve(client_id, request_id).await,
    };
    result.map_err(TransactionError::from)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use url::Url;
    use walletpay_proto::{
        Action, Channel, Money, RequestParams, UpdateRequestParams, UploadSummary,
    };

    use super::*;
    use crate::error::{GatewayError, HandoffError};
    use crate::machine::AuthorizingState;
    use crate::gateway::{BoxFuture, GatewayResult};

    fn snapshot(status: &str, reference: &str) -> ResponseSnapshot {
        serde_json::from_value(serde_json::json!({
            "id": "GRR_1",
            "status": status,
            "actions": [{
                "type": "ONE_TIME_PAYMENT",
                "scope_id": "BRAND_1",
                "amount": 500,
                "currency": "USD",
            }],
            "auth_flow_triggers": { "mobile_url": "https://cash.app/authorize/GRR_1" },
            "reference_id": reference,
            "grants": [],
        }))
        .unwrap()
    }

    /// Answers creates at once, updates after a scripted delay, and counts
    /// retrieves.
    #[derive(Default)]
    struct SlowGateway {
        updates: Mutex<VecDeque<(Duration, &'static str)>>,
        existing_status: Mutex<Option<&'static str>>,
        retrieves: Mutex<usize>,
    }

    impl NetworkGateway for SlowGateway {
        fn create<'a>(
            &'a self,
            _client_id: &'a str,
            _params: &'a RequestParams,
        ) -> BoxFuture<'a, GatewayResult> {
            Box::pin(async { Ok(snapshot("PENDING", "created")) })
        }

        fn update<'a>(
            &'a self,
            _client_id: &'a str,
            _request_id: &'a str,
            _params: &'a UpdateRequestParams,
        ) -> BoxFuture<'a, GatewayResult> {
            let (delay, reference) = self
                .updates
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((Duration::ZERO, "updated"));
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(snapshot("PENDING", reference))
            })
        }

        fn retrieve<'a>(
            &'a self,
            _client_id: &'a str,
            _request_id: &'a str,
        ) -> BoxFuture<'a, GatewayResult> {
            *self.retrieves.lock().unwrap() += 1;
            let status = self.existing_status.lock().unwrap().unwrap_or("PENDING");
            Box::pin(async move { Ok(snapshot(status, "existing")) })
        }

        fn upload_events<'a>(
            &'a self,
            _client_id: &'a str,
            _events: &'a [String],
        ) -> BoxFuture<'a, Result<UploadSummary, GatewayError>> {
            Box::pin(async { Ok(UploadSummary::default()) })
        }
    }

    fn accept(_: &Url) -> Result<(), HandoffError> {
        Ok(())
    }

    fn config(interval: Duration) -> DriverConfig {
        DriverConfig {
            client_id: "CAS-CI_TEST".to_owned(),
            ready_poll_interval: interval,
            authorizing_poll_interval: interval,
        }
    }

    fn params() -> RequestParams {
        RequestParams {
            actions: vec![Action::one_time("BRAND_1", Some(Money::usd(500)))],
            redirect_url: "shop://done".to_owned(),
            reference_id: None,
            channel: Channel::InApp,
        }
    }

    fn update(reference: &str) -> Event {
        Event::UpdateRequest {
            request_id: "GRR_1".to_owned(),
            actions: vec![Action::one_time(reference, Some(Money::usd(750)))],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slower_superseded_update_does_not_move_the_machine() {
        let gateway = Arc::new(SlowGateway::default());
        gateway.updates.lock().unwrap().extend([
            (Duration::from_secs(5), "first"),
            (Duration::from_secs(10), "second"),
        ]);
        let (machine, mut changes) =
            MachineDriver::spawn(config(Duration::from_secs(3600)), gateway, Arc::new(accept));

        machine.send(Event::CreateRequest(params())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(machine.state(), MachineState::ReadyToAuthorize);

        machine.send(update("BRAND_1")).await.unwrap();
        machine.send(update("BRAND_2")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(machine.state(), MachineState::UpdatingRequest);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(machine.state(), MachineState::ReadyToAuthorize);

        let mut references = Vec::new();
        while let Ok(change) = changes.try_recv() {
            if change.state == MachineState::ReadyToAuthorize {
                references.push(change.response.unwrap().reference_id.unwrap());
            }
        }
        assert_eq!(references, vec!["created", "second"]);
    }

    #[tokio::test]
    async fn worker_events_from_an_exited_state_are_dropped() {
        let (commands, _inbox) = mpsc::unbounded_channel();
        let (published, _state) = watch::channel(MachineState::NotStarted);
        let (changes, _change_rx) = mpsc::unbounded_channel();
        let mut driver = MachineDriver {
            config: config(Duration::from_secs(3600)),
            gateway: Arc::new(SlowGateway::default()),
            launcher: Arc::new(accept),
            state: MachineState::NotStarted,
            ctx: TransactionContext::default(),
            generation: 0,
            worker: None,
            commands,
            published,
            changes,
        };

        driver.handle(Command::Dispatch {
            event: Event::CreateRequest(params()),
            reply: None,
        });
        assert_eq!(driver.state, MachineState::CreatingRequest);
        let current = driver.generation;

        driver.handle(Command::Worker {
            generation: current - 1,
            event: Event::RequestSucceeded(snapshot("PENDING", "stale")),
        });
        assert_eq!(driver.state, MachineState::CreatingRequest);
        assert!(driver.ctx.snapshot().is_none());

        driver.handle(Command::Worker {
            generation: current,
            event: Event::RequestSucceeded(snapshot("PENDING", "fresh")),
        });
        assert_eq!(driver.state, MachineState::ReadyToAuthorize);
        assert_eq!(
            driver.ctx.snapshot().and_then(|s| s.reference_id.as_deref()),
            Some("fresh")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_is_raised_to_the_minimum() {
        let gateway = Arc::new(SlowGateway::default());
        *gateway.existing_status.lock().unwrap() = Some("PROCESSING");
        let (machine, _changes) =
            MachineDriver::spawn(config(Duration::ZERO), gateway.clone(), Arc::new(accept));

        machine
            .send(Event::StartWithExisting {
                request_id: "GRR_1".to_owned(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            machine.state(),
            MachineState::Authorizing(AuthorizingState::Polling)
        );
        let retrieves = *gateway.retrieves.lock().unwrap();
        assert!((2..=12).contains(&retrieves), "{retrieves} retrieves in one second");
    }
}
