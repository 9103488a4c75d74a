//! The transition function.
//!
//! [`transition`] is pure: it reads and updates the state and the context and
//! returns the effects to run, but never performs I/O. Every state change
//! emits [`Effect::CancelWorker`] before the entry effect of the new state, so
//! the worker of the exited state is always torn down first.

use walletpay_proto::{RequestStatus, ResponseSnapshot, UpdateRequestParams};

use super::context::{PendingRequest, TransactionContext};
use super::effect::{Effect, GatewayCall, PollKind};
use super::event::Event;
use super::state::{AuthorizingState, MachineState, StateId};
use crate::error::{IntegrationError, TransactionError};

/// States in which [`Event::UpdateRequest`] is accepted.
pub const UPDATE_ALLOWED: &[StateId] = &[
    StateId::ReadyToAuthorize,
    StateId::Authorizing,
    StateId::UpdatingRequest,
];

/// States in which [`Event::Authorize`] is accepted.
pub const AUTHORIZE_ALLOWED: &[StateId] = &[StateId::ReadyToAuthorize, StateId::Authorizing];

/// Result of feeding one event to the machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Effects to run, in order.
    pub effects: Vec<Effect>,
    /// Whether a state was entered (including re-entry of the same state).
    pub entered: bool,
}

/// Decision taken from a poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Approved with at least one grant.
    Approved,
    /// Declined.
    Declined,
    /// Not decided yet; wait for the next tick.
    Waiting,
}

/// Classifies a polled snapshot. Identical for both polling states.
#[must_use]
pub fn classify_poll(snapshot: &ResponseSnapshot) -> PollOutcome {
    if snapshot.is_approved() {
        PollOutcome::Approved
    } else if snapshot.is_declined() {
        PollOutcome::Declined
    } else {
        PollOutcome::Waiting
    }
}

/// Picks the state to resume an existing request in.
///
/// # Errors
///
/// Returns [`TransactionError::UnknownStatus`] for any status the client
/// cannot continue from, including `APPROVED` without grants.
pub fn classify_existing(snapshot: &ResponseSnapshot) -> Result<MachineState, TransactionError> {
    if snapshot.is_approved() {
        return Ok(MachineState::Approved);
    }
    match &snapshot.status {
        RequestStatus::Declined => Ok(MachineState::Declined),
        RequestStatus::Processing => Ok(MachineState::Authorizing(AuthorizingState::Polling)),
        RequestStatus::Pending => Ok(MachineState::ReadyToAuthorize),
        other => Err(TransactionError::UnknownStatus(other.to_string())),
    }
}

/// Applies `event` to the machine.
///
/// # Errors
///
/// Returns an [`IntegrationError`] when a caller event is not legal in the
/// current state. The state and context are left untouched in that case.
/// Worker and lifecycle events that no longer apply are ignored instead.
pub fn transition(
    state: &mut MachineState,
    ctx: &mut TransactionContext,
    event: Event,
) -> Result<Outcome, IntegrationError> {
    if state.is_final() {
        if event.is_caller_event() {
            return Err(IntegrationError::AlreadyFinished {
                state: state.name(),
            });
        }
        return Ok(Outcome::default());
    }

    let name = event.name();
    let outcome = match event {
        Event::Failed(error) => {
            ctx.fail(error.clone());
            enter(state, ctx, MachineState::Exception(error))
        }
        Event::Pause => pause(state),
        Event::Resume => resume(state, ctx),
        Event::CreateRequest(params) => {
            guard(state, &[StateId::NotStarted], name)?;
            ctx.begin(PendingRequest::Create(params));
            enter(state, ctx, MachineState::CreatingRequest)
        }
        Event::StartWithExisting { request_id } => {
            guard(state, &[StateId::NotStarted], name)?;
            ctx.begin(PendingRequest::Existing { request_id });
            enter(state, ctx, MachineState::StartingWithExistingRequest)
        }
        Event::UpdateRequest {
            request_id,
            actions,
        } => {
            guard(state, UPDATE_ALLOWED, name)?;
            let reference_id = ctx.snapshot().and_then(|s| s.reference_id.clone());
            ctx.begin(PendingRequest::Update {
                request_id,
                params: UpdateRequestParams {
                    actions,
                    reference_id,
                },
            });
            enter(state, ctx, MachineState::UpdatingRequest)
        }
        Event::Authorize { snapshot } => {
            guard(state, AUTHORIZE_ALLOWED, name)?;
            if let Some(snapshot) = snapshot {
                ctx.replace_snapshot(snapshot);
            }
            enter(
                state,
                ctx,
                MachineState::Authorizing(AuthorizingState::DeepLinking),
            )
        }
        Event::RequestSucceeded(snapshot) => match state {
            MachineState::CreatingRequest | MachineState::UpdatingRequest => {
                ctx.complete(snapshot);
                enter(state, ctx, MachineState::ReadyToAuthorize)
            }
            MachineState::StartingWithExistingRequest => {
                let next = classify_existing(&snapshot);
                ctx.complete(snapshot);
                match next {
                    Ok(next) => enter(state, ctx, next),
                    Err(error) => {
                        ctx.fail(error.clone());
                        enter(state, ctx, MachineState::Exception(error))
                    }
                }
            }
            _ => Outcome::default(),
        },
        Event::PollSucceeded(snapshot) => match state {
            MachineState::ReadyToAuthorize
            | MachineState::Authorizing(AuthorizingState::Polling) => {
                let decision = classify_poll(&snapshot);
                ctx.replace_snapshot(snapshot);
                match decision {
                    PollOutcome::Approved => enter(state, ctx, MachineState::Approved),
                    PollOutcome::Declined => enter(state, ctx, MachineState::Declined),
                    PollOutcome::Waiting => Outcome::default(),
                }
            }
            _ => Outcome::default(),
        },
        Event::HandoffLaunched => match state {
            MachineState::Authorizing(AuthorizingState::DeepLinking) => enter(
                state,
                ctx,
                MachineState::Authorizing(AuthorizingState::Polling),
            ),
            _ => Outcome::default(),
        },
    };
    Ok(outcome)
}

fn guard(
    state: &MachineState,
    allowed: &[StateId],
    event: &'static str,
) -> Result<(), IntegrationError> {
    if state.is_any_active(allowed) {
        Ok(())
    } else {
        Err(IntegrationError::IllegalTransition {
            event,
            state: state.name(),
        })
    }
}

fn enter(state: &mut MachineState, ctx: &mut TransactionContext, next: MachineState) -> Outcome {
    let mut effects = vec![Effect::CancelWorker];
    match entry_effect(&next, ctx) {
        Ok(Some(effect)) => effects.push(effect),
        Ok(None) => {}
        Err(error) => {
            let error = TransactionError::from(error);
            ctx.fail(error.clone());
            *state = MachineState::Exception(error);
            return Outcome {
                effects,
                entered: true,
            };
        }
    }
    *state = next;
    Outcome {
        effects,
        entered: true,
    }
}

fn entry_effect(
    next: &MachineState,
    ctx: &TransactionContext,
) -> Result<Option<Effect>, IntegrationError> {
    let effect = match next {
        MachineState::CreatingRequest => match ctx.pending() {
            Some(PendingRequest::Create(params)) => Effect::Call(GatewayCall::Create(params.clone())),
            _ => return Err(IntegrationError::NoActiveRequest),
        },
        MachineState::UpdatingRequest => match ctx.pending() {
            Some(PendingRequest::Update { request_id, params }) => {
                Effect::Call(GatewayCall::Update {
                    request_id: request_id.clone(),
                    params: params.clone(),
                })
            }
            _ => return Err(IntegrationError::NoActiveRequest),
        },
        MachineState::StartingWithExistingRequest => match ctx.pending() {
            Some(PendingRequest::Existing { request_id }) => Effect::Call(GatewayCall::Retrieve {
                request_id: request_id.clone(),
            }),
            _ => return Err(IntegrationError::NoActiveRequest),
        },
        MachineState::Authorizing(AuthorizingState::DeepLinking) => Effect::LaunchHandoff {
            url: ctx.snapshot().and_then(ResponseSnapshot::mobile_url).map(str::to_owned),
        },
        _ => match poll_kind(next) {
            Some(kind) => Effect::StartPolling {
                kind,
                request_id: ctx
                    .request_id()
                    .ok_or(IntegrationError::NoActiveRequest)?
                    .to_owned(),
            },
            None => return Ok(None),
        },
    };
    Ok(Some(effect))
}

const fn poll_kind(state: &MachineState) -> Option<PollKind> {
    match state {
        MachineState::ReadyToAuthorize => Some(PollKind::Ready),
        MachineState::Authorizing(AuthorizingState::Polling) => Some(PollKind::Authorizing),
        _ => None,
    }
}

fn pause(state: &MachineState) -> Outcome {
    if poll_kind(state).is_none() {
        return Outcome::default();
    }
    Outcome {
        effects: vec![Effect::CancelWorker],
        entered: false,
    }
}

fn resume(state: &MachineState, ctx: &TransactionContext) -> Outcome {
    let (Some(kind), Some(request_id)) = (poll_kind(state), ctx.request_id()) else {
        return Outcome::default();
    };
    Outcome {
        effects: vec![
            Effect::CancelWorker,
            Effect::StartPolling {
                kind,
                request_id: request_id.to_owned(),
            },
        ],
        entered: false,
    }
}
