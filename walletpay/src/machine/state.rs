//! States of a customer request as seen by the client.

use crate::error::TransactionError;

/// Sub-states of [`MachineState::Authorizing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorizingState {
    /// Launching the wallet app.
    DeepLinking,
    /// Waiting for the customer's decision.
    Polling,
}

/// Flat identifier of a state, used for guards and the active-state snapshot.
///
/// A nested state is active together with its parent: while polling, both
/// [`StateId::Authorizing`] and [`StateId::Polling`] are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateId {
    /// See [`MachineState::NotStarted`].
    NotStarted,
    /// See [`MachineState::CreatingRequest`].
    CreatingRequest,
    /// See [`MachineState::StartingWithExistingRequest`].
    StartingWithExistingRequest,
    /// See [`MachineState::ReadyToAuthorize`].
    ReadyToAuthorize,
    /// See [`MachineState::UpdatingRequest`].
    UpdatingRequest,
    /// Parent of [`StateId::DeepLinking`] and [`StateId::Polling`].
    Authorizing,
    /// See [`AuthorizingState::DeepLinking`].
    DeepLinking,
    /// See [`AuthorizingState::Polling`].
    Polling,
    /// See [`MachineState::Exception`].
    Exception,
    /// See [`MachineState::Approved`].
    Approved,
    /// See [`MachineState::Declined`].
    Declined,
}

/// Lifecycle state of one customer request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MachineState {
    /// Nothing has been requested yet.
    #[default]
    NotStarted,
    /// Creating the request on the server.
    CreatingRequest,
    /// Loading a request created elsewhere.
    StartingWithExistingRequest,
    /// The request exists and waits for the customer to start authorizing.
    ReadyToAuthorize,
    /// Replacing the actions of the request.
    UpdatingRequest,
    /// The customer was sent to the wallet app.
    Authorizing(AuthorizingState),
    /// The request failed. No further transitions.
    Exception(TransactionError),
    /// The customer approved. Terminal.
    Approved,
    /// The customer declined. Terminal.
    Declined,
}

impl MachineState {
    /// Returns the identifier of this state (the innermost one for nested states).
    #[must_use]
    pub const fn id(&self) -> StateId {
        match self {
            Self::NotStarted => StateId::NotStarted,
            Self::CreatingRequest => StateId::CreatingRequest,
            Self::StartingWithExistingRequest => StateId::StartingWithExistingRequest,
            Self::ReadyToAuthorize => StateId::ReadyToAuthorize,
            Self::UpdatingRequest => StateId::UpdatingRequest,
            Self::Authorizing(AuthorizingState::DeepLinking) => StateId::DeepLinking,
            Self::Authorizing(AuthorizingState::Polling) => StateId::Polling,
            Self::Exception(_) => StateId::Exception,
            Self::Approved => StateId::Approved,
            Self::Declined => StateId::Declined,
        }
    }

    /// Returns every active state, outermost first.
    #[must_use]
    pub fn active_states(&self) -> Vec<StateId> {
        match self {
            Self::Authorizing(_) => vec![StateId::Authorizing, self.id()],
            _ => vec![self.id()],
        }
    }

    /// Returns `true` if any of `allowed` is active.
    #[must_use]
    pub fn is_any_active(&self, allowed: &[StateId]) -> bool {
        self.active_states().iter().any(|s| allowed.contains(s))
    }

    /// Returns `true` for [`MachineState::Approved`] and [`MachineState::Declined`].
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Declined)
    }

    /// Returns `true` for states that accept no further transitions.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Approved | Self::Declined | Self::Exception(_))
    }

    /// Returns a stable name for logs and error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::CreatingRequest => "CreatingRequest",
            Self::StartingWithExistingRequest => "StartingWithExistingRequest",
            Self::ReadyToAuthorize => "ReadyToAuthorize",
            Self::UpdatingRequest => "UpdatingRequest",
            Self::Authorizing(AuthorizingState::DeepLinking) => "Authorizing.DeepLinking",
            Self::Authorizing(AuthorizingState::Polling) => "Authorizing.Polling",
            Self::Exception(_) => "Exception",
            Self::Approved => "Approved",
            Self::Declined => "Declined",
        }
    }
}
