//! What the host application sees of the machine.

use walletpay_proto::ResponseSnapshot;

use crate::error::{IntegrationError, TransactionError};
use crate::machine::{AuthorizingState, MachineState, StateChange};

/// Externally visible state of a checkout.
///
/// A projection of [`MachineState`]: the authorizing sub-states become
/// [`ClientState::Authorizing`] and [`ClientState::PollingStatus`], and the
/// states that need the server response carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// No request yet.
    NotStarted,
    /// Creating the request.
    CreatingRequest,
    /// Replacing the actions of the request.
    UpdatingRequest,
    /// Loading a request created elsewhere.
    RetrievingExistingRequest,
    /// The request is ready; show the QR code or call `authorize`.
    ReadyToAuthorize(ResponseSnapshot),
    /// The wallet app is being launched.
    Authorizing,
    /// Waiting for the customer's decision.
    PollingStatus,
    /// The customer approved; the snapshot carries the grants.
    Approved(ResponseSnapshot),
    /// The customer declined.
    Declined,
    /// The checkout failed.
    Exception(TransactionError),
}

impl ClientState {
    /// Projects a machine state change.
    #[must_use]
    pub fn from_change(change: &StateChange) -> Self {
        let with_snapshot = |make: fn(ResponseSnapshot) -> Self| {
            change.response.clone().map_or_else(
                || Self::Exception(IntegrationError::NoActiveRequest.into()),
                make,
            )
        };
        match &change.state {
            MachineState::NotStarted => Self::NotStarted,
            MachineState::CreatingRequest => Self::CreatingRequest,
            MachineState::UpdatingRequest => Self::UpdatingRequest,
            MachineState::StartingWithExistingRequest => Self::RetrievingExistingRequest,
            MachineState::ReadyToAuthorize => with_snapshot(Self::ReadyToAuthorize),
            MachineState::Authorizing(AuthorizingState::DeepLinking) => Self::Authorizing,
            MachineState::Authorizing(AuthorizingState::Polling) => Self::PollingStatus,
            MachineState::Approved => with_snapshot(Self::Approved),
            MachineState::Declined => Self::Declined,
            MachineState::Exception(error) => Self::Exception(error.clone()),
        }
    }

    /// Returns the variant name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::CreatingRequest => "CreatingRequest",
            Self::UpdatingRequest => "UpdatingRequest",
            Self::RetrievingExistingRequest => "RetrievingExistingRequest",
            Self::ReadyToAuthorize(_) => "ReadyToAuthorize",
            Self::Authorizing => "Authorizing",
            Self::PollingStatus => "PollingStatus",
            Self::Approved(_) => "Approved",
            Self::Declined => "Declined",
            Self::Exception(_) => "Exception",
        }
    }
}

/// Receives every state the checkout enters, in order.
///
/// Called from a background task; implementations should hand the state to
/// their UI layer rather than block.
pub trait StateListener: Send + Sync {
    /// The checkout entered `state`.
    fn on_state_changed(&self, state: ClientState);
}

impl<F> StateListener for F
where
    F: Fn(ClientState) + Send + Sync,
{
    fn on_state_changed(&self, state: ClientState) {
        self(state);
    }
}
