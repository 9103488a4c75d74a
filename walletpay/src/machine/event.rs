//! Inputs of the state machine.
//!
//! Caller events come from the client facade. Worker events are posted by
//! background tasks the machine spawned. Lifecycle events come from the
//! lifecycle bridge.

use walletpay_proto::{Action, RequestParams, ResponseSnapshot};

use crate::error::TransactionError;

/// Something that happened and may move the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Caller: create a new request.
    CreateRequest(RequestParams),
    /// Caller: continue with a request created elsewhere.
    StartWithExisting {
        /// Request to load.
        request_id: String,
    },
    /// Caller: replace the actions of the current request.
    UpdateRequest {
        /// Request to update.
        request_id: String,
        /// New actions.
        actions: Vec<Action>,
    },
    /// Caller: send the customer to the wallet app, optionally with a
    /// snapshot obtained elsewhere.
    Authorize {
        /// Snapshot replacing the current one before launching.
        snapshot: Option<ResponseSnapshot>,
    },
    /// Worker: a create, update or retrieve call succeeded.
    RequestSucceeded(ResponseSnapshot),
    /// Worker: a status poll succeeded.
    PollSucceeded(ResponseSnapshot),
    /// Worker: the wallet app was launched.
    HandoffLaunched,
    /// Worker or caller: something failed.
    Failed(TransactionError),
    /// Lifecycle: the host app went to the background.
    Pause,
    /// Lifecycle: the host app came back to the foreground.
    Resume,
}

impl Event {
    /// Returns a stable name for logs and error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateRequest(_) => "create a request",
            Self::StartWithExisting { .. } => "start with an existing request",
            Self::UpdateRequest { .. } => "update the request",
            Self::Authorize { .. } => "authorize",
            Self::RequestSucceeded(_) => "complete a request",
            Self::PollSucceeded(_) => "record a poll",
            Self::HandoffLaunched => "record a handoff",
            Self::Failed(_) => "fail",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }

    /// Returns `true` for events that originate from the caller.
    #[must_use]
    pub const fn is_caller_event(&self) -> bool {
        matches!(
            self,
            Self::CreateRequest(_)
                | Self::StartWithExisting { .. }
                | Self::UpdateRequest { .. }
                | Self::Authorize { .. }
        )
    }
}
