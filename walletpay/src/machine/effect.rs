//! Work requested by a transition and carried out by the driver.

use walletpay_proto::{RequestParams, UpdateRequestParams};

/// A gateway call made on state entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    /// `create`.
    Create(RequestParams),
    /// `update`.
    Update {
        /// Request to update.
        request_id: String,
        /// New actions and reference.
        params: UpdateRequestParams,
    },
    /// `retrieve`.
    Retrieve {
        /// Request to load.
        request_id: String,
    },
}

/// Which polling cadence to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    /// Slow cadence while waiting in [`ReadyToAuthorize`](super::MachineState::ReadyToAuthorize).
    Ready,
    /// Fast cadence while the customer is in the wallet app.
    Authorizing,
}

/// Side effect of a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Cancel the worker of the state being exited.
    CancelWorker,
    /// Run a gateway call and report the result.
    Call(GatewayCall),
    /// Poll the request until cancelled.
    StartPolling {
        /// Cadence.
        kind: PollKind,
        /// Request to poll.
        request_id: String,
    },
    /// Open the wallet app.
    LaunchHandoff {
        /// Authorization URL from the current snapshot.
        url: Option<String>,
    },
}
