//! Data owned by a running machine.

use walletpay_proto::{RequestParams, ResponseSnapshot, UpdateRequestParams};

use crate::error::TransactionError;

/// The request currently in flight. At most one exists at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRequest {
    /// A request being created.
    Create(RequestParams),
    /// An update of an existing request.
    Update {
        /// Request being updated.
        request_id: String,
        /// New actions and reference.
        params: UpdateRequestParams,
    },
    /// A request created elsewhere being loaded.
    Existing {
        /// Request to load.
        request_id: String,
    },
}

/// Mutable record attached to the machine.
///
/// Only the machine driver mutates it, one event at a time. The response
/// snapshot is replaced wholesale by successful gateway results and never
/// patched field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionContext {
    pending: Option<PendingRequest>,
    snapshot: Option<ResponseSnapshot>,
    last_error: Option<TransactionError>,
}

impl TransactionContext {
    /// Starts a new request path, clearing the previous error.
    pub fn begin(&mut self, pending: PendingRequest) {
        self.pending = Some(pending);
        self.last_error = None;
    }

    /// Completes the pending request with the server's answer.
    pub fn complete(&mut self, snapshot: ResponseSnapshot) {
        self.pending = None;
        self.snapshot = Some(snapshot);
    }

    /// Abandons the pending request and records why.
    pub fn fail(&mut self, error: TransactionError) {
        self.pending = None;
        self.last_error = Some(error);
    }

    /// Replaces the snapshot without touching the pending slot (polling, caller-supplied).
    pub fn replace_snapshot(&mut self, snapshot: ResponseSnapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Returns the request in flight.
    #[must_use]
    pub const fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Returns the latest snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&ResponseSnapshot> {
        self.snapshot.as_ref()
    }

    /// Returns the id of the current request, if one is known.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.snapshot.as_ref().map(|s| s.id.as_str())
    }

    /// Returns the last captured error.
    #[must_use]
    pub const fn last_error(&self) -> Option<&TransactionError> {
        self.last_error.as_ref()
    }
}
