//! Wire format types for the walletpay checkout API.
//!
//! This crate defines the serialization-level data structures exchanged with
//! the customer request API and the analytics event stream. It has minimal
//! dependencies (only `serde` and `serde_json`) and is shared by the state
//! machine crate and the HTTP gateway.
//!
//! # Modules
//!
//! - [`action`]: Payment actions and money amounts
//! - [`request`]: Customer request snapshots, statuses, grants and request bodies
//! - [`responses`]: API error payloads and the event stream envelope

pub mod action;
pub mod request;
pub mod responses;

pub use action::{Action, Currency, Money};
pub use request::{
    AuthFlowTriggers, Channel, CreateRequestBody, CustomerProfile, Grant, GrantStatus, GrantType,
    RequestEnvelope, RequestParams, RequestStatus, ResponseSnapshot, UpdateRequestBody,
    UpdateRequestParams,
};
pub use responses::{ApiErrorBody, ApiErrorDetail, EventEnvelope, UploadSummary};

/// Errors that can occur when decoding API payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A required field is missing from the JSON data.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// JSON deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
