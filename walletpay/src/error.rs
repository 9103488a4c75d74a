//! Error types for the walletpay checkout flow.
//!
//! Errors are split by who is at fault:
//!
//! - [`GatewayError`]: the network gateway failed (connectivity, API rejection, bad payload)
//! - [`IntegrationError`]: the host application misused the SDK
//! - [`HandoffError`]: the wallet app could not be launched
//! - [`StoreError`]: the analytics database failed (never leaves the analytics module)
//!
//! [`TransactionError`] is the union carried by the machine's exception state.

use walletpay_proto::ApiErrorDetail;

/// Structured rejection returned by the API.
///
/// Category, code, detail and field are copied verbatim from the server payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{category}/{code}{}", suffix(.detail.as_deref(), .field.as_deref()))]
pub struct ApiError {
    /// Broad error class.
    pub category: String,
    /// Specific error code.
    pub code: String,
    /// Human-readable explanation.
    pub detail: Option<String>,
    /// Offending request field.
    pub field: Option<String>,
}

impl ApiError {
    /// Creates a new API error.
    #[must_use]
    pub fn new(category: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            code: code.into(),
            detail: None,
            field: None,
        }
    }

    /// Sets the human-readable detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Sets the offending field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl From<&ApiErrorDetail> for ApiError {
    fn from(detail: &ApiErrorDetail) -> Self {
        Self {
            category: detail.category.clone(),
            code: detail.code.clone(),
            detail: detail.detail.clone(),
            field: detail.field.clone(),
        }
    }
}

fn suffix(detail: Option<&str>, field: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(detail) = detail {
        out.push_str(": ");
        out.push_str(detail);
    }
    if let Some(field) = field {
        out.push_str(" (field: ");
        out.push_str(field);
        out.push(')');
    }
    out
}

/// Failure reported by a [`NetworkGateway`](crate::gateway::NetworkGateway).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Transport-level failure: timeout, I/O error, or a server error without
    /// a structured payload. Already retried by the gateway.
    #[error("connectivity error: {message}")]
    Connectivity {
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },

    /// Structured rejection from the server. Not retried.
    #[error("API error: {0}")]
    Api(ApiError),

    /// The server answered with a payload that could not be decoded.
    #[error("failed to decode response: {0}")]
    Deserialization(String),
}

impl GatewayError {
    /// Creates a connectivity error.
    #[must_use]
    pub fn connectivity(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` for transport-level failures.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }

    /// Returns the structured API error, if this is one.
    #[must_use]
    pub const fn as_api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ApiError> for GatewayError {
    fn from(e: ApiError) -> Self {
        Self::Api(e)
    }
}

/// Misuse of the SDK by the host application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrationError {
    /// An operation was called before a state listener was registered.
    #[error("register a state listener before calling {0}")]
    ListenerNotRegistered(&'static str),

    /// A request was created or updated without any action.
    #[error("at least one payment action is required")]
    EmptyActions,

    /// The event is not legal in the current state.
    #[error("cannot {event} while {state}")]
    IllegalTransition {
        /// Name of the rejected event.
        event: &'static str,
        /// Name of the active state.
        state: &'static str,
    },

    /// The request already reached a final state; the client is single-use.
    #[error("the request is already finished ({state}); create a new client")]
    AlreadyFinished {
        /// Name of the final state.
        state: &'static str,
    },

    /// A state that needs a request was entered before any request was known.
    #[error("no customer request is active")]
    NoActiveRequest,

    /// The machine driver is no longer running.
    #[error("the checkout machine has stopped")]
    MachineStopped,
}

/// Failure to hand the customer off to the wallet app.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    /// The current request has no mobile URL.
    #[error("no authorization URL is available for the current request")]
    MissingUrl,

    /// The mobile URL could not be parsed.
    #[error("invalid authorization URL: {0}")]
    InvalidUrl(String),

    /// Nothing on the device can open the URL.
    #[error("no handler available for {0}")]
    NoHandler(String),
}

/// Error carried by the machine's exception state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// A gateway call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The host application misused the SDK.
    #[error(transparent)]
    Integration(#[from] IntegrationError),

    /// The wallet app could not be launched.
    #[error(transparent)]
    Handoff(#[from] HandoffError),

    /// An existing request reported a status this SDK cannot act on.
    #[error("request is in an unexpected status: {0}")]
    UnknownStatus(String),
}

/// Failure of the analytics database.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Mutex was poisoned.
    #[error("mutex poisoned: {0}")]
    MutexPoisoned(String),

    /// A blocking store task failed to complete.
    #[error("store task failed: {0}")]
    Task(String),
}
