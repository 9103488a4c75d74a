//! Construction errors and response classification.

use http::StatusCode;
use walletpay::{ApiError, GatewayError};
use walletpay_proto::ApiErrorBody;

/// Errors that can occur while building an [`HttpGateway`](crate::HttpGateway).
#[derive(Debug, thiserror::Error)]
pub enum HttpGatewayError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },

    /// The URL cannot carry path segments (e.g. `mailto:`).
    #[error("URL cannot be used as a base: {0}")]
    NotABase(String),

    /// The reqwest client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Returns `true` for statuses worth retrying: 429 and 5xx.
#[must_use]
pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Maps a non-2xx response to a [`GatewayError`].
///
/// A 4xx carrying an `errors` payload is an API rejection with its fields
/// copied verbatim. Anything else (5xx, empty or foreign body) is a
/// connectivity failure tagged with the status.
#[must_use]
pub fn classify_failure(status: StatusCode, body: &[u8]) -> GatewayError {
    if status.is_client_error() {
        if let Ok(detail) = ApiErrorBody::first_from_slice(body) {
            return GatewayError::Api(ApiError::from(&detail));
        }
    }
    GatewayError::connectivity(Some(status.as_u16()), format!("HTTP {status}"))
}

/// Maps a transport failure to a [`GatewayError`].
#[must_use]
pub fn transport_failure(context: &'static str, error: &reqwest::Error) -> GatewayError {
    let kind = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    GatewayError::connectivity(
        error.status().map(|s| s.as_u16()),
        format!("{context}: {kind}: {error}"),
    )
}
