//! Endpoints and header names of the checkout API.

use walletpay::Environment;

/// Customer request API, production.
pub const PRODUCTION_API_URL: &str = "https://api.cash.app/customer-request/v1/";

/// Customer request API, sandbox.
pub const SANDBOX_API_URL: &str = "https://sandbox.api.cash.app/customer-request/v1/";

/// Analytics event stream, production.
pub const PRODUCTION_EVENTSTREAM_URL: &str = "https://api.squareup.com/2.0/log/eventstream";

/// Analytics event stream, sandbox.
pub const SANDBOX_EVENTSTREAM_URL: &str = "https://api.squareupstaging.com/2.0/log/eventstream";

/// Header carrying the SDK version.
pub const CLIENT_VERSION_HEADER: &str = "X-Client-Version";

/// Scheme of the `Authorization` header value: `Client <client id>`.
pub const AUTHORIZATION_SCHEME: &str = "Client";

/// Path of the requests collection relative to the API base URL.
pub const REQUESTS_PATH: &str = "requests";

/// Returns the API base URL for `environment`.
#[must_use]
pub const fn api_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Sandbox => SANDBOX_API_URL,
        Environment::Production => PRODUCTION_API_URL,
    }
}

/// Returns the event stream URL for `environment`.
#[must_use]
pub const fn eventstream_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Sandbox => SANDBOX_EVENTSTREAM_URL,
        Environment::Production => PRODUCTION_EVENTSTREAM_URL,
    }
}

/// Returns the `User-Agent` sent with every request.
#[must_use]
pub fn user_agent() -> String {
    format!("walletpay-rs/{}", walletpay::SDK_VERSION)
}
