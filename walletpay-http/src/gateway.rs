//! A [`NetworkGateway`] that talks to the checkout API over HTTPS.
//!
//! [`HttpGateway`] handles `POST /requests`, `PATCH /requests/{id}`,
//! `GET /requests/{id}` and the analytics event stream.
//!
//! ## Features
//!
//! - Uses `reqwest` for async HTTP requests
//! - Retries transport failures, 429 and 5xx with jittered exponential back-off
//! - Reuses one idempotency key across the retries of a create or update
//! - Supports an optional per-request timeout and extra headers
//! - One `tracing` span per logical call (`walletpay.gateway.*`)
//!
//! ## Error Handling
//!
//! - Transport failures and 5xx become [`GatewayError::Connectivity`]
//! - A 4xx with an `errors` payload becomes [`GatewayError::Api`], fields verbatim
//! - A 2xx body that cannot be decoded becomes [`GatewayError::Deserialization`]

use std::time::Duration;

use http::header::{ACCEPT, AUTHORIZATION};
use http::{HeaderMap, HeaderValue, Method};
use rand::RngExt;
use rand::rng;
use reqwest::Client;
use tracing::instrument;
use url::Url;
use walletpay::gateway::{BoxFuture, GatewayResult, NetworkGateway};
use walletpay::{Environment, GatewayError};
use walletpay_proto::{
    CreateRequestBody, EventEnvelope, RequestEnvelope, RequestParams, UpdateRequestBody,
    UpdateRequestParams, UploadSummary,
};

use crate::constants::{
    AUTHORIZATION_SCHEME, CLIENT_VERSION_HEADER, REQUESTS_PATH, api_url, eventstream_url,
    user_agent,
};
use crate::error::{HttpGatewayError, classify_failure, is_retryable, transport_failure};
use crate::retry::RetryPolicy;

/// A client for the customer request API and the analytics event stream.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    /// Shared reqwest HTTP client
    client: Client,
    /// Full URL of the requests collection
    requests_url: Url,
    /// Full URL of the event stream endpoint
    eventstream_url: Url,
    /// Extra headers sent with each request
    headers: HeaderMap,
    /// Optional per-request timeout
    timeout: Option<Duration>,
    /// Retry policy for retryable failures
    retry: RetryPolicy,
}

struct Failure {
    error: GatewayError,
    retryable: bool,
}

impl HttpGateway {
    /// Creates a gateway for the public endpoints of `environment`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpGatewayError`] if the HTTP client cannot be built.
    pub fn new(environment: Environment) -> Result<Self, HttpGatewayError> {
        let api = parse(api_url(environment), "Failed to parse API URL")?;
        let events = parse(eventstream_url(environment), "Failed to parse event stream URL")?;
        Self::try_new(api, events)
    }

    /// Creates a gateway for custom endpoints.
    ///
    /// `api_base` is the directory holding the `requests` collection; a
    /// missing trailing slash is added.
    ///
    /// # Errors
    ///
    /// Returns [`HttpGatewayError`] if a URL is unusable or the HTTP client
    /// cannot be built.
    pub fn try_new(mut api_base: Url, eventstream_url: Url) -> Result<Self, HttpGatewayError> {
        if api_base.cannot_be_a_base() {
            return Err(HttpGatewayError::NotABase(api_base.to_string()));
        }
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }
        let requests_url = api_base
            .join(REQUESTS_PATH)
            .map_err(|source| HttpGatewayError::UrlParse {
                context: "Failed to construct requests URL",
                source,
            })?;
        let client = Client::builder()
            .user_agent(user_agent())
            .build()
            .map_err(HttpGatewayError::Client)?;
        Ok(Self {
            client,
            requests_url,
            eventstream_url,
            headers: HeaderMap::new(),
            timeout: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Attaches extra headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for every attempt.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the URL of the requests collection.
    #[must_use]
    pub const fn requests_url(&self) -> &Url {
        &self.requests_url
    }

    /// Returns the event stream URL.
    #[must_use]
    pub const fn eventstream_url(&self) -> &Url {
        &self.eventstream_url
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Sends `POST /requests`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] once retries are exhausted or on a
    /// non-retryable failure.
    #[instrument(name = "walletpay.gateway.create", skip_all, err)]
    pub async fn create_request(&self, client_id: &str, params: &RequestParams) -> GatewayResult {
        let body = CreateRequestBody {
            idempotency_key: idempotency_key(),
            request: params.clone(),
        };
        let bytes = self
            .send(
                Method::POST,
                self.requests_url.clone(),
                client_id,
                Some(&body),
                "POST /requests",
            )
            .await?;
        decode_snapshot(&bytes)
    }

    /// Sends `PATCH /requests/{id}`.
    ///
    /// # Errors
    ///
    /// See [`create_request`](Self::create_request).
    #[instrument(name = "walletpay.gateway.update", skip_all, fields(request_id = %request_id), err)]
    pub async fn update_request(
        &self,
        client_id: &str,
        request_id: &str,
        params: &UpdateRequestParams,
    ) -> GatewayResult {
        let body = UpdateRequestBody {
            idempotency_key: idempotency_key(),
            request: params.clone(),
        };
        let url = self.request_url(request_id)?;
        let bytes = self
            .send(
                Method::PATCH,
                url,
                client_id,
                Some(&body),
                "PATCH /requests/{id}",
            )
            .await?;
        decode_snapshot(&bytes)
    }

    /// Sends `GET /requests/{id}`.
    ///
    /// # Errors
    ///
    /// See [`create_request`](Self::create_request).
    #[instrument(name = "walletpay.gateway.retrieve", skip_all, fields(request_id = %request_id), err)]
    pub async fn retrieve_request(&self, client_id: &str, request_id: &str) -> GatewayResult {
        let url = self.request_url(request_id)?;
        let bytes = self
            .send::<()>(Method::GET, url, client_id, None, "GET /requests/{id}")
            .await?;
        decode_snapshot(&bytes)
    }

    /// Posts a batch of serialized events to the event stream.
    ///
    /// An empty response body counts every event as accepted.
    ///
    /// # Errors
    ///
    /// See [`create_request`](Self::create_request).
    #[instrument(name = "walletpay.gateway.upload_events", skip_all, fields(count = events.len()), err)]
    pub async fn upload(
        &self,
        client_id: &str,
        events: &[String],
    ) -> Result<UploadSummary, GatewayError> {
        let body = EventEnvelope {
            events: events.to_vec(),
        };
        let bytes = self
            .send(
                Method::POST,
                self.eventstream_url.clone(),
                client_id,
                Some(&body),
                "POST eventstream",
            )
            .await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(UploadSummary {
                success_count: u32::try_from(events.len()).unwrap_or(u32::MAX),
                failure_count: 0,
            });
        }
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::Deserialization(e.to_string()))
    }

    fn request_url(&self, request_id: &str) -> Result<Url, GatewayError> {
        let mut url = self.requests_url.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::connectivity(None, "requests URL cannot be a base"))?
            .push(request_id);
        Ok(url)
    }

    /// Runs a call under the retry policy and returns the 2xx body.
    async fn send<T>(
        &self,
        method: Method,
        url: Url,
        client_id: &str,
        body: Option<&T>,
        context: &'static str,
    ) -> Result<Vec<u8>, GatewayError>
    where
        T: serde::Serialize + Sync + ?Sized,
    {
        let authorization = HeaderValue::from_str(&format!("{AUTHORIZATION_SCHEME} {client_id}"))
            .map_err(|_| GatewayError::connectivity(None, "client id is not a valid header value"))?;
        let attempts = self.retry.attempts();
        let mut attempt = 1;
        loop {
            match self
                .attempt(method.clone(), url.clone(), &authorization, body, context)
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(Failure { error, retryable }) if retryable && attempt < attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(context, attempt, ?delay, %error, "retrying gateway call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Failure { error, .. }) => return Err(error),
            }
        }
    }

    async fn attempt<T>(
        &self,
        method: Method,
        url: Url,
        authorization: &HeaderValue,
        body: Option<&T>,
        context: &'static str,
    ) -> Result<Vec<u8>, Failure>
    where
        T: serde::Serialize + Sync + ?Sized,
    {
        let mut req = self
            .client
            .request(method, url)
            .header(AUTHORIZATION, authorization.clone())
            .header(ACCEPT, "application/json")
            .header(CLIENT_VERSION_HEADER, walletpay::SDK_VERSION);
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(|e| Failure {
            error: transport_failure(context, &e),
            retryable: true,
        })?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| Failure {
            error: transport_failure(context, &e),
            retryable: true,
        })?;

        if status.is_success() {
            Ok(bytes.to_vec())
        } else {
            tracing::debug!(context, status = status.as_u16(), "gateway call failed");
            Err(Failure {
                error: classify_failure(status, &bytes),
                retryable: is_retryable(status),
            })
        }
    }
}

impl NetworkGateway for HttpGateway {
    fn create<'a>(
        &'a self,
        client_id: &'a str,
        params: &'a RequestParams,
    ) -> BoxFuture<'a, GatewayResult> {
        Box::pin(self.create_request(client_id, params))
    }

    fn update<'a>(
        &'a self,
        client_id: &'a str,
        request_id: &'a str,
        params: &'a UpdateRequestParams,
    ) -> BoxFuture<'a, GatewayResult> {
        Box::pin(self.update_request(client_id, request_id, params))
    }

    fn retrieve<'a>(
        &'a self,
        client_id: &'a str,
        request_id: &'a str,
    ) -> BoxFuture<'a, GatewayResult> {
        Box::pin(self.retrieve_request(client_id, request_id))
    }

    fn upload_events<'a>(
        &'a self,
        client_id: &'a str,
        events: &'a [String],
    ) -> BoxFuture<'a, Result<UploadSummary, GatewayError>> {
        Box::pin(self.upload(client_id, events))
    }
}

/// Converts a string URL into an [`HttpGateway`] whose event stream lives at
/// `<base>/eventstream`.
impl TryFrom<&str> for HttpGateway {
    type Error = HttpGatewayError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let base = parse(&normalized, "Failed to parse base url")?;
        let events = base
            .join("eventstream")
            .map_err(|source| HttpGatewayError::UrlParse {
                context: "Failed to construct event stream URL",
                source,
            })?;
        Self::try_new(base, events)
    }
}

fn parse(url: &str, context: &'static str) -> Result<Url, HttpGatewayError> {
    Url::parse(url).map_err(|source| HttpGatewayError::UrlParse { context, source })
}

fn decode_snapshot(bytes: &[u8]) -> GatewayResult {
    RequestEnvelope::snapshot_from_slice(bytes)
        .map_err(|e| GatewayError::Deserialization(e.to_string()))
}

fn idempotency_key() -> String {
    let bytes: [u8; 16] = rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
