//! Network gateway abstraction.
//!
//! The state machine and the analytics event stream handler never talk HTTP
//! directly; they call a [`NetworkGateway`]. The `walletpay-http` crate
//! provides the default implementation. Retrying connectivity failures with
//! back-off is the gateway's job, so callers see one final result per call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use walletpay_proto::{RequestParams, ResponseSnapshot, UpdateRequestParams, UploadSummary};

use crate::error::GatewayError;

/// Boxed, `Send` future returned by gateway methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a gateway call that returns a customer request.
pub type GatewayResult = Result<ResponseSnapshot, GatewayError>;

/// Remote operations on customer requests and the analytics event stream.
///
/// All methods are async because the primary implementation performs network
/// I/O. Dropping a returned future must abort the underlying call: the state
/// machine cancels workers that way.
pub trait NetworkGateway: Send + Sync {
    /// Creates a customer request.
    fn create<'a>(
        &'a self,
        client_id: &'a str,
        params: &'a RequestParams,
    ) -> BoxFuture<'a, GatewayResult>;

    /// Replaces the actions and reference of an existing request.
    fn update<'a>(
        &'a self,
        client_id: &'a str,
        request_id: &'a str,
        params: &'a UpdateRequestParams,
    ) -> BoxFuture<'a, GatewayResult>;

    /// Fetches the latest state of a request.
    fn retrieve<'a>(
        &'a self,
        client_id: &'a str,
        request_id: &'a str,
    ) -> BoxFuture<'a, GatewayResult>;

    /// Uploads a batch of serialized analytics events.
    fn upload_events<'a>(
        &'a self,
        client_id: &'a str,
        events: &'a [String],
    ) -> BoxFuture<'a, Result<UploadSummary, GatewayError>>;
}

impl<T: NetworkGateway + ?Sized> NetworkGateway for Arc<T> {
    fn create<'a>(
        &'a self,
        client_id: &'a str,
        params: &'a RequestParams,
    ) -> BoxFuture<'a, GatewayResult> {
        (**self).create(client_id, params)
    }

    fn update<'a>(
        &'a self,
        client_id: &'a str,
        request_id: &'a str,
        params: &'a UpdateRequestParams,
    ) -> BoxFuture<'a, GatewayResult> {
        (**self).update(client_id, request_id, params)
    }

    fn retrieve<'a>(
        &'a self,
        client_id: &'a str,
        request_id: &'a str,
    ) -> BoxFuture<'a, GatewayResult> {
        (**self).retrieve(client_id, request_id)
    }

    fn upload_events<'a>(
        &'a self,
        client_id: &'a str,
        events: &'a [String],
    ) -> BoxFuture<'a, Result<UploadSummary, GatewayError>> {
        (**self).upload_events(client_id, events)
    }
}
