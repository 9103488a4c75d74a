//! HTTP gateway for the walletpay checkout API.
//!
//! Implements [`walletpay::NetworkGateway`] with `reqwest`, including the
//! retry policy, authentication headers and the mapping of HTTP responses to
//! [`walletpay::GatewayError`].
//!
//! # Modules
//!
//! - [`constants`]: Endpoint URLs and header names
//! - [`error`]: Construction errors and response classification
//! - [`gateway`]: The [`HttpGateway`] client
//! - [`retry`]: Exponential back-off policy
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use walletpay::{ClientConfig, Environment, HandoffError, WalletPayClient};
//! use walletpay_http::HttpGateway;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Arc::new(HttpGateway::new(Environment::Sandbox)?);
//! let launcher = Arc::new(|_url: &url::Url| -> Result<(), HandoffError> { Ok(()) });
//! let client = WalletPayClient::builder(ClientConfig::sandbox("CAS-CI_MERCHANT"), gateway, launcher)
//!     .build();
//! # let _ = client;
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod error;
pub mod gateway;
pub mod retry;

pub use error::HttpGatewayError;
pub use gateway::HttpGateway;
pub use retry::RetryPolicy;
