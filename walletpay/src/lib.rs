#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Client-side checkout flow for paying with an external wallet app.
//!
//! A checkout moves through a negotiation with the wallet provider: create a
//! customer request, wait for the customer to authorize it in the wallet
//! app, poll until it is approved or declined. This crate drives that
//! negotiation as a state machine, runs its network calls and polls on
//! background tasks, and batches telemetry into a durable local queue.
//!
//! # Overview
//!
//! ```text
//! host app ─▶ WalletPayClient ─▶ machine (transition + driver) ─▶ NetworkGateway
//!     ▲              │                       │
//!     └─ StateListener ◀── state changes ────┘
//!
//! TransactionTelemetry ─▶ Analytics (EventStore + DeliveryWorker) ─▶ EventStreamHandler ─▶ NetworkGateway
//! ```
//!
//! # Modules
//!
//! - [`client`] - The public facade and its strict/lenient error policy
//! - [`machine`] - States, events, effects, the pure transition function and its driver
//! - [`gateway`] - Network operations the machine depends on
//! - [`analytics`] - Durable analytics queue and delivery engine
//! - [`listener`] - Externally visible states and the listener trait
//! - [`lifecycle`] - Foreground/background relay
//! - [`handoff`] - Launching the wallet app
//! - [`config`] - Client and analytics configuration
//! - [`error`] - Error types
//!
//! The default [`NetworkGateway`](gateway::NetworkGateway) over HTTPS lives in
//! the `walletpay-http` crate.

pub mod analytics;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handoff;
pub mod lifecycle;
pub mod listener;
pub mod machine;

pub use client::{WalletPayClient, WalletPayClientBuilder};
pub use config::{AnalyticsOptions, ClientConfig, Environment, SDK_VERSION};
pub use error::{
    ApiError, GatewayError, HandoffError, IntegrationError, StoreError, TransactionError,
};
pub use gateway::NetworkGateway;
pub use handoff::HandoffLauncher;
pub use lifecycle::{LifecycleBridge, LifecycleSignal};
pub use listener::{ClientState, StateListener};
pub use walletpay_proto as proto;
