//! Async client for the Home Assistant mobile-app webhook and REST API.
//!
//! - **[`HassClient`]** posts typed [`WebhookRequest`] envelopes to the
//!   device's registered webhook and performs bearer-authenticated REST
//!   calls.
//! - **[`TransportConfig`]** centralizes TLS and timeout settings.
//! - **[`Error`]** classifies transport, auth, and server failures.

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod transport;

pub use auth::{ConnectionInfo, TokenInfo};
pub use client::HassClient;
pub use error::Error;
pub use models::{
    ApiStatus, LocationUpdate, SensorState, ServerConfig, TemplateRequest, WebhookRequest,
};
pub use transport::{TlsMode, TransportConfig};
