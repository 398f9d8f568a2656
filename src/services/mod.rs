//! Network services over a [`ChainSession`](crate::ChainSession).
//!
//! - `web` feature: Axum-based HTTP API server with JSON endpoints
//!
//! Handlers share one session through `Arc<ChainSession>`; the session's
//! dispatcher serializes everything they submit, so concurrent requests see
//! `busy` rather than interleaving on the wire.
//!
//! ```ignore
//! use std::sync::Arc;
//! use led_chain::services::{run_server, WebServerConfig};
//!
//! let session = Arc::new(ChainSession::connect(config, connector)?);
//! run_server(session, WebServerConfig::from_config(&config.web)).await?;
//! ```

pub mod api;

pub mod web;

pub use api::*;

pub use web::*;
