//! Rust SDK for the XR Voyage event bus.
//!
//! The crate is organized by transport surface:
//! - `stream`: websocket session, wire schema and ingress handler registry.
//! - `egress`: REST publishing of outbound events.
//! - `api` / `entities`: authenticated REST client and entity CRUD.
//! - `auth`: bearer token strategies shared by both transports.
//! - `client`: builder-based registration surface tying it together.
//! - `config` / `logging`: environment settings and tracing setup.

/// Authenticated REST client and error type.
pub mod api;
/// Session-token and key-pair bearer token strategies.
pub mod auth;
/// `XrClient` and its builder.
pub mod client;
/// Environment-sourced settings.
pub mod config;
/// Outbound event publishing.
pub mod egress;
/// Entity CRUD and data webhooks.
pub mod entities;
/// Tracing subscriber setup.
pub mod logging;
/// Websocket session, protocol types, and handler registry.
pub mod stream;

/// Version of this SDK.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
