//! Ship event stream modules.
//!
//! - `proto`: wire schema of events and channel batches.
//! - `registry`: event-type keyed handlers and dispatch.
//! - `client`: websocket transport and the receive loop.
//! - `session`: connection lifecycle with observable state.

/// Websocket transport and receive loop.
pub mod client;
/// Event and batch wire types.
pub mod proto;
/// Ingress handler registry.
pub mod registry;
/// Session lifecycle wrapper.
pub mod session;
