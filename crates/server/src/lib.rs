//! HTTP front end for ferry.
//!
//! The binary wires configuration, stores and the dispatcher together; this
//! library target exposes the router and shared state so they can be driven
//! in-process by integration tests.

pub mod api;
pub mod metrics;
pub mod state;
