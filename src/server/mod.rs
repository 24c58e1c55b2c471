//! Hub server
//!
//! Wires the transport, authorizer and matcher into an axum router serving
//! the subscribe (SSE) and publish endpoints.

mod hub;
mod publish;
mod subscribe;

pub use hub::{create_router, run_server, Hub};
