//! Hubbub - Mercure-compatible publish/subscribe hub over Server-Sent Events
//!
//! Publishers push updates tagged with topic IRIs; subscribers hold a
//! long-lived SSE connection with a list of topic selectors (exact IRIs,
//! URI Templates, or `*`) and receive every matching update until they
//! disconnect. Delivery runs through a pluggable transport: in-memory
//! broadcast, or a durable redb-backed store that can replay missed events
//! to reconnecting clients.

pub mod auth;
pub mod config;
pub mod server;
pub mod subscriber;
pub mod subscription;
pub mod topic;
pub mod transport;
pub mod update;

pub use config::HubConfig;
pub use server::{create_router, run_server, Hub};
pub use subscriber::Subscriber;
pub use transport::{LocalTransport, RedbTransport, Transport, TransportError};
pub use update::{Event, Update};
