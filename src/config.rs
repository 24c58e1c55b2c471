//! Hub configuration

use jsonwebtoken::Algorithm;
use std::time::Duration;

/// Runtime configuration of the hub.
///
/// Populated from CLI flags and environment variables by the binary;
/// tests construct it directly.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Transport backend: `local://` or `redb://<path>[?size=<n>]`.
    pub transport_url: String,

    /// Interval between heartbeat comments on idle connections;
    /// [`Duration::ZERO`] disables heartbeats.
    pub heartbeat_interval: Duration,

    /// Announce subscriber connects/disconnects on the reserved meta-topic.
    pub dispatch_subscriptions: bool,

    /// Verbose error bodies and delivery logging.
    pub debug: bool,

    /// Accept subscribers presenting no token, with an empty authorized
    /// selector set.
    pub allow_anonymous: bool,

    /// HMAC secret verifying subscriber JWTs.
    pub subscriber_jwt_key: String,

    /// HMAC secret verifying publisher JWTs.
    pub publisher_jwt_key: String,

    /// Signature algorithm accepted on hub JWTs.
    pub jwt_algorithm: Algorithm,

    /// Bound of each subscriber's update inbox. A subscriber whose inbox
    /// overflows is disconnected rather than slowing the others down.
    pub subscriber_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            transport_url: "local://".to_string(),
            heartbeat_interval: Duration::ZERO,
            dispatch_subscriptions: false,
            debug: false,
            allow_anonymous: false,
            subscriber_jwt_key: String::new(),
            publisher_jwt_key: String::new(),
            jwt_algorithm: Algorithm::HS256,
            subscriber_capacity: 100,
        }
    }
}
