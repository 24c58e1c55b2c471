//! Hub state and HTTP router

use crate::auth::Authorizer;
use crate::config::HubConfig;
use crate::server::{publish, subscribe};
use crate::subscriber::Subscriber;
use crate::subscription::subscription_updates;
use crate::topic::TopicMatcher;
use crate::transport::{new_transport, Transport, TransportError};

use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// The well-known path the hub endpoints live under.
pub const HUB_PATH: &str = "/.well-known/mercure";

/// Shared state behind both hub endpoints.
pub struct Hub {
    config: HubConfig,
    transport: Arc<dyn Transport>,
    authorizer: Authorizer,
    matcher: TopicMatcher,
}

impl Hub {
    /// Build a hub with the transport selected by `transport_url`.
    pub fn new(config: HubConfig) -> Result<Arc<Self>, TransportError> {
        let transport = new_transport(&config.transport_url)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Build a hub around an existing transport.
    pub fn with_transport(config: HubConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let authorizer = Authorizer::new(
            config.subscriber_jwt_key.as_bytes(),
            config.publisher_jwt_key.as_bytes(),
            config.jwt_algorithm,
            config.allow_anonymous,
        );

        Arc::new(Self {
            config,
            transport,
            authorizer,
            matcher: TopicMatcher::new(),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    pub(crate) fn matcher(&self) -> &TopicMatcher {
        &self.matcher
    }

    /// Announce a subscriber's lifecycle transition when enabled.
    pub(crate) async fn dispatch_subscription_updates(&self, subscriber: &Subscriber, active: bool) {
        if !self.config.dispatch_subscriptions {
            return;
        }

        for update in subscription_updates(subscriber, active) {
            if let Err(e) = self.transport.dispatch(update).await {
                debug!(subscriber = %subscriber.id(), error = %e, "Subscription update not dispatched");
            }
        }
    }

    /// Close the transport, disconnecting every subscriber.
    pub async fn stop(&self) {
        self.transport.close().await;
    }
}

/// Create the hub router.
pub fn create_router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            HUB_PATH,
            get(subscribe::subscribe_handler).post(publish::publish_handler),
        )
        .with_state(hub)
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Run the hub server until the process is stopped.
pub async fn run_server(bind_addr: SocketAddr, hub: Arc<Hub>) -> anyhow::Result<()> {
    let app = create_router(hub);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "Hub listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
