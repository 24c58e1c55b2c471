//! Hubbub CLI entry point

mod cli;

use crate::cli::{Cli, Commands, TokenRole};
use anyhow::{Context, Result};
use clap::Parser;
use hubbub::{run_server, Hub, HubConfig};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            transport_url,
            subscriber_jwt_key,
            publisher_jwt_key,
            heartbeat_interval,
            allow_anonymous,
            dispatch_subscriptions,
            debug,
        } => {
            let config = HubConfig {
                transport_url,
                heartbeat_interval: Duration::from_secs(heartbeat_interval),
                dispatch_subscriptions,
                debug,
                allow_anonymous,
                publisher_jwt_key: publisher_jwt_key.unwrap_or_else(|| subscriber_jwt_key.clone()),
                subscriber_jwt_key,
                ..HubConfig::default()
            };

            let bind_addr = bind.parse().context("Invalid bind address")?;
            let hub = Hub::new(config).context("Failed to initialize transport")?;

            run_server(bind_addr, hub).await
        }
        Commands::Token {
            role,
            selectors,
            key,
            ttl,
        } => {
            let (subscribe, publish) = match role {
                TokenRole::Subscriber => (Some(selectors), None),
                TokenRole::Publisher => (None, Some(selectors)),
            };

            let token = hubbub::auth::mint_token(
                key.as_bytes(),
                subscribe,
                publish,
                Duration::from_secs(ttl),
            )
            .context("Failed to sign token")?;

            println!("{token}");
            Ok(())
        }
    }
}
