//! clap command definitions

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "hubbub")]
#[command(about = "Mercure-compatible SSE hub", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the hub server
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:3000", env = "HUBBUB_BIND")]
        bind: String,

        /// Transport backend: local:// or redb://<path>[?size=<n>]
        #[arg(long, default_value = "local://", env = "HUBBUB_TRANSPORT_URL")]
        transport_url: String,

        /// HMAC secret verifying subscriber JWTs
        #[arg(long, env = "HUBBUB_SUBSCRIBER_JWT_KEY")]
        subscriber_jwt_key: String,

        /// HMAC secret verifying publisher JWTs (defaults to the subscriber key)
        #[arg(long, env = "HUBBUB_PUBLISHER_JWT_KEY")]
        publisher_jwt_key: Option<String>,

        /// Seconds between heartbeat comments; 0 disables heartbeats
        #[arg(long, default_value_t = 40, env = "HUBBUB_HEARTBEAT_INTERVAL")]
        heartbeat_interval: u64,

        /// Accept subscribers without a token
        #[arg(long, env = "HUBBUB_ALLOW_ANONYMOUS")]
        allow_anonymous: bool,

        /// Announce subscriber connects/disconnects on the reserved meta-topic
        #[arg(long, env = "HUBBUB_DISPATCH_SUBSCRIPTIONS")]
        dispatch_subscriptions: bool,

        /// Verbose error bodies and delivery logging
        #[arg(long, env = "HUBBUB_DEBUG")]
        debug: bool,
    },

    /// Mint a JWT for a subscriber or publisher
    ///
    /// Examples:
    ///   hubbub token 'https://example.com/books/{id}'
    ///   hubbub token --role publisher '*'
    Token {
        /// Role the token authorizes
        #[arg(long, value_enum, default_value = "subscriber")]
        role: TokenRole,

        /// Topic selectors to authorize
        #[arg(required = true)]
        selectors: Vec<String>,

        /// HMAC secret to sign with
        #[arg(long, env = "HUBBUB_SUBSCRIBER_JWT_KEY")]
        key: String,

        /// Token lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TokenRole {
    Subscriber,
    Publisher,
}
