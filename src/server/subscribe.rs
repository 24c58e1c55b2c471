//! SSE subscribe endpoint

use crate::auth::Role;
use crate::server::hub::Hub;
use crate::subscriber::Subscriber;
use crate::update::Update;
use async_stream::stream;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::Stream;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Serve one SSE subscription.
///
/// Authorizes the request, parses its topic selectors, announces the
/// subscription, registers with the transport (which replays history for a
/// `Last-Event-ID` cursor when supported), then streams matching updates
/// until the client goes away or the transport closes.
pub(crate) async fn subscribe_handler(State(hub): State<Arc<Hub>>, request: Request) -> Response {
    let authorized = match hub.authorizer().authorize(request.headers(), Role::Subscriber) {
        Ok(selectors) => selectors,
        Err(e) => {
            debug!(error = %e, "Subscription refused");
            return (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response();
        }
    };

    let query = request.uri().query().unwrap_or("");
    let mut topics: Vec<String> = Vec::new();
    let mut last_event_id: Option<String> = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "topic" => topics.push(value.into_owned()),
            "Last-Event-ID" => last_event_id = Some(value.into_owned()),
            _ => {}
        }
    }

    if topics.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing \"topic\" parameter.\n").into_response();
    }

    // The query parameter wins over the header of the same name.
    if last_event_id.is_none() {
        last_event_id = request
            .headers()
            .get("Last-Event-ID")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    let (subscriber, inbox) = Subscriber::new(
        topics,
        authorized,
        last_event_id,
        remote_addr,
        hub.config().subscriber_capacity,
        hub.matcher(),
    );

    // Announce before registering, so meta-topic observers see the connect
    // event ahead of anything else involving this subscriber.
    hub.dispatch_subscription_updates(&subscriber, true).await;

    if let Err(e) = hub.transport().add_subscriber(subscriber.clone()).await {
        warn!(error = %e, "Transport refused subscriber");
        hub.dispatch_subscription_updates(&subscriber, false).await;
        return (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable\n").into_response();
    }

    info!(
        subscriber = %subscriber.id(),
        remote_addr = subscriber.remote_addr().unwrap_or("-"),
        topics = ?subscriber.requested_topics(),
        "New subscriber"
    );

    // Built here, not inside the stream, so cleanup runs even if the body
    // is dropped before its first poll.
    let deregister = Deregister {
        hub: hub.clone(),
        subscriber: subscriber.clone(),
    };
    let stream = delivery_stream(hub, subscriber, inbox, deregister);

    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Deregisters the subscriber when dropped, whether the delivery loop ended
/// or the client vanished mid-stream. The inactive lifecycle announcement
/// rides on the same cleanup.
struct Deregister {
    hub: Arc<Hub>,
    subscriber: Arc<Subscriber>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.subscriber.disconnect();

        let hub = self.hub.clone();
        let subscriber = self.subscriber.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                hub.transport().remove_subscriber(&subscriber).await;
                hub.dispatch_subscription_updates(&subscriber, false).await;
                debug!(subscriber = %subscriber.id(), "Subscriber disconnected");
            });
        }
    }
}

/// The streaming body: the `:` preamble, then a single multi-way wait over
/// the inbox, the heartbeat timer and the disconnect signal.
fn delivery_stream(
    hub: Arc<Hub>,
    subscriber: Arc<Subscriber>,
    mut inbox: mpsc::Receiver<Arc<Update>>,
    deregister: Deregister,
) -> impl Stream<Item = Result<String, Infallible>> {
    stream! {
        let _deregister = deregister;

        // Commits the status line and defeats proxy buffering.
        yield Ok(":\n".to_string());

        let heartbeat = hub.config().heartbeat_interval;
        let mut ticker = if heartbeat > Duration::ZERO {
            let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        } else {
            None
        };

        loop {
            tokio::select! {
                () = subscriber.disconnected() => break,
                () = tick(&mut ticker) => yield Ok(":\n".to_string()),
                received = inbox.recv() => match received {
                    Some(update) if subscriber.can_receive(&update) => {
                        if hub.config().debug {
                            debug!(subscriber = %subscriber.id(), event = %update.event.id, "Delivering update");
                        }
                        yield Ok(update.event.to_sse());
                    }
                    // No matching selector: dropped silently.
                    Some(_) => {}
                    None => break,
                },
            }
        }
    }
}

/// Next heartbeat, or never when heartbeats are disabled.
async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
