//! Publish endpoint

use crate::auth::Role;
use crate::server::hub::Hub;
use crate::update::{Event, Update};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Largest accepted publish body.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Accept a form-encoded update from a publisher and dispatch it.
///
/// The publisher JWT must carry a `mercure.publish` claim; a private update
/// additionally requires every one of its topics to match the publisher's
/// selectors.
pub(crate) async fn publish_handler(State(hub): State<Arc<Hub>>, request: Request) -> Response {
    let publish_selectors = match hub.authorizer().authorize(request.headers(), Role::Publisher) {
        Ok(selectors) => selectors,
        Err(e) => {
            debug!(error = %e, "Publication refused");
            return (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response();
        }
    };

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid request body.\n").into_response(),
    };

    let mut topics: Vec<String> = Vec::new();
    let mut data = String::new();
    let mut private = false;
    let mut id = String::new();
    let mut event_type = String::new();
    let mut retry = 0u64;

    for (key, value) in url::form_urlencoded::parse(&body) {
        match key.as_ref() {
            "topic" => topics.push(value.into_owned()),
            "data" => data = value.into_owned(),
            "private" => private = !value.is_empty(),
            "id" => id = value.into_owned(),
            "type" => event_type = value.into_owned(),
            "retry" => match value.parse::<u64>() {
                Ok(parsed) => retry = parsed,
                Err(_) => {
                    return (StatusCode::BAD_REQUEST, "Invalid \"retry\" parameter.\n")
                        .into_response()
                }
            },
            _ => {}
        }
    }

    if topics.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing \"topic\" parameter.\n").into_response();
    }

    if private {
        let selectors = hub.matcher().selectors(&publish_selectors);
        if !topics.iter().all(|topic| selectors.matches(topic)) {
            return (StatusCode::FORBIDDEN, "Forbidden\n").into_response();
        }
    }

    if id.is_empty() {
        id = format!("urn:uuid:{}", Uuid::new_v4());
    }

    let update = Update {
        topics,
        event: Event {
            id: id.clone(),
            data,
            event_type,
            retry,
        },
        private,
    };

    if let Err(e) = hub.transport().dispatch(update).await {
        warn!(error = %e, "Dispatch failed");
        let body = if hub.config().debug {
            format!("{e}\n")
        } else {
            "Service Unavailable\n".to_string()
        };
        return (StatusCode::SERVICE_UNAVAILABLE, body).into_response();
    }

    id.into_response()
}
