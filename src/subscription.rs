//! Subscription lifecycle events
//!
//! When enabled, the hub announces subscriber connections and
//! disconnections as regular private updates on the reserved meta-topics
//! `/.well-known/mercure/subscriptions/{subscriptionID}/{topic}`. Nothing
//! else is special about these updates: subscribers authorized for the
//! reserved template receive them through ordinary matching.

use crate::subscriber::Subscriber;
use crate::update::{Event, Update};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use uuid::Uuid;

/// The URI Template subscribers use to observe lifecycle events.
pub const SUBSCRIPTION_TOPIC_TEMPLATE: &str =
    "/.well-known/mercure/subscriptions/{subscriptionID}/{topic}";

const SUBSCRIPTION_TYPE: &str = "https://mercure.rocks/Subscription";

/// Everything except unreserved characters, like a URL query escape.
const TOPIC_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// JSON-LD payload of a lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@type")]
    pub subscription_type: &'static str,

    pub topic: String,
    pub active: bool,
    pub publish: Vec<String>,
    pub subscribe: Vec<String>,
}

/// Build the lifecycle updates for a subscriber: one per requested topic,
/// published privately on the matching meta-topic.
pub fn subscription_updates(subscriber: &Subscriber, active: bool) -> Vec<Update> {
    subscriber
        .requested_topics()
        .iter()
        .map(|topic| {
            let id = format!(
                "/.well-known/mercure/subscriptions/{}/{}",
                subscriber.id(),
                utf8_percent_encode(topic, TOPIC_ESCAPE),
            );

            let payload = Subscription {
                id: id.clone(),
                subscription_type: SUBSCRIPTION_TYPE,
                topic: topic.clone(),
                active,
                publish: Vec::new(),
                subscribe: subscriber.authorized_topics().to_vec(),
            };

            // Pretty-printed so consumers get a readable multi-line body.
            let data = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|_| String::new());

            Update {
                topics: vec![id],
                event: Event {
                    id: format!("urn:uuid:{}", Uuid::new_v4()),
                    data,
                    ..Default::default()
                },
                private: true,
            }
        })
        .collect()
}
