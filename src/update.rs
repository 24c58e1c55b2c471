//! Updates and their Server-Sent Events wire framing

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// A single SSE event.
///
/// An empty `id` is permitted but makes the event unrecoverable through
/// `Last-Event-ID` replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(default)]
    pub data: String,

    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub event_type: String,

    /// Reconnection delay hint in milliseconds; 0 omits the field.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry: u64,
}

impl Event {
    /// Serialize the event in SSE framing.
    ///
    /// Fields are emitted in fixed order: `event:`, `retry:`, `id:`, then
    /// one `data:` line per line of `data`, then the terminating blank line.
    pub fn to_sse(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 32);

        if !self.event_type.is_empty() {
            let _ = writeln!(out, "event: {}", self.event_type);
        }
        if self.retry > 0 {
            let _ = writeln!(out, "retry: {}", self.retry);
        }
        if !self.id.is_empty() {
            let _ = writeln!(out, "id: {}", self.id);
        }
        for line in self.data.split('\n') {
            let _ = writeln!(out, "data: {line}");
        }
        out.push('\n');

        out
    }
}

/// An update published to the hub: an event tagged with one or more topic
/// IRIs. Private updates are only delivered to subscribers authorized for
/// at least one of the topics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub topics: Vec<String>,
    pub event: Event,
    #[serde(default)]
    pub private: bool,
}

impl Update {
    pub fn new(topics: Vec<String>, event: Event) -> Self {
        Self {
            topics,
            event,
            private: false,
        }
    }
}
