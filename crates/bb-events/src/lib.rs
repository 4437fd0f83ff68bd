//! Change notifications shared by the stores and their UI collaborators.
//!
//! The key-value store is the only channel between execution contexts, so
//! every write is mirrored onto a broadcast bus. Subscribers that lag or go
//! away never hold up a writer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Published by a store after every successful `set`; payload `{"keys": [...]}`.
pub const TOPIC_STORE_CHANGED: &str = "store.changed";
/// Published by the tracker when a day boundary rolled the document over.
pub const TOPIC_TRACKER_ROLLOVER: &str = "tracker.rollover";

/// Minimal event envelope (RFC3339 time).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub time: String,
    pub kind: String,
    pub payload: Value,
}

/// A simple broadcast bus for JSON-serializable events.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish<T: Serialize>(&self, kind: &str, payload: &T) {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let val =
            serde_json::to_value(payload).unwrap_or_else(|_| serde_json::json!({"_ser":"error"}));
        // no subscribers is fine
        let _ = self.tx.send(Envelope {
            time: now,
            kind: kind.to_string(),
            payload: val,
        });
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(64)
    }
}
