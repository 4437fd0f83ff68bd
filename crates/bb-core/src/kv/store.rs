use bb_events::Bus;
use serde_json::{Map, Value};

/// A set of key/value pairs as read from or written to a store.
pub type Record = Map<String, Value>;

#[derive(thiserror::Error, Debug)]
pub enum KvError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Asynchronous key-value store shared by every execution context.
///
/// Individual calls are atomic; nothing spans calls. There are no
/// transactions and no compare-and-swap, which is why writers coordinate
/// through the lease records in [`crate::lease`].
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Read the listed keys. Absent keys are missing from the returned record.
    async fn get(&self, keys: &[&str]) -> Result<Record, KvError>;
    /// Write every entry of `items`, leaving other keys untouched.
    async fn set(&self, items: Record) -> Result<(), KvError>;
    /// Change-notification bus fired after each write, when the backend has one.
    fn changes(&self) -> Option<Bus> {
        None
    }
}

pub(crate) fn publish_written(bus: &Bus, items: &Record) {
    let keys: Vec<&str> = items.keys().map(String::as_str).collect();
    bus.publish(
        bb_events::TOPIC_STORE_CHANGED,
        &serde_json::json!({ "keys": keys }),
    );
}
