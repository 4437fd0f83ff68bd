use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bb_events::Bus;
use rand::Rng;
use serde_json::Value;
use tokio::sync::Mutex;

use super::store::{publish_written, KvError, KvStore, Record};

/// In-memory store for tests and single-process embedding.
///
/// Clones share the same data, so several trackers built from clones behave
/// like separate contexts talking to one browser store. Optional per-call
/// latency widens the gaps between awaited calls so races actually happen.
#[derive(Clone)]
pub struct MemoryKv {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    data: Mutex<Record>,
    latency_ms: Option<(u64, u64)>,
    unavailable: AtomicBool,
    bus: Bus,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Every get/set sleeps a uniform random `[min_ms, max_ms]` first.
    pub fn with_latency(min_ms: u64, max_ms: u64) -> Self {
        Self::build(Some((min_ms.min(max_ms), max_ms.max(min_ms))))
    }

    fn build(latency_ms: Option<(u64, u64)>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                data: Mutex::new(Record::new()),
                latency_ms,
                unavailable: AtomicBool::new(false),
                bus: Bus::new(256),
                reads: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// While set, every call fails with [`KvError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Record {
        self.inner.data.lock().await.clone()
    }

    /// Write a raw value without latency, failure injection or notification.
    pub async fn seed(&self, key: &str, value: Value) {
        self.inner.data.lock().await.insert(key.to_string(), value);
    }

    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> Result<(), KvError> {
        if let Some((lo, hi)) = self.inner.latency_ms {
            let ms = rand::rng().random_range(lo..=hi);
            if ms > 0 {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, keys: &[&str]) -> Result<Record, KvError> {
        self.pause().await?;
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        let data = self.inner.data.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: Record) -> Result<(), KvError> {
        self.pause().await?;
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        {
            let mut data = self.inner.data.lock().await;
            for (k, v) in items.iter() {
                data.insert(k.clone(), v.clone());
            }
        }
        publish_written(&self.inner.bus, &items);
        Ok(())
    }

    fn changes(&self) -> Option<Bus> {
        Some(self.inner.bus.clone())
    }
}
