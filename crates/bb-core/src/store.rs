use std::sync::Arc;

use serde_json::Value;

use crate::clock::Clock;
use crate::document::{DocumentDefaults, StorageDocument, DOCUMENT_KEY};
use crate::kv::{KvError, KvStore, Record};
use crate::metrics;
use crate::migrate::{self, MigrationContext};
use crate::random::RandomSource;
use crate::rollover;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("document encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Whether a read may perform a pending day rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverPolicy {
    Apply,
    /// Leave a pending rollover for a caller that holds the `metrics` lease.
    Defer,
}

/// Owner of the canonical document: defaults, migration, rollover and repair
/// on every read; whole-document overwrite on every write.
///
/// The store does not serialize anything itself. Safety of a
/// read-modify-write depends entirely on callers holding a lease.
pub struct StateStore<K: KvStore> {
    kv: Arc<K>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    defaults: DocumentDefaults,
}

impl<K: KvStore> StateStore<K> {
    pub fn new(
        kv: Arc<K>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        defaults: DocumentDefaults,
    ) -> Self {
        Self {
            kv,
            clock,
            random,
            defaults,
        }
    }

    pub fn defaults(&self) -> &DocumentDefaults {
        &self.defaults
    }

    /// Fresh default document for the current local day. Not persisted.
    pub fn synthesize(&self) -> StorageDocument {
        self.defaults
            .synthesize(self.clock.local_today(), self.random.as_ref())
    }

    pub async fn get(&self) -> Result<StorageDocument, StoreError> {
        self.load(RolloverPolicy::Apply).await
    }

    pub async fn get_deferred(&self) -> Result<StorageDocument, StoreError> {
        self.load(RolloverPolicy::Defer).await
    }

    pub async fn load(&self, policy: RolloverPolicy) -> Result<StorageDocument, StoreError> {
        let today = self.clock.local_today();
        let Some(mut raw) = self.read_raw().await? else {
            let doc = self.synthesize();
            tracing::info!(date = %doc.today.date, "no stored document; writing defaults");
            self.put(&doc).await?;
            return Ok(doc);
        };

        let ctx = MigrationContext {
            defaults: &self.defaults,
            today,
            random: self.random.as_ref(),
        };
        let report = migrate::migrate(&mut raw, &ctx);
        let mut dirty = report.changed();
        if report.changed() {
            tracing::info!(from = report.from, to = report.to, "migrated stored document");
        }
        let decoded = match serde_json::from_value::<StorageDocument>(raw.clone()) {
            Ok(doc) => Ok(doc),
            // a current-version document can still lack fields another writer dropped
            Err(err) => {
                if migrate::refill(&mut raw, &ctx) {
                    tracing::warn!(%err, "stored document was missing fields; filled with defaults");
                    dirty = true;
                    serde_json::from_value::<StorageDocument>(raw)
                } else {
                    Err(err)
                }
            }
        };
        let mut doc = match decoded {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(%err, "stored document unreadable; replacing with defaults");
                let doc = self.synthesize();
                self.put(&doc).await?;
                return Ok(doc);
            }
        };
        if dirty {
            self.put(&doc).await?;
        }

        if policy == RolloverPolicy::Apply {
            let previous = doc.today.date.clone();
            if rollover::apply(&mut doc, today, self.defaults.frequency, self.random.as_ref()) {
                tracing::info!(%previous, today = %doc.today.date, "rolled over to a new day");
                self.put(&doc).await?;
                if let Some(bus) = self.kv.changes() {
                    bus.publish(
                        bb_events::TOPIC_TRACKER_ROLLOVER,
                        &serde_json::json!({ "previous": previous, "today": doc.today.date }),
                    );
                }
            }
        }

        let mut repaired = self.defaults.taxonomy.repair(&mut doc.settings);
        if repaired {
            tracing::info!("repaired topic selections against the taxonomy");
        }
        let battery = metrics::clamp_battery(doc.brain_battery);
        if battery != doc.brain_battery {
            tracing::warn!(stored = doc.brain_battery, battery, "stored battery out of range; clamped");
            doc.brain_battery = battery;
            repaired = true;
        }
        if repaired {
            self.put(&doc).await?;
        }
        Ok(doc)
    }

    /// Unconditional whole-document overwrite.
    pub async fn put(&self, doc: &StorageDocument) -> Result<(), StoreError> {
        let mut items = Record::new();
        items.insert(DOCUMENT_KEY.to_string(), serde_json::to_value(doc)?);
        self.kv.set(items).await?;
        Ok(())
    }

    /// Battery as stored, without migration, rollover or writes.
    pub async fn peek_battery(&self) -> Result<Option<f64>, StoreError> {
        Ok(self
            .read_raw()
            .await?
            .and_then(|raw| raw.get("brainBattery").and_then(Value::as_f64))
            .map(metrics::clamp_battery))
    }

    /// Whether the stored document still carries a previous day's date.
    pub async fn rollover_pending(&self) -> Result<bool, StoreError> {
        let today = rollover::date_key(self.clock.local_today());
        Ok(self
            .read_raw()
            .await?
            .and_then(|raw| {
                raw.pointer("/today/date")
                    .and_then(Value::as_str)
                    .map(|d| d != today)
            })
            .unwrap_or(false))
    }

    async fn read_raw(&self) -> Result<Option<Value>, StoreError> {
        let mut got = self.kv.get(&[DOCUMENT_KEY]).await?;
        Ok(got.remove(DOCUMENT_KEY).filter(|v| !v.is_null()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKv;
    use crate::random::SequenceRandom;
    use chrono::NaiveDate;
    use serde_json::json;

    fn clock_on(day: u32) -> Arc<ManualClock> {
        let local = NaiveDate::from_ymd_opt(2025, 1, day)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        Arc::new(ManualClock::at_local(local))
    }

    fn store(kv: &MemoryKv, clock: Arc<ManualClock>) -> StateStore<MemoryKv> {
        StateStore::new(
            Arc::new(kv.clone()),
            clock,
            Arc::new(SequenceRandom::default()),
            DocumentDefaults::default(),
        )
    }

    #[tokio::test]
    async fn first_read_synthesizes_and_persists() {
        let kv = MemoryKv::new();
        let store = store(&kv, clock_on(5));
        let doc = store.get().await.unwrap();
        assert_eq!(doc.today.date, "2025-01-05");
        assert_eq!(kv.writes(), 1);
        assert!(kv.snapshot().await.contains_key(DOCUMENT_KEY));
    }

    #[tokio::test]
    async fn round_trip_is_identical_and_quiet() {
        let kv = MemoryKv::new();
        let store = store(&kv, clock_on(5));
        let mut doc = store.get().await.unwrap();
        doc.today.night.scroll_count = 11;
        doc.brain_battery = 42.5;
        store.put(&doc).await.unwrap();

        let writes = kv.writes();
        assert_eq!(store.get().await.unwrap(), doc);
        assert_eq!(kv.writes(), writes, "clean read must not write");
    }

    #[tokio::test]
    async fn unreadable_document_self_heals() {
        let kv = MemoryKv::new();
        kv.seed(DOCUMENT_KEY, json!({"schemaVersion": 3, "today": "garbage"}))
            .await;
        let store = store(&kv, clock_on(5));
        let doc = store.get().await.unwrap();
        assert_eq!(doc.today.date, "2025-01-05");
        let persisted: StorageDocument =
            serde_json::from_value(kv.snapshot().await[DOCUMENT_KEY].clone()).unwrap();
        assert_eq!(persisted, doc);
    }

    #[tokio::test]
    async fn current_document_missing_a_field_keeps_its_data() {
        let kv = MemoryKv::new();
        let store = store(&kv, clock_on(5));
        let mut doc = store.get().await.unwrap();
        doc.today.morning.scroll_count = 5;
        doc.brain_battery = 73.0;
        doc.bonus_tracker.lessons_completed = 1;
        store.put(&doc).await.unwrap();

        let mut raw = kv.snapshot().await[DOCUMENT_KEY].clone();
        raw.as_object_mut().unwrap().remove("lessonActive");
        kv.seed(DOCUMENT_KEY, raw).await;

        let read = store.get().await.unwrap();
        assert_eq!(read, doc);
        let persisted = &kv.snapshot().await[DOCUMENT_KEY];
        assert_eq!(persisted["lessonActive"], json!(false));
        assert_eq!(persisted["today"]["morning"]["scrollCount"], json!(5));
    }

    #[tokio::test]
    async fn out_of_range_battery_is_clamped_and_persisted() {
        let kv = MemoryKv::new();
        let store = store(&kv, clock_on(5));
        let mut doc = store.get().await.unwrap();
        doc.brain_battery = 250.0;
        store.put(&doc).await.unwrap();

        assert_eq!(store.peek_battery().await.unwrap(), Some(100.0));
        assert_eq!(store.get().await.unwrap().brain_battery, 100.0);
        assert_eq!(kv.snapshot().await[DOCUMENT_KEY]["brainBattery"], json!(100.0));

        doc.brain_battery = -4.5;
        store.put(&doc).await.unwrap();
        assert_eq!(store.get().await.unwrap().brain_battery, 0.0);
        let writes = kv.writes();
        store.get().await.unwrap();
        assert_eq!(kv.writes(), writes, "clamped value is stable");
    }

    #[tokio::test]
    async fn deferred_read_leaves_rollover_pending() {
        let kv = MemoryKv::new();
        let clock = clock_on(1);
        let store = store(&kv, clock.clone());
        store.get().await.unwrap();

        clock.advance(chrono::Duration::days(1));
        assert!(store.rollover_pending().await.unwrap());
        let doc = store.get_deferred().await.unwrap();
        assert_eq!(doc.today.date, "2025-01-01");
        assert!(store.rollover_pending().await.unwrap());

        let doc = store.get().await.unwrap();
        assert_eq!(doc.today.date, "2025-01-02");
        assert!(!store.rollover_pending().await.unwrap());
    }

    #[tokio::test]
    async fn repair_is_persisted_only_when_needed() {
        let kv = MemoryKv::new();
        let store = store(&kv, clock_on(5));
        let mut doc = store.get().await.unwrap();
        doc.settings
            .selected_topics_by_theme
            .insert("general".into(), vec!["rust".into()]);
        store.put(&doc).await.unwrap();

        let writes = kv.writes();
        let repaired = store.get().await.unwrap();
        assert_eq!(kv.writes(), writes + 1);
        assert!(repaired.settings.selected_topics_by_theme["general"].is_empty());
        assert!(repaired.settings.selected_topics_by_theme["programming"]
            .contains(&"rust".to_string()));
    }

    #[tokio::test]
    async fn peek_reads_raw_battery() {
        let kv = MemoryKv::new();
        let store = store(&kv, clock_on(5));
        assert_eq!(store.peek_battery().await.unwrap(), None);
        kv.seed(DOCUMENT_KEY, json!({"brainBattery": 0.0})).await;
        assert_eq!(store.peek_battery().await.unwrap(), Some(0.0));
    }
}
