//! Lock-protected operations exposed to the UI and content-script collaborators.
//!
//! Every mutating call follows the same path: take the namespace lease,
//! re-read the whole document, apply the formulas to that copy, write it
//! back and release. Nothing is cached between calls.

use std::sync::Arc;
use std::time::Duration;

use bb_events::Bus;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::document::{DailyTotals, Period, Settings, StorageDocument};
use crate::kv::KvStore;
use crate::lease::{with_lease, KvLeaseLock, Namespace, RetryPolicy};
use crate::metrics;
use crate::random::{RandomSource, ThreadRandom};
use crate::rollover::RolloverGuard;
use crate::scheduler::{self, LessonFrequency};
use crate::store::{RolloverPolicy, StateStore, StoreError};

/// Result of a mutating call. Skips are expected outcomes, not failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome<T> {
    Applied(T),
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(v) => Some(v),
            Outcome::Skipped(_) => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Outcome::Applied(_) => None,
            Outcome::Skipped(reason) => Some(*reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Every acquire attempt found the lease taken.
    LockBusy,
    /// Pre-check saw an empty battery; no lease was attempted.
    BatteryDepleted,
    /// The store rejected a read or write.
    StorageUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollReport {
    pub period: Period,
    pub total_scrolls: u64,
    pub next_lesson_at: u64,
    pub brain_battery: f64,
    pub should_trigger_lesson: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonReport {
    pub brain_battery: f64,
    /// This completion reached the bonus target; the tracker has been redrawn.
    pub bonus_reached: bool,
    pub lessons_completed: u32,
    pub next_bonus_at: u32,
    pub next_lesson_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSelection {
    pub theme: String,
    pub topics: Vec<String>,
}

/// Fields left `None` are kept as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub enabled_sites: Option<Vec<String>>,
    pub lesson_frequency: Option<LessonFrequency>,
    pub selected_theme: Option<String>,
    pub selected_topics: Option<TopicSelection>,
}

/// Coordination service for one execution context. Build one per context
/// and share it; several trackers over the same store model several tabs.
pub struct Tracker<K: KvStore> {
    kv: Arc<K>,
    store: StateStore<K>,
    lock: KvLeaseLock<K>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    retry: RetryPolicy,
    guard: RolloverGuard,
}

impl<K: KvStore> Tracker<K> {
    pub fn new(
        kv: Arc<K>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        config: TrackerConfig,
    ) -> Self {
        let store = StateStore::new(
            kv.clone(),
            clock.clone(),
            random.clone(),
            config.defaults.clone(),
        );
        let lock = KvLeaseLock::new(kv.clone(), clock.clone())
            .with_timeout_ms(config.lease_timeout_ms)
            .with_confirm_delay(config.confirm_delay);
        Self {
            kv,
            store,
            lock,
            clock,
            random,
            retry: config.retry,
            guard: config.rollover_guard,
        }
    }

    /// Wall clock and thread-local randomness.
    pub fn with_system(kv: Arc<K>, config: TrackerConfig) -> Self {
        Self::new(kv, Arc::new(SystemClock), Arc::new(ThreadRandom), config)
    }

    pub fn store(&self) -> &StateStore<K> {
        &self.store
    }

    pub fn lock(&self) -> &KvLeaseLock<K> {
        &self.lock
    }

    pub fn changes(&self) -> Option<Bus> {
        self.kv.changes()
    }

    fn frequency(&self, doc: &StorageDocument) -> LessonFrequency {
        doc.settings.frequency_or(self.store.defaults().frequency)
    }

    fn period(&self) -> Period {
        Period::at(self.clock.local_now())
    }

    async fn mutate<T, F>(&self, namespace: Namespace, op: &'static str, apply: F) -> Outcome<T>
    where
        F: FnOnce(&mut StorageDocument) -> T + Send,
        T: Send,
    {
        if namespace != Namespace::Metrics {
            self.settle_rollover().await;
        }
        let policy = match (self.guard, namespace) {
            (RolloverGuard::Locked, Namespace::Settings) => RolloverPolicy::Defer,
            _ => RolloverPolicy::Apply,
        };
        let result = with_lease(
            &self.lock,
            namespace,
            &self.retry,
            self.random.as_ref(),
            || async move {
                let mut doc = self.store.load(policy).await?;
                let out = apply(&mut doc);
                self.store.put(&doc).await?;
                Ok::<T, StoreError>(out)
            },
        )
        .await;
        match result {
            Ok(Some(out)) => Outcome::Applied(out),
            Ok(None) => {
                tracing::debug!(namespace = namespace.as_str(), op, "lease busy; update skipped");
                Outcome::Skipped(SkipReason::LockBusy)
            }
            Err(err) => {
                tracing::warn!(namespace = namespace.as_str(), op, %err, "update failed; skipped");
                Outcome::Skipped(SkipReason::StorageUnavailable)
            }
        }
    }

    /// With [`RolloverGuard::Locked`], perform a pending rollover under the
    /// `metrics` lease before anything else reads or writes the document.
    async fn settle_rollover(&self) {
        if self.guard != RolloverGuard::Locked {
            return;
        }
        match self.store.rollover_pending().await {
            Ok(false) => {}
            Ok(true) => {
                let rolled = with_lease(
                    &self.lock,
                    Namespace::Metrics,
                    &self.retry,
                    self.random.as_ref(),
                    || self.store.get(),
                )
                .await;
                match rolled {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        tracing::debug!("metrics lease busy; rollover left to its holder")
                    }
                    Err(err) => tracing::warn!(%err, "rollover under lease failed"),
                }
            }
            Err(err) => tracing::warn!(%err, "rollover check failed"),
        }
    }

    /// Skip outright when the stored battery is already empty.
    async fn gate_on_battery(&self, op: &'static str) -> Option<SkipReason> {
        match self.store.peek_battery().await {
            Ok(Some(battery)) if metrics::battery_depleted(battery) => {
                tracing::debug!(op, "battery empty; not counting");
                Some(SkipReason::BatteryDepleted)
            }
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(op, %err, "battery pre-check failed; skipped");
                Some(SkipReason::StorageUnavailable)
            }
        }
    }

    pub async fn record_scroll(&self) -> Outcome<ScrollReport> {
        if let Some(reason) = self.gate_on_battery("scroll").await {
            return Outcome::Skipped(reason);
        }
        let period = self.period();
        self.mutate(Namespace::Metrics, "scroll", |doc| {
            metrics::apply_scroll(doc, period);
            ScrollReport {
                period,
                total_scrolls: doc.cumulative_scrolls(),
                next_lesson_at: doc.next_lesson_at,
                brain_battery: doc.brain_battery,
                should_trigger_lesson: scheduler::should_trigger_lesson(doc),
            }
        })
        .await
    }

    /// Seconds spent on a tracked site. Returns the new battery level.
    pub async fn record_time_tick(&self, seconds: u64) -> Outcome<f64> {
        if let Some(reason) = self.gate_on_battery("time_tick").await {
            return Outcome::Skipped(reason);
        }
        let period = self.period();
        self.mutate(Namespace::Metrics, "time_tick", |doc| {
            metrics::apply_time_wasted(doc, period, seconds)
        })
        .await
    }

    /// Seconds spent away from tracked sites.
    pub async fn record_recharge(&self, seconds: u64) -> Outcome<f64> {
        self.mutate(Namespace::Metrics, "recharge", |doc| {
            metrics::apply_recharge(doc, seconds)
        })
        .await
    }

    /// Mark a lesson as showing, once the trigger fired.
    pub async fn begin_lesson(&self) -> Outcome<()> {
        self.mutate(Namespace::Metrics, "begin_lesson", |doc| {
            doc.lesson_active = true;
        })
        .await
    }

    pub async fn record_lesson_completion(&self) -> Outcome<LessonReport> {
        let period = self.period();
        let random = self.random.as_ref();
        self.mutate(Namespace::Metrics, "lesson_completion", |doc| {
            metrics::apply_completion(doc, period);
            let frequency = self.frequency(doc);
            let bonus_reached = scheduler::complete_lesson(doc, frequency, random);
            LessonReport {
                brain_battery: doc.brain_battery,
                bonus_reached,
                lessons_completed: doc.bonus_tracker.lessons_completed,
                next_bonus_at: doc.bonus_tracker.next_bonus_at,
                next_lesson_at: doc.next_lesson_at,
            }
        })
        .await
    }

    /// A standalone task: same charge and counter as a lesson, no scheduling.
    pub async fn record_task_completion(&self) -> Outcome<f64> {
        let period = self.period();
        self.mutate(Namespace::Metrics, "task_completion", |doc| {
            metrics::apply_completion(doc, period)
        })
        .await
    }

    /// Reward for following an answer's external link.
    pub async fn record_link_click(&self, since_reveal: Duration) -> Outcome<f64> {
        self.mutate(Namespace::Metrics, "link_click", |doc| {
            metrics::apply_link_click(doc, since_reveal)
        })
        .await
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Outcome<Settings> {
        let taxonomy = &self.store.defaults().taxonomy;
        self.mutate(Namespace::Settings, "update_settings", |doc| {
            let settings = &mut doc.settings;
            if let Some(sites) = patch.enabled_sites {
                settings.enabled_sites = sites;
            }
            if let Some(freq) = patch.lesson_frequency {
                settings.lesson_frequency = freq.value();
            }
            if let Some(theme) = patch.selected_theme {
                settings.selected_theme = theme;
            }
            if let Some(selection) = patch.selected_topics {
                settings
                    .selected_topics_by_theme
                    .insert(selection.theme, selection.topics);
            }
            taxonomy.repair(settings);
            settings.clone()
        })
        .await
    }

    /// Current document. A store failure yields a fresh, unsaved default document.
    pub async fn document(&self) -> StorageDocument {
        self.settle_rollover().await;
        let loaded = match self.guard {
            RolloverGuard::BestEffort => self.store.get().await,
            RolloverGuard::Locked => self.store.get_deferred().await,
        };
        match loaded {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(%err, "document read failed; using defaults");
                self.store.synthesize()
            }
        }
    }

    pub async fn should_trigger_lesson(&self) -> bool {
        scheduler::should_trigger_lesson(&self.document().await)
    }

    /// Whether finishing the lesson in flight will earn the time bonus.
    pub async fn bonus_status(&self) -> bool {
        scheduler::should_show_time_bonus_notification(&self.document().await.bonus_tracker)
    }

    /// Totals for `date` (`YYYY-MM-DD`) when it is today's or yesterday's bucket.
    pub async fn totals_for(&self, date: &str) -> Option<DailyTotals> {
        self.document().await.totals_for(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKv;
    use crate::random::SequenceRandom;
    use chrono::NaiveDate;

    fn tracker(kv: &MemoryKv, rng: SequenceRandom) -> Tracker<MemoryKv> {
        let local = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        Tracker::new(
            Arc::new(kv.clone()),
            Arc::new(ManualClock::at_local(local)),
            Arc::new(rng),
            TrackerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_counts_in_the_current_period() {
        let kv = MemoryKv::new();
        let t = tracker(&kv, SequenceRandom::default());
        let report = t.record_scroll().await.applied().unwrap();
        assert_eq!(report.period, Period::Afternoon);
        assert_eq!(report.total_scrolls, 1);
        assert!((report.brain_battery - 99.8).abs() < 1e-9);

        let doc = t.document().await;
        assert_eq!(doc.today.afternoon.scroll_count, 1);
        assert_eq!(doc.today.morning.scroll_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_battery_skips_without_touching_the_lease() {
        let kv = MemoryKv::new();
        let t = tracker(&kv, SequenceRandom::default());
        let mut doc = t.document().await;
        doc.brain_battery = 0.0;
        t.store().put(&doc).await.unwrap();

        let writes = kv.writes();
        assert_eq!(
            t.record_scroll().await.skip_reason(),
            Some(SkipReason::BatteryDepleted)
        );
        assert_eq!(
            t.record_time_tick(30).await.skip_reason(),
            Some(SkipReason::BatteryDepleted)
        );
        assert_eq!(kv.writes(), writes);

        // recharge is never gated
        let battery = t.record_recharge(60).await.applied().unwrap();
        assert!((battery - 0.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn lesson_completion_reports_the_bonus() {
        let kv = MemoryKv::new();
        // initial threshold 1, bonus target 2, then thresholds for each completion
        let t = tracker(&kv, SequenceRandom::new([1, 2, 3, 5, 3]));
        t.document().await;

        assert!(!t.bonus_status().await);
        assert_eq!(t.begin_lesson().await, Outcome::Applied(()));
        assert!(t.document().await.lesson_active);

        let first = t.record_lesson_completion().await.applied().unwrap();
        assert!(!first.bonus_reached);
        assert_eq!(first.lessons_completed, 1);
        assert_eq!(first.next_lesson_at, 3);
        assert!(t.bonus_status().await);

        let second = t.record_lesson_completion().await.applied().unwrap();
        assert!(second.bonus_reached);
        assert_eq!(second.lessons_completed, 0);
        assert_eq!(second.next_bonus_at, 5);
        assert!((second.brain_battery - 100.0).abs() < 1e-9);

        let totals = t.totals_for("2025-06-01").await.unwrap();
        assert_eq!(totals.lesson_count, 2);
        assert!(!t.document().await.lesson_active);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_patch_is_repaired_against_the_taxonomy() {
        let kv = MemoryKv::new();
        let t = tracker(&kv, SequenceRandom::default());
        let settings = t
            .update_settings(SettingsPatch {
                lesson_frequency: Some(LessonFrequency::Sometimes),
                selected_theme: Some("programming".into()),
                selected_topics: Some(TopicSelection {
                    theme: "programming".into(),
                    topics: vec!["rust".into(), "spanish".into(), "knitting".into()],
                }),
                ..Default::default()
            })
            .await
            .applied()
            .unwrap();

        assert_eq!(settings.lesson_frequency, 6);
        assert_eq!(settings.selected_theme, "programming");
        assert_eq!(settings.selected_topics_by_theme["programming"], vec!["rust"]);
        assert!(settings.selected_topics_by_theme["languages"].contains(&"spanish".to_string()));
        assert_eq!(t.document().await.settings, settings);
    }

    #[tokio::test(start_paused = true)]
    async fn storage_failure_degrades_quietly() {
        let kv = MemoryKv::new();
        let t = tracker(&kv, SequenceRandom::default());
        kv.set_unavailable(true);

        assert_eq!(
            t.record_scroll().await.skip_reason(),
            Some(SkipReason::StorageUnavailable)
        );
        assert_eq!(
            t.record_recharge(10).await.skip_reason(),
            Some(SkipReason::StorageUnavailable)
        );
        let doc = t.document().await;
        assert_eq!(doc.today.date, "2025-06-01");
        assert_eq!(doc.brain_battery, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn link_click_reward_and_busy_lease() {
        let kv = MemoryKv::new();
        let t = tracker(&kv, SequenceRandom::default());
        let mut doc = t.document().await;
        doc.brain_battery = 50.0;
        t.store().put(&doc).await.unwrap();

        let fast = t.record_link_click(Duration::from_secs(1)).await.applied().unwrap();
        assert!((fast - 52.0).abs() < 1e-9);
        let slow = t.record_link_click(Duration::from_secs(10)).await.applied().unwrap();
        assert!((slow - 53.0).abs() < 1e-9);

        use crate::lease::AdvisoryLock;
        let _held = t.lock().acquire(Namespace::Metrics).await.unwrap().unwrap();
        assert_eq!(
            t.record_task_completion().await.skip_reason(),
            Some(SkipReason::LockBusy)
        );
        // settings never contend with metrics
        assert!(t.update_settings(SettingsPatch::default()).await.is_applied());
    }
}
