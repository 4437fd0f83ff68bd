//! Additive schema migrations over the raw stored JSON.
//!
//! `schemaVersion` (absent means 0) is walked through the table one step at
//! a time. Steps only fill fields that are missing; present fields are
//! trusted as-is, so a migration can never fail.

use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::document::{DailyBucket, DocumentDefaults, PeriodData};
use crate::random::RandomSource;
use crate::rollover::date_key;
use crate::scheduler;

pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Inputs a step may need to synthesize missing values.
pub struct MigrationContext<'a> {
    pub defaults: &'a DocumentDefaults,
    pub today: NaiveDate,
    pub random: &'a dyn RandomSource,
}

type Step = fn(&mut Map<String, Value>, &MigrationContext<'_>);

/// `MIGRATIONS[n]` upgrades version `n` to `n + 1`.
const MIGRATIONS: [Step; CURRENT_SCHEMA_VERSION as usize] = [
    base_shape_and_settings,
    battery_and_lesson_counts,
    bonus_tracker_and_lesson_flag,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
}

impl MigrationReport {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

pub fn migrate(raw: &mut Value, ctx: &MigrationContext<'_>) -> MigrationReport {
    let Some(obj) = raw.as_object_mut() else {
        return MigrationReport { from: 0, to: 0 };
    };
    let from = obj
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0);
    if from >= CURRENT_SCHEMA_VERSION {
        return MigrationReport { from, to: from };
    }
    for (version, step) in MIGRATIONS.iter().enumerate().skip(from as usize) {
        step(obj, ctx);
        tracing::debug!(from = version, to = version + 1, "applied document migration");
    }
    obj.insert("schemaVersion".into(), json!(CURRENT_SCHEMA_VERSION));
    MigrationReport {
        from,
        to: CURRENT_SCHEMA_VERSION,
    }
}

/// Run every step regardless of `schemaVersion`. Steps only fill what is
/// missing, so a complete document is left untouched. Returns whether
/// anything was filled.
pub fn refill(raw: &mut Value, ctx: &MigrationContext<'_>) -> bool {
    let Some(obj) = raw.as_object_mut() else {
        return false;
    };
    let before = obj.clone();
    for step in MIGRATIONS.iter() {
        step(obj, ctx);
    }
    *obj != before
}

fn fill(obj: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> Value) {
    if !obj.contains_key(key) {
        obj.insert(key.to_string(), value());
    }
}

fn object_at<'m>(obj: &'m mut Map<String, Value>, key: &str) -> Option<&'m mut Map<String, Value>> {
    obj.get_mut(key).and_then(Value::as_object_mut)
}

fn empty_bucket(date: NaiveDate) -> Value {
    serde_json::to_value(DailyBucket::empty(date_key(date))).unwrap_or(Value::Null)
}

/// v0 → v1: day buckets, lesson threshold and the settings block.
fn base_shape_and_settings(obj: &mut Map<String, Value>, ctx: &MigrationContext<'_>) {
    let yesterday = ctx.today.pred_opt().unwrap_or(ctx.today);
    fill(obj, "today", || empty_bucket(ctx.today));
    fill(obj, "yesterday", || empty_bucket(yesterday));
    fill(obj, "nextLessonAt", || {
        json!(scheduler::next_lesson_threshold(ctx.defaults.frequency, ctx.random))
    });
    fill(obj, "settings", || json!({}));

    let base = ctx.defaults.settings();
    if let Some(settings) = object_at(obj, "settings") {
        fill(settings, "enabledSites", || json!(base.enabled_sites));
        fill(settings, "lessonFrequency", || json!(base.lesson_frequency));
        fill(settings, "selectedTheme", || json!(base.selected_theme));
        fill(settings, "selectedTopicsByTheme", || {
            json!(base.selected_topics_by_theme)
        });
    }
}

/// v1 → v2: battery and per-period lesson counts.
fn battery_and_lesson_counts(obj: &mut Map<String, Value>, _ctx: &MigrationContext<'_>) {
    fill(obj, "brainBattery", || json!(crate::metrics::BATTERY_MAX));
    let zero = PeriodData::default();
    for day in ["today", "yesterday"] {
        let Some(bucket) = object_at(obj, day) else {
            continue;
        };
        for period in ["morning", "afternoon", "night"] {
            fill(bucket, period, || json!(zero));
            if let Some(slot) = object_at(bucket, period) {
                fill(slot, "scrollCount", || json!(0));
                fill(slot, "timeWasted", || json!(0));
                fill(slot, "lessonCount", || json!(0));
            }
        }
    }
}

/// v2 → v3: bonus tracker and the lesson-in-progress flag.
fn bonus_tracker_and_lesson_flag(obj: &mut Map<String, Value>, ctx: &MigrationContext<'_>) {
    fill(obj, "bonusTracker", || {
        json!(scheduler::fresh_bonus_tracker(ctx.random))
    });
    fill(obj, "lessonActive", || json!(false));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::StorageDocument;
    use crate::random::SequenceRandom;

    fn ctx<'a>(defaults: &'a DocumentDefaults, rng: &'a SequenceRandom) -> MigrationContext<'a> {
        MigrationContext {
            defaults,
            today: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            random: rng,
        }
    }

    #[test]
    fn v0_document_is_filled_and_keeps_its_counts() {
        let defaults = DocumentDefaults::default();
        let rng = SequenceRandom::new([4]);
        let mut raw = json!({
            "today": {
                "morning": {"scrollCount": 7, "timeWasted": 60},
                "afternoon": {"scrollCount": 0, "timeWasted": 0},
                "night": {"scrollCount": 1, "timeWasted": 5},
                "date": "2025-01-02"
            },
            "nextLessonAt": 9,
            "settings": {"lessonFrequency": 6}
        });

        let report = migrate(&mut raw, &ctx(&defaults, &rng));
        assert_eq!(report, MigrationReport { from: 0, to: 3 });

        let doc: StorageDocument = serde_json::from_value(raw).expect("decodes after migration");
        assert_eq!(doc.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(doc.today.morning.scroll_count, 7);
        assert_eq!(doc.today.morning.lesson_count, 0);
        assert_eq!(doc.yesterday.date, "2025-01-01");
        assert_eq!(doc.next_lesson_at, 9);
        assert_eq!(doc.settings.lesson_frequency, 6);
        assert_eq!(doc.settings.selected_theme, "general");
        assert_eq!(doc.brain_battery, 100.0);
        assert_eq!(doc.bonus_tracker.next_bonus_at, 4);
        assert!(!doc.lesson_active);
    }

    #[test]
    fn partial_upgrade_only_runs_later_steps() {
        let defaults = DocumentDefaults::default();
        let rng = SequenceRandom::default();
        let mut raw = json!({"schemaVersion": 2, "brainBattery": 12.5});
        let report = migrate(&mut raw, &ctx(&defaults, &rng));
        assert_eq!(report.from, 2);
        assert_eq!(raw["brainBattery"], json!(12.5));
        assert!(raw.get("bonusTracker").is_some());
        assert!(raw.get("settings").is_none(), "v0 step skipped");
    }

    #[test]
    fn refill_restores_fields_dropped_from_a_current_document() {
        let defaults = DocumentDefaults::default();
        let rng = SequenceRandom::new([2, 4]);
        let today = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let mut doc = defaults.synthesize(today, &rng);
        doc.today.night.scroll_count = 5;
        doc.brain_battery = 61.0;
        let mut raw = serde_json::to_value(&doc).unwrap();
        let complete = raw.clone();
        assert!(!refill(&mut raw, &ctx(&defaults, &rng)));
        assert_eq!(raw, complete);

        raw.as_object_mut().unwrap().remove("lessonActive");
        assert!(!migrate(&mut raw, &ctx(&defaults, &rng)).changed());
        assert!(refill(&mut raw, &ctx(&defaults, &rng)));
        assert_eq!(raw, complete);
    }

    #[test]
    fn current_and_future_versions_are_left_alone() {
        let defaults = DocumentDefaults::default();
        let rng = SequenceRandom::default();
        let mut raw = json!({"schemaVersion": 7});
        let report = migrate(&mut raw, &ctx(&defaults, &rng));
        assert!(!report.changed());
        assert_eq!(raw, json!({"schemaVersion": 7}));
    }
}
