//! Day-boundary transform: today becomes yesterday, and a zeroed today starts.

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::document::{DailyBucket, StorageDocument};
use crate::random::RandomSource;
use crate::scheduler::{self, LessonFrequency};

/// Whether the rollover runs under the `metrics` lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RolloverGuard {
    /// Roll over inline on whichever read notices the new day. A rollover
    /// racing an in-flight counter write can lose one of the two.
    #[default]
    BestEffort,
    /// Only roll over while holding the `metrics` lease.
    Locked,
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn is_pending(doc: &StorageDocument, today: NaiveDate) -> bool {
    doc.today.date != date_key(today)
}

/// Roll `doc` over to `today` if its date is stale. Returns whether it did.
///
/// The demoted bucket is always re-dated to the day before `today`, even
/// when the stored date is older than that.
pub fn apply(
    doc: &mut StorageDocument,
    today: NaiveDate,
    fallback: LessonFrequency,
    random: &dyn RandomSource,
) -> bool {
    if !is_pending(doc, today) {
        return false;
    }
    let yesterday = today.pred_opt().unwrap_or(today);
    let frequency = doc.settings.frequency_or(fallback);

    let mut demoted = std::mem::replace(&mut doc.today, DailyBucket::empty(date_key(today)));
    demoted.date = date_key(yesterday);
    doc.yesterday = demoted;
    doc.next_lesson_at = u64::from(scheduler::next_lesson_threshold(frequency, random));
    doc.lesson_active = false;
    doc.bonus_tracker = scheduler::fresh_bonus_tracker(random);
    true
}
