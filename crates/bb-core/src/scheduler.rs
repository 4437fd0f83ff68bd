//! Randomized trigger points for lessons and the bonus notification.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::document::{BonusTracker, StorageDocument};
use crate::random::RandomSource;

/// How often lessons interrupt scrolling. The value is the top of a
/// three-wide band of "additional scrolls needed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LessonFrequency {
    #[default]
    Often,
    Sometimes,
    Barely,
}

impl LessonFrequency {
    pub fn value(self) -> u32 {
        match self {
            LessonFrequency::Often => 3,
            LessonFrequency::Sometimes => 6,
            LessonFrequency::Barely => 9,
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            3 => Some(LessonFrequency::Often),
            6 => Some(LessonFrequency::Sometimes),
            9 => Some(LessonFrequency::Barely),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LessonFrequency::Often => "often",
            LessonFrequency::Sometimes => "sometimes",
            LessonFrequency::Barely => "barely",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "often" | "3" => Some(LessonFrequency::Often),
            "sometimes" | "6" => Some(LessonFrequency::Sometimes),
            "barely" | "9" => Some(LessonFrequency::Barely),
            _ => None,
        }
    }
}

const THRESHOLD_BAND: u32 = 3;
const BONUS_MIN: u32 = 2;
const BONUS_MAX: u32 = 5;

/// Additional scrolls until the next lesson: uniform in `[value-2, value]`.
pub fn next_lesson_threshold(frequency: LessonFrequency, random: &dyn RandomSource) -> u32 {
    let high = frequency.value();
    random.uniform_inclusive(high + 1 - THRESHOLD_BAND, high)
}

pub fn fresh_bonus_tracker(random: &dyn RandomSource) -> BonusTracker {
    BonusTracker {
        lessons_completed: 0,
        next_bonus_at: random.uniform_inclusive(BONUS_MIN, BONUS_MAX),
    }
}

pub fn should_trigger_lesson(doc: &StorageDocument) -> bool {
    doc.cumulative_scrolls() >= doc.next_lesson_at && doc.brain_battery > 0.0
}

/// Whether finishing the lesson in flight will reach the bonus.
pub fn should_show_time_bonus_notification(tracker: &BonusTracker) -> bool {
    tracker.lessons_completed.saturating_add(1) >= tracker.next_bonus_at
}

/// Move `nextLessonAt` a fresh threshold past the current cumulative count.
pub fn reschedule_next_lesson(
    doc: &mut StorageDocument,
    frequency: LessonFrequency,
    random: &dyn RandomSource,
) {
    doc.next_lesson_at =
        doc.cumulative_scrolls() + u64::from(next_lesson_threshold(frequency, random));
}

/// Bonus bookkeeping and rescheduling for a finished lesson.
/// Returns true when this lesson reached the bonus.
pub fn complete_lesson(
    doc: &mut StorageDocument,
    frequency: LessonFrequency,
    random: &dyn RandomSource,
) -> bool {
    let tracker = &mut doc.bonus_tracker;
    tracker.lessons_completed = tracker.lessons_completed.saturating_add(1);
    let reached = tracker.lessons_completed >= tracker.next_bonus_at;
    if reached {
        *tracker = fresh_bonus_tracker(random);
    }
    doc.lesson_active = false;
    reschedule_next_lesson(doc, frequency, random);
    reached
}
