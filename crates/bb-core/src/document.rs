//! The canonical storage document and its parts, in wire (camelCase) shape.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::migrate::CURRENT_SCHEMA_VERSION;
use crate::random::RandomSource;
use crate::rollover::date_key;
use crate::scheduler::{self, LessonFrequency};
use crate::taxonomy::Taxonomy;

/// Store key holding the whole [`StorageDocument`].
pub const DOCUMENT_KEY: &str = "bb.document";

pub const DEFAULT_ENABLED_SITES: &[&str] = &[
    "youtube.com",
    "instagram.com",
    "tiktok.com",
    "reddit.com",
    "x.com",
    "facebook.com",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodData {
    pub scroll_count: u64,
    /// Seconds.
    pub time_wasted: u64,
    pub lesson_count: u64,
}

impl PeriodData {
    fn add(&mut self, other: &PeriodData) {
        self.scroll_count += other.scroll_count;
        self.time_wasted += other.time_wasted;
        self.lesson_count += other.lesson_count;
    }
}

/// Part of the local day an event is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Morning,
    Afternoon,
    Night,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Morning, Period::Afternoon, Period::Night];

    /// Morning 06-12, afternoon 12-18, night the rest.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => Period::Morning,
            12..=17 => Period::Afternoon,
            _ => Period::Night,
        }
    }

    pub fn at(local: NaiveDateTime) -> Self {
        Self::from_hour(local.hour())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Morning => "morning",
            Period::Afternoon => "afternoon",
            Period::Night => "night",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBucket {
    pub morning: PeriodData,
    pub afternoon: PeriodData,
    pub night: PeriodData,
    /// Local calendar date, `YYYY-MM-DD`.
    pub date: String,
}

impl DailyBucket {
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            morning: PeriodData::default(),
            afternoon: PeriodData::default(),
            night: PeriodData::default(),
            date: date.into(),
        }
    }

    pub fn period(&self, period: Period) -> &PeriodData {
        match period {
            Period::Morning => &self.morning,
            Period::Afternoon => &self.afternoon,
            Period::Night => &self.night,
        }
    }

    pub fn period_mut(&mut self, period: Period) -> &mut PeriodData {
        match period {
            Period::Morning => &mut self.morning,
            Period::Afternoon => &mut self.afternoon,
            Period::Night => &mut self.night,
        }
    }

    pub fn totals(&self) -> DailyTotals {
        let mut sum = PeriodData::default();
        for p in Period::ALL {
            sum.add(self.period(p));
        }
        DailyTotals {
            date: self.date.clone(),
            scroll_count: sum.scroll_count,
            time_wasted: sum.time_wasted,
            lesson_count: sum.lesson_count,
            morning: self.morning,
            afternoon: self.afternoon,
            night: self.night,
        }
    }
}

/// Per-day sums plus the period breakdown, as reported to collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTotals {
    pub date: String,
    pub scroll_count: u64,
    pub time_wasted: u64,
    pub lesson_count: u64,
    pub morning: PeriodData,
    pub afternoon: PeriodData,
    pub night: PeriodData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub enabled_sites: Vec<String>,
    /// 3, 6 or 9; see [`LessonFrequency`].
    pub lesson_frequency: u32,
    pub selected_theme: String,
    pub selected_topics_by_theme: BTreeMap<String, Vec<String>>,
}

impl Settings {
    /// Stored frequency, or `fallback` when the stored number is not a known mode.
    pub fn frequency_or(&self, fallback: LessonFrequency) -> LessonFrequency {
        LessonFrequency::from_value(self.lesson_frequency).unwrap_or(fallback)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusTracker {
    pub lessons_completed: u32,
    pub next_bonus_at: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDocument {
    pub schema_version: u32,
    pub today: DailyBucket,
    pub yesterday: DailyBucket,
    pub settings: Settings,
    /// Absolute threshold against [`StorageDocument::cumulative_scrolls`].
    pub next_lesson_at: u64,
    pub lesson_active: bool,
    /// Always within `[0, 100]`.
    pub brain_battery: f64,
    pub bonus_tracker: BonusTracker,
}

impl StorageDocument {
    /// Scrolls counted today across all three periods.
    pub fn cumulative_scrolls(&self) -> u64 {
        Period::ALL
            .iter()
            .map(|p| self.today.period(*p).scroll_count)
            .sum()
    }

    pub fn totals_for(&self, date: &str) -> Option<DailyTotals> {
        if self.today.date == date {
            Some(self.today.totals())
        } else if self.yesterday.date == date {
            Some(self.yesterday.totals())
        } else {
            None
        }
    }
}

/// Seed values used when a document, or part of one, has to be synthesized.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentDefaults {
    pub enabled_sites: Vec<String>,
    pub frequency: LessonFrequency,
    pub taxonomy: Taxonomy,
}

impl Default for DocumentDefaults {
    fn default() -> Self {
        Self {
            enabled_sites: DEFAULT_ENABLED_SITES.iter().map(|s| s.to_string()).collect(),
            frequency: LessonFrequency::default(),
            taxonomy: Taxonomy::default(),
        }
    }
}

impl DocumentDefaults {
    pub fn settings(&self) -> Settings {
        Settings {
            enabled_sites: self.enabled_sites.clone(),
            lesson_frequency: self.frequency.value(),
            selected_theme: self.taxonomy.default_theme.clone(),
            selected_topics_by_theme: self.taxonomy.initial_selection(),
        }
    }

    /// Fresh document for `today`. Draws the lesson threshold first, then the bonus target.
    pub fn synthesize(&self, today: NaiveDate, random: &dyn RandomSource) -> StorageDocument {
        let yesterday = today.pred_opt().unwrap_or(today);
        let next_lesson_at = u64::from(scheduler::next_lesson_threshold(self.frequency, random));
        StorageDocument {
            schema_version: CURRENT_SCHEMA_VERSION,
            today: DailyBucket::empty(date_key(today)),
            yesterday: DailyBucket::empty(date_key(yesterday)),
            settings: self.settings(),
            next_lesson_at,
            lesson_active: false,
            brain_battery: crate::metrics::BATTERY_MAX,
            bonus_tracker: scheduler::fresh_bonus_tracker(random),
        }
    }
}
