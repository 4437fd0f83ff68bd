//! Client-side coordination for the Brain Battery tracker.
//!
//! Several uncoordinated contexts share one asynchronous key-value store
//! that offers only whole-key reads and writes. Counters, the battery and
//! settings live in a single document; every update goes through a
//! namespace lease (see [`lease`]) and a fresh read of that document.

mod clock;
pub mod config;
pub mod document;
pub mod kv;
pub mod lease;
pub mod metrics;
pub mod migrate;
mod random;
pub mod rollover;
pub mod scheduler;
pub mod store;
pub mod taxonomy;
pub mod tracker;
mod util;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    config_schema_json, load_config, load_effective_config, resolve_config_path,
    write_schema_file, Config, TrackerConfig,
};
pub use document::{DailyTotals, Period, Settings, StorageDocument};
pub use kv::{FileKv, KvError, KvStore, MemoryKv};
pub use lease::Namespace;
pub use random::{RandomSource, SequenceRandom, ThreadRandom};
pub use rollover::RolloverGuard;
pub use scheduler::LessonFrequency;
pub use store::{StateStore, StoreError};
pub use tracker::{
    LessonReport, Outcome, ScrollReport, SettingsPatch, SkipReason, TopicSelection, Tracker,
};
pub use util::{env_bool, parse_bool_flag};
