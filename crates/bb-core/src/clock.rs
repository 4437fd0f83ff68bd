use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

/// Time source for lease stamps (epoch millis) and day boundaries (local wall clock).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    /// Local wall-clock time; not UTC.
    fn local_now(&self) -> NaiveDateTime;

    fn local_today(&self) -> NaiveDate {
        self.local_now().date()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn local_now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Scriptable clock. Local time is the UTC instant shifted by a fixed offset.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
    offset_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Clock whose local time reads `local` (zero offset).
    pub fn at_local(local: NaiveDateTime) -> Self {
        Self::new(local.and_utc().timestamp_millis())
    }

    pub fn with_offset_minutes(self, minutes: i64) -> Self {
        self.offset_ms.store(minutes * 60_000, Ordering::SeqCst);
        self
    }

    pub fn set_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }

    /// Move the clock so that local time reads `local`, keeping the offset.
    pub fn set_local(&self, local: NaiveDateTime) {
        let offset = self.offset_ms.load(Ordering::SeqCst);
        self.set_ms(local.and_utc().timestamp_millis() - offset);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn local_now(&self) -> NaiveDateTime {
        let shifted = self.now_ms() + self.offset_ms.load(Ordering::SeqCst);
        DateTime::<Utc>::from_timestamp_millis(shifted)
            .unwrap_or_default()
            .naive_utc()
    }
}
