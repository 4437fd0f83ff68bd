use serde::{Deserialize, Serialize};

pub const DEFAULT_LEASE_TIMEOUT_MS: u64 = 5_000;
pub const MIN_LEASE_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_CONFIRM_DELAY_MS: u64 = 10;

/// Independent contention domain. Leases in different namespaces never block each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Metrics,
    Settings,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Metrics, Namespace::Settings];

    /// Store key holding this namespace's [`LockRecord`].
    pub fn key(self) -> &'static str {
        match self {
            Namespace::Metrics => "bb.lock.metrics",
            Namespace::Settings => "bb.lock.settings",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Metrics => "metrics",
            Namespace::Settings => "settings",
        }
    }
}

/// Persisted lease record, one per namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub locked: bool,
    /// Epoch millis when the current holder took the lease.
    pub lock_time: i64,
    pub lock_id: String,
}

impl LockRecord {
    pub fn held(lock_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            locked: true,
            lock_time: now_ms,
            lock_id: lock_id.into(),
        }
    }

    pub fn free() -> Self {
        Self::default()
    }

    pub fn is_held_by(&self, lock_id: &str) -> bool {
        self.locked && self.lock_id == lock_id
    }
}

/// Proof of ownership returned by a successful acquire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseToken {
    pub namespace: Namespace,
    pub lock_id: String,
    pub acquired_at_ms: i64,
}
