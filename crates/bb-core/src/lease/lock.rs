use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::types::{
    LeaseToken, LockRecord, Namespace, DEFAULT_CONFIRM_DELAY_MS, DEFAULT_LEASE_TIMEOUT_MS,
    MIN_LEASE_TIMEOUT_MS,
};
use crate::clock::Clock;
use crate::kv::{KvError, KvStore, Record};

/// Lease-based advisory lock over a shared record.
#[async_trait::async_trait]
pub trait AdvisoryLock: Send + Sync {
    /// Try once to take the lease; `None` when someone else holds it or won the race.
    async fn acquire(&self, namespace: Namespace) -> Result<Option<LeaseToken>, KvError>;
    /// Clear the lease if `token` still owns it. Returns whether it was cleared.
    async fn release(&self, token: &LeaseToken) -> Result<bool, KvError>;
    fn is_expired(&self, record: &LockRecord, now_ms: i64) -> bool;
}

/// [`AdvisoryLock`] backed by records in any [`KvStore`].
///
/// The store has no compare-and-swap, so an acquire writes its claim, waits
/// `confirm_delay` for a competing claim to land, then re-reads to see
/// whose write survived.
pub struct KvLeaseLock<K: KvStore> {
    kv: Arc<K>,
    clock: Arc<dyn Clock>,
    timeout_ms: u64,
    confirm_delay: Duration,
}

impl<K: KvStore> KvLeaseLock<K> {
    pub fn new(kv: Arc<K>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            clock,
            timeout_ms: DEFAULT_LEASE_TIMEOUT_MS,
            confirm_delay: Duration::from_millis(DEFAULT_CONFIRM_DELAY_MS),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms.max(MIN_LEASE_TIMEOUT_MS);
        self
    }

    pub fn with_confirm_delay(mut self, delay: Duration) -> Self {
        self.confirm_delay = delay;
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Current record for `namespace`; absent, null or unreadable records read as `None`.
    pub async fn read_record(&self, namespace: Namespace) -> Result<Option<LockRecord>, KvError> {
        let mut got = self.kv.get(&[namespace.key()]).await?;
        let Some(raw) = got.remove(namespace.key()) else {
            return Ok(None);
        };
        if raw.is_null() {
            return Ok(None);
        }
        match serde_json::from_value::<LockRecord>(raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(
                    namespace = namespace.as_str(),
                    %err,
                    "unreadable lock record; treating as free"
                );
                Ok(None)
            }
        }
    }

    async fn write_record(&self, namespace: Namespace, record: &LockRecord) -> Result<(), KvError> {
        let mut items = Record::new();
        items.insert(namespace.key().to_string(), serde_json::to_value(record)?);
        self.kv.set(items).await
    }
}

#[async_trait::async_trait]
impl<K: KvStore> AdvisoryLock for KvLeaseLock<K> {
    async fn acquire(&self, namespace: Namespace) -> Result<Option<LeaseToken>, KvError> {
        let now = self.clock.now_ms();
        if let Some(current) = self.read_record(namespace).await? {
            if current.locked {
                if !self.is_expired(&current, now) {
                    return Ok(None);
                }
                tracing::warn!(
                    namespace = namespace.as_str(),
                    holder = %current.lock_id,
                    held_ms = now.saturating_sub(current.lock_time),
                    "seizing expired lease"
                );
            }
        }

        let lock_id = Uuid::new_v4().to_string();
        self.write_record(namespace, &LockRecord::held(&lock_id, now))
            .await?;
        if !self.confirm_delay.is_zero() {
            tokio::time::sleep(self.confirm_delay).await;
        }

        match self.read_record(namespace).await? {
            Some(record) if record.is_held_by(&lock_id) => {
                tracing::debug!(namespace = namespace.as_str(), lock_id = %lock_id, "lease acquired");
                Ok(Some(LeaseToken {
                    namespace,
                    lock_id,
                    acquired_at_ms: now,
                }))
            }
            _ => {
                tracing::debug!(namespace = namespace.as_str(), "lost lease race");
                Ok(None)
            }
        }
    }

    async fn release(&self, token: &LeaseToken) -> Result<bool, KvError> {
        match self.read_record(token.namespace).await? {
            Some(record) if record.is_held_by(&token.lock_id) => {
                self.write_record(token.namespace, &LockRecord::free())
                    .await?;
                tracing::debug!(
                    namespace = token.namespace.as_str(),
                    lock_id = %token.lock_id,
                    "lease released"
                );
                Ok(true)
            }
            _ => {
                // seized after expiry; the new holder owns it now
                tracing::debug!(
                    namespace = token.namespace.as_str(),
                    lock_id = %token.lock_id,
                    "lease no longer ours; leaving it alone"
                );
                Ok(false)
            }
        }
    }

    fn is_expired(&self, record: &LockRecord, now_ms: i64) -> bool {
        now_ms.saturating_sub(record.lock_time) > self.timeout_ms as i64
    }
}
