use std::future::Future;
use std::time::Duration;

use super::lock::AdvisoryLock;
use super::types::{LeaseToken, Namespace};
use crate::kv::KvError;
use crate::random::RandomSource;

/// Caller-side acquire policy: exponential backoff with jitter, bounded attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(800),
            max_jitter: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn delay(&self, attempt: u32, random: &dyn RandomSource) -> Duration {
        let jitter_ms = self.max_jitter.as_millis().min(u32::MAX as u128) as u32;
        self.backoff(attempt) + Duration::from_millis(random.uniform_inclusive(0, jitter_ms) as u64)
    }
}

/// Acquire with backoff. `Ok(None)` means every attempt found the lease taken.
pub async fn acquire_with_retry<L>(
    lock: &L,
    namespace: Namespace,
    policy: &RetryPolicy,
    random: &dyn RandomSource,
) -> Result<Option<LeaseToken>, KvError>
where
    L: AdvisoryLock + ?Sized,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        if let Some(token) = lock.acquire(namespace).await? {
            return Ok(Some(token));
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(policy.delay(attempt, random)).await;
        }
    }
    tracing::debug!(
        namespace = namespace.as_str(),
        attempts,
        "lease attempts exhausted"
    );
    Ok(None)
}

/// Run `op` while holding the lease for `namespace`.
///
/// `Ok(None)` when the lease could not be taken. The lease is released on
/// both success and error; the op's error goes back to the caller only.
pub async fn with_lease<L, F, Fut, T, E>(
    lock: &L,
    namespace: Namespace,
    policy: &RetryPolicy,
    random: &dyn RandomSource,
    op: F,
) -> Result<Option<T>, E>
where
    L: AdvisoryLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<KvError>,
{
    let Some(token) = acquire_with_retry(lock, namespace, policy, random).await? else {
        return Ok(None);
    };
    let result = op().await;
    if let Err(err) = lock.release(&token).await {
        tracing::warn!(
            namespace = namespace.as_str(),
            %err,
            "lease release failed; it will expire on its own"
        );
    }
    result.map(Some)
}
