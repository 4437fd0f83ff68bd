//! Leases over named logical locks stored as records in the shared store.
//!
//! `free → held` on acquire, back to `free` on release or when a different
//! acquirer seizes a lease older than the timeout. There is no queue, so a
//! busy namespace can starve a caller; the retry policy bounds how long it
//! tries before skipping.

mod lock;
mod retry;
mod types;

pub use lock::{AdvisoryLock, KvLeaseLock};
pub use retry::{acquire_with_retry, with_lease, RetryPolicy};
pub use types::{
    LeaseToken, LockRecord, Namespace, DEFAULT_CONFIRM_DELAY_MS, DEFAULT_LEASE_TIMEOUT_MS,
    MIN_LEASE_TIMEOUT_MS,
};
