use std::sync::Arc;

use bb_core::lease::{AdvisoryLock, KvLeaseLock, Namespace};
use bb_core::{
    Clock, ManualClock, MemoryKv, Outcome, SkipReason, ThreadRandom, Tracker, TrackerConfig,
};
use chrono::NaiveDate;
use tokio::time::Duration;

fn clock() -> Arc<ManualClock> {
    let local = NaiveDate::from_ymd_opt(2025, 3, 10)
        .unwrap()
        .and_hms_opt(20, 0, 0)
        .unwrap();
    Arc::new(ManualClock::at_local(local))
}

fn context(kv: &MemoryKv, clock: Arc<ManualClock>, config: TrackerConfig) -> Tracker<MemoryKv> {
    Tracker::new(Arc::new(kv.clone()), clock, Arc::new(ThreadRandom), config)
}

async fn scroll_burst(tracker: &Tracker<MemoryKv>, count: usize) -> (u64, Vec<SkipReason>) {
    let mut applied = 0;
    let mut skipped = Vec::new();
    for _ in 0..count {
        match tracker.record_scroll().await {
            Outcome::Applied(_) => applied += 1,
            Outcome::Skipped(reason) => skipped.push(reason),
        }
    }
    (applied, skipped)
}

#[tokio::test(start_paused = true)]
async fn concurrent_contexts_never_lose_updates() {
    const TRIALS: u32 = 20;
    let mut complete: u32 = 0;
    for trial in 0..TRIALS {
        let kv = MemoryKv::with_latency(0, 2);
        let clock = clock();
        let a = context(&kv, clock.clone(), TrackerConfig::default());
        let b = context(&kv, clock.clone(), TrackerConfig::default());
        // create the document up front so both bursts start from the same state
        a.document().await;

        let ((applied_a, skipped_a), (applied_b, skipped_b)) =
            tokio::join!(scroll_burst(&a, 50), scroll_burst(&b, 50));

        assert!(
            skipped_a.iter().chain(&skipped_b).all(|r| *r == SkipReason::LockBusy),
            "trial {trial}: unexpected skip"
        );
        let doc = a.document().await;
        assert_eq!(
            doc.cumulative_scrolls(),
            applied_a + applied_b,
            "trial {trial}: applied scrolls were lost"
        );
        let expected_battery = 100.0 - 0.2 * (applied_a + applied_b) as f64;
        assert!((doc.brain_battery - expected_battery).abs() < 1e-6, "trial {trial}");
        if doc.cumulative_scrolls() == 100 {
            complete += 1;
        }
    }
    // at least 95% of trials count every scroll with the default retry policy
    assert!(complete * 100 >= TRIALS * 95, "only {complete}/{TRIALS} trials reached 100");
}

#[tokio::test(start_paused = true)]
async fn skipped_updates_are_only_lock_busy() {
    let kv = MemoryKv::with_latency(0, 2);
    let clock = clock();
    let mut config = TrackerConfig::default();
    config.retry.max_attempts = 2;
    let a = context(&kv, clock.clone(), config.clone());
    let b = context(&kv, clock.clone(), config);
    a.document().await;

    let ((applied_a, skipped_a), (applied_b, skipped_b)) =
        tokio::join!(scroll_burst(&a, 40), scroll_burst(&b, 40));

    assert!(skipped_a
        .iter()
        .chain(skipped_b.iter())
        .all(|r| *r == SkipReason::LockBusy));
    // whatever was reported applied is exactly what was stored
    let doc = a.document().await;
    assert_eq!(doc.cumulative_scrolls(), applied_a + applied_b);
}

#[tokio::test(start_paused = true)]
async fn abandoned_lease_is_seized_after_timeout() {
    let kv = Arc::new(MemoryKv::new());
    let clock = clock();
    let crashed = KvLeaseLock::new(kv.clone(), clock.clone());
    let stale = crashed.acquire(Namespace::Metrics).await.unwrap().unwrap();

    let tracker = Tracker::new(
        kv.clone(),
        clock.clone(),
        Arc::new(ThreadRandom),
        TrackerConfig {
            retry: bb_core::lease::RetryPolicy {
                max_attempts: 1,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    assert_eq!(
        tracker.record_recharge(60).await.skip_reason(),
        Some(SkipReason::LockBusy)
    );

    clock.advance(chrono::Duration::milliseconds(5_001));
    assert!(tracker.record_recharge(60).await.is_applied());

    // the crashed holder waking up cannot clear someone else's lease
    let fresh = tracker.lock().acquire(Namespace::Metrics).await.unwrap().unwrap();
    assert!(!crashed.release(&stale).await.unwrap());
    let record = tracker
        .lock()
        .read_record(Namespace::Metrics)
        .await
        .unwrap()
        .unwrap();
    assert!(record.is_held_by(&fresh.lock_id));
    assert!(clock.now_ms() - record.lock_time < 5_000);
}

#[tokio::test(start_paused = true)]
async fn namespaces_do_not_block_each_other() {
    let kv = Arc::new(MemoryKv::with_latency(0, 1));
    let clock = clock();
    let lock = KvLeaseLock::new(kv.clone(), clock.clone());
    let metrics = lock.acquire(Namespace::Metrics).await.unwrap().unwrap();
    let settings = lock.acquire(Namespace::Settings).await.unwrap().unwrap();
    assert_ne!(metrics.lock_id, settings.lock_id);
    assert!(lock.acquire(Namespace::Metrics).await.unwrap().is_none());

    assert!(lock.release(&metrics).await.unwrap());
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(lock.acquire(Namespace::Metrics).await.unwrap().is_some());
    assert!(lock.release(&settings).await.unwrap());
}
