use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::join_all;

use turnstile_core::{Dimension, Operation, Platform, RefundOutcome, Subject, Window, WindowKind};

use crate::error::StoreError;
use crate::key::{CounterBound, CounterKey};
use crate::store::{BatchAdmission, CounterStore};

fn hour(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 10, h, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn window(kind: WindowKind, start: DateTime<Utc>) -> Window {
    let len = match kind {
        WindowKind::Short => Duration::hours(1),
        WindowKind::Cycle => Duration::days(30),
    };
    Window {
        kind,
        start,
        end: start + len,
    }
}

fn test_key(subject: &str, kind: WindowKind, start: DateTime<Utc>) -> CounterKey {
    CounterKey::new(
        subject,
        Dimension::new("facebook", "post"),
        &window(kind, start),
    )
}

/// Run the full counter store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if the store fails an operation outright; semantic
/// violations panic with a descriptive assertion.
pub async fn run_store_conformance_tests(store: &dyn CounterStore) -> Result<(), StoreError> {
    test_first_admission_creates_row(store).await?;
    test_admits_up_to_ceiling(store).await?;
    test_zero_ceiling_blocks(store).await?;
    test_window_isolation(store).await?;
    test_decrement_floors_at_zero(store).await?;
    test_refund_is_idempotent(store).await?;
    test_refund_without_row(store).await?;
    test_reset_keeps_refund_records(store).await?;
    test_get_is_read_only(store).await?;
    test_admit_all_rolls_back_on_denial(store).await?;
    test_reset_filters(store).await?;
    test_cleanup_expired(store).await?;
    test_concurrent_admissions(store).await?;
    Ok(())
}

async fn test_first_admission_creates_row(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key("conf-first", WindowKind::Short, hour(10));
    let admission = store.check_and_increment(&key, 5).await?;
    assert!(admission.admitted, "first admission under ceiling should pass");
    assert_eq!(admission.count, 1);

    let row = store.get(&key).await?.expect("row should exist after admission");
    assert_eq!(row.count, 1);
    assert_eq!(row.window, WindowKind::Short);
    assert_eq!(row.window_start, key.window_start);
    assert_eq!(row.window_end, key.window_end);
    Ok(())
}

async fn test_admits_up_to_ceiling(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key("conf-ceiling", WindowKind::Short, hour(10));
    for expected in 1..=3 {
        let admission = store.check_and_increment(&key, 3).await?;
        assert!(admission.admitted, "admission {expected} of 3 should pass");
        assert_eq!(admission.count, expected);
    }
    let denied = store.check_and_increment(&key, 3).await?;
    assert!(!denied.admitted, "count == ceiling must deny");
    assert_eq!(denied.count, 3, "denial must not mutate the counter");

    // A lowered ceiling denies without touching the stored count.
    let denied = store.check_and_increment(&key, 1).await?;
    assert!(!denied.admitted);
    assert_eq!(denied.count, 3);
    Ok(())
}

async fn test_zero_ceiling_blocks(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key("conf-zero", WindowKind::Short, hour(10));
    let admission = store.check_and_increment(&key, 0).await?;
    assert!(!admission.admitted, "ceiling 0 blocks every admission");
    assert_eq!(admission.count, 0);
    let row = store.get(&key).await?;
    assert!(
        row.is_none_or(|r| r.count == 0),
        "blocked admission must not record usage"
    );
    Ok(())
}

async fn test_window_isolation(store: &dyn CounterStore) -> Result<(), StoreError> {
    let w1 = test_key("conf-isolation", WindowKind::Short, hour(10));
    let w2 = test_key("conf-isolation", WindowKind::Short, hour(11));
    let cycle = test_key("conf-isolation", WindowKind::Cycle, hour(10));

    store.check_and_increment(&w1, 10).await?;
    store.check_and_increment(&w1, 10).await?;

    assert!(store.get(&w2).await?.is_none(), "W1 must not affect W2");
    assert!(
        store.get(&cycle).await?.is_none(),
        "short window must not affect a cycle window with the same start"
    );

    let w2_admission = store.check_and_increment(&w2, 10).await?;
    assert_eq!(w2_admission.count, 1);
    assert_eq!(store.get(&w1).await?.map(|r| r.count), Some(2));
    Ok(())
}

async fn test_decrement_floors_at_zero(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key("conf-decrement", WindowKind::Short, hour(10));
    assert_eq!(store.decrement(&key).await?, 0, "missing row decrements to 0");

    store.check_and_increment(&key, 5).await?;
    assert_eq!(store.decrement(&key).await?, 0);
    assert_eq!(store.decrement(&key).await?, 0, "must never go below zero");
    Ok(())
}

async fn test_refund_is_idempotent(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key("conf-refund", WindowKind::Cycle, hour(0));
    store.check_and_increment(&key, 5).await?;
    store.check_and_increment(&key, 5).await?;

    let first = store.refund(&key, "adm-1:cycle").await?;
    assert_eq!(first, RefundOutcome::Refunded { count: 1 });

    let again = store.refund(&key, "adm-1:cycle").await?;
    assert_eq!(again, RefundOutcome::AlreadyRefunded);
    assert_eq!(store.get(&key).await?.map(|r| r.count), Some(1));

    let other = store.refund(&key, "adm-2:cycle").await?;
    assert_eq!(other, RefundOutcome::Refunded { count: 0 });
    let floor = store.refund(&key, "adm-3:cycle").await?;
    assert_eq!(floor, RefundOutcome::NothingToRefund);
    assert_eq!(store.get(&key).await?.map(|r| r.count), Some(0));

    // The unapplied key was not recorded, so it still works once there is usage.
    store.check_and_increment(&key, 5).await?;
    let retried = store.refund(&key, "adm-3:cycle").await?;
    assert_eq!(retried, RefundOutcome::Refunded { count: 0 });
    Ok(())
}

async fn test_refund_without_row(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key("conf-refund-missing", WindowKind::Short, hour(10));

    let outcome = store.refund(&key, "adm-1:short").await?;
    assert_eq!(outcome, RefundOutcome::NothingToRefund);
    assert!(
        store.get(&key).await?.is_none(),
        "a refund must not create a counter row"
    );

    store.check_and_increment(&key, 5).await?;
    let retried = store.refund(&key, "adm-1:short").await?;
    assert_eq!(retried, RefundOutcome::Refunded { count: 0 });
    Ok(())
}

async fn test_reset_keeps_refund_records(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key("conf-reset-refund", WindowKind::Cycle, hour(0));
    store.check_and_increment(&key, 5).await?;
    store.refund(&key, "adm-1:cycle").await?;

    store.reset(&key.subject, None, None).await?;
    store.check_and_increment(&key, 5).await?;

    let late = store.refund(&key, "adm-1:cycle").await?;
    assert_eq!(late, RefundOutcome::AlreadyRefunded);
    assert_eq!(
        store.get(&key).await?.map(|r| r.count),
        Some(1),
        "a late retry after reset must not release the new admission"
    );
    Ok(())
}

async fn test_get_is_read_only(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key("conf-read-only", WindowKind::Short, hour(10));
    for _ in 0..5 {
        assert!(store.get(&key).await?.is_none());
    }
    let subject = Subject::from("conf-read-only");
    assert!(store.counters_for(&subject).await?.is_empty());
    Ok(())
}

async fn test_admit_all_rolls_back_on_denial(store: &dyn CounterStore) -> Result<(), StoreError> {
    let short = test_key("conf-batch", WindowKind::Short, hour(10));
    let cycle = test_key("conf-batch", WindowKind::Cycle, hour(0));

    let bounds = [
        CounterBound::new(short.clone(), 5),
        CounterBound::new(cycle.clone(), 1),
    ];
    let first = store.admit_all(&bounds).await?;
    assert_eq!(first, BatchAdmission::Admitted(vec![1, 1]));

    let second = store.admit_all(&bounds).await?;
    assert_eq!(second, BatchAdmission::Denied { index: 1, count: 1 });
    assert_eq!(
        store.get(&short).await?.map(|r| r.count),
        Some(1),
        "short increment must be rolled back when the cycle bound denies"
    );
    assert_eq!(store.get(&cycle).await?.map(|r| r.count), Some(1));
    Ok(())
}

async fn test_reset_filters(store: &dyn CounterStore) -> Result<(), StoreError> {
    let subject = "conf-reset";
    let fb_post = test_key(subject, WindowKind::Short, hour(10));
    let mut li_post = fb_post.clone();
    li_post.dimension = Dimension::new("linkedin", "post");
    let mut fb_api = fb_post.clone();
    fb_api.dimension = Dimension::new("facebook", "api_call");

    for key in [&fb_post, &li_post, &fb_api] {
        store.check_and_increment(key, 10).await?;
    }
    let subject = Subject::from(subject);

    let removed = store
        .reset(
            &subject,
            Some(&Platform::from("facebook")),
            Some(&Operation::from("post")),
        )
        .await?;
    assert_eq!(removed, 1);
    assert!(store.get(&fb_post).await?.is_none());

    let removed = store
        .reset(&subject, Some(&Platform::from("facebook")), None)
        .await?;
    assert_eq!(removed, 1);

    let removed = store.reset(&subject, None, None).await?;
    assert_eq!(removed, 1);
    assert!(store.counters_for(&subject).await?.is_empty());
    Ok(())
}

async fn test_cleanup_expired(store: &dyn CounterStore) -> Result<(), StoreError> {
    let old = test_key("conf-cleanup", WindowKind::Short, hour(1));
    let current = test_key("conf-cleanup", WindowKind::Short, hour(20));
    store.check_and_increment(&old, 10).await?;
    store.check_and_increment(&current, 10).await?;
    store.refund(&old, "cleanup-refund").await?;

    let removed = store.cleanup_expired(hour(2)).await?;
    assert!(removed >= 1, "the expired window must be removed");
    assert!(store.get(&old).await?.is_none());
    assert_eq!(store.get(&current).await?.map(|r| r.count), Some(1));
    Ok(())
}

async fn test_concurrent_admissions(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key("conf-concurrent", WindowKind::Short, hour(10));
    let results = join_all((0..50).map(|_| store.check_and_increment(&key, 10))).await;

    let mut admitted = 0;
    for result in results {
        if result?.admitted {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10, "exactly ceiling admissions may succeed");
    assert_eq!(store.get(&key).await?.map(|r| r.count), Some(10));
    Ok(())
}
