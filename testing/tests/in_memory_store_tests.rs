//! Tests for the in-memory store's transaction semantics.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use slotguard_core::{
    AdmissionStore, AdmissionTransaction, IsolationLevel, ScheduleId, StoreError, UserId,
    UserStore,
};
use slotguard_testing::{InMemoryStore, fixtures};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn store_with_schedule(capacity: i32) -> (InMemoryStore, ScheduleId) {
    let store = InMemoryStore::new();
    let schedule = fixtures::schedule("s-1", capacity);
    store.seed_schedule(schedule.clone());
    store.seed_user(fixtures::user("alice"));
    store.seed_user(fixtures::user("bob"));
    (store, schedule.id)
}

#[tokio::test]
async fn lock_schedule_reads_capacity() {
    let (store, schedule_id) = store_with_schedule(3);

    let mut tx = store.begin(IsolationLevel::default()).await.unwrap();

    assert_eq!(tx.lock_schedule(&schedule_id).await.unwrap(), Some(3));
    assert_eq!(tx.lock_schedule(&ScheduleId::new("missing")).await.unwrap(), None);
}

#[tokio::test]
async fn uncommitted_inserts_are_invisible_and_rolled_back_on_drop() {
    let (store, schedule_id) = store_with_schedule(3);
    let schedule = store.schedule(&schedule_id).unwrap();
    let alice = fixtures::user("alice");

    {
        let mut tx = store.begin(IsolationLevel::default()).await.unwrap();
        tx.lock_schedule(&schedule_id).await.unwrap();
        tx.insert_reservation(&fixtures::reservation("r-1", &schedule, &alice))
            .await
            .unwrap();

        assert!(tx.has_reservation(&schedule_id, &alice.id).await.unwrap());
        assert_eq!(tx.count_reservations(&schedule_id).await.unwrap(), 1);
        assert_eq!(store.reservation_count(&schedule_id), 0);
    }

    assert_eq!(store.reservation_count(&schedule_id), 0);
    assert_eq!(store.rollbacks(), 1);
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn commit_applies_inserts_then_runs_hook() {
    let (store, schedule_id) = store_with_schedule(3);
    let schedule = store.schedule(&schedule_id).unwrap();
    let alice = fixtures::user("alice");

    let mut tx = store.begin(IsolationLevel::default()).await.unwrap();
    tx.lock_schedule(&schedule_id).await.unwrap();
    tx.insert_reservation(&fixtures::reservation("r-1", &schedule, &alice))
        .await
        .unwrap();

    let hook_saw = Arc::new(AtomicBool::new(false));
    let observer = store.clone();
    let seen = Arc::clone(&hook_saw);
    let id = schedule_id.clone();
    tx.commit(move || seen.store(observer.reservation_count(&id) == 1, Ordering::SeqCst))
        .await
        .unwrap();

    assert!(hook_saw.load(Ordering::SeqCst));
    assert_eq!(store.commits(), 1);
    assert_eq!(store.rollbacks(), 0);
}

#[tokio::test]
async fn duplicate_pair_violates_unique_constraint() {
    let (store, schedule_id) = store_with_schedule(3);
    let schedule = store.schedule(&schedule_id).unwrap();
    let alice = fixtures::user("alice");
    store.seed_reservation(fixtures::reservation("r-0", &schedule, &alice));

    let mut tx = store.begin(IsolationLevel::default()).await.unwrap();
    let error = tx
        .insert_reservation(&fixtures::reservation("r-1", &schedule, &alice))
        .await
        .unwrap_err();

    assert!(matches!(error, StoreError::UniqueViolation { .. }));
}

#[tokio::test]
async fn schedule_lock_blocks_until_commit() {
    let (store, schedule_id) = store_with_schedule(3);

    let mut holder = store.begin(IsolationLevel::default()).await.unwrap();
    holder.lock_schedule(&schedule_id).await.unwrap();

    let contender = {
        let store = store.clone();
        let schedule_id = schedule_id.clone();
        tokio::spawn(async move {
            let mut tx = store.begin(IsolationLevel::default()).await.unwrap();
            tx.lock_schedule(&schedule_id).await.unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!contender.is_finished());

    holder.commit(|| {}).await.unwrap();
    let capacity = tokio::time::timeout(Duration::from_secs(1), contender)
        .await
        .expect("lock should be released by commit")
        .unwrap();
    assert_eq!(capacity, Some(3));
}

#[tokio::test]
async fn injected_commit_failure_skips_hook() {
    let (store, schedule_id) = store_with_schedule(3);
    store.fail_next_commit();

    let mut tx = store.begin(IsolationLevel::default()).await.unwrap();
    tx.lock_schedule(&schedule_id).await.unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let result = tx.commit(move || flag.store(true, Ordering::SeqCst)).await;

    assert!(matches!(result, Err(StoreError::Database(_))));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(store.rollbacks(), 1);
}

#[tokio::test]
async fn reset_replaces_everything_with_seed() {
    let (store, schedule_id) = store_with_schedule(3);
    let seed = fixtures::staff("admin");

    store.reset(&seed).await.unwrap();

    assert!(store.schedule(&schedule_id).is_none());
    assert_eq!(store.user_count(), 1);
    assert_eq!(store.find_user(&seed.id).await.unwrap(), Some(seed));
    assert_eq!(store.user_lookups(), 1);
}

#[tokio::test]
async fn transaction_finds_users_and_counts_lookups() {
    let (store, _) = store_with_schedule(3);
    let alice = fixtures::user("alice");

    let mut tx = store.begin(IsolationLevel::default()).await.unwrap();

    assert_eq!(tx.find_user(&alice.id).await.unwrap(), Some(alice));
    assert_eq!(tx.find_user(&UserId::new("ghost")).await.unwrap(), None);
    assert_eq!(store.user_lookups(), 2);
}

#[tokio::test]
async fn acknowledge_delay_applies_rows_before_returning() {
    let (store, schedule_id) = store_with_schedule(3);
    let schedule = store.schedule(&schedule_id).unwrap();
    store.set_acknowledge_delay(Some(Duration::from_millis(200)));

    let mut tx = store.begin(IsolationLevel::default()).await.unwrap();
    tx.lock_schedule(&schedule_id).await.unwrap();
    tx.insert_reservation(&fixtures::reservation("r-1", &schedule, &fixtures::user("alice")))
        .await
        .unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let committing = tokio::spawn(tx.commit(move || flag.store(true, Ordering::SeqCst)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.reservation_count(&schedule_id), 1);
    assert_eq!(store.commits(), 1);
    assert!(!ran.load(Ordering::SeqCst));

    committing.await.unwrap().unwrap();
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(store.rollbacks(), 0);
}

#[tokio::test]
async fn missing_schedule_is_not_registered_as_a_lock() {
    let (store, _) = store_with_schedule(3);

    let mut tx = store.begin(IsolationLevel::default()).await.unwrap();
    assert_eq!(tx.lock_schedule(&ScheduleId::new("missing")).await.unwrap(), None);

    assert_eq!(store.registered_locks(), 0);
}

#[tokio::test]
async fn reset_forgets_idle_locks_and_keeps_held_ones() {
    let (store, schedule_id) = store_with_schedule(3);
    let other = fixtures::schedule("s-2", 1);
    store.seed_schedule(other.clone());

    let mut idle = store.begin(IsolationLevel::default()).await.unwrap();
    idle.lock_schedule(&other.id).await.unwrap();
    idle.commit(|| {}).await.unwrap();

    let mut holder = store.begin(IsolationLevel::default()).await.unwrap();
    holder.lock_schedule(&schedule_id).await.unwrap();
    assert_eq!(store.registered_locks(), 2);

    store.reset(&fixtures::staff("admin")).await.unwrap();
    assert_eq!(store.registered_locks(), 1);

    drop(holder);
    store.reset(&fixtures::staff("admin")).await.unwrap();
    assert_eq!(store.registered_locks(), 0);
}
