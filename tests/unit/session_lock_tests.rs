use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_relay::models::session::SessionKey;
use agent_relay::runtime::{LockAcquisition, SessionLockTable};

fn key(conversation: &str) -> SessionKey {
    SessionKey::new("helper", conversation)
}

#[tokio::test]
async fn free_slot_is_ready_and_busy_slot_is_contended() {
    let table = SessionLockTable::new();
    let first = match table.acquire(&key("C1")) {
        LockAcquisition::Ready(guard) => guard,
        LockAcquisition::Contended(_) => panic!("fresh key must be free"),
    };
    assert_eq!(first.key(), &key("C1"));
    assert!(table.is_locked(&key("C1")));
    assert!(matches!(
        table.acquire(&key("C1")),
        LockAcquisition::Contended(_)
    ));

    drop(first);
    assert!(!table.is_locked(&key("C1")));
    assert!(matches!(table.acquire(&key("C1")), LockAcquisition::Ready(_)));
}

#[tokio::test]
async fn different_keys_never_contend() {
    let table = SessionLockTable::new();
    let _a = table.lock(&key("C1")).await;
    assert!(matches!(table.acquire(&key("C2")), LockAcquisition::Ready(_)));
    assert!(matches!(
        table.acquire(&SessionKey::new("other", "C1")),
        LockAcquisition::Ready(_)
    ));
}

#[tokio::test]
async fn pending_lock_completes_after_release() {
    let table = Arc::new(SessionLockTable::new());
    let held = table.lock(&key("C1")).await;

    let LockAcquisition::Contended(pending) = table.acquire(&key("C1")) else {
        panic!("slot should be busy");
    };
    let waiter = tokio::spawn(async move { pending.wait().await.key().clone() });

    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    drop(held);
    let acquired = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should acquire")
        .unwrap();
    assert_eq!(acquired, key("C1"));
}

#[tokio::test(start_paused = true)]
async fn waiters_acquire_in_arrival_order() {
    let table = Arc::new(SessionLockTable::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    let held = table.lock(&key("C1")).await;

    let mut tasks = Vec::new();
    for id in 0..3 {
        let table = Arc::clone(&table);
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let _guard = table.lock(&key("C1")).await;
            order.lock().unwrap().push(id);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }));
        // Let the task enqueue before spawning the next one.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    drop(held);
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn guard_is_released_when_holder_panics() {
    let table = Arc::new(SessionLockTable::new());
    let task_table = Arc::clone(&table);
    let result = tokio::spawn(async move {
        let _guard = task_table.lock(&key("C1")).await;
        panic!("turn failed");
    })
    .await;

    assert!(result.is_err());
    assert!(!table.is_locked(&key("C1")));
}
