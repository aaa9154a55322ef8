mod support;

use chrono::{TimeDelta, Utc};

use support::mem_pool;
use transcode_conductor::error::TaskQueueError;
use transcode_conductor::taskqueue::{TaskStatus, TaskStore};

const SD_HASH: &str = "d8512cc95f1069d241d18f9e1eea4e3b70fe3124";

#[tokio::test]
async fn one_live_task_per_sd_hash() {
    let store = TaskStore::new(mem_pool().await);

    let task = store
        .create("tid-1", SD_HASH, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("first create");
    assert_eq!(task.status, TaskStatus::Dispatched);

    let err = store
        .create("tid-2", SD_HASH, "lbry://one", Some("worker-2"), "{}")
        .await
        .expect_err("second live task must fail");
    assert!(matches!(err, TaskQueueError::DuplicateTask { .. }));

    // A terminal row frees the hash again.
    store
        .update_status("tid-1", TaskStatus::Failed)
        .await
        .expect("mark failed");
    store
        .create("tid-3", SD_HASH, "lbry://one", Some("worker-2"), "{}")
        .await
        .expect("hash free after terminal state");
}

#[tokio::test]
async fn live_lookup_ignores_terminal_rows() {
    let store = TaskStore::new(mem_pool().await);

    store
        .create("tid-1", SD_HASH, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("create");
    let live = store.get_by_sd_hash(SD_HASH).await.expect("live row");
    assert_eq!(live.tid, "tid-1");

    store
        .update_status("tid-1", TaskStatus::Completed)
        .await
        .expect("complete");
    let err = store
        .get_by_sd_hash(SD_HASH)
        .await
        .expect_err("terminal rows are not live");
    assert!(matches!(err, TaskQueueError::NotFound { .. }));
}

#[tokio::test]
async fn stale_detection_and_timeout_are_idempotent() {
    let store = TaskStore::new(mem_pool().await);

    store
        .create("tid-1", SD_HASH, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("create");
    store
        .heartbeat("tid-1", Utc::now() - TimeDelta::minutes(10))
        .await
        .expect("age the heartbeat");

    let cutoff = Utc::now() - TimeDelta::minutes(1);
    let stale = store.list_stale(cutoff).await.expect("list stale");
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].tid, "tid-1");

    assert_eq!(store.mark_timed_out("tid-1", cutoff).await.unwrap(), 1);
    assert_eq!(
        store.mark_timed_out("tid-1", cutoff).await.unwrap(),
        0,
        "second sweep is a no-op"
    );
    assert_eq!(
        store.get("tid-1").await.unwrap().status,
        TaskStatus::TimedOut
    );
}

#[tokio::test]
async fn racing_heartbeat_wins_over_sweep() {
    let store = TaskStore::new(mem_pool().await);

    store
        .create("tid-1", SD_HASH, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("create");

    // The heartbeat arrived before the guarded update ran.
    store.heartbeat("tid-1", Utc::now()).await.expect("heartbeat");
    let cutoff = Utc::now() - TimeDelta::minutes(1);
    assert_eq!(store.mark_timed_out("tid-1", cutoff).await.unwrap(), 0);
    assert_eq!(
        store.get("tid-1").await.unwrap().status,
        TaskStatus::Dispatched
    );
}

#[tokio::test]
async fn restorable_lists_live_tasks_only() {
    let store = TaskStore::new(mem_pool().await);

    store
        .create("tid-1", SD_HASH, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("create live");
    store
        .create(
            "tid-2",
            "ab12cc95f1069d241d18f9e1eea4e3b70fe31200",
            "lbry://two",
            Some("worker-1"),
            "{}",
        )
        .await
        .expect("create second");
    store
        .update_status("tid-2", TaskStatus::Completed)
        .await
        .expect("complete second");

    let restorable = store.list_restorable().await.expect("restorable");
    assert_eq!(restorable.len(), 1);
    assert_eq!(restorable[0].tid, "tid-1");
}

#[tokio::test]
async fn delete_removes_the_row() {
    let store = TaskStore::new(mem_pool().await);

    store
        .create("tid-1", SD_HASH, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("create");
    store.delete("tid-1").await.expect("delete");
    assert!(matches!(
        store.get("tid-1").await,
        Err(TaskQueueError::NotFound { .. })
    ));
}

#[tokio::test]
async fn purge_removes_old_terminal_rows() {
    let store = TaskStore::new(mem_pool().await);

    store
        .create("tid-1", SD_HASH, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("create");
    store
        .update_status("tid-1", TaskStatus::Completed)
        .await
        .expect("complete");

    // Still inside the retention window.
    let purged = store
        .purge_terminal(Utc::now() - TimeDelta::days(1))
        .await
        .expect("purge");
    assert_eq!(purged, 0);

    let purged = store
        .purge_terminal(Utc::now() + TimeDelta::seconds(1))
        .await
        .expect("purge all terminal");
    assert_eq!(purged, 1);
    assert!(matches!(
        store.get("tid-1").await,
        Err(TaskQueueError::NotFound { .. })
    ));
}
