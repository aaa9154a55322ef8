mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use support::{make_library, mem_pool, sample_stream};
use transcode_conductor::config::Timings;
use transcode_conductor::dispatch::{manage_task, Dispatcher, Sweeper, TranscodingRequest};
use transcode_conductor::error::LibraryError;
use transcode_conductor::fabric::{ActiveTask, MsgTranscodingTask, MsgWorkerHeartbeat, TaskError, TaskSuccess};
use transcode_conductor::library::{Library, RemoteStream};
use transcode_conductor::metrics::Metrics;
use transcode_conductor::taskqueue::{TaskStatus, TaskStore};

const HASH_A: &str = "d8512cc95f1069d241d18f9e1eea4e3b70fe3124";
const HASH_B: &str = "ab12cc95f1069d241d18f9e1eea4e3b70fe31200";

const WAIT: Duration = Duration::from_secs(5);
const SILENCE: Duration = Duration::from_secs(300);

struct Fixture {
    store: TaskStore,
    library: Arc<Library>,
    metrics: Arc<Metrics>,
    stop: CancellationToken,
}

async fn fixture() -> Fixture {
    let pool = mem_pool().await;
    Fixture {
        store: TaskStore::new(pool.clone()),
        library: make_library(pool),
        metrics: Arc::new(Metrics::new().expect("metrics")),
        stop: CancellationToken::new(),
    }
}

impl Fixture {
    /// Spawns a dispatcher loop and returns its input channels.
    fn spawn_dispatcher(
        &self,
    ) -> (
        mpsc::Sender<ActiveTask>,
        mpsc::Sender<TranscodingRequest>,
    ) {
        let (at_tx, at_rx) = mpsc::channel(4);
        let (req_tx, req_rx) = mpsc::channel(4);
        let dispatcher = Dispatcher::new(
            self.store.clone(),
            self.library.clone(),
            self.metrics.clone(),
            SILENCE,
        );
        let stop = self.stop.clone();
        tokio::spawn(async move {
            dispatcher.run(at_rx, req_rx, stop).await;
        });
        (at_tx, req_tx)
    }

    fn spawn_observer(&self, at: ActiveTask) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let library = self.library.clone();
        let metrics = self.metrics.clone();
        let stop = self.stop.clone();
        tokio::spawn(async move {
            manage_task(at, store, library, metrics, SILENCE, stop).await;
        })
    }
}

#[tokio::test]
async fn duplicate_requests_are_rejected() {
    let fx = fixture().await;
    let (at_tx, req_tx) = fx.spawn_dispatcher();

    // First worker slot takes the first request.
    let (at1, mut handles1) = ActiveTask::open("tid-1", "worker-1");
    at_tx.send(at1).await.unwrap();
    let (r1, _rej1) = TranscodingRequest::new("lbry://one", HASH_A);
    req_tx.send(r1).await.unwrap();

    let payload = timeout(WAIT, handles1.payload.recv())
        .await
        .expect("payload published")
        .expect("payload channel open");
    assert_eq!(payload.sd_hash, HASH_A);
    assert_eq!(payload.tid, "tid-1");

    // Second slot sees a request for the same hash and rejects it.
    let (at2, mut handles2) = ActiveTask::open("tid-2", "worker-1");
    at_tx.send(at2).await.unwrap();
    let (r2, rej2) = TranscodingRequest::new("lbry://one", HASH_A);
    req_tx.send(r2).await.unwrap();
    let (r3, _rej3) = TranscodingRequest::new("lbry://two", HASH_B);
    req_tx.send(r3).await.unwrap();

    timeout(WAIT, rej2).await.expect("rejected in time").expect("reject fired");

    let payload2 = timeout(WAIT, handles2.payload.recv())
        .await
        .expect("second payload published")
        .expect("payload channel open");
    assert_eq!(payload2.sd_hash, HASH_B);

    // Exactly one payload went out per slot.
    assert!(handles1.payload.try_recv().is_err());
    assert!(handles2.payload.try_recv().is_err());

    fx.stop.cancel();
}

#[tokio::test]
async fn success_ingests_and_acks() {
    let fx = fixture().await;
    fx.store
        .create("abc123", HASH_A, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("task row");

    let (at, handles) = ActiveTask::open("abc123", "worker-1");
    let observer = fx.spawn_observer(at);

    let (ack_tx, ack_rx) = oneshot::channel();
    handles
        .success
        .send(TaskSuccess {
            stream: sample_stream(HASH_A, "abc123", "storage1"),
            ack: Some(ack_tx),
        })
        .await
        .expect("send success");

    // The ack only fires after the library commit.
    timeout(WAIT, ack_rx).await.expect("acked in time").expect("ack fired");
    timeout(WAIT, observer).await.expect("observer done").unwrap();

    let video = fx.library.get_video(HASH_A).await.expect("video ingested");
    assert_eq!(video.manifest.tid, "abc123");
    assert_eq!(
        fx.store.get("abc123").await.unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(fx.metrics.done_for("worker-1"), 1.0);
    assert_eq!(fx.metrics.errors_for("worker-1"), 0.0);
}

#[tokio::test]
async fn success_without_manifest_is_an_error() {
    let fx = fixture().await;
    fx.store
        .create("tid-1", HASH_A, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("task row");

    let (at, handles) = ActiveTask::open("tid-1", "worker-1");
    let observer = fx.spawn_observer(at);

    handles
        .success
        .send(TaskSuccess {
            stream: RemoteStream {
                sd_hash: HASH_A.to_string(),
                remote_storage: "storage1".to_string(),
                manifest: None,
            },
            ack: None,
        })
        .await
        .expect("send success");

    timeout(WAIT, observer).await.expect("observer done").unwrap();

    assert_eq!(fx.metrics.errors_for("worker-1"), 1.0);
    assert!(matches!(
        fx.library.get_video(HASH_A).await,
        Err(LibraryError::StreamNotFound)
    ));
    assert_eq!(
        fx.store.get("tid-1").await.unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn worker_error_fails_the_task() {
    let fx = fixture().await;
    fx.store
        .create("tid-1", HASH_A, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("task row");

    let (at, handles) = ActiveTask::open("tid-1", "worker-1");
    let observer = fx.spawn_observer(at);

    handles
        .errors
        .send(TaskError {
            message: "encoder exploded".to_string(),
        })
        .await
        .expect("send error");

    timeout(WAIT, observer).await.expect("observer done").unwrap();
    assert_eq!(fx.metrics.errors_for("worker-1"), 1.0);
    assert_eq!(
        fx.store.get("tid-1").await.unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn heartbeats_persist_and_abandonment_keeps_state() {
    let fx = fixture().await;
    fx.store
        .create("tid-1", HASH_A, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("task row");

    let (at, handles) = ActiveTask::open("tid-1", "worker-1");
    let observer = fx.spawn_observer(at);

    let ts = Utc::now() + TimeDelta::seconds(30);
    handles
        .heartbeats
        .send(MsgWorkerHeartbeat {
            worker_id: "worker-1".to_string(),
            ts,
        })
        .await
        .expect("send heartbeat");

    // Give the observer a moment to persist, then drop the worker side.
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(handles);
    timeout(WAIT, observer).await.expect("observer done").unwrap();

    let task = fx.store.get("tid-1").await.unwrap();
    assert_eq!(task.last_heartbeat.timestamp(), ts.timestamp());
    // Abandonment must not move the task to a terminal state.
    assert_eq!(task.status, TaskStatus::Running);
}

#[tokio::test]
async fn restoration_resends_payload_and_completes() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let db = dir.path().join("conductor.sqlite");

    let payload = MsgTranscodingTask {
        url: "lbry://one".to_string(),
        sd_hash: HASH_A.to_string(),
        tid: "abc123".to_string(),
    };
    let stored = serde_json::to_string(&payload).unwrap();

    // First process lifetime: the payload goes out, then the process dies
    // before any terminal event.
    {
        let pool = support::file_pool(&db).await;
        TaskStore::new(pool.clone())
            .create("abc123", HASH_A, "lbry://one", Some("worker-1"), &stored)
            .await
            .expect("dispatched row");
        pool.close().await;
    }

    // Second lifetime observes the same row.
    let pool = support::file_pool(&db).await;
    let fx = Fixture {
        store: TaskStore::new(pool.clone()),
        library: make_library(pool),
        metrics: Arc::new(Metrics::new().expect("metrics")),
        stop: CancellationToken::new(),
    };

    let restorable = fx.store.list_restorable().await.expect("restorable");
    assert_eq!(restorable.len(), 1);

    let task = fx.store.get("abc123").await.unwrap();
    let (at, mut handles) = ActiveTask::restore(&task).expect("restore");
    assert!(at.restored);
    assert_eq!(at.ex_payload.as_ref(), Some(&payload));

    let (at_tx, req_tx) = fx.spawn_dispatcher();
    at_tx.send(at).await.unwrap();

    // The stored payload is re-sent as-is, no request is consumed.
    let resent = timeout(WAIT, handles.payload.recv())
        .await
        .expect("payload resent")
        .expect("payload channel open");
    assert_eq!(resent, payload);

    // A fresh request for the same hash is still a duplicate.
    let (at2, _handles2) = ActiveTask::open("tid-2", "worker-2");
    at_tx.send(at2).await.unwrap();
    let (dup, rej) = TranscodingRequest::new("lbry://one", HASH_A);
    req_tx.send(dup).await.unwrap();
    timeout(WAIT, rej).await.expect("rejected in time").expect("reject fired");

    // Completion after restoration lands in the library.
    handles
        .success
        .send(TaskSuccess {
            stream: sample_stream(HASH_A, "abc123", "storage1"),
            ack: None,
        })
        .await
        .expect("send success");

    let mut video = None;
    for _ in 0..50 {
        match fx.library.get_video(HASH_A).await {
            Ok(v) => {
                video = Some(v);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    let video = video.expect("video ingested after restoration");
    assert_eq!(video.manifest.tid, "abc123");

    fx.stop.cancel();
}

#[tokio::test]
async fn sweeper_times_out_silent_tasks() {
    let fx = fixture().await;
    let sweeper = Sweeper::new(fx.store.clone(), fx.metrics.clone(), Timings::default());

    fx.store
        .create("tid-1", HASH_A, "lbry://one", Some("worker-1"), "{}")
        .await
        .expect("task row");
    fx.store
        .heartbeat("tid-1", Utc::now() - TimeDelta::minutes(10))
        .await
        .expect("age the heartbeat");

    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(
        fx.store.get("tid-1").await.unwrap().status,
        TaskStatus::TimedOut
    );

    // Sweeps are idempotent and fresh tasks are untouched.
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

    fx.store
        .create("tid-2", HASH_B, "lbry://two", Some("worker-1"), "{}")
        .await
        .expect("fresh task");
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    assert_eq!(
        fx.store.get("tid-2").await.unwrap().status,
        TaskStatus::Dispatched
    );
}
