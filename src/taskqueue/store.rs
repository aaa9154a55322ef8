//! SQLite-backed task queue operations.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::task::{Task, TaskStatus};
use crate::error::TaskQueueError;

/// Statuses counting as live for the uniqueness constraint.
const LIVE_STATUSES: &str = "'pending', 'dispatched', 'running'";

/// Manages the persistent task queue.
#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    tid: String,
    sd_hash: String,
    url: String,
    worker_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    payload: String,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, TaskQueueError> {
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| TaskQueueError::UnknownStatus(self.status.clone()))?;
        Ok(Task {
            tid: self.tid,
            sd_hash: self.sd_hash,
            url: self.url,
            worker_id: self.worker_id,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_heartbeat: self.last_heartbeat,
            payload: self.payload,
        })
    }
}

/// Creates the tasks schema. Idempotent, performed once at start.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), TaskQueueError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            tid TEXT PRIMARY KEY,
            sd_hash TEXT NOT NULL,
            url TEXT NOT NULL,
            worker_id TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_heartbeat TEXT NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One live task per source hash, enforced by the insert itself.
    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_live_sd_hash \
         ON tasks (sd_hash) WHERE status IN ({LIVE_STATUSES})"
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_status_heartbeat \
         ON tasks (status, last_heartbeat)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically records a dispatched task. Fails with [`TaskQueueError::DuplicateTask`]
    /// when a live task already holds the same sd hash.
    pub async fn create(
        &self,
        tid: &str,
        sd_hash: &str,
        url: &str,
        worker_id: Option<&str>,
        payload: &str,
    ) -> Result<Task, TaskQueueError> {
        let now = Utc::now();
        let res = sqlx::query(
            r#"
            INSERT INTO tasks (tid, sd_hash, url, worker_id, status, created_at, updated_at, last_heartbeat, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tid)
        .bind(sd_hash)
        .bind(url)
        .bind(worker_id)
        .bind(TaskStatus::Dispatched.as_str())
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(payload)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => self.get(tid).await,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(TaskQueueError::DuplicateTask {
                    sd_hash: sd_hash.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetches a task by its identifier.
    pub async fn get(&self, tid: &str) -> Result<Task, TaskQueueError> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE tid = ?")
            .bind(tid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| TaskQueueError::NotFound {
                id: tid.to_string(),
            })?
            .into_task()
    }

    /// Fetches the live task for a source hash, if one exists.
    pub async fn get_by_sd_hash(&self, sd_hash: &str) -> Result<Task, TaskQueueError> {
        sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT * FROM tasks WHERE sd_hash = ? AND status IN ({LIVE_STATUSES})"
        ))
        .bind(sd_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| TaskQueueError::NotFound {
            id: sd_hash.to_string(),
        })?
        .into_task()
    }

    pub async fn update_status(
        &self,
        tid: &str,
        status: TaskStatus,
    ) -> Result<(), TaskQueueError> {
        let res = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE tid = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(tid)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(TaskQueueError::NotFound {
                id: tid.to_string(),
            });
        }
        Ok(())
    }

    /// Advances the heartbeat timestamp, re-arming the sweeper window.
    pub async fn heartbeat(&self, tid: &str, t: DateTime<Utc>) -> Result<(), TaskQueueError> {
        sqlx::query("UPDATE tasks SET last_heartbeat = ?, updated_at = ? WHERE tid = ?")
            .bind(t)
            .bind(Utc::now())
            .bind(tid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Lists live tasks whose heartbeat is older than the cutoff.
    pub async fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Task>, TaskQueueError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT * FROM tasks WHERE status IN ({LIVE_STATUSES}) AND last_heartbeat < ? \
             ORDER BY last_heartbeat"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Marks a stale task as timed out. The guard on status and heartbeat keeps
    /// the sweep idempotent against a concurrently arriving heartbeat.
    /// Returns the number of rows updated.
    pub async fn mark_timed_out(
        &self,
        tid: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, TaskQueueError> {
        let res = sqlx::query(&format!(
            "UPDATE tasks SET status = 'timed_out', updated_at = ? \
             WHERE tid = ? AND status IN ({LIVE_STATUSES}) AND last_heartbeat < ?"
        ))
        .bind(Utc::now())
        .bind(tid)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    /// Lists live tasks eligible for restoration after a restart.
    pub async fn list_restorable(&self) -> Result<Vec<Task>, TaskQueueError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT * FROM tasks WHERE status IN ({LIVE_STATUSES}) ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Lists the most recent tasks, any status.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Task>, TaskQueueError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    pub async fn delete(&self, tid: &str) -> Result<(), TaskQueueError> {
        sqlx::query("DELETE FROM tasks WHERE tid = ?")
            .bind(tid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes terminal tasks older than the retention window.
    /// Returns the number of rows deleted.
    pub async fn purge_terminal(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<u64, TaskQueueError> {
        let res = sqlx::query(
            "DELETE FROM tasks \
             WHERE status IN ('completed', 'failed', 'timed_out') AND updated_at < ?",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}
