//! Stage task queue backed by the `tasks` table.
//!
//! Tasks move `pending -> running -> done`. A negative acknowledgement puts a
//! running task back to `pending` and bumps its attempt counter, so a failed
//! task is redelivered to the same stage. Rows that cannot be decoded end in
//! `failed`.

use chrono::Utc;
use libsql::params;
use sanitize_shared::{PipelineContext, Result, SanitizeError, Task};
use tracing::{debug, instrument, warn};

use crate::{Storage, TaskQueue};

fn queue_err(e: impl std::fmt::Display) -> SanitizeError {
    SanitizeError::Queue(e.to_string())
}

/// A claimed task plus how many times it was previously rejected.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub task: Task,
    pub attempts: u32,
}

impl TaskQueue for Storage {
    #[instrument(skip_all, fields(stage = %task.operation, task_id = %task.task_id))]
    async fn submit(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_string(&task.payload).map_err(queue_err)?;
        let context = serde_json::to_string(&task.context).map_err(queue_err)?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO tasks
                    (id, collection_id, stage, job_id, priority, payload_json, context_json,
                     status, attempts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0, ?8, ?9)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    task.task_id.as_str(),
                    task.collection_id.as_str(),
                    task.operation.as_str(),
                    task.job_id.as_str(),
                    task.priority,
                    payload,
                    context,
                    now.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(queue_err)?;

        debug!("task submitted");
        Ok(())
    }
}

impl Storage {
    /// Claim the highest-priority, oldest pending task for `stage`.
    ///
    /// A claimed row whose stored JSON cannot be decoded is marked `failed`
    /// and the next pending task is tried.
    pub async fn claim(&self, stage: &str) -> Result<Option<Delivery>> {
        while let Some((task_id, decoded)) = self.claim_row(stage).await? {
            match decoded {
                Ok(delivery) => {
                    debug!(stage, %task_id, attempts = delivery.attempts, "task claimed");
                    return Ok(Some(delivery));
                }
                Err(e) => {
                    warn!(stage, %task_id, error = %e, "undecodable task marked failed");
                    self.set_status(
                        &task_id,
                        "UPDATE tasks SET status = 'failed', updated_at = ?2 WHERE id = ?1",
                    )
                    .await?;
                }
            }
        }
        Ok(None)
    }

    async fn claim_row(&self, stage: &str) -> Result<Option<(String, Result<Delivery>)>> {
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                "UPDATE tasks SET status = 'running', updated_at = ?2
                 WHERE id = (
                    SELECT id FROM tasks
                    WHERE stage = ?1 AND status = 'pending'
                    ORDER BY priority DESC, rowid
                    LIMIT 1
                 )
                 RETURNING id, collection_id, stage, job_id, priority,
                           payload_json, context_json, attempts",
                params![stage, now.as_str()],
            )
            .await
            .map_err(queue_err)?;

        let Some(row) = rows.next().await.map_err(queue_err)? else {
            return Ok(None);
        };
        let task_id: String = row.get(0).map_err(queue_err)?;
        Ok(Some((task_id, row_to_delivery(&row))))
    }
    /// Mark a claimed task as done.
    pub async fn ack(&self, task_id: &str) -> Result<()> {
        self.set_status(task_id, "UPDATE tasks SET status = 'done', updated_at = ?2 WHERE id = ?1")
            .await
    }

    /// Return a claimed task to the queue for redelivery.
    pub async fn nack(&self, task_id: &str) -> Result<()> {
        self.set_status(
            task_id,
            "UPDATE tasks SET status = 'pending', attempts = attempts + 1, updated_at = ?2
             WHERE id = ?1",
        )
        .await
    }

    /// Count tasks for `stage` in `status`.
    pub async fn count_tasks(&self, stage: &str, status: &str) -> Result<u64> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM tasks WHERE stage = ?1 AND status = ?2",
                params![stage, status],
            )
            .await
            .map_err(queue_err)?;

        match rows.next().await.map_err(queue_err)? {
            Some(row) => row.get::<i64>(0).map(|n| n.max(0) as u64).map_err(queue_err),
            None => Ok(0),
        }
    }

    async fn set_status(&self, task_id: &str, sql: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(sql, params![task_id, now.as_str()])
            .await
            .map_err(queue_err)?;
        if changed == 0 {
            return Err(SanitizeError::Queue(format!("no task with id {task_id}")));
        }
        Ok(())
    }
}

fn row_to_delivery(row: &libsql::Row) -> Result<Delivery> {
    let payload_json: String = row.get(5).map_err(queue_err)?;
    let context_json: String = row.get(6).map_err(queue_err)?;
    let context: PipelineContext = serde_json::from_str(&context_json)
        .map_err(|e| SanitizeError::parse(format!("task context: {e}")))?;

    let task = Task {
        task_id: row.get(0).map_err(queue_err)?,
        collection_id: row.get(1).map_err(queue_err)?,
        operation: row.get(2).map_err(queue_err)?,
        job_id: row.get(3).map_err(queue_err)?,
        priority: row.get(4).map_err(queue_err)?,
        payload: serde_json::from_str(&payload_json)
            .map_err(|e| SanitizeError::parse(format!("task payload: {e}")))?,
        context,
    };
    let attempts = row.get::<u32>(7).map_err(queue_err)?;
    Ok(Delivery { task, attempts })
}
