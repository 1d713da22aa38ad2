//! Pipeline continuation.

use sanitize_shared::{ForwardMode, Result, Task};
use sanitize_storage::TaskQueue;
use serde_json::json;
use tracing::{debug, info};

/// Submits the continuation task for the next pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct StageDispatcher {
    forward: ForwardMode,
}

impl StageDispatcher {
    pub fn new(forward: ForwardMode) -> Self {
        Self { forward }
    }

    /// Pop the head stage and submit a continuation addressed to it.
    ///
    /// Returns the submitted task, or `None` when the pipeline is complete.
    /// `touched` is forwarded as `{"entity_ids": [...]}` unless the stage is
    /// configured to pass the original payload through.
    pub async fn advance<Q: TaskQueue>(
        &self,
        queue: &Q,
        task: &Task,
        touched: &[String],
    ) -> Result<Option<Task>> {
        let Some((next, context)) = task.context.advance() else {
            debug!(task_id = %task.task_id, "pipeline complete");
            return Ok(None);
        };

        let payload = match self.forward {
            ForwardMode::TouchedEntities => json!({ "entity_ids": touched }),
            ForwardMode::OriginalPayload => task.payload.clone(),
        };

        let mut continuation = Task::new(
            task.collection_id.clone(),
            next,
            task.job_id.clone(),
            context,
            payload,
        );
        continuation.priority = task.priority;

        queue.submit(&continuation).await?;
        info!(
            collection_id = %continuation.collection_id,
            stage = %continuation.operation,
            remaining = continuation.context.pipeline.len(),
            "continuation submitted"
        );
        Ok(Some(continuation))
    }
}
