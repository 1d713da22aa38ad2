//! Queue task envelope and pipeline continuation context.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Context key naming an alternate dataset for the entity store.
pub const DATASET_CONTEXT_KEY: &str = "ftmstore";

/// Remaining pipeline stages plus an open bag of auxiliary keys.
///
/// Each dispatch removes exactly the head stage; an empty list means the
/// pipeline is complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineContext {
    /// Stage names still to run, in order.
    #[serde(default)]
    pub pipeline: Vec<String>,
    /// Every other context key, forwarded untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PipelineContext {
    /// Context with the given stages and an empty bag.
    pub fn with_pipeline<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pipeline: stages.into_iter().map(Into::into).collect(),
            extra: Map::new(),
        }
    }

    /// Split off the next stage. Returns the stage name and the context the
    /// continuation should carry; `None` when the pipeline is complete.
    pub fn advance(&self) -> Option<(String, PipelineContext)> {
        let (next, rest) = self.pipeline.split_first()?;
        Some((
            next.clone(),
            Self {
                pipeline: rest.to_vec(),
                extra: self.extra.clone(),
            },
        ))
    }

    /// A string-valued bag entry.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// A unit of work consumed from the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Collection/dataset the task belongs to.
    pub collection_id: String,
    /// Stage (operation) the task is addressed to.
    pub operation: String,
    /// Job grouping all tasks of one pipeline run.
    pub job_id: String,
    /// Unique per submitted task.
    #[serde(default = "new_task_id")]
    pub task_id: String,
    #[serde(default)]
    pub priority: i32,
    /// Opaque payload, interpreted according to the stage's payload mode.
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub context: PipelineContext,
}

fn new_task_id() -> String {
    Uuid::now_v7().to_string()
}

impl Task {
    /// New task with a fresh task id.
    pub fn new(
        collection_id: impl Into<String>,
        operation: impl Into<String>,
        job_id: impl Into<String>,
        context: PipelineContext,
        payload: Value,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            operation: operation.into(),
            job_id: job_id.into(),
            task_id: new_task_id(),
            priority: 0,
            payload,
            context,
        }
    }

    /// Dataset the stage reads and writes: the context override, else the collection.
    pub fn dataset(&self) -> &str {
        self.context
            .get_str(DATASET_CONTEXT_KEY)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.collection_id)
    }
}
