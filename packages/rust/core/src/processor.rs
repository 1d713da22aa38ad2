//! End-to-end processing of one task.
//!
//! Ordering per task:
//! 1. open the dataset handle (on failure: log, advance, return)
//! 2. resolve the working set and build mutations through a task-local writer
//! 3. flush (on failure: return the error, never advance)
//! 4. advance the pipeline
//! 5. close the handle on every path that opened it

use std::collections::HashSet;

use sanitize_shared::{PayloadMode, Result, StageConfig, StoreRecord, Task};
use sanitize_storage::{BulkWriter, DatasetHandle, EntityStore, TaskQueue};
use tracing::{debug, info, instrument, warn};

use crate::builder::EntityMutationBuilder;
use crate::discovery::{WorkingSet, requested_entity_ids, working_set};
use crate::dispatch::StageDispatcher;

/// Collaborators and configuration injected into the processor.
pub struct StageContext<S, Q> {
    pub store: S,
    pub queue: Q,
    pub config: StageConfig,
}

/// Counts for one processed task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReport {
    /// Entity ids visited, in working-set order without repeats.
    pub touched: Vec<String>,
    /// Records handed to the writer.
    pub records: usize,
    /// Entities whose mutation could not be built.
    pub skipped: usize,
    /// Whether a continuation was submitted.
    pub advanced: bool,
    seen: HashSet<String>,
}

pub struct TaskProcessor<S, Q> {
    ctx: StageContext<S, Q>,
    builder: EntityMutationBuilder,
    dispatcher: StageDispatcher,
}

impl<S: EntityStore, Q: TaskQueue> TaskProcessor<S, Q> {
    /// Build the processor. Fails when the configured region is unknown.
    pub fn new(ctx: StageContext<S, Q>) -> Result<Self> {
        let builder = EntityMutationBuilder::from_config(&ctx.config)?;
        let dispatcher = StageDispatcher::new(ctx.config.forward);
        Ok(Self {
            ctx,
            builder,
            dispatcher,
        })
    }

    pub fn context(&self) -> &StageContext<S, Q> {
        &self.ctx
    }

    /// Process one task and echo it back.
    ///
    /// An error means nothing downstream was dispatched and the whole task
    /// should be redelivered.
    #[instrument(skip_all, fields(
        collection_id = %task.collection_id,
        task_id = %task.task_id,
        stage = %self.ctx.config.stage,
    ))]
    pub async fn process(&self, task: Task) -> Result<Task> {
        self.process_with_report(&task).await?;
        Ok(task)
    }

    /// Like [`process`](Self::process), returning what was done.
    pub async fn process_with_report(&self, task: &Task) -> Result<TaskReport> {
        let dataset = task.dataset();

        let mut handle = match self.ctx.store.open(dataset, &self.ctx.config.stage).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(dataset, error = %e, "could not open dataset, advancing without writes");
                let requested = match self.ctx.config.payload {
                    PayloadMode::EntityIds => requested_entity_ids(&task.payload),
                    PayloadMode::RawText | PayloadMode::Discover => Vec::new(),
                };
                let advanced = self
                    .dispatcher
                    .advance(&self.ctx.queue, task, &requested)
                    .await?
                    .is_some();
                return Ok(TaskReport {
                    advanced,
                    ..TaskReport::default()
                });
            }
        };

        let outcome = self.run(&handle, task).await;

        if let Err(e) = handle.close().await {
            warn!(dataset, error = %e, "failed to close dataset handle");
        }

        let report = outcome?;
        info!(
            touched = report.touched.len(),
            records = report.records,
            skipped = report.skipped,
            advanced = report.advanced,
            "task processed"
        );
        Ok(report)
    }

    /// Steps between open and close: build, flush, then advance.
    async fn run(&self, handle: &S::Handle, task: &Task) -> Result<TaskReport> {
        let config = &self.ctx.config;
        let mut writer = handle.writer(config.writer_batch_size);
        let mut report = TaskReport::default();

        match working_set(&task.payload, config.payload, &config.discovery) {
            WorkingSet::Entities(filter) => {
                for entity in handle.entities(&filter).await? {
                    report.touch(&entity.id);
                    match self.builder.build(&entity) {
                        Ok(mutation) => {
                            let records = mutation
                                .partial
                                .into_iter()
                                .map(StoreRecord::from)
                                .chain(mutation.mentions.into_iter().map(StoreRecord::from));
                            put_all(&mut writer, records, &mut report).await?;
                        }
                        Err(e) => {
                            warn!(entity_id = %entity.id, error = %e, "mutation build failed, skipping entity");
                            report.skipped += 1;
                        }
                    }
                }
            }
            WorkingSet::Documents(documents) => {
                for doc in &documents {
                    if let Some(entity_id) = &doc.entity_id {
                        report.touch(entity_id);
                    }
                    let mentions = self.builder.build_text(doc);
                    debug!(document_id = %doc.document_id, mentions = mentions.len(), "free text scanned");
                    put_all(&mut writer, mentions.into_iter().map(StoreRecord::from), &mut report).await?;
                }
            }
        }

        writer.flush().await?;

        report.advanced = self
            .dispatcher
            .advance(&self.ctx.queue, task, &report.touched)
            .await?
            .is_some();
        Ok(report)
    }
}

impl TaskReport {
    fn touch(&mut self, id: &str) {
        if self.seen.insert(id.to_string()) {
            self.touched.push(id.to_string());
        }
    }
}

async fn put_all<H: DatasetHandle>(
    writer: &mut BulkWriter<'_, H>,
    records: impl IntoIterator<Item = StoreRecord>,
    report: &mut TaskReport,
) -> Result<()> {
    for record in records {
        writer.put(record).await?;
        report.records += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{CLEAN_TEXT_PROP, PHONE_PROP};
    use crate::testing::{FakeStore, RecordingQueue};
    use sanitize_shared::{
        DATASET_CONTEXT_KEY, EnrichmentMode, Entity, ForwardMode, PipelineContext, SanitizeError,
        Schema,
    };
    use serde_json::{Value, json};

    const DATASET: &str = "collection_1";

    fn document(id: &str, body: &str) -> Entity {
        let mut entity = Entity::new(id, Schema::Document);
        entity.add_quiet("bodyText", body);
        entity
    }

    fn seeded_store() -> FakeStore {
        let mut person = Entity::new("person-1", Schema::Person);
        person.add_quiet("summary", "Mobile 202-555-0199");
        FakeStore::with_entities(
            DATASET,
            [
                document("doc-1", "<p>Call 202-555-0123 or +44 20 7946 0958</p>"),
                document("doc-2", "No numbers here."),
                person,
            ],
        )
    }

    fn task(payload: Value, stages: &[&str]) -> Task {
        Task::new(
            DATASET,
            "sanitize",
            "job-1",
            PipelineContext::with_pipeline(stages.iter().copied()),
            payload,
        )
    }

    fn processor<S: EntityStore, Q: TaskQueue>(
        store: S,
        queue: Q,
        config: StageConfig,
    ) -> TaskProcessor<S, Q> {
        TaskProcessor::new(StageContext {
            store,
            queue,
            config,
        })
        .expect("processor")
    }

    #[tokio::test]
    async fn entity_ids_task_writes_phones_and_advances() {
        let store = seeded_store();
        let queue = RecordingQueue::default();
        let p = processor(store.clone(), queue.clone(), StageConfig::default());

        let report = p
            .process_with_report(&task(json!({"entity_ids": ["doc-1", "doc-2"]}), &["analyze", "index"]))
            .await
            .expect("process");

        assert_eq!(report.touched, vec!["doc-1", "doc-2"]);
        assert_eq!(report.records, 3);
        assert!(report.advanced);

        let doc = store.entity(DATASET, "doc-1").expect("doc-1");
        assert_eq!(doc.get(PHONE_PROP), ["+12025550123", "+442079460958"]);
        assert_eq!(doc.get("bodyText").len(), 1);
        assert!(store.entity(DATASET, "doc-2").expect("doc-2").get(PHONE_PROP).is_empty());
        assert_eq!(store.state().mentions.len(), 2);

        let sent = queue.submitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].operation, "analyze");
        assert_eq!(sent[0].context.pipeline, vec!["index".to_string()]);
        assert_eq!(sent[0].payload, json!({"entity_ids": ["doc-1", "doc-2"]}));
        assert_eq!(store.state().closed, 1);
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let store = seeded_store();
        let queue = RecordingQueue::default();
        let p = processor(store.clone(), queue.clone(), StageConfig::default());
        let t = task(json!({"entity_ids": ["doc-1"]}), &[]);

        p.process(t.clone()).await.expect("first delivery");
        let first_ids: Vec<String> = store.state().mentions.keys().cloned().collect();
        let first_doc = store.entity(DATASET, "doc-1").expect("doc-1");

        p.process(t).await.expect("redelivery");
        let second_ids: Vec<String> = store.state().mentions.keys().cloned().collect();

        assert_eq!(first_ids.len(), 2);
        assert_eq!(first_ids, second_ids);
        assert_eq!(store.entity(DATASET, "doc-1").expect("doc-1"), first_doc);
        assert!(queue.submitted().is_empty());
    }

    #[tokio::test]
    async fn non_analyzable_entity_is_untouched() {
        let store = seeded_store();
        let p = processor(store.clone(), RecordingQueue::default(), StageConfig::default());

        let report = p
            .process_with_report(&task(json!({"entity_ids": ["person-1"]}), &[]))
            .await
            .expect("process");

        assert_eq!(report.records, 0);
        assert!(store.state().mentions.is_empty());
        assert!(store.entity(DATASET, "person-1").expect("person").get(PHONE_PROP).is_empty());
    }

    #[tokio::test]
    async fn empty_entity_list_selects_whole_dataset() {
        let store = seeded_store();
        let p = processor(store.clone(), RecordingQueue::default(), StageConfig::default());

        let report = p
            .process_with_report(&task(json!({"entity_ids": []}), &[]))
            .await
            .expect("process");

        assert_eq!(report.touched.len(), 3);
        assert_eq!(store.state().mentions.len(), 2);
    }

    #[tokio::test]
    async fn repeated_ids_are_touched_once() {
        let store = seeded_store();
        let queue = RecordingQueue::default();
        let p = processor(store.clone(), queue.clone(), StageConfig::default());

        let report = p
            .process_with_report(&task(json!({"entity_ids": ["doc-2", "doc-1", "doc-2"]}), &["index"]))
            .await
            .expect("process");

        assert_eq!(report.touched, vec!["doc-2", "doc-1"]);
        assert_eq!(queue.submitted()[0].payload, json!({"entity_ids": ["doc-2", "doc-1"]}));
    }

    #[test]
    fn touch_keeps_first_seen_order_at_scale() {
        let mut report = TaskReport::default();
        for round in 0..2 {
            for i in 0..50_000 {
                report.touch(&format!("entity-{i}"));
            }
            assert_eq!(report.touched.len(), 50_000, "round {round}");
        }
        assert_eq!(report.touched[0], "entity-0");
        assert_eq!(report.touched[49_999], "entity-49999");
    }

    #[tokio::test]
    async fn flush_failure_never_advances() {
        let mut store = seeded_store();
        store.fail_flush = true;
        let queue = RecordingQueue::default();
        let p = processor(store.clone(), queue.clone(), StageConfig::default());

        let err = p
            .process(task(json!({"entity_ids": ["doc-1"]}), &["index"]))
            .await
            .unwrap_err();

        assert!(matches!(err, SanitizeError::Flush(_)));
        assert!(queue.submitted().is_empty());
        assert!(store.state().mentions.is_empty());
        assert_eq!(store.state().closed, 1);
    }

    #[tokio::test]
    async fn open_failure_still_advances_once() {
        let mut store = seeded_store();
        store.fail_open = true;
        let queue = RecordingQueue::default();
        let p = processor(store.clone(), queue.clone(), StageConfig::default());

        let t = task(json!({"entity_ids": ["doc-1"]}), &["index"]);
        let echoed = p.process(t.clone()).await.expect("open failure is not fatal");

        assert_eq!(echoed, t);
        let sent = queue.submitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].operation, "index");
        assert_eq!(sent[0].payload, json!({"entity_ids": ["doc-1"]}));
        assert!(store.state().mentions.is_empty());
        assert_eq!(store.state().batches, 0);
        assert_eq!(store.state().opened, 0);
    }

    #[tokio::test]
    async fn submit_failure_fails_task_after_flush() {
        let store = seeded_store();
        let p = processor(store.clone(), RecordingQueue::failing(), StageConfig::default());

        let err = p
            .process(task(json!({"entity_ids": ["doc-1"]}), &["index"]))
            .await
            .unwrap_err();

        assert!(matches!(err, SanitizeError::Queue(_)));
        // Writes landed before the submit failed.
        assert_eq!(store.state().mentions.len(), 2);
        assert_eq!(store.state().closed, 1);
    }

    #[tokio::test]
    async fn context_dataset_override_is_used() {
        let store = FakeStore::with_entities("alt_dataset", [document("doc-9", "Tel 202-555-0123")]);
        let p = processor(store.clone(), RecordingQueue::default(), StageConfig::default());

        let mut t = task(json!({"entity_ids": ["doc-9"]}), &[]);
        t.context.extra.insert(DATASET_CONTEXT_KEY.into(), json!("alt_dataset"));
        p.process(t).await.expect("process");

        let doc = store.entity("alt_dataset", "doc-9").expect("doc-9");
        assert_eq!(doc.get(PHONE_PROP), ["+12025550123"]);
        assert!(store.entity(DATASET, "doc-9").is_none());
    }

    #[tokio::test]
    async fn raw_text_task_writes_document_mentions() {
        let store = FakeStore::default();
        let queue = RecordingQueue::default();
        let config = StageConfig {
            payload: PayloadMode::RawText,
            ..StageConfig::default()
        };
        let p = processor(store.clone(), queue.clone(), config);

        let report = p
            .process_with_report(&task(
                json!({"text": "Reach 202-555-0123", "document_id": "doc-raw", "entity_id": "ent-1"}),
                &["index"],
            ))
            .await
            .expect("process");

        assert_eq!(report.touched, vec!["ent-1"]);
        let state = store.state();
        assert_eq!(state.mentions.len(), 1);
        let mention = state.mentions.values().next().expect("mention");
        assert_eq!(mention.document_id.as_deref(), Some("doc-raw"));
        assert_eq!(mention.resolved, "+12025550123");
        assert!(state.entities.is_empty());
        drop(state);

        assert_eq!(queue.submitted()[0].payload, json!({"entity_ids": ["ent-1"]}));
    }

    #[tokio::test]
    async fn discover_task_forwards_original_payload() {
        let store = FakeStore::default();
        let queue = RecordingQueue::default();
        let config = StageConfig {
            payload: PayloadMode::Discover,
            forward: ForwardMode::OriginalPayload,
            ..StageConfig::default()
        };
        let p = processor(store.clone(), queue.clone(), config);
        let payload = json!({"id": "m-1", "message": {"body": "fax (202) 555-0187"}});

        p.process(task(payload.clone(), &["index"])).await.expect("process");

        assert_eq!(store.state().mentions.len(), 1);
        assert_eq!(queue.submitted()[0].payload, payload);
    }

    #[tokio::test]
    async fn normalize_mode_writes_clean_text() {
        let store = seeded_store();
        let config = StageConfig {
            mode: EnrichmentMode::NormalizeText,
            ..StageConfig::default()
        };
        let p = processor(store.clone(), RecordingQueue::default(), config);

        p.process(task(json!({"entity_ids": ["doc-1"]}), &[])).await.expect("process");

        let doc = store.entity(DATASET, "doc-1").expect("doc-1");
        assert_eq!(
            doc.get(CLEAN_TEXT_PROP),
            ["Call 202-555-0123 or +44 20 7946 0958"]
        );
        assert!(doc.get(PHONE_PROP).is_empty());
        assert!(store.state().mentions.is_empty());
    }

    #[tokio::test]
    async fn small_batches_flush_before_the_end() {
        let store = seeded_store();
        let config = StageConfig {
            writer_batch_size: 1,
            ..StageConfig::default()
        };
        let p = processor(store.clone(), RecordingQueue::default(), config);

        p.process(task(json!({"entity_ids": ["doc-1"]}), &[])).await.expect("process");
        assert_eq!(store.state().batches, 3);
    }

    #[tokio::test]
    async fn libsql_store_and_queue_end_to_end() {
        use sanitize_storage::{EntityFilter, Storage};

        let path = std::env::temp_dir().join(format!("sanitize_core_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&path).await.expect("open db");
        {
            let mut handle = storage.open(DATASET, "ingest").await.expect("open dataset");
            handle
                .write_batch(&[document("doc-1", "<div>Hotline: (202) 555-0123</div>").into()])
                .await
                .expect("seed");
            handle.close().await.expect("close");
        }

        let p = processor(storage.clone(), storage.clone(), StageConfig::default());
        let t = task(json!({"entity_ids": ["doc-1"]}), &["index"]);
        p.process(t.clone()).await.expect("first delivery");
        p.process(t).await.expect("redelivery");

        let mut handle = storage.open(DATASET, "check").await.expect("reopen");
        let entities = handle
            .entities(&EntityFilter::Ids(vec!["doc-1".into()]))
            .await
            .expect("read");
        assert_eq!(entities[0].get(PHONE_PROP), ["+12025550123"]);
        assert_eq!(handle.mentions_for("doc-1").await.expect("mentions").len(), 1);
        handle.close().await.expect("close");

        let next = storage.claim("index").await.expect("claim").expect("continuation");
        assert_eq!(next.task.payload, json!({"entity_ids": ["doc-1"]}));
        assert!(next.task.context.pipeline.is_empty());
    }

    #[test]
    fn unknown_region_rejected_at_construction() {
        let config = StageConfig {
            default_region: "NOPE".into(),
            ..StageConfig::default()
        };
        let built = TaskProcessor::new(StageContext {
            store: FakeStore::default(),
            queue: RecordingQueue::default(),
            config,
        });
        assert!(matches!(built, Err(SanitizeError::Config { .. })));
    }
}
