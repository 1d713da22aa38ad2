//! In-memory store and queue fakes with fault injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use sanitize_shared::{Entity, Mention, Result, SanitizeError, StoreRecord, Task};
use sanitize_storage::{DatasetHandle, EntityFilter, EntityStore, TaskQueue};

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Queue that records every submitted task.
#[derive(Debug, Clone, Default)]
pub struct RecordingQueue {
    submitted: Arc<Mutex<Vec<Task>>>,
    fail: bool,
}

impl RecordingQueue {
    /// A queue whose `submit` always fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn submitted(&self) -> Vec<Task> {
        self.submitted.lock().unwrap().clone()
    }
}

impl TaskQueue for RecordingQueue {
    async fn submit(&self, task: &Task) -> Result<()> {
        if self.fail {
            return Err(SanitizeError::Queue("injected submit failure".into()));
        }
        self.submitted.lock().unwrap().push(task.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeState {
    pub entities: HashMap<String, BTreeMap<String, Entity>>,
    pub mentions: BTreeMap<String, Mention>,
    pub opened: usize,
    pub closed: usize,
    pub batches: usize,
}

/// Store with upsert semantics and injectable open/flush failures.
#[derive(Debug, Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<FakeState>>,
    pub fail_open: bool,
    pub fail_flush: bool,
}

impl FakeStore {
    pub fn with_entities(dataset: &str, entities: impl IntoIterator<Item = Entity>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state();
            let bucket = state.entities.entry(dataset.to_string()).or_default();
            for entity in entities {
                bucket.insert(entity.id.clone(), entity);
            }
        }
        store
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn entity(&self, dataset: &str, id: &str) -> Option<Entity> {
        self.state().entities.get(dataset)?.get(id).cloned()
    }
}

impl EntityStore for FakeStore {
    type Handle = FakeHandle;

    async fn open(&self, dataset: &str, _stage: &str) -> Result<FakeHandle> {
        if self.fail_open {
            return Err(SanitizeError::store_unavailable(dataset, "injected open failure"));
        }
        self.state().opened += 1;
        Ok(FakeHandle {
            state: Arc::clone(&self.state),
            dataset: dataset.to_string(),
            fail_flush: self.fail_flush,
            closed: false,
        })
    }
}

pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
    dataset: String,
    fail_flush: bool,
    closed: bool,
}

impl DatasetHandle for FakeHandle {
    fn dataset(&self) -> &str {
        &self.dataset
    }

    async fn entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let state = self.state.lock().unwrap();
        let Some(bucket) = state.entities.get(&self.dataset) else {
            return Ok(Vec::new());
        };
        Ok(match filter {
            EntityFilter::All => bucket.values().cloned().collect(),
            EntityFilter::Ids(ids) => ids.iter().filter_map(|id| bucket.get(id).cloned()).collect(),
        })
    }

    async fn write_batch(&self, records: &[StoreRecord]) -> Result<()> {
        if self.fail_flush {
            return Err(SanitizeError::Flush("injected flush failure".into()));
        }
        let mut state = self.state.lock().unwrap();
        state.batches += 1;
        for record in records {
            match record {
                StoreRecord::Partial(partial) => {
                    let stored = state
                        .entities
                        .entry(self.dataset.clone())
                        .or_default()
                        .entry(partial.id.clone())
                        .or_insert_with(|| partial.partial());
                    for (prop, values) in &partial.properties {
                        let existing = stored.properties.entry(prop.clone()).or_default();
                        for value in values {
                            if !existing.contains(value) {
                                existing.push(value.clone());
                            }
                        }
                    }
                }
                StoreRecord::Mention(mention) => {
                    state
                        .mentions
                        .entry(mention.id.clone())
                        .or_insert_with(|| mention.clone());
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().closed += 1;
        }
        Ok(())
    }
}
