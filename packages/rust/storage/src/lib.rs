//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the entity store
//! (entities, their property values, and mentions) and the stage task queue.
//! Per-task access goes through [`SqlDataset`] handles opened via
//! [`EntityStore::open`].

mod migrations;
mod queue;
pub mod traits;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use libsql::{Connection, Database, params};
use sanitize_shared::{Entity, Mention, MentionKind, Result, SanitizeError, Schema, StoreRecord};
use tracing::{debug, instrument, warn};

pub use queue::Delivery;
pub use traits::{BulkWriter, DatasetHandle, EntityFilter, EntityStore, TaskQueue};

fn storage_err(e: impl std::fmt::Display) -> SanitizeError {
    SanitizeError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SanitizeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db: Arc::new(db),
            conn,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SanitizeError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl EntityStore for Storage {
    type Handle = SqlDataset;

    async fn open(&self, dataset: &str, stage: &str) -> Result<SqlDataset> {
        if dataset.trim().is_empty() {
            return Err(SanitizeError::store_unavailable(dataset, "dataset name is empty"));
        }
        let conn = self
            .db
            .connect()
            .map_err(|e| SanitizeError::store_unavailable(dataset, e.to_string()))?;

        debug!(dataset, stage, "opened dataset handle");
        Ok(SqlDataset {
            conn: Some(conn),
            dataset: dataset.to_string(),
            origin: stage.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Dataset handle
// ---------------------------------------------------------------------------

/// A per-task connection scoped to one dataset.
pub struct SqlDataset {
    conn: Option<Connection>,
    dataset: String,
    origin: String,
}

impl SqlDataset {
    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| {
            SanitizeError::Storage(format!("dataset handle for {} is closed", self.dataset))
        })
    }

    /// Stage name recorded as the origin of writes.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Mentions linked to an entity or document id.
    pub async fn mentions_for(&self, linkage_id: &str) -> Result<Vec<Mention>> {
        let mut rows = self
            .conn()?
            .query(
                "SELECT id, kind, value, resolved, entity_id, document_id FROM mentions
                 WHERE dataset = ?1 AND (entity_id = ?2 OR document_id = ?2)
                 ORDER BY value",
                params![self.dataset.as_str(), linkage_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_mention(&row)?);
        }
        Ok(results)
    }

    async fn load_entity_rows(&self, id: Option<&str>) -> Result<Vec<EntityRow>> {
        let conn = self.conn()?;
        let mut rows = match id {
            Some(id) => conn
                .query(
                    "SELECT e.id, e.schema, v.prop, v.value FROM entities e
                     LEFT JOIN entity_values v ON v.dataset = e.dataset AND v.entity_id = e.id
                     WHERE e.dataset = ?1 AND e.id = ?2
                     ORDER BY v.seq",
                    params![self.dataset.as_str(), id],
                )
                .await
                .map_err(storage_err)?,
            None => conn
                .query(
                    "SELECT e.id, e.schema, v.prop, v.value FROM entities e
                     LEFT JOIN entity_values v ON v.dataset = e.dataset AND v.entity_id = e.id
                     WHERE e.dataset = ?1
                     ORDER BY e.id, v.seq",
                    params![self.dataset.as_str()],
                )
                .await
                .map_err(storage_err)?,
        };

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(EntityRow {
                id: row.get::<String>(0).map_err(storage_err)?,
                schema: row.get::<String>(1).map_err(storage_err)?,
                prop: row.get::<String>(2).ok(),
                value: row.get::<String>(3).ok(),
            });
        }
        Ok(results)
    }

    async fn write_records(&self, conn: &Connection, records: &[StoreRecord]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let dataset = self.dataset.as_str();
        let origin = self.origin.as_str();

        for record in records {
            match record {
                StoreRecord::Partial(entity) => {
                    conn.execute(
                        "INSERT INTO entities (dataset, id, schema, origin, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(dataset, id) DO UPDATE SET
                            origin = excluded.origin,
                            updated_at = excluded.updated_at",
                        params![dataset, entity.id.as_str(), entity.schema.as_str(), origin, now.as_str()],
                    )
                    .await
                    .map_err(storage_err)?;

                    for (prop, values) in &entity.properties {
                        for value in values {
                            conn.execute(
                                "INSERT INTO entity_values (dataset, entity_id, prop, value, origin)
                                 VALUES (?1, ?2, ?3, ?4, ?5)
                                 ON CONFLICT(dataset, entity_id, prop, value) DO NOTHING",
                                params![dataset, entity.id.as_str(), prop.as_str(), value.as_str(), origin],
                            )
                            .await
                            .map_err(storage_err)?;
                        }
                    }
                }
                StoreRecord::Mention(mention) => {
                    conn.execute(
                        "INSERT INTO mentions
                            (dataset, id, kind, value, resolved, entity_id, document_id, origin, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                         ON CONFLICT(dataset, id) DO NOTHING",
                        params![
                            dataset,
                            mention.id.as_str(),
                            mention.kind.as_str(),
                            mention.value.as_str(),
                            mention.resolved.as_str(),
                            mention.entity_id.as_deref(),
                            mention.document_id.as_deref(),
                            origin,
                            now.as_str()
                        ],
                    )
                    .await
                    .map_err(storage_err)?;
                }
            }
        }
        Ok(())
    }
}

impl DatasetHandle for SqlDataset {
    fn dataset(&self) -> &str {
        &self.dataset
    }

    #[instrument(skip(self), fields(dataset = %self.dataset))]
    async fn entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let rows = match filter {
            EntityFilter::All => self.load_entity_rows(None).await?,
            EntityFilter::Ids(ids) => {
                let mut rows = Vec::new();
                for id in ids {
                    let found = self.load_entity_rows(Some(id)).await?;
                    if found.is_empty() {
                        debug!(entity_id = %id, "requested entity not in dataset");
                    }
                    rows.extend(found);
                }
                rows
            }
        };
        Ok(assemble_entities(rows))
    }

    async fn write_batch(&self, records: &[StoreRecord]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("BEGIN IMMEDIATE", params![])
            .await
            .map_err(|e| SanitizeError::Flush(e.to_string()))?;

        match self.write_records(conn, records).await {
            Ok(()) => {
                conn.execute("COMMIT", params![])
                    .await
                    .map_err(|e| SanitizeError::Flush(e.to_string()))?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = conn.execute("ROLLBACK", params![]).await {
                    warn!(error = %rollback, "rollback after failed write batch failed");
                }
                Err(SanitizeError::Flush(e.to_string()))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.conn.take().is_some() {
            debug!(dataset = %self.dataset, "closed dataset handle");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

struct EntityRow {
    id: String,
    schema: String,
    prop: Option<String>,
    value: Option<String>,
}

/// Fold joined rows into entities, preserving row order. Rows are grouped by
/// consecutive id; entities with an unknown schema are skipped.
fn assemble_entities(rows: Vec<EntityRow>) -> Vec<Entity> {
    let mut entities: Vec<Entity> = Vec::new();
    let mut skipped: Option<String> = None;

    for row in rows {
        if skipped.as_deref() == Some(row.id.as_str()) {
            continue;
        }
        let continues = entities.last().is_some_and(|e| e.id == row.id);
        if !continues {
            match Schema::from_str(&row.schema) {
                Ok(schema) => entities.push(Entity::new(row.id.clone(), schema)),
                Err(e) => {
                    warn!(entity_id = %row.id, error = %e, "skipping entity with unknown schema");
                    skipped = Some(row.id);
                    continue;
                }
            }
        }
        if let (Some(prop), Some(value), Some(entity)) = (row.prop, row.value, entities.last_mut()) {
            entity.properties.entry(prop).or_default().push(value);
        }
    }
    entities
}

fn row_to_mention(row: &libsql::Row) -> Result<Mention> {
    let kind: String = row.get(1).map_err(storage_err)?;
    Ok(Mention {
        id: row.get(0).map_err(storage_err)?,
        kind: MentionKind::from_str(&kind).map_err(SanitizeError::Storage)?,
        value: row.get(2).map_err(storage_err)?,
        resolved: row.get(3).map_err(storage_err)?,
        entity_id: row.get::<String>(4).ok(),
        document_id: row.get::<String>(5).ok(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
