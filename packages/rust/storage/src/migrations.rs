//! SQL migration definitions for the sanitize database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: entities, entity_values, mentions",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per entity per dataset
CREATE TABLE IF NOT EXISTS entities (
    dataset    TEXT NOT NULL,
    id         TEXT NOT NULL,
    schema     TEXT NOT NULL,
    origin     TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (dataset, id)
);

-- Property values; a value is stored once per entity and property
CREATE TABLE IF NOT EXISTS entity_values (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    dataset   TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    prop      TEXT NOT NULL,
    value     TEXT NOT NULL,
    origin    TEXT NOT NULL,
    UNIQUE(dataset, entity_id, prop, value)
);

CREATE INDEX IF NOT EXISTS idx_entity_values_entity ON entity_values(dataset, entity_id);

-- Insert-once mention records
CREATE TABLE IF NOT EXISTS mentions (
    dataset     TEXT NOT NULL,
    id          TEXT NOT NULL,
    kind        TEXT NOT NULL,
    value       TEXT NOT NULL,
    resolved    TEXT NOT NULL,
    entity_id   TEXT,
    document_id TEXT,
    origin      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (dataset, id)
);

CREATE INDEX IF NOT EXISTS idx_mentions_entity ON mentions(dataset, entity_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Stage task queue",
            sql: r#"
CREATE TABLE IF NOT EXISTS tasks (
    id            TEXT PRIMARY KEY,
    collection_id TEXT NOT NULL,
    stage         TEXT NOT NULL,
    job_id        TEXT NOT NULL,
    priority      INTEGER NOT NULL DEFAULT 0,
    payload_json  TEXT NOT NULL,
    context_json  TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'pending',
    attempts      INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(stage, status, priority);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
