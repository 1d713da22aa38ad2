//! Shared types, error model, and configuration for the sanitize stage.
//!
//! This crate is the foundation depended on by all other stage crates.
//! It provides:
//! - [`SanitizeError`]: the unified error type
//! - Domain types ([`Entity`], [`Schema`], [`Mention`], [`Task`], [`PipelineContext`])
//! - Configuration ([`AppConfig`], [`StageConfig`], config loading)

pub mod config;
pub mod error;
pub mod schema;
pub mod task;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DiscoverySection, EnrichmentMode, ForwardMode, PayloadMode, PhoneSection,
    StageConfig, StageSection, StorageSection, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{Result, SanitizeError};
pub use schema::{PropertyType, Schema};
pub use task::{DATASET_CONTEXT_KEY, PipelineContext, Task};
pub use types::{
    Entity, Mention, MentionKind, StoreRecord, content_document_id, mention_id,
};
