//! Stage-processing engine for the sanitize stage.
//!
//! This crate ties together markup normalization, phone extraction and the
//! entity store into the per-task workflow run by the worker
//! ([`TaskProcessor::process`]).

pub mod builder;
pub mod discovery;
pub mod dispatch;
pub mod processor;

#[cfg(test)]
mod testing;

pub use builder::{CLEAN_TEXT_PROP, EntityMutationBuilder, Mutation, PHONE_PROP};
pub use discovery::{TextDocument, WorkingSet, discover_text, working_set};
pub use dispatch::StageDispatcher;
pub use processor::{StageContext, TaskProcessor, TaskReport};
