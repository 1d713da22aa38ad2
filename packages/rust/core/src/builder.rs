//! Per-entity mutation construction.
//!
//! The builder decides eligibility, reads the text-typed values of an entity,
//! and turns them into a partial entity plus the phone mentions found in them.

use std::collections::BTreeSet;

use sanitize_markup::normalize;
use sanitize_phone::PhoneExtractor;
use sanitize_shared::{
    EnrichmentMode, Entity, Mention, PropertyType, Result, SanitizeError, StageConfig,
};
use tracing::{debug, instrument};

use crate::discovery::TextDocument;

/// Property receiving canonical phone numbers.
pub const PHONE_PROP: &str = "phone";

/// Property receiving the normalized plain text.
pub const CLEAN_TEXT_PROP: &str = "translatedText";

/// Writes produced for one entity or free-text document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mutation {
    /// Partial entity to merge, if anything changed.
    pub partial: Option<Entity>,
    /// One mention per distinct phone number.
    pub mentions: Vec<Mention>,
}

impl Mutation {
    pub fn is_empty(&self) -> bool {
        self.partial.is_none() && self.mentions.is_empty()
    }
}

/// Builds partial mutations and mentions in one configured mode.
#[derive(Debug, Clone, Copy)]
pub struct EntityMutationBuilder {
    mode: EnrichmentMode,
    extractor: PhoneExtractor,
}

impl EntityMutationBuilder {
    pub fn new(mode: EnrichmentMode, extractor: PhoneExtractor) -> Self {
        Self { mode, extractor }
    }

    /// Builder for a stage configuration. Fails on an unknown region code.
    pub fn from_config(config: &StageConfig) -> Result<Self> {
        Ok(Self::new(config.mode, PhoneExtractor::new(&config.default_region)?))
    }

    pub fn mode(&self) -> EnrichmentMode {
        self.mode
    }

    /// Build the mutation for one stored entity.
    ///
    /// Non-analyzable entities and entities without text yield an empty mutation.
    #[instrument(skip_all, fields(entity_id = %entity.id, schema = %entity.schema))]
    pub fn build(&self, entity: &Entity) -> Result<Mutation> {
        if entity.id.trim().is_empty() {
            return Err(SanitizeError::validation("entity has no id"));
        }
        if !entity.schema.is_analyzable() {
            debug!("schema is not analyzable, skipping");
            return Ok(Mutation::default());
        }

        let texts = entity.type_values(PropertyType::Text);
        if texts.is_empty() {
            return Ok(Mutation::default());
        }

        match self.mode {
            EnrichmentMode::ExtractPhones => {
                let phones = self.phones_in(&texts);
                let mut partial = entity.partial();
                let mut mentions = Vec::with_capacity(phones.len());
                for phone in &phones {
                    partial.add_quiet(PHONE_PROP, phone.as_str());
                    mentions.extend(Mention::phone(phone, Some(&entity.id), None));
                }
                debug!(phones = phones.len(), "phones extracted");
                Ok(Mutation {
                    partial: (!partial.is_empty()).then_some(partial),
                    mentions,
                })
            }
            EnrichmentMode::NormalizeText => {
                let clean = texts
                    .iter()
                    .map(|text| normalize(*text))
                    .filter(|text| !text.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                let mut partial = entity.partial();
                if !clean.is_empty() {
                    partial.add_quiet(CLEAN_TEXT_PROP, clean);
                }
                Ok(Mutation {
                    partial: (!partial.is_empty()).then_some(partial),
                    mentions: Vec::new(),
                })
            }
        }
    }

    /// Mentions for a free-text document. Free text has no entity to
    /// mutate, so only phone extraction applies.
    #[instrument(skip_all, fields(document_id = %doc.document_id))]
    pub fn build_text(&self, doc: &TextDocument) -> Vec<Mention> {
        if self.mode != EnrichmentMode::ExtractPhones {
            debug!(mode = ?self.mode, "free text ignored in this mode");
            return Vec::new();
        }

        let texts: Vec<&str> = doc.texts.iter().map(String::as_str).collect();
        self.phones_in(&texts)
            .iter()
            .filter_map(|phone| {
                Mention::phone(phone, doc.entity_id.as_deref(), Some(&doc.document_id))
            })
            .collect()
    }

    /// Union of the phones found in each value, extracted value by value.
    fn phones_in(&self, texts: &[&str]) -> BTreeSet<String> {
        texts
            .iter()
            .flat_map(|text| self.extractor.extract(&normalize(*text)))
            .collect()
    }
}
