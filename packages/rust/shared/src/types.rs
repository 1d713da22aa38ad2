//! Core domain types: entities, partial mutations and mentions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::schema::{PropertyType, Schema};

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A record from the entity store, or a partial mutation of one.
///
/// Properties are multi-valued; a partial carries only the values this stage
/// adds and is merged into the stored record, never replacing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier.
    pub id: String,
    /// Schema tag.
    pub schema: Schema,
    /// Property name to ordered values.
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<String>>,
}

impl Entity {
    /// Create an empty entity.
    pub fn new(id: impl Into<String>, schema: Schema) -> Self {
        Self {
            id: id.into(),
            schema,
            properties: BTreeMap::new(),
        }
    }

    /// Empty partial with the same id and schema as `self`.
    pub fn partial(&self) -> Self {
        Self::new(self.id.clone(), self.schema)
    }

    /// Values of one property (empty if unset).
    pub fn get(&self, prop: &str) -> &[String] {
        self.properties.get(prop).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All values of properties whose type is `ty`, in property order.
    pub fn type_values(&self, ty: PropertyType) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|(prop, _)| self.schema.property_type(prop) == Some(ty))
            .flat_map(|(_, values)| values.iter().map(String::as_str))
            .collect()
    }

    /// Add a value, dropping it silently if the schema lacks the property,
    /// the value fails type validation, or it is already present.
    ///
    /// Returns whether the value was added.
    pub fn add_quiet(&mut self, prop: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        let Some(ty) = self.schema.property_type(prop) else {
            debug!(entity_id = %self.id, schema = %self.schema, prop, "property not on schema, dropped");
            return false;
        };
        if !ty.validate(&value) {
            debug!(entity_id = %self.id, prop, "value failed validation, dropped");
            return false;
        }

        let values = self.properties.entry(prop.to_string()).or_default();
        if values.contains(&value) {
            return false;
        }
        values.push(value);
        true
    }

    /// Whether the entity has no property values.
    pub fn is_empty(&self) -> bool {
        self.properties.values().all(Vec::is_empty)
    }
}

// ---------------------------------------------------------------------------
// Mention
// ---------------------------------------------------------------------------

/// Kind tag of a derived fact record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MentionKind {
    #[serde(rename = "phone-mention")]
    Phone,
}

impl MentionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone-mention",
        }
    }
}

impl std::str::FromStr for MentionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "phone-mention" => Ok(Self::Phone),
            other => Err(format!("unknown mention kind '{other}'")),
        }
    }
}

/// A fact extracted from a record or document, with a deterministic id.
///
/// Mentions are written once and never mutated; re-deriving the same fact
/// from the same source yields the same id, so replays collapse at the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// `sha256(kind, linkage-id, value)` as lowercase hex.
    pub id: String,
    pub kind: MentionKind,
    /// Value as found.
    pub value: String,
    /// Canonical value.
    pub resolved: String,
    /// Source entity, when the fact came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Source document, when the fact came from raw text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl Mention {
    /// Build a phone mention. The linkage id is the document id when present,
    /// else the entity id; returns `None` when neither is given.
    pub fn phone(
        canonical: &str,
        entity_id: Option<&str>,
        document_id: Option<&str>,
    ) -> Option<Self> {
        let linkage = document_id.or(entity_id)?;
        Some(Self {
            id: mention_id(MentionKind::Phone, linkage, canonical),
            kind: MentionKind::Phone,
            value: canonical.to_string(),
            resolved: canonical.to_string(),
            entity_id: entity_id.map(String::from),
            document_id: document_id.map(String::from),
        })
    }
}

/// Deterministic mention identifier.
pub fn mention_id(kind: MentionKind, linkage_id: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(linkage_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic id for a free-text document that arrived without one.
pub fn content_document_id(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("doc-{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// StoreRecord
// ---------------------------------------------------------------------------

/// One buffered write: a partial entity (merged) or a mention (insert-once).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRecord {
    Partial(Entity),
    Mention(Mention),
}

impl StoreRecord {
    /// Identifier of the written record.
    pub fn id(&self) -> &str {
        match self {
            Self::Partial(entity) => &entity.id,
            Self::Mention(mention) => &mention.id,
        }
    }
}

impl From<Entity> for StoreRecord {
    fn from(entity: Entity) -> Self {
        Self::Partial(entity)
    }
}

impl From<Mention> for StoreRecord {
    fn from(mention: Mention) -> Self {
        Self::Mention(mention)
    }
}
