//! Closed schema model and the static capability/property tables.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Record schemas known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Schema {
    Thing,
    Document,
    PlainText,
    HyperText,
    Pages,
    Page,
    Email,
    Message,
    Article,
    LegalEntity,
    Person,
    Company,
    Organization,
    Mention,
}

/// Value type of a schema property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Name,
    String,
    Text,
    Html,
    Phone,
    Email,
    Url,
    Date,
    Entity,
}

impl Schema {
    pub const ALL: [Schema; 14] = [
        Schema::Thing,
        Schema::Document,
        Schema::PlainText,
        Schema::HyperText,
        Schema::Pages,
        Schema::Page,
        Schema::Email,
        Schema::Message,
        Schema::Article,
        Schema::LegalEntity,
        Schema::Person,
        Schema::Company,
        Schema::Organization,
        Schema::Mention,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thing => "Thing",
            Self::Document => "Document",
            Self::PlainText => "PlainText",
            Self::HyperText => "HyperText",
            Self::Pages => "Pages",
            Self::Page => "Page",
            Self::Email => "Email",
            Self::Message => "Message",
            Self::Article => "Article",
            Self::LegalEntity => "LegalEntity",
            Self::Person => "Person",
            Self::Company => "Company",
            Self::Organization => "Organization",
            Self::Mention => "Mention",
        }
    }

    /// Whether records of this schema are eligible for text analysis.
    pub fn is_analyzable(&self) -> bool {
        matches!(
            self,
            Self::Document
                | Self::PlainText
                | Self::HyperText
                | Self::Pages
                | Self::Page
                | Self::Email
                | Self::Message
                | Self::Article
        )
    }

    /// Type of property `name` on this schema, or `None` if the schema lacks it.
    pub fn property_type(&self, name: &str) -> Option<PropertyType> {
        use PropertyType as P;

        let thing = match name {
            "name" | "alias" => Some(P::Name),
            "summary" | "description" | "notes" | "indexText" => Some(P::Text),
            "country" | "keywords" => Some(P::String),
            "sourceUrl" => Some(P::Url),
            _ => None,
        };

        if *self == Self::Mention {
            return match name {
                "mention" | "resolved" | "kind" => Some(P::String),
                "entity" | "document" => Some(P::Entity),
                _ => None,
            };
        }

        if self.is_analyzable() {
            let analyzable = match name {
                "title" | "fileName" | "mimeType" | "language" | "processingError" => {
                    Some(P::String)
                }
                "bodyText" | "translatedText" => Some(P::Text),
                "bodyHtml" => Some(P::Html),
                "phone" | "phoneMentioned" => Some(P::Phone),
                "emailMentioned" => Some(P::Email),
                "date" | "publishedAt" => Some(P::Date),
                "parent" | "document" => Some(P::Entity),
                _ => None,
            };
            let extra = match (self, name) {
                (Self::Email | Self::Message, "subject") => Some(P::String),
                (Self::Email, "from" | "to" | "cc") => Some(P::Email),
                (Self::Page, "index") => Some(P::String),
                _ => None,
            };
            return analyzable.or(extra).or(thing);
        }

        let party = match (self, name) {
            (Self::Thing, _) => None,
            (_, "phone") => Some(P::Phone),
            (_, "email") => Some(P::Email),
            (_, "address" | "registrationNumber" | "legalForm") => Some(P::String),
            (Self::Person, "birthDate") | (_, "incorporationDate") => Some(P::Date),
            _ => None,
        };
        party.or(thing)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schema {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|schema| schema.as_str() == s)
            .ok_or_else(|| format!("unknown schema '{s}'"))
    }
}

impl PropertyType {
    /// Whether `value` is acceptable for a property of this type.
    pub fn validate(&self, value: &str) -> bool {
        static E164_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^\+[1-9]\d{6,14}$").expect("valid regex"));
        static EMAIL_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));

        if value.trim().is_empty() {
            return false;
        }
        match self {
            Self::Phone => E164_RE.is_match(value),
            Self::Email => EMAIL_RE.is_match(value),
            _ => true,
        }
    }
}
