//! Stage configuration.
//!
//! User config lives at `~/.sanitize/sanitize.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SanitizeError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sanitize.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sanitize";

// ---------------------------------------------------------------------------
// Mode switches
// ---------------------------------------------------------------------------

/// What the stage writes back for an eligible entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnrichmentMode {
    /// Extract phone numbers into `phone` plus one mention per number.
    #[default]
    ExtractPhones,
    /// Write the cleaned concatenation of text fields to `translatedText`.
    NormalizeText,
}

/// How an incoming task payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadMode {
    /// `{"entity_ids": [...]}`; an empty list selects the whole dataset.
    #[default]
    EntityIds,
    /// `{"text": "...", "document_id": "..."}` or a bare string.
    RawText,
    /// Arbitrary JSON scanned for text-like fields.
    Discover,
}

/// What the continuation task carries as its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForwardMode {
    /// `{"entity_ids": [...]}` with every id this task touched.
    #[default]
    TouchedEntities,
    /// The incoming payload, unchanged.
    OriginalPayload,
}

// ---------------------------------------------------------------------------
// Config structs (matching sanitize.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Stage identity and mode switches.
    #[serde(default)]
    pub stage: StageSection,

    /// Phone parsing.
    #[serde(default)]
    pub phone: PhoneSection,

    /// Free-text payload discovery bounds.
    #[serde(default)]
    pub discovery: DiscoverySection,

    /// Entity store location.
    #[serde(default)]
    pub storage: StorageSection,
}

/// `[stage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSection {
    /// Stage (queue operation) name this worker serves.
    #[serde(default = "default_stage_name")]
    pub name: String,

    /// Enrichment mode.
    #[serde(default)]
    pub mode: EnrichmentMode,

    /// Payload interpretation.
    #[serde(default)]
    pub payload: PayloadMode,

    /// Continuation payload forwarding.
    #[serde(default)]
    pub forward: ForwardMode,

    /// Buffered writer flushes automatically at this many records.
    #[serde(default = "default_writer_batch_size")]
    pub writer_batch_size: usize,
}

impl Default for StageSection {
    fn default() -> Self {
        Self {
            name: default_stage_name(),
            mode: EnrichmentMode::default(),
            payload: PayloadMode::default(),
            forward: ForwardMode::default(),
            writer_batch_size: default_writer_batch_size(),
        }
    }
}

fn default_stage_name() -> String {
    "sanitize".into()
}
fn default_writer_batch_size() -> usize {
    500
}

/// `[phone]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneSection {
    /// Region hint for numbers written without a country code.
    #[serde(default = "default_region")]
    pub default_region: String,
}

impl Default for PhoneSection {
    fn default() -> Self {
        Self {
            default_region: default_region(),
        }
    }
}

fn default_region() -> String {
    "US".into()
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySection {
    /// Maximum number of text items collected from one payload.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Maximum number of JSON values visited in one payload, collected or not.
    #[serde(default = "default_max_scanned")]
    pub max_scanned: usize,

    /// Items longer than this many bytes are truncated.
    #[serde(default = "default_max_item_length")]
    pub max_item_length: usize,

    /// Strings under a non-text key are collected once they reach this many chars.
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_scanned: default_max_scanned(),
            max_item_length: default_max_item_length(),
            min_text_length: default_min_text_length(),
        }
    }
}

fn default_max_items() -> usize {
    1000
}
fn default_max_scanned() -> usize {
    100_000
}
fn default_max_item_length() -> usize {
    100_000
}
fn default_min_text_length() -> usize {
    40
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// libSQL database file holding entities, mentions and the task queue.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "var/sanitize.db".into()
}

// ---------------------------------------------------------------------------
// Stage config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime stage configuration, built once at startup and passed by parameter.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Stage name, also the store origin tag for writes.
    pub stage: String,
    /// Enrichment mode.
    pub mode: EnrichmentMode,
    /// Payload interpretation.
    pub payload: PayloadMode,
    /// Continuation payload forwarding.
    pub forward: ForwardMode,
    /// Writer auto-flush threshold.
    pub writer_batch_size: usize,
    /// Region code for phone parsing (e.g. `US`).
    pub default_region: String,
    /// Free-text discovery bounds.
    pub discovery: DiscoverySection,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for StageConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            stage: config.stage.name.clone(),
            mode: config.stage.mode,
            payload: config.stage.payload,
            forward: config.stage.forward,
            writer_batch_size: config.stage.writer_batch_size.max(1),
            default_region: config.phone.default_region.clone(),
            discovery: config.discovery.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sanitize/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SanitizeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sanitize/sanitize.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SanitizeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SanitizeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SanitizeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SanitizeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SanitizeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
