use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration, threaded explicitly into the engines
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub search: SearchConfig,
    pub queue: QueueConfig,
    pub indexing: IndexingConfig,
    pub query: QueryConfig,
    pub tag_cloud: TagCloudConfig,
    pub accounts: AccountsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Relational store file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: crate::utils::get_default_datadir().join("bookmarks.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Full-text index file, kept apart from the relational store
    pub index_path: PathBuf,
    /// Fields searched when a query term carries no `field:` prefix
    pub fields: Vec<String>,
    pub page_len: usize,
    /// Best-ranked index hits considered before visibility filtering
    pub max_hits: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_path: crate::utils::get_default_datadir().join("search.db"),
            fields: crate::search::DEFAULT_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            page_len: 10,
            max_hits: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub broker: BrokerKind,
    /// Broker file when `broker: sqlite`
    pub path: PathBuf,
    pub incoming: String,
    pub processing: String,
    /// Upper bound on one blocking wait for a message
    pub poll_interval_ms: u64,
    /// Move messages left in the processing list back to incoming on worker
    /// start. Only safe with a single worker per queue: a second worker
    /// starting up would requeue messages the first one is still processing.
    pub requeue_on_start: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broker: BrokerKind::Sqlite,
            path: crate::utils::get_default_datadir().join("queue.db"),
            incoming: crate::queue::QUEUE_INDEX.to_string(),
            processing: crate::queue::QUEUE_WORK.to_string(),
            poll_interval_ms: 500,
            requeue_on_start: false,
        }
    }
}

/// How the write path propagates changes to the search index
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexingMode {
    /// Enqueue an operation for the index worker
    #[default]
    Queue,
    /// Write the index inside the request
    Direct,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexingConfig {
    pub mode: IndexingMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Number of bookmarks returned on every page
    pub per_page: usize,
    pub related_tags_enabled: bool,
    pub related_tags_max: usize,
    /// Number of tags listed in the popular tags list
    pub taglist_items: usize,
    pub tag_autocomplete_max: usize,
    /// Order `by_ids` results by the given id list; off emulates a backend
    /// without explicit-list ordering
    pub explicit_id_order: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            per_page: 10,
            related_tags_enabled: true,
            related_tags_max: 10,
            taglist_items: 30,
            tag_autocomplete_max: 15,
            explicit_id_order: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TagCloudConfig {
    pub limit: usize,
    pub min_size: u32,
    pub max_size: u32,
}

impl Default for TagCloudConfig {
    fn default() -> Self {
        Self {
            limit: 15,
            min_size: 2,
            max_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccountsConfig {
    /// Validity window of a password reset token
    pub reset_token_hours: i64,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            reset_token_hours: 24,
        }
    }
}

impl Config {
    /// Load configuration from a file path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from default location (~/.config/tagmark/config.yml)
    /// Falls back to default config if file doesn't exist
    pub fn load() -> Self {
        let config_path = crate::utils::get_config_dir().join("config.yml");

        if config_path.exists() {
            match Self::load_from_path(&config_path) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!(
                        "Failed to load config from {:?}: {}; using default configuration",
                        config_path,
                        e
                    );
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Save configuration to a file path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;
        Ok(())
    }
}
