use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HindsightConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub maintenance: MaintenanceConfig,
    pub scanner: ScannerConfig,
    pub sync: SyncConfig,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory holding context/, db/, models/, sync/.
    pub base_dir: String,
    /// Project name stamped onto new entries. Empty means "no project".
    pub project: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    pub rrf_k: usize,
    /// Half-life in days for the temporal decay factor.
    pub decay_half_life_days: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Cosine similarity floor for consolidation clustering.
    pub consolidation_similarity: f64,
    /// Clusters smaller than this are left alone.
    pub consolidation_min_cluster: usize,
    /// Entries younger than this many days are never consolidated.
    pub consolidation_min_age_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    /// Directory of append-only JSONL conversation logs.
    pub transcript_dir: String,
    /// Messages classified per scan invocation.
    pub max_messages: usize,
    /// Raw bytes read per scan invocation.
    pub max_chunk_bytes: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub machine_name: String,
    pub repo_owner: String,
    pub repo_name: String,
    /// Directory-backed object store for replication. The HTTPS client is
    /// an external collaborator; a shared mount works out of the box.
    pub store_dir: String,
    /// Seconds between replication cycles in the long-lived server.
    pub interval_secs: u64,
}

impl Default for HindsightConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            maintenance: MaintenanceConfig::default(),
            scanner: ScannerConfig::default(),
            sync: SyncConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir().to_string_lossy().into_owned(),
            project: String::new(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_base_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            rrf_k: 60,
            decay_half_life_days: 30.0,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            consolidation_similarity: 0.75,
            consolidation_min_cluster: 3,
            consolidation_min_age_days: 3,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            transcript_dir: String::new(),
            max_messages: 10,
            max_chunk_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            machine_name: String::new(),
            repo_owner: String::new(),
            repo_name: String::new(),
            store_dir: String::new(),
            interval_secs: 120,
        }
    }
}

/// Returns `~/.hindsight/`
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".hindsight")
}

/// Returns the default config file path: `~/.hindsight/config.toml`
pub fn default_config_path() -> PathBuf {
    default_base_dir().join("config.toml")
}

impl HindsightConfig {
    /// Load config from the default TOML file, then apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            HindsightConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (HINDSIGHT_DIR, HINDSIGHT_PROJECT, HINDSIGHT_LOG_LEVEL, HINDSIGHT_TRANSCRIPTS).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HINDSIGHT_DIR") {
            self.storage.base_dir = val;
        }
        if let Ok(val) = std::env::var("HINDSIGHT_PROJECT") {
            self.storage.project = val;
        }
        if let Ok(val) = std::env::var("HINDSIGHT_LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = std::env::var("HINDSIGHT_TRANSCRIPTS") {
            self.scanner.transcript_dir = val;
        }
    }

    /// The base directory with `~` expanded.
    pub fn resolved_base_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.base_dir)
    }

    /// Path of the durable index under the base directory.
    pub fn db_path(&self) -> PathBuf {
        self.resolved_base_dir().join("db").join("store")
    }

    /// Current project, or `None` when unset.
    pub fn project(&self) -> Option<&str> {
        if self.storage.project.is_empty() {
            None
        } else {
            Some(&self.storage.project)
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
