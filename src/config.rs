use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for bitbucket-mirror
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Bitbucket API endpoints
    #[serde(default)]
    pub api: ApiConfig,

    /// Clone/pull behaviour
    #[serde(default)]
    pub sync: SyncConfig,

    /// Owner include/exclude lists
    #[serde(default)]
    pub filters: FilterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// API endpoint configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    /// Base URL of the REST API (user, teams and repository listings)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// OAuth2 token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Optional per-request timeout in seconds. No timeout when unset.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Maximum parallel clone/pull operations (defaults to available parallelism)
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Git executable to invoke
    #[serde(default = "default_git_binary")]
    pub git_binary: String,

    /// Optional per-repository timeout in seconds. No timeout when unset.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Owner filters applied before dispatch
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FilterConfig {
    /// Owners (user or team) to sync; everything else is ignored when non-empty
    #[serde(default)]
    pub include_owners: Vec<String>,

    /// Owners never to sync; wins over `include_owners`
    #[serde(default)]
    pub exclude_owners: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_base_url() -> String {
    "https://api.bitbucket.org/2.0".to_string()
}
fn default_token_url() -> String {
    "https://bitbucket.org/site/oauth2/access_token".to_string()
}
fn default_git_binary() -> String {
    "git".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_url: default_token_url(),
            timeout: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: None,
            git_binary: default_git_binary(),
            timeout: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("bitbucket-mirror").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.sync.git_binary = shellexpand::full(&self.sync.git_binary)
            .context("Failed to expand git_binary path")?
            .into_owned();

        Ok(())
    }

    /// Number of concurrent clone/pull workers
    pub fn worker_count(&self) -> usize {
        self.sync
            .max_parallel
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync.timeout.map(Duration::from_secs)
    }

    pub fn api_timeout(&self) -> Option<Duration> {
        self.api.timeout.map(Duration::from_secs)
    }

    /// Replace configured owner filters with non-empty command line lists
    pub fn override_filters(&mut self, include_owners: Vec<String>, exclude_owners: Vec<String>) {
        if !include_owners.is_empty() {
            self.filters.include_owners = include_owners;
        }
        if !exclude_owners.is_empty() {
            self.filters.exclude_owners = exclude_owners;
        }
    }
}
