use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::yandere::client::HttpClientConfig;
use crate::yandere::coordinator::{DEFAULT_BASE_URL, DownloaderConfig, RetryPolicy};
use crate::yandere::query::DEFAULT_PAGE_LIMIT;

/// Name of the configuration file inside the config directory.
pub const CONFIG_NAME: &str = "config.toml";

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Failed to acquire lock: {0}")]
    LockError(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Config structs for config.toml
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Paths {
    pub download_directory: String,
    pub log_directory: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Api {
    pub base_url: String,
    pub posts_per_page: u32,
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Pools {
    pub max_download_concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Retry {
    pub max_retries: u32,
    pub image_retry_delay_secs: u64,
    pub page_retries: u32,
    pub page_retry_delay_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub paths: Paths,
    pub api: Api,
    pub pools: Pools,
    pub retry: Retry,
    pub logging: Logging,
}

// Default implementation for AppConfig
impl Default for AppConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let http = HttpClientConfig::default();

        Self {
            paths: Paths {
                download_directory: "./downloads".to_string(),
                log_directory: "./logs".to_string(),
            },
            api: Api {
                base_url: DEFAULT_BASE_URL.to_string(),
                posts_per_page: DEFAULT_PAGE_LIMIT,
                user_agent: http.user_agent,
                timeout_secs: http.request_timeout.as_secs(),
            },
            pools: Pools {
                max_download_concurrency: 8,
            },
            retry: Retry {
                max_retries: retry.max_retries,
                image_retry_delay_secs: retry.image_retry_delay.as_secs(),
                page_retries: retry.page_retries,
                page_retry_delay_secs: retry.page_retry_delay.as_secs(),
            },
            logging: Logging {
                log_level: "info".to_string(),
                log_format: "plain".to_string(),
                log_to_file: true,
            },
        }
    }
}

impl AppConfig {
    /// Maps the file settings onto the downloader's typed configuration.
    pub fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            base_url: self.api.base_url.clone(),
            max_workers: self.pools.max_download_concurrency,
            retry: RetryPolicy {
                max_retries: self.retry.max_retries,
                image_retry_delay: Duration::from_secs(self.retry.image_retry_delay_secs),
                page_retries: self.retry.page_retries,
                page_retry_delay: Duration::from_secs(self.retry.page_retry_delay_secs),
            },
            http: HttpClientConfig {
                user_agent: self.api.user_agent.clone(),
                request_timeout: Duration::from_secs(self.api.timeout_secs),
                ..HttpClientConfig::default()
            },
        }
    }
}

// Config manager owning config.toml
pub struct ConfigManager {
    app_config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
}

impl ConfigManager {
    // Create a new ConfigManager instance, writing a default config.toml when none exists
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        let app_config = Self::load_app_config(&config_dir)?;

        let manager = Self {
            app_config: Arc::new(RwLock::new(app_config)),
            config_dir,
        };

        manager.create_default_configs()?;

        Ok(manager)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_NAME)
    }

    // Load app config from config.toml
    fn load_app_config(config_dir: &Path) -> ConfigResult<AppConfig> {
        let config_path = config_dir.join(CONFIG_NAME);

        if !config_path.exists() {
            warn!("Config file not found: {}", config_path.display());
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                error!("Failed to parse {}: {}", CONFIG_NAME, e);
                info!("Backing up old config and creating new one with default values");

                if let Err(backup_err) = fs::rename(&config_path, config_path.with_extension("toml.backup")) {
                    warn!("Failed to backup old config: {}", backup_err);
                }

                let default_config = AppConfig::default();
                let toml_string = toml::to_string_pretty(&default_config)
                    .map_err(|e| ConfigError::TomlSer(e.to_string()))?;
                fs::write(&config_path, toml_string)?;
                info!("Created new {} with default values", CONFIG_NAME);

                Ok(default_config)
            }
        }
    }

    // Get app config
    pub fn get_app_config(&self) -> ConfigResult<AppConfig> {
        self.app_config
            .read()
            .map_err(|e| ConfigError::LockError(e.to_string()))
            .map(|config| config.clone())
    }

    // Save app config to file
    pub fn save_app_config(&self, config: &AppConfig) -> ConfigResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        fs::write(self.config_path(), toml_string)?;

        let mut app_config = self.app_config
            .write()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;
        *app_config = config.clone();

        Ok(())
    }

    // Create the default config file if it doesn't exist
    pub fn create_default_configs(&self) -> ConfigResult<()> {
        if !self.config_path().exists() {
            let default_config = AppConfig::default();
            self.save_app_config(&default_config)?;
        }

        Ok(())
    }
}

// Helper function to create a ConfigManager instance
pub fn init_config(config_dir: impl AsRef<Path>) -> ConfigResult<ConfigManager> {
    ConfigManager::new(config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_written() {
        let dir = tempdir().unwrap();
        let manager = init_config(dir.path()).unwrap();

        assert!(manager.config_path().exists());
        let written = fs::read_to_string(manager.config_path()).unwrap();
        let parsed: AppConfig = toml::from_str(&written).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }

    #[test]
    fn test_corrupt_config_is_backed_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_NAME), "[paths\nbroken = ").unwrap();

        let manager = init_config(dir.path()).unwrap();

        assert_eq!(manager.get_app_config().unwrap(), AppConfig::default());
        assert!(dir.path().join("config.toml.backup").exists());
    }

    #[test]
    fn test_saved_config_is_reloaded() {
        let dir = tempdir().unwrap();
        let manager = init_config(dir.path()).unwrap();

        let mut config = manager.get_app_config().unwrap();
        config.pools.max_download_concurrency = 3;
        config.api.posts_per_page = 100;
        manager.save_app_config(&config).unwrap();

        let reloaded = init_config(dir.path()).unwrap().get_app_config().unwrap();
        assert_eq!(reloaded.pools.max_download_concurrency, 3);
        assert_eq!(reloaded.api.posts_per_page, 100);
    }

    #[test]
    fn test_downloader_config_mapping() {
        let mut config = AppConfig::default();
        config.retry.max_retries = 5;
        config.retry.page_retry_delay_secs = 9;
        config.pools.max_download_concurrency = 2;

        let downloader = config.downloader_config();
        assert_eq!(downloader.max_workers, 2);
        assert_eq!(downloader.retry.max_retries, 5);
        assert_eq!(downloader.retry.page_retry_delay, Duration::from_secs(9));
        assert_eq!(downloader.base_url, DEFAULT_BASE_URL);
    }
}
