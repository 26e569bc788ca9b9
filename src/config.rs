use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const APP_DIR: &str = "news-cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Category name -> feed URL.
    #[serde(default = "default_feeds")]
    pub feeds: BTreeMap<String, String>,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_db_path() -> PathBuf {
    data_dir().join("news-cache.db")
}

fn default_index_dir() -> PathBuf {
    data_dir().join("search-index")
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_concurrent_fetches() -> usize {
    5
}

fn default_feeds() -> BTreeMap<String, String> {
    [
        ("world", "https://feeds.bbci.co.uk/news/world/rss.xml"),
        ("technology", "https://feeds.bbci.co.uk/news/technology/rss.xml"),
        ("science", "https://feeds.bbci.co.uk/news/science_and_environment/rss.xml"),
    ]
    .into_iter()
    .map(|(category, url)| (category.to_string(), url.to_string()))
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            index_dir: default_index_dir(),
            request_timeout_secs: default_request_timeout(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            feeds: default_feeds(),
        }
    }
}

impl Config {
    /// Load the user's config, writing the defaults on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.feeds.keys().map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(AppError::Config(
                "max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if let Some((category, _)) = self.feeds.iter().find(|(_, url)| url.trim().is_empty()) {
            return Err(AppError::Config(format!("feed '{category}' has no URL")));
        }
        Ok(())
    }
}
