use std::fs;
use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::DEFAULT_COOLDOWN_HOURS;
use crate::parsing::DomainFilter;
use crate::storage::DataDirs;

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("cooldownHours must be a positive number of hours, got {0}")]
    InvalidCooldown(i64),
    #[error("missing `{0}` in config.json and the environment")]
    MissingToken(&'static str),
}

/// Contents of `config.json`, shared by both bots.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub telegram_token: Option<String>,
    pub prefix: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_libs_dir")]
    pub libs_dir: PathBuf,
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
    /// Alternate client identities tried in order when a download is refused.
    #[serde(default)]
    pub user_agents: Vec<String>,
    /// Discord users allowed to reboot or shut down the bot.
    #[serde(default)]
    pub owners: Vec<u64>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_libs_dir() -> PathBuf {
    PathBuf::from("libs")
}

fn default_cooldown_hours() -> i64 {
    DEFAULT_COOLDOWN_HOURS
}

fn default_allowed_domains() -> Vec<String> {
    ["youtube.com", "youtu.be", "tiktok.com"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Config {
    /// Read `path` and let `DISCORD_TOKEN` / `TELEGRAM_TOKEN` override the tokens.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        if config.cooldown_hours <= 0 || TimeDelta::try_hours(config.cooldown_hours).is_none() {
            return Err(ConfigError::InvalidCooldown(config.cooldown_hours));
        }
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("DISCORD_TOKEN").filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
        if let Some(token) = lookup("TELEGRAM_TOKEN").filter(|t| !t.is_empty()) {
            self.telegram_token = Some(token);
        }
    }

    pub fn discord_token(&self) -> Result<&str, ConfigError> {
        self.token.as_deref().ok_or(ConfigError::MissingToken("token"))
    }

    pub fn telegram_token(&self) -> Result<&str, ConfigError> {
        self.telegram_token
            .as_deref()
            .ok_or(ConfigError::MissingToken("telegramToken"))
    }

    pub fn cooldown(&self) -> TimeDelta {
        TimeDelta::try_hours(self.cooldown_hours).unwrap_or_else(|| TimeDelta::hours(DEFAULT_COOLDOWN_HOURS))
    }

    pub fn data_dirs(&self) -> DataDirs {
        DataDirs::new(&self.data_dir)
    }

    pub fn domain_filter(&self) -> DomainFilter {
        DomainFilter::new(&self.allowed_domains)
    }
}
