//! Configuration for the Slack API and dump limits
//!
//! Loads configuration from config.yml file

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dump::{DumpOptions, DEFAULT_PAGE_SIZE};
use crate::error::{Error, Result};
use crate::limiter::{Limiters, TierLimit, DEFAULT_CONVERSATIONS_LIMIT, DEFAULT_USERS_LIMIT};
use crate::retry::DEFAULT_RETRIES;
use crate::slack::SLACK_API_URL;

/// Default constants (fallback if config.yml not found)
pub const CONFIG_FILE: &str = "config.yml";
pub const DEFAULT_OUTPUT_DIR: &str = "dump";
pub const DEFAULT_CHANNEL_CONCURRENCY: usize = 1;

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    slack: Option<SlackConfig>,
    limits: Option<LimitsConfig>,
    output_dir: Option<String>,
    channels: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackConfig {
    token: Option<String>,
    api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitsConfig {
    conversations: Option<TierLimit>,
    replies: Option<TierLimit>,
    users: Option<TierLimit>,
    history_page_size: Option<u32>,
    replies_page_size: Option<u32>,
    concurrency: Option<usize>,
    channel_concurrency: Option<usize>,
    retries: Option<u32>,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub api_url: String,
    pub conversations: TierLimit,
    pub replies: TierLimit,
    pub users: TierLimit,
    pub history_page_size: u32,
    pub replies_page_size: u32,
    /// Thread fetches in flight per channel, 0 derives it from the replies burst.
    pub concurrency: usize,
    pub channel_concurrency: usize,
    pub retries: u32,
    pub output_dir: PathBuf,
    /// Channel aliases: name -> channel ID.
    pub channels: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    /// Environment variables take precedence over config.yml values
    pub fn new() -> Self {
        Self::load_from_file(CONFIG_FILE)
            .or_else(|_| Self::load_from_file(Path::new("..").join(CONFIG_FILE)))
            .unwrap_or_else(|_| Self::defaults())
    }

    /// Explicit path must load; without one fall back like [`Config::new`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::new()),
        }
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return Some(env_val);
                }
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            return Some(env_val);
        }
        // An unresolved placeholder is as good as nothing.
        value.filter(|v| !(v.starts_with("${") && v.ends_with('}')))
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigError(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("failed to parse config file: {}", e)))?;

        Self::from_yaml(yaml)
    }

    fn from_yaml(yaml: YamlConfig) -> Result<Self> {
        let slack = yaml.slack.unwrap_or_default();
        let limits = yaml.limits.unwrap_or_default();

        let config = Self {
            token: Self::resolve_env_string(slack.token, "SLACK_TOKEN").unwrap_or_default(),
            api_url: Self::resolve_env_string(slack.api_url, "SLACK_API_URL")
                .unwrap_or_else(|| SLACK_API_URL.to_string()),
            conversations: limits.conversations.unwrap_or(DEFAULT_CONVERSATIONS_LIMIT),
            replies: limits.replies.unwrap_or(DEFAULT_CONVERSATIONS_LIMIT),
            users: limits.users.unwrap_or(DEFAULT_USERS_LIMIT),
            history_page_size: limits.history_page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            replies_page_size: limits.replies_page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            concurrency: limits.concurrency.unwrap_or(0),
            channel_concurrency: limits
                .channel_concurrency
                .unwrap_or(DEFAULT_CHANNEL_CONCURRENCY),
            retries: limits.retries.unwrap_or(DEFAULT_RETRIES),
            output_dir: PathBuf::from(
                yaml.output_dir
                    .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
            ),
            channels: yaml.channels.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.history_page_size == 0 || self.replies_page_size == 0 {
            return Err(Error::ConfigError("page sizes must be positive".to_string()));
        }
        if self.channel_concurrency == 0 {
            return Err(Error::ConfigError(
                "channel_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Defaults plus whatever the environment provides.
    fn defaults() -> Self {
        Self::load_dotenv();
        Self {
            token: std::env::var("SLACK_TOKEN").unwrap_or_default(),
            api_url: std::env::var("SLACK_API_URL").unwrap_or_else(|_| SLACK_API_URL.to_string()),
            conversations: DEFAULT_CONVERSATIONS_LIMIT,
            replies: DEFAULT_CONVERSATIONS_LIMIT,
            users: DEFAULT_USERS_LIMIT,
            history_page_size: DEFAULT_PAGE_SIZE,
            replies_page_size: DEFAULT_PAGE_SIZE,
            concurrency: 0,
            channel_concurrency: DEFAULT_CHANNEL_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            channels: HashMap::new(),
        }
    }

    /// Get channel ID by alias
    pub fn get_channel(&self, name: &str) -> Option<&str> {
        self.channels.get(name).map(String::as_str)
    }

    pub fn limiters(&self) -> Limiters {
        Limiters::new(self.conversations, self.replies, self.users)
    }

    pub fn dump_options(&self) -> DumpOptions {
        DumpOptions {
            history_page_size: self.history_page_size,
            replies_page_size: self.replies_page_size,
            concurrency: self.concurrency,
            resolve_users: true,
        }
    }
}
