use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::commands::descriptor::CommandDescriptor;
use crate::commands::BUILTIN_COMMANDS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default = "default_http_config")]
    pub http: HttpConfig,
    #[serde(default = "default_delivery_config")]
    pub delivery: DeliveryConfig,
    #[serde(default = "default_status_config")]
    pub status: StatusConfig,
    #[serde(default = "default_retry_config")]
    pub retry: RetryConfig,
    #[serde(default)]
    pub file_host: Option<FileHostConfig>,
    #[serde(default)]
    pub downloader: Option<DownloaderConfig>,
    #[serde(default)]
    pub auto_reply: Option<AutoReplyConfig>,
    #[serde(default)]
    pub commands: Vec<CommandDescriptor>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// The account owner. Owner invocations get their status message edited
    /// in place with the result.
    pub owner_user_id: u64,
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Longest text, in characters, sent as a message rather than a file.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default = "default_caption_limit")]
    pub caption_limit: usize,
}

impl DeliveryConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    #[serde(default = "default_edit_interval_ms")]
    pub edit_interval_ms: u64,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_animate")]
    pub animate: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Public file host used to turn chat media into a link (catbox-style: a
/// multipart upload whose response body is the URL).
#[derive(Debug, Deserialize, Clone)]
pub struct FileHostConfig {
    pub url: String,
    #[serde(default = "default_file_host_field")]
    pub field: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloaderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Which configured command answers the chat's auto-reply target.
#[derive(Debug, Deserialize, Clone)]
pub struct AutoReplyConfig {
    pub command: String,
}

fn default_prefix() -> String {
    ".".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_download_timeout_secs() -> u64 {
    300
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

fn default_max_message_len() -> usize {
    4096
}

fn default_caption_limit() -> usize {
    1024
}

fn default_edit_interval_ms() -> u64 {
    1200
}

fn default_frame_interval_ms() -> u64 {
    800
}

fn default_animate() -> bool {
    true
}

fn default_enabled() -> bool {
    true
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

fn default_file_host_field() -> String {
    "fileToUpload".to_string()
}

pub fn default_http_config() -> HttpConfig {
    HttpConfig {
        timeout_secs: default_timeout_secs(),
        download_timeout_secs: default_download_timeout_secs(),
        user_agent: default_user_agent(),
    }
}

pub fn default_delivery_config() -> DeliveryConfig {
    DeliveryConfig {
        max_message_len: default_max_message_len(),
        temp_dir: None,
        caption_limit: default_caption_limit(),
    }
}

pub fn default_status_config() -> StatusConfig {
    StatusConfig {
        edit_interval_ms: default_edit_interval_ms(),
        frame_interval_ms: default_frame_interval_ms(),
        animate: default_animate(),
    }
}

pub fn default_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: default_max_retries(),
        initial_backoff_ms: default_initial_backoff_ms(),
        max_backoff_ms: default_max_backoff_ms(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        let temp_dir = config.delivery.temp_dir();
        if !temp_dir.exists() {
            std::fs::create_dir_all(&temp_dir).with_context(|| {
                format!("Failed to create temp directory: {}", temp_dir.display())
            })?;
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Whether `user_id` is the owner or on the allow list.
    pub fn is_allowed(&self, user_id: u64) -> bool {
        user_id == self.telegram.owner_user_id || self.telegram.allowed_user_ids.contains(&user_id)
    }

    pub fn command(&self, name: &str) -> Option<&CommandDescriptor> {
        self.commands.iter().find(|c| c.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.prefix.is_empty() {
            bail!("telegram.prefix must not be empty");
        }
        if self.delivery.max_message_len == 0 {
            bail!("delivery.max_message_len must be greater than zero");
        }
        if self.status.edit_interval_ms == 0 || self.status.frame_interval_ms == 0 {
            bail!("status intervals must be greater than zero");
        }
        if let Some(host) = &self.file_host {
            url::Url::parse(&host.url)
                .with_context(|| format!("file_host.url is not a valid URL: {}", host.url))?;
        }
        if let Some(downloader) = &self.downloader {
            url::Url::parse(&downloader.api_url).with_context(|| {
                format!("downloader.api_url is not a valid URL: {}", downloader.api_url)
            })?;
        }

        let mut seen = HashSet::new();
        for command in &self.commands {
            if command.name.trim().is_empty() {
                bail!("command name must not be empty");
            }
            // Invoked names are lowercased before lookup.
            if command.name != command.name.to_lowercase()
                || command.name.contains(|c: char| c.is_whitespace() || c == '@')
            {
                bail!(
                    "command name '{}' must be one lowercase word without '@'",
                    command.name
                );
            }
            if BUILTIN_COMMANDS.contains(&command.name.as_str()) {
                bail!("command '{}' collides with a built-in command", command.name);
            }
            if !seen.insert(command.name.as_str()) {
                bail!("command '{}' is defined more than once", command.name);
            }
            command
                .validate()
                .with_context(|| format!("Invalid command '{}'", command.name))?;
            if command.needs_file_host() && self.file_host.is_none() {
                bail!(
                    "command '{}' takes image input but no [file_host] is configured",
                    command.name
                );
            }
        }
        if let Some(auto_reply) = &self.auto_reply {
            let Some(command) = self.command(&auto_reply.command) else {
                bail!("auto_reply.command '{}' is not a configured command", auto_reply.command);
            };
            if command.needs_file_host() || !command.takes_prompt() {
                bail!("auto_reply.command '{}' must take a text prompt", auto_reply.command);
            }
        }
        Ok(())
    }
}
