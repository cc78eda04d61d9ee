pub mod telegram;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::warn;

use crate::config::RetryConfig;

/// A message the bot sent or may edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl ContentKind {
    pub fn default_extension(self) -> &'static str {
        match self {
            ContentKind::Text => "txt",
            ContentKind::Image => "jpg",
            ContentKind::Audio => "mp3",
            ContentKind::Video => "mp4",
            ContentKind::Document => "bin",
        }
    }
}

/// Media attached to a chat message, downloadable through the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRef {
    pub file_id: String,
    pub kind: ContentKind,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

impl MediaRef {
    pub fn is_image(&self) -> bool {
        match self.kind {
            ContentKind::Image => true,
            ContentKind::Document => self
                .mime_type
                .as_deref()
                .is_some_and(|m| m.starts_with("image/")),
            _ => false,
        }
    }
}

/// The message an invocation replied to.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyContext {
    pub message_id: i32,
    pub sender_id: Option<u64>,
    pub text: Option<String>,
    pub media: Option<MediaRef>,
}

/// A message that may trigger a command. Read-only for the handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub sender_id: u64,
    pub chat_id: i64,
    pub message_id: i32,
    /// Sent by the configured account owner.
    pub is_owner: bool,
    pub text: String,
    pub reply: Option<ReplyContext>,
}

impl Invocation {
    pub fn handle(&self) -> MessageHandle {
        MessageHandle {
            chat_id: self.chat_id,
            message_id: self.message_id,
        }
    }

    pub fn reply_text(&self) -> Option<&str> {
        self.reply
            .as_ref()
            .and_then(|r| r.text.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn reply_media(&self) -> Option<&MediaRef> {
        self.reply.as_ref().and_then(|r| r.media.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub path: PathBuf,
    pub kind: ContentKind,
    pub caption: Option<String>,
    pub reply_to: Option<i32>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChatError {
    /// Flood control or a network hiccup; worth retrying.
    #[error("temporary chat failure: {detail}")]
    Transient {
        retry_after: Option<Duration>,
        detail: String,
    },
    #[error("chat rejected the request: {0}")]
    Permanent(String),
}

/// Everything the command flows need from the chat framework. All text is HTML.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i32>) -> Result<MessageHandle, ChatError>;

    async fn edit(&self, handle: MessageHandle, text: &str) -> Result<(), ChatError>;

    async fn delete(&self, handle: MessageHandle) -> Result<(), ChatError>;

    /// Save chat media into `dest`, which the caller owns.
    async fn download(&self, media: &MediaRef, dest: &Path) -> Result<(), ChatError>;

    async fn upload(&self, chat_id: i64, upload: &Upload) -> Result<MessageHandle, ChatError>;

    async fn react(&self, handle: MessageHandle, emoji: &str) -> Result<(), ChatError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Run `op`, retrying transient failures with jittered exponential backoff.
/// A server-provided `retry_after` overrides the computed delay.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ChatError>>,
{
    let mut delays = ExponentialBackoff::from_millis(2)
        .factor(policy.initial_backoff.as_millis().max(1) as u64 / 2)
        .max_delay(policy.max_backoff)
        .map(jitter)
        .take(policy.max_retries);

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(ChatError::Transient { retry_after, detail }) => {
                let Some(delay) = delays.next() else {
                    warn!("{} failed after {} retries: {}", label, policy.max_retries, detail);
                    return Err(ChatError::Transient { retry_after, detail });
                };
                let wait = retry_after.unwrap_or(delay);
                warn!("{} hit a transient error ({}), retrying in {:?}", label, detail, wait);
                tokio::time::sleep(wait).await;
            }
            Err(permanent) => return Err(permanent),
        }
    }
}

/// Gateway decorator that applies [`with_retry`] to every call.
pub struct Resilient<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: ChatGateway> Resilient<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<G: ChatGateway> ChatGateway for Resilient<G> {
    async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i32>) -> Result<MessageHandle, ChatError> {
        with_retry(&self.policy, "send", || self.inner.send(chat_id, text, reply_to)).await
    }

    async fn edit(&self, handle: MessageHandle, text: &str) -> Result<(), ChatError> {
        with_retry(&self.policy, "edit", || self.inner.edit(handle, text)).await
    }

    async fn delete(&self, handle: MessageHandle) -> Result<(), ChatError> {
        with_retry(&self.policy, "delete", || self.inner.delete(handle)).await
    }

    async fn download(&self, media: &MediaRef, dest: &Path) -> Result<(), ChatError> {
        with_retry(&self.policy, "download", || self.inner.download(media, dest)).await
    }

    async fn upload(&self, chat_id: i64, upload: &Upload) -> Result<MessageHandle, ChatError> {
        with_retry(&self.policy, "upload", || self.inner.upload(chat_id, upload)).await
    }

    async fn react(&self, handle: MessageHandle, emoji: &str) -> Result<(), ChatError> {
        with_retry(&self.policy, "react", || self.inner.react(handle, emoji)).await
    }
}
