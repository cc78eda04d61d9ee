//! Recording doubles for the chat and HTTP boundaries.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::bot::AppState;
use crate::config::{Config, FileHostConfig};
use crate::platform::{ChatError, ChatGateway, ContentKind, MediaRef, MessageHandle, Upload};
use crate::remote::{Body, Fetcher, Progress, RemoteError, RemoteRequest, RemoteResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send {
        chat_id: i64,
        text: String,
        reply_to: Option<i32>,
    },
    Edit {
        handle: MessageHandle,
        text: String,
    },
    Delete {
        handle: MessageHandle,
    },
    Download {
        file_id: String,
        dest: PathBuf,
    },
    Upload {
        chat_id: i64,
        kind: ContentKind,
        caption: Option<String>,
        path: PathBuf,
        /// File contents at upload time.
        content: Vec<u8>,
    },
    React {
        handle: MessageHandle,
        emoji: String,
    },
}

#[derive(Default)]
struct GatewayState {
    calls: Vec<Call>,
    next_message_id: i32,
    send_attempts: usize,
    send_failures: VecDeque<ChatError>,
    edit_failures: VecDeque<ChatError>,
    upload_failures: VecDeque<ChatError>,
    react_failures: VecDeque<ChatError>,
    edit_latency: Duration,
    react_latency: Duration,
    media_bytes: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        let gateway = Self::default();
        {
            let mut state = gateway.state.lock().unwrap();
            state.next_message_id = 1000;
            state.media_bytes = b"\xff\xd8\xff fake jpeg".to_vec();
        }
        gateway
    }

    pub fn fail_next_sends(&self, n: usize, err: ChatError) {
        let mut state = self.state.lock().unwrap();
        state.send_failures.extend(std::iter::repeat(err).take(n));
    }

    pub fn fail_next_edits(&self, n: usize, err: ChatError) {
        let mut state = self.state.lock().unwrap();
        state.edit_failures.extend(std::iter::repeat(err).take(n));
    }

    pub fn fail_next_uploads(&self, n: usize, err: ChatError) {
        let mut state = self.state.lock().unwrap();
        state.upload_failures.extend(std::iter::repeat(err).take(n));
    }

    pub fn fail_next_reacts(&self, n: usize, err: ChatError) {
        let mut state = self.state.lock().unwrap();
        state.react_failures.extend(std::iter::repeat(err).take(n));
    }

    /// Every edit takes this long to complete.
    pub fn set_edit_latency(&self, latency: Duration) {
        self.state.lock().unwrap().edit_latency = latency;
    }

    pub fn set_react_latency(&self, latency: Duration) {
        self.state.lock().unwrap().react_latency = latency;
    }

    pub fn send_attempts(&self) -> usize {
        self.state.lock().unwrap().send_attempts
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Upload { .. }))
            .collect()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Delete { .. }))
            .count()
    }

    fn next_handle(state: &mut GatewayState, chat_id: i64) -> MessageHandle {
        state.next_message_id += 1;
        MessageHandle {
            chat_id,
            message_id: state.next_message_id,
        }
    }
}

#[async_trait]
impl ChatGateway for MockGateway {
    async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i32>) -> Result<MessageHandle, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.send_attempts += 1;
        if let Some(err) = state.send_failures.pop_front() {
            return Err(err);
        }
        state.calls.push(Call::Send {
            chat_id,
            text: text.to_string(),
            reply_to,
        });
        Ok(Self::next_handle(&mut state, chat_id))
    }

    async fn edit(&self, handle: MessageHandle, text: &str) -> Result<(), ChatError> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.edit_failures.pop_front() {
                return Err(err);
            }
            state.edit_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.state.lock().unwrap().calls.push(Call::Edit {
            handle,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, handle: MessageHandle) -> Result<(), ChatError> {
        self.state.lock().unwrap().calls.push(Call::Delete { handle });
        Ok(())
    }

    async fn download(&self, media: &MediaRef, dest: &Path) -> Result<(), ChatError> {
        let bytes = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Download {
                file_id: media.file_id.clone(),
                dest: dest.to_path_buf(),
            });
            state.media_bytes.clone()
        };
        tokio::fs::write(dest, bytes)
            .await
            .map_err(|e| ChatError::Permanent(e.to_string()))
    }

    async fn upload(&self, chat_id: i64, upload: &Upload) -> Result<MessageHandle, ChatError> {
        let content = std::fs::read(&upload.path).unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.upload_failures.pop_front() {
            return Err(err);
        }
        state.calls.push(Call::Upload {
            chat_id,
            kind: upload.kind,
            caption: upload.caption.clone(),
            path: upload.path.clone(),
            content,
        });
        Ok(Self::next_handle(&mut state, chat_id))
    }

    async fn react(&self, handle: MessageHandle, emoji: &str) -> Result<(), ChatError> {
        let latency = self.state.lock().unwrap().react_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.react_failures.pop_front() {
            return Err(err);
        }
        state.calls.push(Call::React {
            handle,
            emoji: emoji.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct FetcherState {
    responses: VecDeque<RemoteResult<Body>>,
    requests: Vec<RemoteRequest>,
    downloads: Vec<(String, Option<String>)>,
    download_failures: VecDeque<RemoteError>,
    published: Vec<PathBuf>,
}

/// Canned-response [`Fetcher`]. Fetches beyond the queue fail as network errors.
#[derive(Clone, Default)]
pub struct MockFetcher {
    state: Arc<Mutex<FetcherState>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: RemoteResult<Body>) {
        self.state.lock().unwrap().responses.push_back(response);
    }

    pub fn push_json(&self, value: Value) {
        self.push(Ok(Body::Json(value)));
    }

    pub fn push_text(&self, text: &str) {
        self.push(Ok(Body::Text(text.to_string())));
    }

    pub fn fail_next_download(&self, err: RemoteError) {
        self.state.lock().unwrap().download_failures.push_back(err);
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// `(url, referer)` of every download attempt.
    pub fn downloads(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().unwrap().downloads.clone()
    }

    pub fn published(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().published.clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &RemoteRequest) -> RemoteResult<Body> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        state.responses.pop_front().unwrap_or_else(|| {
            Err(RemoteError::Network {
                endpoint: request.display_url(),
                detail: "no canned response".to_string(),
            })
        })
    }

    async fn download(
        &self,
        url: &str,
        referer: Option<&str>,
        dest: &Path,
        progress: Option<Progress<'_>>,
    ) -> RemoteResult<u64> {
        let failure = {
            let mut state = self.state.lock().unwrap();
            state
                .downloads
                .push((url.to_string(), referer.map(ToString::to_string)));
            state.download_failures.pop_front()
        };
        if let Some(err) = failure {
            return Err(err);
        }
        let bytes = format!("bytes of {}", url).into_bytes();
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| RemoteError::LocalIo {
                detail: e.to_string(),
            })?;
        if let Some(report) = progress {
            report(bytes.len() as u64, Some(bytes.len() as u64));
        }
        Ok(bytes.len() as u64)
    }

    async fn publish(&self, _host: &FileHostConfig, path: &Path) -> RemoteResult<String> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.state.lock().unwrap().published.push(path.to_path_buf());
        Ok(format!("https://files.example/{}", name))
    }
}

/// App state over the given doubles: owner 1, user 2 allow-listed, no
/// animations, temp files in the returned directory. `commands` is appended
/// to the config as TOML.
pub fn test_state(commands: &str, gateway: &MockGateway, fetcher: &MockFetcher) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let toml_src = format!(
        r#"
        [telegram]
        bot_token = "test-token"
        owner_user_id = 1
        allowed_user_ids = [2]

        [delivery]
        temp_dir = '{}'

        [status]
        edit_interval_ms = 10
        animate = false

        [file_host]
        url = "https://files.example/api"

        [downloader]
        api_url = "https://dl.example"

        {}
        "#,
        dir.path().display(),
        commands
    );
    let config = Config::parse(&toml_src).unwrap();
    let state = AppState::new(config, Arc::new(fetcher.clone()), Arc::new(gateway.clone())).unwrap();
    (state, dir)
}
