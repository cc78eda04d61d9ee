//! The single status message an invocation owns.
//!
//! Updates go through a `watch` channel drained by one edit worker, so at most
//! one edit is in flight and updates that arrive meanwhile collapse into the
//! latest text. Stopping cancels the worker and any animation and waits for
//! both, after which no background edit can reach the message.

pub mod animation;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::StatusConfig;
use crate::platform::{ChatError, ChatGateway, MessageHandle};

pub use animation::Animation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSettings {
    /// Minimum gap between two edits.
    pub edit_interval: Duration,
    pub frame_interval: Duration,
    pub animate: bool,
}

impl From<&StatusConfig> for StatusSettings {
    fn from(config: &StatusConfig) -> Self {
        Self {
            edit_interval: Duration::from_millis(config.edit_interval_ms),
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            animate: config.animate,
        }
    }
}

/// How the status message ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Final {
    Edit(String),
    Delete,
}

/// Cheap handle for pushing updates from callbacks.
#[derive(Clone)]
pub struct StatusUpdater {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl StatusUpdater {
    pub fn update(&self, text: impl Into<String>) {
        self.tx.send_replace(Some(text.into()));
    }
}

pub struct StatusPresenter {
    handle: MessageHandle,
    gateway: Arc<dyn ChatGateway>,
    settings: StatusSettings,
    tx: Arc<watch::Sender<Option<String>>>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    animation: Option<(CancellationToken, JoinHandle<()>)>,
}

impl StatusPresenter {
    /// Send the status message as a reply and start the edit worker.
    pub async fn begin(
        gateway: Arc<dyn ChatGateway>,
        chat_id: i64,
        reply_to: Option<i32>,
        initial: &str,
        settings: StatusSettings,
    ) -> Result<Self, ChatError> {
        let handle = gateway.send(chat_id, initial, reply_to).await?;
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(edit_worker(
            gateway.clone(),
            handle,
            rx,
            cancel.clone(),
            settings.edit_interval,
            initial.to_string(),
        ));
        debug!("Status message {} started", handle.message_id);

        Ok(Self {
            handle,
            gateway,
            settings,
            tx: Arc::new(tx),
            cancel,
            worker: Some(worker),
            animation: None,
        })
    }

    #[cfg(test)]
    pub fn handle(&self) -> MessageHandle {
        self.handle
    }

    pub fn updater(&self) -> StatusUpdater {
        StatusUpdater {
            tx: self.tx.clone(),
        }
    }

    /// Replace the pending text. Never blocks on the chat.
    pub fn update(&self, text: impl Into<String>) {
        self.tx.send_replace(Some(text.into()));
    }

    /// Start `animation`, replacing any running one. No-op when animations
    /// are disabled.
    pub async fn animate(&mut self, animation: Animation, caption: Option<String>) {
        self.stop_animation().await;
        if !self.settings.animate {
            return;
        }
        let token = self.cancel.child_token();
        let task = tokio::spawn(animation_loop(
            animation,
            caption,
            self.updater(),
            token.clone(),
            self.settings.frame_interval,
        ));
        self.animation = Some((token, task));
    }

    pub async fn stop_animation(&mut self) {
        if let Some((token, task)) = self.animation.take() {
            token.cancel();
            if let Err(e) = task.await {
                warn!("Status animation ended abnormally: {}", e);
            }
        }
    }

    /// Stop every background task and wait for them. Idempotent.
    pub async fn stop(&mut self) {
        self.stop_animation().await;
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("Status edit worker ended abnormally: {}", e);
            }
        }
    }

    /// Stop background work, then apply the final edit or deletion.
    pub async fn finish(&mut self, last: Final) -> Result<(), ChatError> {
        self.stop().await;
        match last {
            Final::Edit(text) => self.gateway.edit(self.handle, &text).await,
            Final::Delete => self.gateway.delete(self.handle).await,
        }
    }
}

impl Drop for StatusPresenter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn edit_worker(
    gateway: Arc<dyn ChatGateway>,
    handle: MessageHandle,
    mut rx: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
    min_interval: Duration,
    initial: String,
) {
    let mut shown = initial;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let Some(text) = rx.borrow_and_update().clone() else {
            continue;
        };
        if text == shown {
            continue;
        }
        if let Err(e) = gateway.edit(handle, &text).await {
            debug!("Status edit failed: {}", e);
        }
        shown = text;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(min_interval) => {}
        }
    }
}

async fn animation_loop(
    animation: Animation,
    caption: Option<String>,
    updater: StatusUpdater,
    cancel: CancellationToken,
    interval: Duration,
) {
    let start = Instant::now();
    let mut tick: u64 = 0;
    loop {
        let frame = animation.frame(tick, start.elapsed());
        match &caption {
            Some(caption) => updater.update(format!("{}\n\n{}", caption, frame)),
            None => updater.update(frame),
        }
        tick += 1;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
