use std::io;
use std::path::Path;

use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DeliveryConfig;
use crate::platform::{ChatError, ChatGateway, ContentKind, Invocation, Upload};
use crate::remote::RemoteError;
use crate::status::{Final, StatusPresenter};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("chat rejected the delivery: {0}")]
    Chat(#[from] ChatError),
    #[error("temporary file error: {0}")]
    Io(#[from] io::Error),
    #[error("could not fetch the media: {0}")]
    Download(#[from] RemoteError),
}

/// A local file owned by one invocation. Removed when dropped, on every path.
#[derive(Debug)]
pub struct Artifact {
    path: TempPath,
}

impl Artifact {
    pub fn create(dir: &Path, stem: &str, extension: &str) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{}-", stem))
            .suffix(&format!(".{}", extension.trim_start_matches('.')))
            .tempfile_in(dir)?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub async fn with_text(dir: &Path, stem: &str, text: &str) -> io::Result<Self> {
        let artifact = Self::create(dir, stem, "txt")?;
        tokio::fs::write(artifact.path(), text).await?;
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The final product of a command.
#[derive(Debug)]
pub enum Outcome {
    /// `header` is HTML; `body` is plain text and gets escaped.
    Text { header: Option<String>, body: String },
    File {
        artifact: Artifact,
        kind: ContentKind,
        caption: Option<String>,
    },
}

impl Outcome {
    pub fn text(header: Option<String>, body: impl Into<String>) -> Self {
        Outcome::Text {
            header,
            body: body.into(),
        }
    }
}

pub fn render_text(header: Option<&str>, body: &str) -> String {
    let body = html_escape::encode_text(body);
    match header {
        Some(header) => format!("{}\n\n{}", header, body),
        None => body.into_owned(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Owner and short text: the status message becomes the answer.
    EditStatus,
    /// Third party and short text: a fresh reply, status removed.
    Reply,
    /// Text too long for one message: uploaded as a `.txt` document.
    TextFile,
    /// Photo, audio or video upload.
    Media,
    Document,
}

pub fn choose_route(outcome: &Outcome, is_owner: bool, max_len: usize) -> Route {
    match outcome {
        Outcome::Text { header, body } => {
            let len = render_text(header.as_deref(), body).chars().count();
            if len > max_len {
                Route::TextFile
            } else if is_owner {
                Route::EditStatus
            } else {
                Route::Reply
            }
        }
        Outcome::File { kind, .. } => match kind {
            ContentKind::Image | ContentKind::Audio | ContentKind::Video => Route::Media,
            ContentKind::Document | ContentKind::Text => Route::Document,
        },
    }
}

pub struct Dispatcher<'a> {
    gateway: &'a dyn ChatGateway,
    config: &'a DeliveryConfig,
}

impl<'a> Dispatcher<'a> {
    pub fn new(gateway: &'a dyn ChatGateway, config: &'a DeliveryConfig) -> Self {
        Self { gateway, config }
    }

    /// Put `outcome` in front of the user and settle the status message.
    /// On error the status message is left in place for the caller to
    /// report into.
    pub async fn deliver(
        &self,
        status: &mut StatusPresenter,
        invocation: &Invocation,
        outcome: Outcome,
    ) -> Result<(), DeliveryError> {
        let route = choose_route(&outcome, invocation.is_owner, self.config.max_message_len);
        debug!("Delivering via {:?}", route);

        match outcome {
            Outcome::Text { header, body } => {
                let html = render_text(header.as_deref(), &body);
                let sent = match route {
                    Route::EditStatus => status.finish(Final::Edit(html)).await,
                    Route::Reply => {
                        status.stop().await;
                        match self
                            .gateway
                            .send(invocation.chat_id, &html, Some(invocation.message_id))
                            .await
                        {
                            Ok(_) => {
                                self.settle(status).await;
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }
                    _ => {
                        return self
                            .deliver_text_file(status, invocation, header, &body)
                            .await
                    }
                };
                match sent {
                    Ok(()) => Ok(()),
                    Err(ChatError::Permanent(reason)) => {
                        warn!("Text delivery rejected ({}), sending as a file", reason);
                        self.deliver_text_file(status, invocation, header, &body)
                            .await
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Outcome::File {
                artifact,
                kind,
                caption,
            } => {
                status.stop().await;
                let upload = Upload {
                    path: artifact.path().to_path_buf(),
                    kind: if route == Route::Media {
                        kind
                    } else {
                        ContentKind::Document
                    },
                    caption: self.fit_caption(caption),
                    reply_to: Some(invocation.message_id),
                };
                match self.gateway.upload(invocation.chat_id, &upload).await {
                    Ok(_) => {}
                    Err(ChatError::Permanent(reason)) if upload.kind != ContentKind::Document => {
                        warn!("{:?} upload rejected ({}), retrying as a document", upload.kind, reason);
                        let fallback = Upload {
                            kind: ContentKind::Document,
                            ..upload
                        };
                        self.gateway.upload(invocation.chat_id, &fallback).await?;
                    }
                    Err(e) => return Err(e.into()),
                }
                drop(artifact);
                self.settle(status).await;
                Ok(())
            }
        }
    }

    async fn deliver_text_file(
        &self,
        status: &mut StatusPresenter,
        invocation: &Invocation,
        header: Option<String>,
        body: &str,
    ) -> Result<(), DeliveryError> {
        status.update("<b>Response is too long, sending as a file...</b>");
        let artifact = Artifact::with_text(&self.config.temp_dir(), "response", body).await?;
        status.stop().await;

        let upload = Upload {
            path: artifact.path().to_path_buf(),
            kind: ContentKind::Document,
            caption: self.fit_caption(header),
            reply_to: Some(invocation.message_id),
        };
        self.gateway.upload(invocation.chat_id, &upload).await?;
        drop(artifact);
        self.settle(status).await;
        Ok(())
    }

    fn fit_caption(&self, caption: Option<String>) -> Option<String> {
        caption.filter(|c| {
            let fits = c.chars().count() <= self.config.caption_limit;
            if !fits {
                debug!("Dropping caption over {} characters", self.config.caption_limit);
            }
            fits
        })
    }

    /// The answer is out; the status message only has to go away.
    async fn settle(&self, status: &mut StatusPresenter) {
        if let Err(e) = status.finish(Final::Delete).await {
            debug!("Could not delete status message: {}", e);
        }
    }
}
