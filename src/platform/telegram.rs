use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, MessageId, ParseMode, ReactionType, ReplyParameters};
use teloxide::{ApiError, RequestError};
use tracing::{debug, info, warn};

use crate::bot::{self, AppState};
use crate::platform::{
    ChatError, ChatGateway, ContentKind, Invocation, MediaRef, MessageHandle, ReplyContext, Upload,
};

/// Map a teloxide failure onto our transient/permanent split.
fn classify(err: RequestError) -> ChatError {
    match err {
        RequestError::RetryAfter(secs) => ChatError::Transient {
            retry_after: Some(secs.duration()),
            detail: "flood control".to_string(),
        },
        RequestError::Network(e) => ChatError::Transient {
            retry_after: None,
            detail: e.to_string(),
        },
        RequestError::Io(e) => ChatError::Transient {
            retry_after: None,
            detail: e.to_string(),
        },
        RequestError::InvalidJson { source, .. } => ChatError::Transient {
            retry_after: None,
            detail: source.to_string(),
        },
        other => ChatError::Permanent(other.to_string()),
    }
}

/// teloxide-backed [`ChatGateway`].
#[derive(Clone)]
pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn reply_params(reply_to: Option<i32>) -> Option<ReplyParameters> {
    reply_to.map(|id| ReplyParameters::new(MessageId(id)).allow_sending_without_reply())
}

fn handle_of(msg: &Message) -> MessageHandle {
    MessageHandle {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    }
}

#[async_trait]
impl ChatGateway for TelegramGateway {
    async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i32>) -> Result<MessageHandle, ChatError> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(params) = reply_params(reply_to) {
            request = request.reply_parameters(params);
        }
        let msg = request.await.map_err(classify)?;
        Ok(handle_of(&msg))
    }

    async fn edit(&self, handle: MessageHandle, text: &str) -> Result<(), ChatError> {
        let result = self
            .bot
            .edit_message_text(ChatId(handle.chat_id), MessageId(handle.message_id), text)
            .parse_mode(ParseMode::Html)
            .await;
        match result {
            Ok(_) => Ok(()),
            // Same text twice is not a failure.
            Err(RequestError::Api(ApiError::MessageNotModified)) => {
                debug!("Edit skipped, message not modified");
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn delete(&self, handle: MessageHandle) -> Result<(), ChatError> {
        match self
            .bot
            .delete_message(ChatId(handle.chat_id), MessageId(handle.message_id))
            .await
        {
            Ok(_) => Ok(()),
            Err(RequestError::Api(ApiError::MessageToDeleteNotFound)) => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }

    async fn download(&self, media: &MediaRef, dest: &Path) -> Result<(), ChatError> {
        let file = self
            .bot
            .get_file(FileId(media.file_id.clone()))
            .await
            .map_err(classify)?;
        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ChatError::Permanent(format!("{}: {}", dest.display(), e)))?;
        self.bot
            .download_file(&file.path, &mut out)
            .await
            .map_err(|e| ChatError::Transient {
                retry_after: None,
                detail: e.to_string(),
            })?;
        Ok(())
    }

    async fn upload(&self, chat_id: i64, upload: &Upload) -> Result<MessageHandle, ChatError> {
        let chat = ChatId(chat_id);
        let file = InputFile::file(upload.path.clone());
        let caption = upload.caption.clone().unwrap_or_default();
        let reply = reply_params(upload.reply_to);

        // Each request builder is its own type, so the shared options are
        // applied per branch.
        macro_rules! finish {
            ($req:expr) => {{
                let mut req = $req.caption(caption).parse_mode(ParseMode::Html);
                if let Some(params) = reply {
                    req = req.reply_parameters(params);
                }
                req.await.map_err(classify)?
            }};
        }

        let msg = match upload.kind {
            ContentKind::Image => finish!(self.bot.send_photo(chat, file)),
            ContentKind::Audio => finish!(self.bot.send_audio(chat, file)),
            ContentKind::Video => finish!(self.bot.send_video(chat, file)),
            ContentKind::Document | ContentKind::Text => {
                finish!(self.bot.send_document(chat, file))
            }
        };
        Ok(handle_of(&msg))
    }

    async fn react(&self, handle: MessageHandle, emoji: &str) -> Result<(), ChatError> {
        self.bot
            .set_message_reaction(ChatId(handle.chat_id), MessageId(handle.message_id))
            .reaction(vec![ReactionType::Emoji {
                emoji: emoji.to_string(),
            }])
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn media_of(msg: &Message) -> Option<MediaRef> {
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(MediaRef {
            file_id: photo.file.id.0.clone(),
            kind: ContentKind::Image,
            file_name: None,
            mime_type: Some("image/jpeg".to_string()),
        });
    }
    if let Some(sticker) = msg.sticker() {
        return Some(MediaRef {
            file_id: sticker.file.id.0.clone(),
            kind: ContentKind::Image,
            file_name: None,
            mime_type: Some("image/webp".to_string()),
        });
    }
    if let Some(doc) = msg.document() {
        return Some(MediaRef {
            file_id: doc.file.id.0.clone(),
            kind: ContentKind::Document,
            file_name: doc.file_name.clone(),
            mime_type: doc.mime_type.as_ref().map(ToString::to_string),
        });
    }
    if let Some(audio) = msg.audio() {
        return Some(MediaRef {
            file_id: audio.file.id.0.clone(),
            kind: ContentKind::Audio,
            file_name: audio.file_name.clone(),
            mime_type: audio.mime_type.as_ref().map(ToString::to_string),
        });
    }
    None
}

/// Build an [`Invocation`] from an incoming Telegram message.
pub fn invocation_from_message(msg: &Message, owner_user_id: u64) -> Option<Invocation> {
    let user = msg.from.as_ref()?;
    if user.is_bot {
        return None;
    }
    // Media without a caption still counts, for auto-reactions.
    let text = msg
        .text()
        .or_else(|| msg.caption())
        .unwrap_or_default()
        .to_string();
    let reply = msg.reply_to_message().map(|replied| ReplyContext {
        message_id: replied.id.0,
        sender_id: replied.from.as_ref().map(|u| u.id.0),
        text: replied
            .text()
            .or_else(|| replied.caption())
            .map(ToString::to_string),
        media: media_of(replied),
    });

    Some(Invocation {
        sender_id: user.id.0,
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        is_owner: user.id.0 == owner_user_id,
        text,
        reply,
    })
}

/// Run the Telegram bot platform
pub async fn run(state: Arc<AppState>, bot: Bot) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Edits and forwards never trigger anything.
    if msg.edit_date().is_some() || msg.forward_origin().is_some() {
        return Ok(());
    }

    let invocation = match invocation_from_message(&msg, state.config.telegram.owner_user_id) {
        Some(invocation) => invocation,
        None => return Ok(()),
    };

    // Each invocation runs on its own task so a slow poll in one chat
    // never holds up the next update.
    tokio::spawn(async move { bot::route(&state, invocation).await });

    Ok(())
}
