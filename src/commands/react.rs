//! Auto-reactions: the owner switches them on per chat, after which every
//! message from someone else in that chat gets a random emoji reaction.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bot::AppState;
use crate::commands::{reply, CommandError};
use crate::platform::{ChatError, Invocation};

const DEFAULT_REACTION: &str = "👍";

/// Chats with auto-reactions switched on, and the emojis to pick from.
/// Lives as long as the process.
#[derive(Clone, Default)]
pub struct ReactionStore {
    chats: Arc<Mutex<HashMap<i64, Vec<String>>>>,
}

impl ReactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn activate(&self, chat_id: i64, emojis: Vec<String>) {
        self.chats.lock().await.insert(chat_id, emojis);
    }

    /// Returns whether the chat was active.
    pub async fn deactivate(&self, chat_id: i64) -> bool {
        self.chats.lock().await.remove(&chat_id).is_some()
    }

    pub async fn emojis(&self, chat_id: i64) -> Option<Vec<String>> {
        self.chats.lock().await.get(&chat_id).cloned()
    }
}

pub async fn handle(state: &AppState, invocation: &Invocation, rest: &str) -> Result<(), CommandError> {
    let chat_id = invocation.chat_id;
    let words: Vec<String> = rest.split_whitespace().map(ToString::to_string).collect();

    let text = match words.first().map(|w| w.to_lowercase()) {
        Some(word) if word == "stop" => {
            if state.reactions.deactivate(chat_id).await {
                info!("Auto-reactions stopped in chat {}", chat_id);
                "<b>✅ Auto-reactions stopped for this chat.</b>".to_string()
            } else {
                "<b>❕ Auto-reactions were not active in this chat.</b>".to_string()
            }
        }
        Some(_) => {
            let listed = html_escape::encode_text(&words.join(" ")).into_owned();
            state.reactions.activate(chat_id, words).await;
            info!("Auto-reactions started in chat {}", chat_id);
            format!(
                "<b>✅ Auto-reacting with random emojis from <code>{}</code> in this chat.</b>\n\n\
                 To stop, use <code>{}react stop</code>.",
                listed, state.config.telegram.prefix
            )
        }
        None => {
            state
                .reactions
                .activate(chat_id, vec![DEFAULT_REACTION.to_string()])
                .await;
            info!("Auto-reactions started in chat {}", chat_id);
            format!(
                "<b>✅ Auto-reacting with '{}' in this chat.</b>\n\n\
                 To specify emojis, use, for example: <code>{}react 👍 ❤ 😂</code>",
                DEFAULT_REACTION, state.config.telegram.prefix
            )
        }
    };
    reply(state, invocation, &text).await
}

/// React to a message from someone other than the owner if the chat is active.
/// A permanent refusal switches the chat off.
pub async fn react_to(state: &AppState, invocation: &Invocation) {
    if invocation.is_owner {
        return;
    }
    let Some(emojis) = state.reactions.emojis(invocation.chat_id).await else {
        return;
    };
    let Some(emoji) = emojis.choose(&mut rand::thread_rng()).cloned() else {
        return;
    };

    match state.gateway.react(invocation.handle(), &emoji).await {
        Ok(()) => {}
        Err(ChatError::Permanent(reason)) => {
            warn!(
                "Reaction refused in chat {} ({}), stopping auto-reactions",
                invocation.chat_id, reason
            );
            state.reactions.deactivate(invocation.chat_id).await;
        }
        Err(e) => debug!("Reaction skipped: {}", e),
    }
}
