//! AI auto-reply: the owner points at one user per chat, and that user's plain
//! messages are answered through the command named in `[auto_reply]`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bot::AppState;
use crate::commands::{remote, reply, CommandError};
use crate::platform::Invocation;

/// The auto-reply target of each chat. Lives as long as the process.
#[derive(Clone, Default)]
pub struct TargetStore {
    chats: Arc<Mutex<HashMap<i64, u64>>>,
}

impl TargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous target, if any.
    pub async fn set(&self, chat_id: i64, user_id: u64) -> Option<u64> {
        self.chats.lock().await.insert(chat_id, user_id)
    }

    pub async fn clear(&self, chat_id: i64) -> Option<u64> {
        self.chats.lock().await.remove(&chat_id)
    }

    pub async fn target(&self, chat_id: i64) -> Option<u64> {
        self.chats.lock().await.get(&chat_id).copied()
    }
}

/// `addai <user id>`, or `addai` in reply to the user.
pub async fn add(state: &AppState, invocation: &Invocation, rest: &str) -> Result<(), CommandError> {
    let prefix = &state.config.telegram.prefix;
    if state.config.auto_reply.is_none() {
        return reply(
            state,
            invocation,
            "<b>❕ AI auto-reply is not configured.</b> Add an <code>[auto_reply]</code> section naming a command.",
        )
        .await;
    }

    let from_reply = invocation.reply.as_ref().and_then(|r| r.sender_id);
    let from_args = rest.split_whitespace().next().and_then(|w| w.parse::<u64>().ok());
    let Some(user_id) = from_reply.or(from_args) else {
        return Err(CommandError::Usage(format!(
            "<b>Usage:</b> <code>{}addai &lt;user id&gt;</code> or reply to a user.",
            prefix
        )));
    };
    if user_id == state.config.telegram.owner_user_id {
        return Err(CommandError::Input("the owner cannot be an auto-reply target".to_string()));
    }

    state.targets.set(invocation.chat_id, user_id).await;
    info!("AI auto-reply enabled for user {} in chat {}", user_id, invocation.chat_id);
    reply(
        state,
        invocation,
        &format!(
            "<b>✅ AI auto-reply has been enabled for <code>{}</code>.</b>\n\nTo stop, use <code>{}rmai</code>.",
            user_id, prefix
        ),
    )
    .await
}

pub async fn remove(state: &AppState, invocation: &Invocation) -> Result<(), CommandError> {
    let text = match state.targets.clear(invocation.chat_id).await {
        Some(user_id) => {
            info!("AI auto-reply disabled for user {} in chat {}", user_id, invocation.chat_id);
            "<b>❌ AI auto-reply has been disabled.</b>"
        }
        None => "<b>AI auto-reply is not currently active.</b>",
    };
    reply(state, invocation, text).await
}

/// Answer `invocation` when its sender is this chat's target. Returns whether
/// the message was taken.
pub async fn respond(state: &AppState, invocation: &Invocation) -> Result<bool, CommandError> {
    if invocation.is_owner || invocation.text.trim().is_empty() {
        return Ok(false);
    }
    if state.targets.target(invocation.chat_id).await != Some(invocation.sender_id) {
        return Ok(false);
    }
    let Some(descriptor) = state
        .config
        .auto_reply
        .as_ref()
        .and_then(|a| state.config.command(&a.command))
    else {
        return Ok(false);
    };

    debug!("Auto-replying to user {} via {}", invocation.sender_id, descriptor.name);
    remote::answer(state, descriptor, invocation, invocation.text.trim()).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ReplyContext;
    use crate::testing::{test_state, Call, MockFetcher, MockGateway};

    const CONFIG: &str = r#"
        [auto_reply]
        command = "ai"

        [[commands]]
        name = "ai"
        url = "https://api.example/gpt4.php?txt={prompt}"
        extract = ["response"]
    "#;

    fn invocation(sender_id: u64, text: &str) -> Invocation {
        Invocation {
            sender_id,
            chat_id: 10,
            message_id: 5,
            is_owner: sender_id == 1,
            text: text.to_string(),
            reply: None,
        }
    }

    #[tokio::test]
    async fn test_store_lifecycle() {
        let store = TargetStore::new();
        assert_eq!(store.target(10).await, None);
        assert_eq!(store.set(10, 7).await, None);
        assert_eq!(store.set(10, 8).await, Some(7));
        assert_eq!(store.target(10).await, Some(8));
        assert_eq!(store.target(11).await, None);
        assert_eq!(store.clear(10).await, Some(8));
        assert_eq!(store.clear(10).await, None);
    }

    #[tokio::test]
    async fn test_addai_by_id_and_by_reply_then_rmai() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        let (state, _dir) = test_state(CONFIG, &gateway, &fetcher);

        add(&state, &invocation(1, ".addai 7"), "7").await.unwrap();
        assert_eq!(state.targets.target(10).await, Some(7));

        let mut by_reply = invocation(1, ".addai");
        by_reply.reply = Some(ReplyContext {
            message_id: 4,
            sender_id: Some(8),
            text: Some("hi".to_string()),
            media: None,
        });
        add(&state, &by_reply, "").await.unwrap();
        assert_eq!(state.targets.target(10).await, Some(8));

        remove(&state, &invocation(1, ".rmai")).await.unwrap();
        assert_eq!(state.targets.target(10).await, None);
        remove(&state, &invocation(1, ".rmai")).await.unwrap();

        let sent = gateway.sent_texts();
        assert_eq!(sent.len(), 4);
        assert!(sent[1].contains("<code>8</code>"));
        assert!(sent[2].contains("disabled"));
        assert!(sent[3].contains("not currently active"));
    }

    #[tokio::test]
    async fn test_addai_without_target_is_a_usage_error() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        let (state, _dir) = test_state(CONFIG, &gateway, &fetcher);

        let err = add(&state, &invocation(1, ".addai bob"), "bob").await.unwrap_err();
        assert!(matches!(err, CommandError::Usage(_)));
        assert_eq!(state.targets.target(10).await, None);
    }

    #[tokio::test]
    async fn test_addai_unconfigured_explains() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        let (state, _dir) = test_state("", &gateway, &fetcher);

        add(&state, &invocation(1, ".addai 7"), "7").await.unwrap();
        assert_eq!(state.targets.target(10).await, None);
        assert!(gateway.sent_texts()[0].contains("not configured"));
    }

    #[tokio::test]
    async fn test_target_message_gets_an_answer() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(serde_json::json!({"response": "Hello Bob"}));
        let (state, _dir) = test_state(CONFIG, &gateway, &fetcher);
        state.targets.set(10, 7).await;

        assert!(!respond(&state, &invocation(9, "not the target")).await.unwrap());
        assert!(!respond(&state, &invocation(7, "   ")).await.unwrap());
        assert_eq!(fetcher.fetch_count(), 0);

        assert!(respond(&state, &invocation(7, "how are you?")).await.unwrap());
        assert_eq!(
            fetcher.requests()[0].url,
            "https://api.example/gpt4.php?txt=how+are+you%3F"
        );
        assert!(gateway.calls().iter().any(|call| matches!(
            call,
            Call::Send { text, reply_to: Some(5), .. } if text == "Hello Bob"
        )));
    }
}
