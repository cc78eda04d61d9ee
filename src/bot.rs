use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::commands::args::parse_command;
use crate::commands::autoreply::{self, TargetStore};
use crate::commands::downloader::{self, Downloader};
use crate::commands::react::{self, ReactionStore};
use crate::commands::{self, reply};
use crate::config::Config;
use crate::platform::{ChatGateway, Invocation};
use crate::remote::Fetcher;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub fetcher: Arc<dyn Fetcher>,
    pub gateway: Arc<dyn ChatGateway>,
    pub reactions: ReactionStore,
    pub targets: TargetStore,
    pub downloader: Option<Downloader>,
}

impl AppState {
    pub fn new(config: Config, fetcher: Arc<dyn Fetcher>, gateway: Arc<dyn ChatGateway>) -> Result<Self> {
        let downloader = match &config.downloader {
            Some(dl) if dl.enabled => Some(Downloader::new(dl.clone())?),
            _ => None,
        };
        Ok(Self {
            config,
            fetcher,
            gateway,
            reactions: ReactionStore::new(),
            targets: TargetStore::new(),
            downloader,
        })
    }
}

/// Handle one incoming message: reactions run beside a command, an
/// auto-reply or a link.
pub async fn route(state: &AppState, invocation: Invocation) {
    let command = parse_command(&invocation.text, &state.config.telegram.prefix);
    let span = info_span!(
        "invocation",
        id = %Uuid::new_v4(),
        chat_id = invocation.chat_id,
        sender_id = invocation.sender_id,
        command = command.as_ref().map(|(name, _)| name.as_str()).unwrap_or("-"),
    );

    async {
        let dispatch = async {
            match &command {
                Some((name, rest)) => {
                    debug!("Command {} from user {}", name, invocation.sender_id);
                    commands::execute(state, &invocation, name, rest).await
                }
                None => match autoreply::respond(state, &invocation).await {
                    Ok(true) => Ok(()),
                    Ok(false) => downloader::handle(state, &invocation).await,
                    Err(e) => Err(e),
                },
            }
        };
        // Reactions may sit in retry backoff; the command does not wait for them.
        let ((), result) = tokio::join!(react::react_to(state, &invocation), dispatch);

        if let Err(e) = result {
            warn!("Invocation failed: {}", e);
            if let Err(e) = reply(state, &invocation, &e.user_message()).await {
                warn!("Could not report failure: {}", e);
            }
        } else {
            info!("Invocation finished");
        }
    }
    .instrument(span)
    .await
}
