pub mod args;
pub mod autoreply;
pub mod descriptor;
pub mod downloader;
pub mod react;
pub mod remote;

use thiserror::Error;
use tracing::debug;

use crate::bot::AppState;
use crate::delivery::{Artifact, DeliveryError};
use crate::platform::Invocation;
use crate::remote::RemoteError;
use crate::status::animation::download_progress;
use crate::status::StatusUpdater;
use descriptor::Access;

pub const BUILTIN_COMMANDS: [&str; 4] = ["help", "react", "addai", "rmai"];

/// Which poll deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTimeout {
    /// No new activity for the silence window: the remote probably stalled.
    Silence,
    /// Still busy at the overall cap: the remote is probably overloaded.
    Overall,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("usage error: {0}")]
    Usage(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("poll gave up ({0:?})")]
    Timeout(PollTimeout),
    #[error("unusable input: {0}")]
    Input(String),
}

fn code(text: &str) -> String {
    format!("<code>{}</code>", html_escape::encode_text(text))
}

impl CommandError {
    /// HTML shown to the user in place of a result.
    pub fn user_message(&self) -> String {
        match self {
            CommandError::Usage(text) => text.clone(),
            CommandError::Remote(RemoteError::Network { endpoint, detail }) => format!(
                "<b>❗️ Network error:</b> {}\n\n<b>Endpoint:</b>\n{}",
                code(detail),
                code(endpoint)
            ),
            CommandError::Remote(RemoteError::Http { endpoint, status }) => format!(
                "<b>❗️ The API answered HTTP {}.</b>\n\n<b>Endpoint:</b>\n{}",
                status,
                code(endpoint)
            ),
            CommandError::Remote(RemoteError::Malformed { detail }) => format!(
                "<b>❗️ The API did not return a valid response.</b>\n{}",
                code(detail)
            ),
            CommandError::Remote(RemoteError::LocalIo { detail }) => {
                format!("<b>❗️ Local file error:</b> {}", code(detail))
            }
            CommandError::Delivery(err) => {
                format!("<b>❗️ Could not deliver the result:</b> {}", code(&err.to_string()))
            }
            CommandError::Timeout(PollTimeout::Silence) => {
                "<b>⌛ The remote went quiet.</b> No new activity arrived in time, it may have stalled."
                    .to_string()
            }
            CommandError::Timeout(PollTimeout::Overall) => {
                "<b>⌛ Gave up waiting.</b> The remote was still busy at the time limit, it may be overloaded."
                    .to_string()
            }
            CommandError::Input(detail) => format!("<b>Error:</b> {}", html_escape::encode_text(detail)),
        }
    }
}

pub fn permits(state: &AppState, access: Access, invocation: &Invocation) -> bool {
    match access {
        Access::Owner => invocation.is_owner,
        Access::Allowed => invocation.is_owner || state.config.is_allowed(invocation.sender_id),
        Access::Anyone => true,
    }
}

/// Run the command `name`. Unknown commands and callers without access are
/// ignored. Errors returned here happened before any status message existed.
pub async fn execute(state: &AppState, invocation: &Invocation, name: &str, rest: &str) -> Result<(), CommandError> {
    match name {
        "help" if permits(state, Access::Allowed, invocation) => {
            reply(state, invocation, &help_text(state, rest)).await
        }
        "react" if invocation.is_owner => react::handle(state, invocation, rest).await,
        "addai" if invocation.is_owner => autoreply::add(state, invocation, rest).await,
        "rmai" if invocation.is_owner => autoreply::remove(state, invocation).await,
        _ => match state.config.command(name) {
            Some(descriptor) if permits(state, descriptor.access, invocation) => {
                remote::run(state, descriptor, invocation, rest).await
            }
            Some(_) => {
                debug!("User {} may not run {}", invocation.sender_id, name);
                Ok(())
            }
            None => Ok(()),
        },
    }
}

pub(crate) async fn reply(state: &AppState, invocation: &Invocation, text: &str) -> Result<(), CommandError> {
    state
        .gateway
        .send(invocation.chat_id, text, Some(invocation.message_id))
        .await
        .map_err(DeliveryError::from)?;
    Ok(())
}

pub fn help_text(state: &AppState, topic: &str) -> String {
    let prefix = &state.config.telegram.prefix;
    let topic = topic.trim().trim_start_matches(prefix.as_str()).to_lowercase();
    if !topic.is_empty() {
        return match state.config.command(&topic) {
            Some(descriptor) => descriptor.help(prefix),
            None => format!("<b>No command named</b> {}", code(&topic)),
        };
    }

    let mut lines = vec![
        "<b>Commands</b>".to_string(),
        String::new(),
        format!("<code>{}help [command]</code> - this list", prefix),
        format!(
            "<code>{}react [emoji ...]</code> / <code>{}react stop</code> - auto-reactions in this chat",
            prefix, prefix
        ),
    ];
    if state.config.auto_reply.is_some() {
        lines.push(format!(
            "<code>{}addai &lt;user id&gt;</code> / <code>{}rmai</code> - AI auto-reply to one user in this chat",
            prefix, prefix
        ));
    }
    for descriptor in &state.config.commands {
        let usage = if descriptor.usage.is_empty() {
            "<prompt>"
        } else {
            descriptor.usage.as_str()
        };
        let mut line = code(&format!("{}{} {}", prefix, descriptor.name, usage));
        if !descriptor.description.is_empty() {
            line.push_str(" - ");
            line.push_str(&html_escape::encode_text(&descriptor.description));
        }
        lines.push(line);
    }
    if state.downloader.is_some() {
        lines.push(String::new());
        lines.push("Links from supported sites are downloaded automatically.".to_string());
    }
    lines.join("\n")
}

/// Download `url` into a fresh artifact, reporting progress when asked.
pub(crate) async fn fetch_media(
    state: &AppState,
    url: &str,
    referer: Option<&str>,
    stem: &str,
    extension: &str,
    progress: Option<(StatusUpdater, String)>,
) -> Result<Artifact, CommandError> {
    let artifact = Artifact::create(&state.config.delivery.temp_dir(), stem, extension)
        .map_err(DeliveryError::from)?;
    let report = move |written: u64, total: Option<u64>| {
        if let Some((updater, label)) = &progress {
            updater.update(download_progress(label, written, total));
        }
    };
    let bytes = state
        .fetcher
        .download(url, referer, artifact.path(), Some(&report))
        .await
        .map_err(DeliveryError::Download)?;
    debug!("Downloaded {} bytes from {}", bytes, url);
    Ok(artifact)
}

/// File extension for media at `url`, falling back to `fallback`.
pub(crate) fn extension_for(url: &str, fallback: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(ToString::to_string))
        })
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
        .filter(|ext| (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| fallback.to_string())
}
