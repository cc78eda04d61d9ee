//! Automatic media downloads for links from supported sites.
//!
//! Any non-command message carrying such a link is sent to the downloader
//! API; every media item it lists is fetched and uploaded on its own.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::bot::AppState;
use crate::commands::descriptor::Access;
use crate::commands::{fetch_media, permits, CommandError};
use crate::config::DownloaderConfig;
use crate::delivery::{DeliveryError, Dispatcher, Outcome};
use crate::platform::{ContentKind, Invocation};
use crate::remote::normalize::FieldPath;
use crate::remote::{Body, Encoding, Method, RemoteError, RemoteRequest};
use crate::status::{Final, StatusPresenter, StatusSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Facebook,
    Instagram,
    Spotify,
    Mediafire,
    Soundcloud,
    Threads,
    X,
    Tiktok,
    Capcut,
    Youtube,
}

const DOMAINS: [(&str, Platform); 14] = [
    ("facebook.com", Platform::Facebook),
    ("fb.watch", Platform::Facebook),
    ("instagram.com", Platform::Instagram),
    ("spotify.com", Platform::Spotify),
    ("mediafire.com", Platform::Mediafire),
    ("soundcloud.com", Platform::Soundcloud),
    ("threads.net", Platform::Threads),
    ("threads.com", Platform::Threads),
    ("x.com", Platform::X),
    ("twitter.com", Platform::X),
    ("tiktok.com", Platform::Tiktok),
    ("capcut.com", Platform::Capcut),
    ("youtube.com", Platform::Youtube),
    ("youtu.be", Platform::Youtube),
];

impl Platform {
    /// Path segment of the downloader API for this platform.
    pub fn endpoint(self) -> &'static str {
        match self {
            Platform::Facebook => "fb",
            Platform::Instagram => "insta",
            Platform::Spotify => "spotify",
            Platform::Mediafire => "mediafire",
            Platform::Soundcloud => "soundcloud",
            Platform::Threads => "threads",
            Platform::X => "x",
            Platform::Tiktok => "tiktok",
            Platform::Capcut => "capcut",
            Platform::Youtube => "yt",
        }
    }

    /// Match on the host or any subdomain of it, so `notx.com` is not `x.com`.
    pub fn detect(url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_lowercase();
        DOMAINS.iter().find_map(|(domain, platform)| {
            let matches = host == *domain
                || host
                    .strip_suffix(domain)
                    .is_some_and(|rest| rest.ends_with('.'));
            matches.then_some(*platform)
        })
    }

    /// Formats asked for in separate requests; `None` is a single plain request.
    fn formats(self) -> &'static [Option<&'static str>] {
        match self {
            Platform::Youtube => &[Some("mp4"), Some("mp3")],
            _ => &[None],
        }
    }

    fn default_title(self) -> &'static str {
        match self {
            Platform::Facebook => "Facebook Video",
            Platform::Instagram | Platform::Threads | Platform::X => "Social Media Post",
            Platform::Spotify => "Track",
            Platform::Mediafire => "File",
            Platform::Tiktok => "TikTok",
            _ => "Downloaded Media",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    pub url: String,
    pub quality: String,
    pub extension: String,
    pub kind: ContentKind,
}

impl MediaItem {
    fn new(url: String, quality: impl Into<String>, extension: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            url,
            quality: quality.into(),
            extension: extension.into(),
            kind,
        }
    }
}

fn text_at(value: &Value, path: &str) -> Option<String> {
    FieldPath::parse(path).ok()?.find_text(value)
}

/// Title and downloadable items from one platform's response to a request for
/// `format`.
pub fn media_items(platform: Platform, response: &Value, format: Option<&str>) -> (String, Vec<MediaItem>) {
    let title = |path: &str| text_at(response, path).unwrap_or_else(|| platform.default_title().to_string());
    let mut items = Vec::new();

    let title = match platform {
        Platform::Facebook => {
            for (field, quality, ext, kind) in [
                ("hd", "HD", "mp4", ContentKind::Video),
                ("sd", "SD", "mp4", ContentKind::Video),
                ("audio", "Audio", "mp3", ContentKind::Audio),
            ] {
                if let Some(url) = text_at(response, field) {
                    items.push(MediaItem::new(url, quality, ext, kind));
                }
            }
            title("platform")
        }
        Platform::Instagram | Platform::Threads | Platform::X => {
            let list = response
                .get("urls")
                .filter(|v| v.as_array().is_some_and(|a| !a.is_empty()))
                .or_else(|| (platform == Platform::X).then(|| response.get("media")).flatten())
                .and_then(Value::as_array);
            for (i, entry) in list.into_iter().flatten().enumerate() {
                let quality = format!("File_{}", i + 1);
                match entry {
                    Value::String(url) if !url.trim().is_empty() => {
                        items.push(MediaItem::new(url.clone(), quality, "mp4", ContentKind::Video));
                    }
                    Value::Object(_) => {
                        let Some(url) = text_at(entry, "url") else {
                            continue;
                        };
                        let is_audio = text_at(entry, "type").is_some_and(|t| t.contains("audio"));
                        if is_audio {
                            items.push(MediaItem::new(url, quality, "mp3", ContentKind::Audio));
                        } else {
                            items.push(MediaItem::new(url, quality, "mp4", ContentKind::Video));
                        }
                    }
                    _ => {}
                }
            }
            title("metadata.creator")
        }
        Platform::Spotify => {
            if let Some(url) = text_at(response, "download_url") {
                items.push(MediaItem::new(url, "Audio", "mp3", ContentKind::Audio));
            }
            title("name")
        }
        Platform::Mediafire => {
            let name = title("name");
            let ext = name
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_string())
                .filter(|ext| !ext.is_empty())
                .unwrap_or_else(|| "zip".to_string());
            if let Some(url) = text_at(response, "download") {
                items.push(MediaItem::new(url, "File", ext, ContentKind::Document));
            }
            name
        }
        Platform::Tiktok => {
            let links = response
                .pointer("/data/0/downloadLinks")
                .and_then(Value::as_array);
            for link in links.into_iter().flatten() {
                if let (Some(url), Some(label)) = (text_at(link, "link"), text_at(link, "text")) {
                    items.push(MediaItem::new(url, label, "mp4", ContentKind::Video));
                }
            }
            title("data[0].title")
        }
        Platform::Capcut => {
            if let Some(url) = text_at(response, "videoUrl") {
                items.push(MediaItem::new(url, "Video", "mp4", ContentKind::Video));
            }
            title("title")
        }
        Platform::Soundcloud => {
            if let Some(url) = text_at(response, "download_url") {
                items.push(MediaItem::new(url, "Audio", "mp3", ContentKind::Audio));
            }
            title("title")
        }
        Platform::Youtube => {
            // One format per response, echoed back by the API.
            let format = text_at(response, "data[0].format")
                .or_else(|| format.map(ToString::to_string))
                .unwrap_or_else(|| "mp4".to_string());
            let (quality, kind) = match format.as_str() {
                "mp3" => ("Audio", ContentKind::Audio),
                _ => ("Video", ContentKind::Video),
            };
            if let Some(url) = text_at(response, "data[0].downloadUrl") {
                items.push(MediaItem::new(url, quality, format, kind));
            }
            title("data[0].title")
        }
    };
    (title, items)
}

/// File stem built from the title and quality label, safe on any filesystem.
pub fn safe_stem(title: &str, quality: &str) -> String {
    let title: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .take(50)
        .collect();
    let quality: String = quality.chars().filter(|c| c.is_alphanumeric()).collect();
    let title = title.trim();
    if title.is_empty() {
        format!("media_{}", quality)
    } else {
        format!("{}_{}", title, quality)
    }
}

/// What the downloader API said about a link.
#[derive(Debug, Clone, PartialEq)]
enum Listing {
    Media { title: String, items: Vec<MediaItem> },
    Refused(String),
}

fn is_success(body: &Body) -> Result<&Value, String> {
    match body {
        Body::Json(value) if value.get("success").and_then(Value::as_bool) == Some(true) => Ok(value),
        Body::Json(value) => Err(text_at(value, "error").unwrap_or_else(|| "API request failed.".to_string())),
        Body::Text(_) => Err("No response.".to_string()),
    }
}

pub struct Downloader {
    config: DownloaderConfig,
    url_pattern: Regex,
}

impl Downloader {
    pub fn new(config: DownloaderConfig) -> Result<Self> {
        let url_pattern = Regex::new(r"https?://\S+").context("Failed to compile link pattern")?;
        Ok(Self { config, url_pattern })
    }

    /// First link in `text` that points at a supported site.
    pub fn find_link(&self, text: &str) -> Option<(String, Platform)> {
        self.url_pattern.find_iter(text).find_map(|m| {
            let url = Url::parse(m.as_str()).ok()?;
            Platform::detect(&url).map(|platform| (m.as_str().to_string(), platform))
        })
    }

    fn request(&self, platform: Platform, link: &str, format: Option<&str>) -> RemoteRequest {
        let mut request = RemoteRequest::new(
            format!("{}/{}", self.config.api_url.trim_end_matches('/'), platform.endpoint()),
            Method::Post,
            Duration::from_secs(self.config.timeout_secs),
        )
        .with_encoding(Encoding::Json)
        .with_param("url", link);
        if let Some(format) = format {
            request = request.with_param("format", format);
        }
        request
    }

    /// Platforms with several formats get one request each, sent together.
    /// A listing from any of them wins over refusals, and a refusal wins over
    /// network failures.
    async fn lookup(&self, state: &AppState, platform: Platform, link: &str) -> Result<Listing, RemoteError> {
        let formats = platform.formats();
        let requests: Vec<RemoteRequest> = formats
            .iter()
            .map(|format| self.request(platform, link, *format))
            .collect();
        let bodies = join_all(requests.iter().map(|r| state.fetcher.fetch(r))).await;

        let mut title = None;
        let mut items = Vec::new();
        let mut refusal = None;
        let mut failure = None;
        for (format, body) in formats.iter().zip(bodies) {
            let body = match body {
                Ok(body) => body,
                Err(e) => {
                    failure.get_or_insert(e);
                    continue;
                }
            };
            match is_success(&body) {
                Ok(value) => {
                    let (found, listed) = media_items(platform, value, *format);
                    title.get_or_insert(found);
                    items.extend(listed);
                }
                Err(reason) => {
                    refusal.get_or_insert(reason);
                }
            }
        }

        match (title, refusal, failure) {
            (Some(title), _, _) => Ok(Listing::Media { title, items }),
            (None, Some(reason), _) => Ok(Listing::Refused(reason)),
            (None, None, Some(e)) => Err(e),
            (None, None, None) => Ok(Listing::Media {
                title: platform.default_title().to_string(),
                items,
            }),
        }
    }
}

fn code(text: &str) -> String {
    format!("<code>{}</code>", html_escape::encode_text(text))
}

/// Download every supported link in the message. Returns `Ok` without doing
/// anything when there is no such link or the sender may not use it.
pub async fn handle(state: &AppState, invocation: &Invocation) -> Result<(), CommandError> {
    let Some(downloader) = &state.downloader else {
        return Ok(());
    };
    let Some((link, platform)) = downloader.find_link(&invocation.text) else {
        return Ok(());
    };
    if !permits(state, Access::Allowed, invocation) {
        debug!("Ignoring link from user {}", invocation.sender_id);
        return Ok(());
    }
    info!("Downloading {:?} link {}", platform, link);

    let mut status = StatusPresenter::begin(
        state.gateway.clone(),
        invocation.chat_id,
        Some(invocation.message_id),
        "<code>Processing link...</code>",
        StatusSettings::from(&state.config.status),
    )
    .await
    .map_err(DeliveryError::from)?;

    let (title, items) = match downloader.lookup(state, platform, &link).await {
        Ok(Listing::Media { title, items }) if !items.is_empty() => (title, items),
        Ok(Listing::Media { .. }) => {
            status
                .finish(Final::Edit("<code>❌ No downloadable media found.</code>".to_string()))
                .await
                .map_err(DeliveryError::from)?;
            return Ok(());
        }
        Ok(Listing::Refused(reason)) => {
            warn!("Downloader refused {}: {}", link, reason);
            status
                .finish(Final::Edit(code(&format!("❌ Error: {}", reason))))
                .await
                .map_err(DeliveryError::from)?;
            return Ok(());
        }
        Err(e) => {
            warn!("Downloader lookup for {} failed: {}", link, e);
            status
                .finish(Final::Edit(CommandError::from(e).user_message()))
                .await
                .map_err(DeliveryError::from)?;
            return Ok(());
        }
    };

    if let Err(e) = status.finish(Final::Delete).await {
        debug!("Could not delete status message: {}", e);
    }
    for item in &items {
        if let Err(e) = deliver_item(state, invocation, &link, &title, item).await {
            warn!("Item {} of {} failed: {}", item.quality, link, e);
        }
    }
    Ok(())
}

async fn deliver_item(
    state: &AppState,
    invocation: &Invocation,
    link: &str,
    title: &str,
    item: &MediaItem,
) -> Result<(), CommandError> {
    let label = format!("Downloading '{}' ({})...", title, item.quality);
    let mut status = StatusPresenter::begin(
        state.gateway.clone(),
        invocation.chat_id,
        Some(invocation.message_id),
        &code(&label),
        StatusSettings::from(&state.config.status),
    )
    .await
    .map_err(DeliveryError::from)?;

    let artifact = match fetch_media(
        state,
        &item.url,
        Some(link),
        &safe_stem(title, &item.quality),
        &item.extension,
        Some((status.updater(), html_escape::encode_text(&label).into_owned())),
    )
    .await
    {
        Ok(artifact) => artifact,
        Err(e) => {
            let text = code(&format!("❌ Download failed for {}. Reason: {}", item.quality, e));
            status.finish(Final::Edit(text)).await.map_err(DeliveryError::from)?;
            return Err(e);
        }
    };

    status.update(code(&format!("Uploading '{}'...", item.quality)));
    let caption = format!(
        "<b>{}</b>\n<b>Quality:</b> {}",
        html_escape::encode_text(title),
        code(&item.quality)
    );
    let outcome = Outcome::File {
        artifact,
        kind: item.kind,
        caption: Some(caption),
    };
    let dispatcher = Dispatcher::new(state.gateway.as_ref(), &state.config.delivery);
    if let Err(e) = dispatcher.deliver(&mut status, invocation, outcome).await {
        let e = CommandError::from(e);
        status
            .finish(Final::Edit(e.user_message()))
            .await
            .map_err(DeliveryError::from)?;
        return Err(e);
    }
    Ok(())
}
