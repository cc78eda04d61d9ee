//! Bounded polling for remote actions that complete asynchronously.
//!
//! A session moves `Idle -> Polling` once the caller has issued the remote
//! action, then ends in exactly one of `Completed`, `Silent` (no new activity
//! for `silence_timeout`) or `TimedOut` (`overall_timeout` since start).
//! Slow but progressing remotes keep the session alive up to the overall cap.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::remote::normalize::{extract, extract_text, Extraction};
use crate::remote::{Body, Fetcher, RemoteRequest, RemoteResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub silence_timeout: Duration,
    pub overall_timeout: Duration,
}

/// One snapshot of the remote state. `version` changes whenever the remote
/// did something new.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<T> {
    pub version: u64,
    pub item: T,
}

#[async_trait]
pub trait PollSource: Send {
    type Item: Send;

    /// Latest known state, or `None` when the remote has nothing yet.
    async fn latest(&mut self) -> RemoteResult<Option<Observation<Self::Item>>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Completed(T),
    Silent,
    TimedOut,
}

/// Poll `source` until `is_complete` accepts a new observation or one of the
/// two timeouts fires. Fetch failures count as "no new activity".
pub async fn run<S, F>(source: &mut S, settings: &PollSettings, mut is_complete: F) -> PollOutcome<S::Item>
where
    S: PollSource,
    F: FnMut(&S::Item) -> bool + Send,
{
    let start = Instant::now();
    let mut last_activity = start;
    let mut last_seen: Option<u64> = None;

    loop {
        let now = Instant::now();
        let since_start = now.duration_since(start);
        let since_activity = now.duration_since(last_activity);
        if since_start > settings.overall_timeout {
            debug!("Poll timed out after {:?}", since_start);
            return PollOutcome::TimedOut;
        }
        if since_activity > settings.silence_timeout {
            debug!("Poll went silent after {:?} without activity", since_activity);
            return PollOutcome::Silent;
        }

        // A hung fetch must not push us past either deadline.
        let budget = (settings.overall_timeout - since_start)
            .min(settings.silence_timeout - since_activity);

        match tokio::time::timeout(budget, source.latest()).await {
            Ok(Ok(Some(observation))) if last_seen != Some(observation.version) => {
                last_seen = Some(observation.version);
                last_activity = Instant::now();
                if is_complete(&observation.item) {
                    debug!("Poll completed after {:?}", start.elapsed());
                    return PollOutcome::Completed(observation.item);
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Poll fetch failed, treating as no activity: {}", e),
            Err(_) => debug!("Poll fetch exceeded its {:?} budget", budget),
        }

        tokio::time::sleep(settings.interval).await;
    }
}

/// When a polled job counts as finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The path resolves to a present, non-empty value.
    FieldPresent(Extraction),
    /// The text at the path exists and mentions none of the keywords.
    TextLacks {
        extraction: Extraction,
        keywords: Vec<String>,
    },
}

impl Completion {
    pub fn is_complete(&self, body: &Body) -> bool {
        match self {
            Completion::FieldPresent(extraction) => extract(body, extraction).is_ok(),
            Completion::TextLacks {
                extraction,
                keywords,
            } => match extract_text(body, extraction) {
                Ok(text) => {
                    let lower = text.to_lowercase();
                    !keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
                }
                Err(_) => false,
            },
        }
    }
}

/// Re-issues the same status request; the body fingerprint is the version.
pub struct JobSource<'a> {
    fetcher: &'a dyn Fetcher,
    request: RemoteRequest,
}

impl<'a> JobSource<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, request: RemoteRequest) -> Self {
        Self { fetcher, request }
    }
}

fn fingerprint(body: &Body) -> u64 {
    let mut hasher = DefaultHasher::new();
    body.as_text().hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
impl<'a> PollSource for JobSource<'a> {
    type Item = Body;

    async fn latest(&mut self) -> RemoteResult<Option<Observation<Body>>> {
        let body = self.fetcher.fetch(&self.request).await?;
        Ok(Some(Observation {
            version: fingerprint(&body),
            item: body,
        }))
    }
}
