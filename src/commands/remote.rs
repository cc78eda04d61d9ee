//! The shared flow behind every configured remote-API command: parse the
//! invocation, show a status message, call the API (polling when the job is
//! asynchronous), normalize the answer and hand it to delivery.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bot::AppState;
use crate::commands::descriptor::{render, CommandDescriptor, EnrichDescriptor, InputKind, PollDescriptor, TemplateVars};
use crate::commands::args::parse_arguments;
use crate::commands::{extension_for, fetch_media, CommandError, PollTimeout};
use crate::delivery::{Artifact, DeliveryError, Dispatcher, Outcome};
use crate::platform::{ContentKind, Invocation, MediaRef};
use crate::remote::normalize::extract_text;
use crate::remote::poll::{self, JobSource, PollOutcome};
use crate::remote::{Body, RemoteError, RemoteRequest};
use crate::status::{Animation, Final, StatusPresenter, StatusSettings};

/// Everything derived from the invocation before any network traffic.
#[derive(Debug, Clone, PartialEq)]
struct Prepared {
    model: Option<String>,
    vars: TemplateVars,
    image: Option<MediaRef>,
}

fn usage(state: &AppState, descriptor: &CommandDescriptor, reason: &str) -> CommandError {
    CommandError::Usage(format!(
        "{}\n\n<b>Usage:</b> {}",
        reason,
        descriptor.help(&state.config.telegram.prefix)
    ))
}

fn prepare(state: &AppState, descriptor: &CommandDescriptor, invocation: &Invocation, rest: &str) -> Result<Prepared, CommandError> {
    let args = parse_arguments(descriptor, rest, &mut rand::thread_rng())
        .map_err(|reason| usage(state, descriptor, &reason))?;

    let prompt = if !args.prompt.trim().is_empty() {
        args.prompt.clone()
    } else if let Some(text) = invocation.reply_text() {
        text.to_string()
    } else if let Some(default) = &descriptor.default_prompt {
        default.clone()
    } else if !descriptor.takes_prompt() {
        String::new()
    } else {
        return Err(usage(state, descriptor, "<b>Nothing to send.</b> Give a prompt or reply to a message."));
    };

    let image = match descriptor.input {
        InputKind::Text => None,
        InputKind::Image => Some(
            invocation
                .reply_media()
                .filter(|m| m.is_image())
                .cloned()
                .ok_or_else(|| usage(state, descriptor, "<b>Reply to an image or sticker.</b>"))?,
        ),
    };

    let separator = descriptor
        .tags
        .as_ref()
        .map(|t| t.separator.as_str())
        .unwrap_or("+");
    Ok(Prepared {
        vars: TemplateVars {
            prompt,
            model: args.model.clone().unwrap_or_default(),
            tags: args.tags.join(separator),
            ..Default::default()
        },
        model: args.model,
        image,
    })
}

/// Answer `prompt` verbatim with the command's default model and tags.
fn prepare_verbatim(descriptor: &CommandDescriptor, prompt: &str) -> Prepared {
    let model = descriptor
        .default_model
        .clone()
        .or_else(|| descriptor.models.first().cloned());
    let tags = descriptor
        .tags
        .as_ref()
        .map(|t| t.default.join(t.separator.as_str()))
        .unwrap_or_default();
    Prepared {
        vars: TemplateVars {
            prompt: prompt.to_string(),
            model: model.clone().unwrap_or_default(),
            tags,
            ..Default::default()
        },
        model,
        image: None,
    }
}

pub async fn run(state: &AppState, descriptor: &CommandDescriptor, invocation: &Invocation, rest: &str) -> Result<(), CommandError> {
    let prepared = prepare(state, descriptor, invocation, rest)?;
    perform(state, descriptor, invocation, prepared).await
}

/// Send the whole message text as the prompt, without flag parsing.
pub async fn answer(state: &AppState, descriptor: &CommandDescriptor, invocation: &Invocation, prompt: &str) -> Result<(), CommandError> {
    perform(state, descriptor, invocation, prepare_verbatim(descriptor, prompt)).await
}

async fn perform(
    state: &AppState,
    descriptor: &CommandDescriptor,
    invocation: &Invocation,
    prepared: Prepared,
) -> Result<(), CommandError> {
    info!(
        "Running {} (model: {})",
        descriptor.name,
        prepared.model.as_deref().unwrap_or("-")
    );

    let heading = match &descriptor.title {
        Some(title) => title_for(title, &prepared.vars),
        None => format!("<b>{}</b>", html_escape::encode_text(&descriptor.name)),
    };
    let mut status = StatusPresenter::begin(
        state.gateway.clone(),
        invocation.chat_id,
        Some(invocation.message_id),
        &format!("{}\n\n<code>Processing...</code>", heading),
        StatusSettings::from(&state.config.status),
    )
    .await
    .map_err(DeliveryError::from)?;
    status.animate(Animation::random(), Some(heading.clone())).await;

    let outcome = match produce(state, descriptor, prepared, &heading, &mut status).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("{} failed: {}", descriptor.name, e);
            report(&mut status, &e).await;
            return Ok(());
        }
    };
    status.stop_animation().await;

    let dispatcher = Dispatcher::new(state.gateway.as_ref(), &state.config.delivery);
    if let Err(e) = dispatcher.deliver(&mut status, invocation, outcome).await {
        let e = CommandError::from(e);
        warn!("{} could not deliver: {}", descriptor.name, e);
        report(&mut status, &e).await;
    }
    Ok(())
}

async fn report(status: &mut StatusPresenter, err: &CommandError) {
    if let Err(e) = status.finish(Final::Edit(err.user_message())).await {
        warn!("Could not report failure: {}", e);
    }
}

fn title_for(title: &str, vars: &TemplateVars) -> String {
    let escaped = TemplateVars {
        model: html_escape::encode_text(&vars.model).into_owned(),
        ..Default::default()
    };
    render(title, &escaped, false)
}

async fn produce(
    state: &AppState,
    descriptor: &CommandDescriptor,
    prepared: Prepared,
    heading: &str,
    status: &mut StatusPresenter,
) -> Result<Outcome, CommandError> {
    let timeout = descriptor.timeout(state.config.http.timeout_secs);
    let mut vars = prepared.vars;

    if let Some(media) = &prepared.image {
        vars.link = publish_reply_media(state, media).await?;
    }

    let request = descriptor.build_request(prepared.model.as_deref(), &vars, timeout);
    let header = descriptor.title.as_ref().map(|t| title_for(t, &vars));

    if descriptor.direct {
        status.stop_animation().await;
        let url = request.display_url();
        let artifact = fetch_media(
            state,
            &url,
            None,
            &descriptor.name,
            &extension_for(&url, descriptor.kind.default_extension()),
            Some((status.updater(), format!("{} downloading...", heading))),
        )
        .await?;
        return Ok(Outcome::File {
            artifact,
            kind: descriptor.kind,
            caption: header,
        });
    }

    let mut body = state.fetcher.fetch(&request).await?;
    if let Some(poll) = &descriptor.poll {
        body = await_job(state, descriptor, poll, body, &vars, timeout).await?;
    }

    match descriptor.kind {
        ContentKind::Text => {
            let mut text = extract_text(&body, &descriptor.extract)?;
            if descriptor.unescape {
                text = unescape_literals(&text);
            }
            let mut text = text.trim().to_string();
            if let Some(enrich) = &descriptor.enrich {
                if let Some(extra) = enrichment(state, enrich, &vars, timeout).await {
                    text.push_str("\n\n");
                    text.push_str(&extra);
                }
            }
            Ok(Outcome::text(header, text))
        }
        kind => {
            let url = extract_text(&body, &descriptor.extract)?;
            if url::Url::parse(&url).is_err() {
                return Err(RemoteError::malformed(format!("expected a media URL, got {}", url)).into());
            }
            status.stop_animation().await;
            let artifact = fetch_media(
                state,
                &url,
                None,
                &descriptor.name,
                &extension_for(&url, kind.default_extension()),
                Some((status.updater(), format!("{} downloading...", heading))),
            )
            .await?;
            Ok(Outcome::File {
                artifact,
                kind,
                caption: header,
            })
        }
    }
}

/// Pull the replied-to media through the chat and publish it on the file
/// host. The local copy is gone by the time this returns.
async fn publish_reply_media(state: &AppState, media: &MediaRef) -> Result<String, CommandError> {
    let host = state
        .config
        .file_host
        .as_ref()
        .ok_or_else(|| CommandError::Input("no file host is configured".to_string()))?;
    let extension = media
        .file_name
        .as_deref()
        .and_then(|n| n.rsplit_once('.').map(|(_, ext)| ext.to_string()))
        .unwrap_or_else(|| media.kind.default_extension().to_string());
    let artifact = Artifact::create(&state.config.delivery.temp_dir(), "input", &extension)
        .map_err(DeliveryError::from)?;

    state
        .gateway
        .download(media, artifact.path())
        .await
        .map_err(|e| CommandError::Input(format!("could not download the replied media: {}", e)))?;
    let link = state.fetcher.publish(host, artifact.path()).await?;
    debug!("Published reply media as {}", link);
    Ok(link)
}

async fn await_job(
    state: &AppState,
    descriptor: &CommandDescriptor,
    poll: &PollDescriptor,
    first: Body,
    vars: &TemplateVars,
    timeout: Duration,
) -> Result<Body, CommandError> {
    let completion = poll.completion(&descriptor.extract);
    if completion.is_complete(&first) {
        return Ok(first);
    }

    let job = extract_text(&first, &poll.job_field)?;
    let vars = TemplateVars {
        job,
        ..vars.clone()
    };
    let request = RemoteRequest::new(render(&poll.url, &vars, true), poll.method, timeout);
    debug!("Polling {} for {}", request.display_url(), descriptor.name);

    let mut source = JobSource::new(state.fetcher.as_ref(), request);
    match poll::run(&mut source, &poll.settings(), |body| completion.is_complete(body)).await {
        PollOutcome::Completed(body) => Ok(body),
        PollOutcome::Silent => Err(CommandError::Timeout(PollTimeout::Silence)),
        PollOutcome::TimedOut => Err(CommandError::Timeout(PollTimeout::Overall)),
    }
}

/// Best-effort secondary lookup. Failures are logged and dropped.
async fn enrichment(state: &AppState, enrich: &EnrichDescriptor, vars: &TemplateVars, timeout: Duration) -> Option<String> {
    let request = enrich.build_request(vars, timeout);
    let result = match state.fetcher.fetch(&request).await {
        Ok(body) => extract_text(&body, &enrich.extract),
        Err(e) => Err(e),
    };
    match result {
        Ok(text) => Some(match &enrich.label {
            Some(label) => format!("{}: {}", label, text.trim()),
            None => text.trim().to_string(),
        }),
        Err(e) => {
            debug!("Skipping enrichment from {}: {}", request.display_url(), e);
            None
        }
    }
}

/// Decode backslash escapes some APIs leave in their text (`\n`, `\"`,
/// `\u00e9`). Unknown escapes are kept as written.
pub fn unescape_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some(q @ ('"' | '\'' | '\\' | '/')) => {
                chars.next();
                out.push(q);
            }
            Some('u') => {
                let mut lookahead = chars.clone();
                lookahead.next();
                let hex: String = lookahead.by_ref().take(4).collect();
                match decode_unicode(&hex, &mut lookahead) {
                    Some(decoded) => {
                        out.push(decoded);
                        chars = lookahead;
                    }
                    None => out.push('\\'),
                }
            }
            _ => out.push('\\'),
        }
    }
    out
}

fn decode_unicode<I>(hex: &str, rest: &mut std::iter::Peekable<I>) -> Option<char>
where
    I: Iterator<Item = char> + Clone,
{
    if hex.len() != 4 {
        return None;
    }
    let high = u32::from_str_radix(hex, 16).ok()?;
    if !(0xD800..0xDC00).contains(&high) {
        return char::from_u32(high);
    }
    // Surrogate pair: expect `\uDC00`-`\uDFFF` next.
    let mut lookahead = rest.clone();
    if lookahead.next()? != '\\' || lookahead.next()? != 'u' {
        return None;
    }
    let low_hex: String = lookahead.by_ref().take(4).collect();
    let low = u32::from_str_radix(&low_hex, 16).ok()?;
    if !(0xDC00..0xE000).contains(&low) {
        return None;
    }
    *rest = lookahead;
    char::from_u32(0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ReplyContext;
    use crate::testing::{test_state, Call, MockFetcher, MockGateway};
    use serde_json::json;

    fn invocation(text: &str) -> Invocation {
        Invocation {
            sender_id: 1,
            chat_id: 10,
            message_id: 5,
            is_owner: true,
            text: text.to_string(),
            reply: None,
        }
    }

    fn with_reply(mut inv: Invocation, reply: ReplyContext) -> Invocation {
        inv.reply = Some(reply);
        inv
    }

    const GEMMA: &str = r#"
        [[commands]]
        name = "gemma"
        url = "https://api.example/gemma.php"
        method = "post"
        encoding = "form"
        extract = ["response"]
        models = ["4b", "12b", "27b"]
        default_model = "27b"
        unescape = true
        title = "<b>✨ Gemma AI ({model})</b>"
        [commands.params]
        "{model}" = "{prompt}"
    "#;

    const SINGER: &str = r#"
        [[commands]]
        name = "singer"
        url = "https://api.example/music.php?lyrics={prompt}&tags={tags}"
        extract = ["url"]
        kind = "audio"
        [commands.tags]
        default = ["pop", "electronic"]
    "#;

    const PERPLEXITY: &str = r#"
        [[commands]]
        name = "pi"
        url = "https://api.example/ask?q={prompt}"
        extract = ["answer"]
        [commands.poll]
        url = "https://api.example/jobs/{job}"
        job_field = ["id", "job.id"]
        interval_ms = 2000
        silence_timeout_secs = 30
        overall_timeout_secs = 500
    "#;

    fn last_edit(gateway: &MockGateway) -> String {
        gateway.edits().last().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_usage_error_makes_no_network_call() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        let (state, _dir) = test_state(GEMMA, &gateway, &fetcher);
        let descriptor = state.config.command("gemma").unwrap();

        let err = run(&state, descriptor, &invocation(".gemma"), "").await.unwrap_err();
        assert!(matches!(err, CommandError::Usage(_)));
        assert!(err.user_message().contains("<b>Usage:</b>"));
        assert_eq!(fetcher.fetch_count(), 0);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_owner_text_result_replaces_status() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(json!({"response": "Line one\\nLine <two>"}));
        let (state, _dir) = test_state(GEMMA, &gateway, &fetcher);
        let descriptor = state.config.command("gemma").unwrap();

        run(&state, descriptor, &invocation(".gemma -12b hi there"), "-12b hi there")
            .await
            .unwrap();

        let request = &fetcher.requests()[0];
        assert_eq!(request.params, vec![("12b".to_string(), "hi there".to_string())]);
        assert_eq!(
            last_edit(&gateway),
            "<b>✨ Gemma AI (12b)</b>\n\nLine one\nLine &lt;two&gt;"
        );
        assert_eq!(gateway.deletes(), 0);
    }

    #[tokio::test]
    async fn test_answer_sends_text_verbatim_with_defaults() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(json!({"url": "https://cdn.example/song.mp3"}));
        let (state, _dir) = test_state(SINGER, &gateway, &fetcher);
        let descriptor = state.config.command("singer").unwrap();
        let mut inv = invocation("-r la la");
        inv.is_owner = false;
        inv.sender_id = 7;

        answer(&state, descriptor, &inv, "-r la la").await.unwrap();
        assert_eq!(
            fetcher.requests()[0].url,
            "https://api.example/music.php?lyrics=-r+la+la&tags=pop%2Belectronic"
        );
    }

    #[tokio::test]
    async fn test_reply_text_used_when_no_arguments() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(json!({"response": "ok"}));
        let (state, _dir) = test_state(GEMMA, &gateway, &fetcher);
        let descriptor = state.config.command("gemma").unwrap();
        let inv = with_reply(
            invocation(".gemma"),
            ReplyContext {
                message_id: 4,
                sender_id: Some(8),
                text: Some("summarize this".to_string()),
                media: None,
            },
        );

        run(&state, descriptor, &inv, "").await.unwrap();
        assert_eq!(
            fetcher.requests()[0].params,
            vec![("27b".to_string(), "summarize this".to_string())]
        );
    }

    #[tokio::test]
    async fn test_malformed_response_is_reported() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(json!({"response": null}));
        let (state, _dir) = test_state(GEMMA, &gateway, &fetcher);
        let descriptor = state.config.command("gemma").unwrap();

        run(&state, descriptor, &invocation(".gemma hi"), "hi").await.unwrap();
        assert!(last_edit(&gateway).contains("did not return a valid response"));
    }

    #[tokio::test]
    async fn test_network_error_shows_endpoint() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        let (state, _dir) = test_state(SINGER, &gateway, &fetcher);
        let descriptor = state.config.command("singer").unwrap();

        // No canned response: the mock fails like a dead host.
        run(&state, descriptor, &invocation(".singer la la"), "la la")
            .await
            .unwrap();
        let shown = last_edit(&gateway);
        assert!(shown.contains("Network error"));
        assert!(shown.contains("https://api.example/music.php?lyrics=la+la&amp;tags=pop%2Belectronic"));
    }

    #[tokio::test]
    async fn test_media_result_is_downloaded_uploaded_and_removed() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(json!({"url": "https://cdn.example/song.mp3"}));
        let (state, dir) = test_state(SINGER, &gateway, &fetcher);
        let descriptor = state.config.command("singer").unwrap();

        run(&state, descriptor, &invocation(".singer -t rock,metal loud"), "-t rock,metal loud")
            .await
            .unwrap();

        assert_eq!(
            fetcher.requests()[0].url,
            "https://api.example/music.php?lyrics=loud&tags=rock%2Bmetal"
        );
        assert_eq!(
            fetcher.downloads(),
            vec![("https://cdn.example/song.mp3".to_string(), None)]
        );
        match gateway.uploads().as_slice() {
            [Call::Upload { kind, path, content, .. }] => {
                assert_eq!(*kind, ContentKind::Audio);
                assert_eq!(path.extension().unwrap(), "mp3");
                assert_eq!(content, b"bytes of https://cdn.example/song.mp3");
            }
            other => panic!("unexpected uploads {:?}", other),
        }
        assert_eq!(gateway.deletes(), 1);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_failed_media_download_is_reported_and_cleaned() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(json!({"url": "https://cdn.example/song.mp3"}));
        fetcher.fail_next_download(RemoteError::Http {
            endpoint: "https://cdn.example/song.mp3".to_string(),
            status: 404,
        });
        let (state, dir) = test_state(SINGER, &gateway, &fetcher);
        let descriptor = state.config.command("singer").unwrap();

        run(&state, descriptor, &invocation(".singer x"), "x").await.unwrap();
        assert!(last_edit(&gateway).contains("Could not deliver"));
        assert!(gateway.uploads().is_empty());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polled_job_completes() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(json!({"job": {"id": "j-1"}}));
        fetcher.push_json(json!({"answer": "⏳ Processing..."}));
        fetcher.push_json(json!({"answer": "Thinking about it"}));
        fetcher.push_json(json!({"answer": "The answer is 42."}));
        let (state, _dir) = test_state(PERPLEXITY, &gateway, &fetcher);
        let descriptor = state.config.command("pi").unwrap();

        run(&state, descriptor, &invocation(".pi meaning of life"), "meaning of life")
            .await
            .unwrap();

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[1].url, "https://api.example/jobs/j-1");
        assert_eq!(last_edit(&gateway), "The answer is 42.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_polled_job_reports_silence() {
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(json!({"id": "j-2"}));
        for _ in 0..40 {
            fetcher.push_json(json!({"answer": "processing"}));
        }
        let (state, _dir) = test_state(PERPLEXITY, &gateway, &fetcher);
        let descriptor = state.config.command("pi").unwrap();

        run(&state, descriptor, &invocation(".pi q"), "q").await.unwrap();
        assert!(last_edit(&gateway).contains("went quiet"));
    }

    #[tokio::test]
    async fn test_enrichment_failure_keeps_primary_result() {
        let config = r#"
            [[commands]]
            name = "word"
            url = "https://api.example/define?w={prompt}"
            extract = ["definition"]
            [commands.enrich]
            url = "https://api.example/extra?w={prompt}"
            extract = ["summary"]
            label = "More"
        "#;
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(json!({"definition": "a unit of language"}));
        fetcher.push(Err(RemoteError::Http {
            endpoint: "https://api.example/extra?w=word".to_string(),
            status: 500,
        }));
        let (state, _dir) = test_state(config, &gateway, &fetcher);
        let descriptor = state.config.command("word").unwrap();

        run(&state, descriptor, &invocation(".word word"), "word").await.unwrap();
        assert_eq!(last_edit(&gateway), "a unit of language");

        fetcher.push_json(json!({"definition": "a unit of language"}));
        fetcher.push_json(json!({"summary": "see also: sentence"}));
        run(&state, descriptor, &invocation(".word word"), "word").await.unwrap();
        assert_eq!(
            last_edit(&gateway),
            "a unit of language\n\nMore: see also: sentence"
        );
    }

    #[tokio::test]
    async fn test_image_input_is_published_as_link() {
        let config = r#"
            [[commands]]
            name = "ocr"
            url = "https://api.example/OCR.php?text={prompt}&link={link}"
            extract = ["response"]
            input = "image"
            default_prompt = "describe this picture"
        "#;
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        fetcher.push_json(json!({"response": "a cat"}));
        let (state, dir) = test_state(config, &gateway, &fetcher);
        let descriptor = state.config.command("ocr").unwrap();

        let without_media = invocation(".ocr");
        let err = run(&state, descriptor, &without_media, "").await.unwrap_err();
        assert!(matches!(err, CommandError::Usage(_)));

        let inv = with_reply(
            invocation(".ocr"),
            ReplyContext {
                message_id: 4,
                sender_id: Some(8),
                text: None,
                media: Some(MediaRef {
                    file_id: "photo-1".to_string(),
                    kind: ContentKind::Image,
                    file_name: None,
                    mime_type: Some("image/jpeg".to_string()),
                }),
            },
        );
        run(&state, descriptor, &inv, "").await.unwrap();

        let published = fetcher.published();
        assert_eq!(published.len(), 1);
        let name = published[0].file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(
            fetcher.requests()[0].url,
            format!(
                "https://api.example/OCR.php?text=describe+this+picture&link=https%3A%2F%2Ffiles.example%2F{}",
                name
            )
        );
        assert_eq!(last_edit(&gateway), "a cat");
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_direct_media_command() {
        let config = r#"
            [[commands]]
            name = "gen"
            url = "https://img.example/prompt/{prompt}"
            kind = "image"
            direct = true
        "#;
        let gateway = MockGateway::new();
        let fetcher = MockFetcher::new();
        let (state, _dir) = test_state(config, &gateway, &fetcher);
        let descriptor = state.config.command("gen").unwrap();

        run(&state, descriptor, &invocation(".gen red fox"), "red fox").await.unwrap();
        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(fetcher.downloads()[0].0, "https://img.example/prompt/red+fox");
        assert!(matches!(
            gateway.uploads().as_slice(),
            [Call::Upload { kind: ContentKind::Image, .. }]
        ));
    }

    #[test]
    fn test_unescape_literals() {
        assert_eq!(unescape_literals(r"a\nb\tc"), "a\nb\tc");
        assert_eq!(unescape_literals(r#"say \"hi\""#), "say \"hi\"");
        assert_eq!(unescape_literals(r"caf\u00e9"), "café");
        assert_eq!(unescape_literals(r"\ud83d\ude00!"), "😀!");
        assert_eq!(unescape_literals(r"\ud83d alone"), r"\ud83d alone");
        assert_eq!(unescape_literals(r"bad \uZZZZ and \q"), r"bad \uZZZZ and \q");
        assert_eq!(unescape_literals("trailing \\"), "trailing \\");
        assert_eq!(unescape_literals("unicode stays: é"), "unicode stays: é");
    }
}
