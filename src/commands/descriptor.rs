//! Declarative description of one remote-API command.
//!
//! Every integration is data: where to send the prompt, how to encode it and
//! which response fields hold the answer. The flow in `commands::remote` is
//! shared by all of them.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::platform::ContentKind;
use crate::remote::normalize::Extraction;
use crate::remote::poll::{Completion, PollSettings};
use crate::remote::{Encoding, Method, RemoteRequest};

/// Who may invoke a command.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Owner,
    Allowed,
    Anyone,
}

/// How the model is chosen on the command line.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelStyle {
    /// `.gemma -12b prompt`
    #[default]
    Flag,
    /// `.ask 2 prompt` or `.ask qwen3-coder prompt`
    Positional,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    Text,
    /// Reply-context media, published to the file host as `{link}`.
    Image,
}

/// Per-model overrides of the request shape.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Variant {
    pub url: Option<String>,
    pub method: Option<Method>,
    pub encoding: Option<Encoding>,
    pub params: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TagOptions {
    #[serde(default)]
    pub default: Vec<String>,
    #[serde(default)]
    pub pool: Vec<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollDescriptor {
    /// Status endpoint; `{job}` is the id taken from the first response.
    pub url: String,
    #[serde(default)]
    pub method: Method,
    pub job_field: Extraction,
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_silence_timeout_secs")]
    pub silence_timeout_secs: u64,
    #[serde(default = "default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,
    /// Finished once this path is present. Without it, the job is finished
    /// when the extracted text stops mentioning `processing_keywords`.
    #[serde(default)]
    pub done_field: Option<Extraction>,
    #[serde(default = "default_processing_keywords")]
    pub processing_keywords: Vec<String>,
}

impl PollDescriptor {
    pub fn settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.interval_ms),
            silence_timeout: Duration::from_secs(self.silence_timeout_secs),
            overall_timeout: Duration::from_secs(self.overall_timeout_secs),
        }
    }

    pub fn completion(&self, extract: &Extraction) -> Completion {
        match &self.done_field {
            Some(field) => Completion::FieldPresent(field.clone()),
            None => Completion::TextLacks {
                extraction: extract.clone(),
                keywords: self.processing_keywords.clone(),
            },
        }
    }
}

/// Secondary, best-effort lookup appended to a text result.
#[derive(Debug, Deserialize, Clone)]
pub struct EnrichDescriptor {
    pub url: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub extract: Extraction,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub access: Access,

    pub url: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub extract: Extraction,
    #[serde(default)]
    pub kind: ContentKind,
    /// The request URL serves the media itself.
    #[serde(default)]
    pub direct: bool,
    #[serde(default)]
    pub unescape: bool,
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub model_style: ModelStyle,
    #[serde(default)]
    pub variants: BTreeMap<String, Variant>,

    #[serde(default)]
    pub tags: Option<TagOptions>,
    #[serde(default)]
    pub input: InputKind,
    #[serde(default)]
    pub default_prompt: Option<String>,

    #[serde(default)]
    pub poll: Option<PollDescriptor>,
    #[serde(default)]
    pub enrich: Option<EnrichDescriptor>,
}

fn default_separator() -> String {
    "+".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_silence_timeout_secs() -> u64 {
    30
}

fn default_overall_timeout_secs() -> u64 {
    500
}

fn default_processing_keywords() -> Vec<String> {
    ["processing", "thinking", "generating", "typing", "...", "⏳"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Values substituted into `{placeholder}`s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVars {
    pub prompt: String,
    pub model: String,
    pub tags: String,
    pub link: String,
    pub job: String,
}

impl TemplateVars {
    fn get(&self, name: &str) -> Option<&str> {
        match name {
            "prompt" => Some(&self.prompt),
            "model" => Some(&self.model),
            "tags" => Some(&self.tags),
            "link" => Some(&self.link),
            "job" => Some(&self.job),
            _ => None,
        }
    }
}

/// Substitute placeholders in one pass over `template`, so substituted values
/// are never scanned again. Unknown `{names}` are kept as written. Values
/// going into a URL are form-encoded.
pub fn render(template: &str, vars: &TemplateVars, for_url: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after
            .find('}')
            .and_then(|close| vars.get(&after[..close]).map(|value| (close, value)));
        match value {
            Some((close, value)) => {
                if for_url {
                    out.extend(url::form_urlencoded::byte_serialize(value.as_bytes()));
                } else {
                    out.push_str(value);
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn check_url(template: &str) -> Result<()> {
    let sample = render(
        template,
        &TemplateVars {
            prompt: "x".into(),
            model: "x".into(),
            tags: "x".into(),
            link: "x".into(),
            job: "x".into(),
        },
        true,
    );
    url::Url::parse(&sample).with_context(|| format!("not a valid URL: {}", template))?;
    Ok(())
}

impl CommandDescriptor {
    pub fn timeout(&self, fallback_secs: u64) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(fallback_secs))
    }

    pub fn needs_file_host(&self) -> bool {
        self.input == InputKind::Image
    }

    /// Whether the prompt placeholder is used anywhere in the request.
    pub fn takes_prompt(&self) -> bool {
        let in_params = |params: &BTreeMap<String, String>| {
            params
                .iter()
                .any(|(k, v)| k.contains("{prompt}") || v.contains("{prompt}"))
        };
        self.url.contains("{prompt}")
            || in_params(&self.params)
            || self.variants.values().any(|v| {
                v.url.as_deref().is_some_and(|u| u.contains("{prompt}"))
                    || v.params.as_ref().is_some_and(|p| in_params(p))
            })
    }

    pub fn model_index(&self, name: &str) -> Option<usize> {
        self.models.iter().position(|m| m.eq_ignore_ascii_case(name))
    }

    pub fn validate(&self) -> Result<()> {
        check_url(&self.url)?;
        for (model, variant) in &self.variants {
            if self.model_index(model).is_none() {
                bail!("variant '{}' is not one of the listed models", model);
            }
            if let Some(url) = &variant.url {
                check_url(url)?;
            }
        }
        if let Some(default) = &self.default_model {
            if self.model_index(default).is_none() {
                bail!("default_model '{}' is not one of the listed models", default);
            }
        }
        if self.model_style == ModelStyle::Positional && self.models.is_empty() {
            bail!("positional model selection needs a models list");
        }
        if self.direct && self.kind == ContentKind::Text {
            bail!("direct commands must produce media, not text");
        }
        if self.direct && self.poll.is_some() {
            bail!("direct commands cannot poll");
        }
        if let Some(tags) = &self.tags {
            if tags.separator.is_empty() {
                bail!("tags.separator must not be empty");
            }
        }
        if let Some(poll) = &self.poll {
            check_url(&poll.url)?;
            if poll.interval_ms == 0 || poll.silence_timeout_secs == 0 || poll.overall_timeout_secs == 0
            {
                bail!("poll interval and timeouts must be greater than zero");
            }
            if poll.job_field.is_whole_body() {
                bail!("poll.job_field must name at least one field");
            }
        }
        if let Some(enrich) = &self.enrich {
            check_url(&enrich.url)?;
        }
        Ok(())
    }

    /// Render the outbound request for `model` (when the command has models).
    pub fn build_request(&self, model: Option<&str>, vars: &TemplateVars, timeout: Duration) -> RemoteRequest {
        let variant = model.and_then(|m| {
            self.variants
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(m))
                .map(|(_, v)| v)
        });
        let url = variant.and_then(|v| v.url.as_deref()).unwrap_or(&self.url);
        let method = variant.and_then(|v| v.method).unwrap_or(self.method);
        let encoding = variant.and_then(|v| v.encoding).unwrap_or(self.encoding);
        let params = variant
            .and_then(|v| v.params.as_ref())
            .unwrap_or(&self.params);

        let mut request = RemoteRequest::new(render(url, vars, true), method, timeout).with_encoding(encoding);
        for (key, value) in params {
            request = request.with_param(render(key, vars, false), render(value, vars, false));
        }
        for (key, value) in &self.headers {
            request = request.with_header(key.clone(), render(value, vars, false));
        }
        request
    }

    /// Help entry: usage line plus model list.
    pub fn help(&self, prefix: &str) -> String {
        let usage = if self.usage.is_empty() {
            format!("{}{} <prompt>", prefix, self.name)
        } else {
            format!("{}{} {}", prefix, self.name, self.usage)
        };
        let mut out = format!("<code>{}</code>", html_escape::encode_text(&usage));
        if !self.description.is_empty() {
            out.push_str(&format!(" - {}", html_escape::encode_text(&self.description)));
        }
        if !self.models.is_empty() {
            let listed = self
                .models
                .iter()
                .enumerate()
                .map(|(i, m)| {
                    let marker = if self.default_model.as_deref() == Some(m.as_str()) {
                        " (default)"
                    } else {
                        ""
                    };
                    format!("  <code>{}. {}</code>{}", i + 1, html_escape::encode_text(m), marker)
                })
                .collect::<Vec<_>>()
                .join("\n");
            out.push_str("\n<b>Models:</b>\n");
            out.push_str(&listed);
        }
        out
    }
}

impl EnrichDescriptor {
    pub fn build_request(&self, vars: &TemplateVars, timeout: Duration) -> RemoteRequest {
        let mut request =
            RemoteRequest::new(render(&self.url, vars, true), self.method, timeout).with_encoding(self.encoding);
        for (key, value) in &self.params {
            request = request.with_param(render(key, vars, false), render(value, vars, false));
        }
        request
    }
}
