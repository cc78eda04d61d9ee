pub mod http;
pub mod normalize;
pub mod poll;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::FileHostConfig;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// How `params` travel with the request.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Query,
    Json,
    Form,
}

/// One outbound call, fully rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub url: String,
    pub method: Method,
    pub encoding: Encoding,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl RemoteRequest {
    pub fn new(url: impl Into<String>, method: Method, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method,
            encoding: Encoding::Query,
            params: Vec::new(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Params as a flat JSON object of strings.
    pub fn json_body(&self) -> Value {
        let map: Map<String, Value> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }

    /// The URL a user could paste into a browser to reproduce a query-encoded
    /// call. Other encodings return the bare URL.
    pub fn display_url(&self) -> String {
        if self.encoding != Encoding::Query || self.params.is_empty() {
            return self.url.clone();
        }
        match url::Url::parse_with_params(&self.url, &self.params) {
            Ok(url) => url.to_string(),
            Err(_) => self.url.clone(),
        }
    }
}

/// A successfully received response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Text(String),
}

impl Body {
    /// Many of the APIs we talk to send JSON as `text/html`, so the content
    /// type is ignored and the body itself decides.
    pub fn parse(raw: String) -> Self {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Body::Json(value),
            Err(_) => Body::Text(raw),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Body::Json(Value::String(s)) => s.clone(),
            Body::Json(value) => value.to_string(),
            Body::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    #[error("network error calling {endpoint}: {detail}")]
    Network { endpoint: String, detail: String },
    #[error("{endpoint} answered with HTTP {status}")]
    Http { endpoint: String, status: u16 },
    #[error("malformed response: {detail}")]
    Malformed { detail: String },
    #[error("local file error: {detail}")]
    LocalIo { detail: String },
}

impl RemoteError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        RemoteError::Malformed {
            detail: detail.into(),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Download progress callback: `(bytes_written, total_if_known)`.
pub type Progress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Boundary to every third-party HTTP service. Implementations never panic
/// and never leak transport errors: everything comes back as `RemoteError`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &RemoteRequest) -> RemoteResult<Body>;

    /// Stream `url` into `dest`, returning the number of bytes written.
    async fn download(
        &self,
        url: &str,
        referer: Option<&str>,
        dest: &Path,
        progress: Option<Progress<'_>>,
    ) -> RemoteResult<u64>;

    /// Upload a local file to a public file host and return its link.
    async fn publish(&self, host: &FileHostConfig, path: &Path) -> RemoteResult<String>;
}
