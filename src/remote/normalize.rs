//! Pulls one meaningful value out of heterogeneous JSON bodies.
//!
//! Providers disagree on field names (`response`, `url`, `data[0].downloadUrl`),
//! so each integration declares an ordered list of candidate paths and the
//! first present, non-empty value wins. `null`, blank strings, empty arrays
//! and empty objects count as absent.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::remote::{Body, RemoteError, RemoteResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A dotted accessor such as `data[0].downloadUrl` or `metadata.creator`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        for part in raw.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if !name.is_empty() {
                segments.push(Segment::Key(name.to_string()));
            } else if rest.is_empty() {
                return Err(format!("empty segment in field path '{}'", raw));
            }
            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| format!("unclosed '[' in field path '{}'", raw))?;
                if !rest.starts_with('[') {
                    return Err(format!("unexpected text in field path '{}'", raw));
                }
                let index = rest[1..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("bad index in field path '{}'", raw))?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
            }
        }
        if segments.is_empty() {
            return Err("field path must not be empty".to_string());
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match segment {
                Segment::Key(key) => current.get(key.as_str()),
                Segment::Index(index) => current.get(*index),
            })
    }

    /// Present, non-empty value at this path rendered as text.
    pub fn find_text(&self, value: &Value) -> Option<String> {
        self.lookup(value)
            .filter(|v| is_present(v))
            .map(value_to_text)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&raw)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Ordered candidate paths. An empty list takes the whole body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct Extraction {
    candidates: Vec<FieldPath>,
}

impl Extraction {
    #[cfg(test)]
    pub fn new(paths: &[&str]) -> Result<Self, String> {
        let candidates = paths
            .iter()
            .map(|p| FieldPath::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { candidates })
    }

    pub fn is_whole_body(&self) -> bool {
        self.candidates.is_empty()
    }

    fn describe(&self) -> String {
        self.candidates
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First present candidate, or `Malformed`.
pub fn extract(body: &Body, extraction: &Extraction) -> RemoteResult<Value> {
    if extraction.is_whole_body() {
        return match body {
            Body::Text(text) if !text.trim().is_empty() => Ok(Value::String(text.clone())),
            Body::Json(value) if is_present(value) => Ok(value.clone()),
            _ => Err(RemoteError::malformed("empty response body")),
        };
    }

    let json = match body {
        Body::Json(value) => value,
        Body::Text(_) => {
            return Err(RemoteError::malformed(format!(
                "expected a JSON body with one of [{}]",
                extraction.describe()
            )))
        }
    };

    extraction
        .candidates
        .iter()
        .filter_map(|path| path.lookup(json))
        .find(|value| is_present(value))
        .cloned()
        .ok_or_else(|| {
            RemoteError::malformed(format!("none of [{}] present in response", extraction.describe()))
        })
}

pub fn extract_text(body: &Body, extraction: &Extraction) -> RemoteResult<String> {
    extract(body, extraction).map(|value| value_to_text(&value))
}
