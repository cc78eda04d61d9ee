use rand::seq::SliceRandom;
use rand::Rng;

use crate::commands::descriptor::{CommandDescriptor, ModelStyle, TagOptions};

/// Split `.name@bot rest of text` into `("name", "rest of text")`.
pub fn parse_command<'a>(text: &'a str, prefix: &str) -> Option<(String, &'a str)> {
    let body = text.trim_start().strip_prefix(prefix)?;
    let end = body.find(char::is_whitespace).unwrap_or(body.len());
    let word = &body[..end];
    let name = word.split('@').next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    Some((name.to_lowercase(), body[end..].trim()))
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedArgs {
    pub model: Option<String>,
    pub tags: Vec<String>,
    pub prompt: String,
}

fn first_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], text[end..].trim_start()),
        None => (text, ""),
    }
}

fn random_tags<R: Rng>(options: &TagOptions, rng: &mut R) -> Vec<String> {
    if options.pool.is_empty() {
        return options.default.clone();
    }
    let count = rng.gen_range(3..=4).min(options.pool.len());
    options
        .pool
        .choose_multiple(rng, count)
        .cloned()
        .collect()
}

/// Resolve a positional model given by 1-based number or by name.
fn positional_model(descriptor: &CommandDescriptor, token: &str) -> Option<String> {
    if let Ok(n) = token.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| descriptor.models.get(i))
            .cloned();
    }
    descriptor
        .model_index(token)
        .map(|i| descriptor.models[i].clone())
}

/// Peel leading flags (`-model`, `-t a,b`, `-r`) and a positional model off
/// `rest`. The error is a short reason suitable for a usage message.
pub fn parse_arguments<R: Rng>(descriptor: &CommandDescriptor, rest: &str, rng: &mut R) -> Result<ParsedArgs, String> {
    let mut rest = rest.trim();
    let mut parsed = ParsedArgs::default();
    let mut explicit_tags = None;

    loop {
        let (token, after) = first_token(rest);
        if descriptor.model_style == ModelStyle::Flag && token.len() > 1 && token.starts_with('-') {
            if let Some(i) = descriptor.model_index(&token[1..]) {
                if parsed.model.is_some() {
                    return Err("Only one model flag is allowed.".to_string());
                }
                parsed.model = Some(descriptor.models[i].clone());
                rest = after;
                continue;
            }
        }
        if let Some(options) = &descriptor.tags {
            if token == "-r" {
                explicit_tags = Some(random_tags(options, rng));
                rest = after;
                continue;
            }
            if token == "-t" {
                let (list, after_list) = first_token(after);
                let tags: Vec<String> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(ToString::to_string)
                    .collect();
                if tags.is_empty() {
                    return Err("<code>-t</code> needs a comma-separated list of tags.".to_string());
                }
                explicit_tags = Some(tags);
                rest = after_list;
                continue;
            }
        }
        break;
    }

    if descriptor.model_style == ModelStyle::Positional {
        let (token, after) = first_token(rest);
        match positional_model(descriptor, token) {
            Some(model) => {
                parsed.model = Some(model);
                rest = after;
            }
            None if descriptor.default_model.is_none() => {
                return Err(if token.is_empty() {
                    "Pick a model.".to_string()
                } else {
                    format!(
                        "Unknown model <code>{}</code>.",
                        html_escape::encode_text(token)
                    )
                });
            }
            None => {}
        }
    }

    if parsed.model.is_none() {
        parsed.model = descriptor
            .default_model
            .clone()
            .or_else(|| descriptor.models.first().cloned());
    }
    if let Some(options) = &descriptor.tags {
        parsed.tags = explicit_tags.unwrap_or_else(|| options.default.clone());
    }
    parsed.prompt = rest.to_string();
    Ok(parsed)
}
