//! Action text parser: `name(arg, ...)` into a [`StructuredAction`].
//!
//! Parsing never panics; failures come back as [`ParseError`] values, or as
//! [`ParsedAction::Error`] through [`parse`].

mod scanner;
pub mod signature;

use once_cell::sync::Lazy;
use regex::Regex;
use tabflow_core_types::{ParsedAction, StructuredAction};
use tracing::warn;

use crate::errors::ParseError;
use signature::ActionSignature;

static ACTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_]*)\s*(.*)$").expect("action header regex")
});

/// Parses action text with no accompanying thought.
pub fn parse(text: &str) -> ParsedAction {
    parse_response("", text)
}

/// Parses the action half of a reasoning response, keeping its thought.
pub fn parse_response(thought: &str, text: &str) -> ParsedAction {
    try_parse_response(thought, text).unwrap_or_else(|err| ParsedAction::Error {
        message: err.to_string(),
    })
}

/// Like [`parse_response`] but keeps the typed error.
pub fn try_parse_response(thought: &str, text: &str) -> Result<ParsedAction, ParseError> {
    let structured_action = parse_action(text)?;
    Ok(ParsedAction::Success {
        thought: thought.to_string(),
        action_text: normalize(text).to_string(),
        structured_action,
    })
}

pub fn parse_action(text: &str) -> Result<StructuredAction, ParseError> {
    let text = normalize(text);
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let captures = ACTION_HEADER
        .captures(text)
        .ok_or_else(|| ParseError::malformed(text, "expected name(arg, ...)"))?;
    let name = captures.get(1).map_or("", |m| m.as_str());
    let rest = captures.get(2).map_or("", |m| m.as_str()).trim();

    let signature =
        signature::lookup(name).ok_or_else(|| ParseError::UnknownAction(name.to_string()))?;

    if rest.is_empty() {
        if signature.terminal {
            return Ok(StructuredAction::new(signature.name));
        }
        return Err(ParseError::malformed(text, "expected `(` after action name"));
    }
    if !rest.starts_with('(') {
        return lenient(signature, text, "expected `(` after action name".to_string());
    }

    let (body, trailing) = match scanner::enclosed(rest) {
        Ok(parts) => parts,
        Err(cause) => return lenient(signature, text, cause),
    };
    if !trailing.trim().is_empty() {
        return lenient(
            signature,
            text,
            format!("unexpected text after `)`: `{}`", trailing.trim()),
        );
    }
    let args = match scanner::split_arguments(body) {
        Ok(args) => args,
        Err(cause) => return lenient(signature, text, cause),
    };

    match bind(signature, &args) {
        Ok(action) => Ok(action),
        Err(err) if signature.terminal => lenient(signature, text, err.to_string()),
        Err(err) => Err(err),
    }
}

/// Terminal actions swallow argument problems; everything else rejects.
fn lenient(
    signature: &ActionSignature,
    text: &str,
    cause: String,
) -> Result<StructuredAction, ParseError> {
    if signature.terminal {
        warn!(action = signature.name, %cause, "ignoring malformed arguments on terminal action");
        Ok(StructuredAction::new(signature.name))
    } else {
        Err(ParseError::malformed(text, cause))
    }
}

fn bind(signature: &ActionSignature, args: &[&str]) -> Result<StructuredAction, ParseError> {
    if args.len() < signature.required() || args.len() > signature.params.len() {
        return Err(ParseError::Arity {
            action: signature.name.to_string(),
            expected: signature.arity_label(),
            found: args.len(),
        });
    }

    let mut action = StructuredAction::new(signature.name);
    for (param, raw) in signature.params.iter().zip(args) {
        let value = scanner::literal(raw, param.ty).ok_or_else(|| ParseError::ArgumentType {
            action: signature.name.to_string(),
            param: param.name.to_string(),
            expected: param.ty.to_string(),
            found: raw.to_string(),
        })?;
        action.args.insert(param.name.to_string(), value);
    }
    Ok(action)
}

/// Trims whitespace, a trailing `;`, and a wrapping pair of backticks.
fn normalize(text: &str) -> &str {
    let text = text.trim();
    let text = text.strip_suffix(';').unwrap_or(text).trim();
    match text
        .strip_prefix('`')
        .and_then(|inner| inner.strip_suffix('`'))
    {
        Some(inner) if !inner.contains('`') => inner.trim(),
        _ => text,
    }
}
