//! Topic canonicalization for the reserved subscription topic.
//!
//! Subscribers watch lifecycle events by subscribing to a URI template
//! that matches the reserved topic; such topics are rewritten to the
//! literal before registration so the hub only ever deals in exact
//! strings.

use std::fmt;

use cinnabar_broker::SUBSCRIPTION_TOPIC;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTemplate;

impl fmt::Display for InvalidTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid URI template")
    }
}

impl std::error::Error for InvalidTemplate {}

/// Rewrite a subscribe topic that template-matches the reserved
/// subscription topic to the literal; leave every other topic untouched.
/// A syntactically invalid template is an error (the handler answers 400).
pub fn canonicalize(topic: &str) -> Result<String, InvalidTemplate> {
    if !topic.contains('{') && !topic.contains('}') {
        return Ok(topic.to_string());
    }
    let matcher = template_regex(topic)?;
    if matcher.is_match(SUBSCRIPTION_TOPIC) {
        Ok(SUBSCRIPTION_TOPIC.to_string())
    } else {
        Ok(topic.to_string())
    }
}

fn template_regex(template: &str) -> Result<Regex, InvalidTemplate> {
    let mut pattern = String::from("^");
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let (literal, tail) = rest.split_at(open);
        if literal.contains('}') {
            return Err(InvalidTemplate);
        }
        pattern.push_str(&regex::escape(literal));
        let Some(close) = tail.find('}') else {
            return Err(InvalidTemplate);
        };
        pattern.push_str(&expression_pattern(&tail[1..close])?);
        rest = &tail[close + 1..];
    }
    if rest.contains('}') {
        return Err(InvalidTemplate);
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');
    Regex::new(&pattern).map_err(|_| InvalidTemplate)
}

fn expression_pattern(expr: &str) -> Result<String, InvalidTemplate> {
    let (operator, vars) = match expr.chars().next() {
        None => return Err(InvalidTemplate),
        Some(op @ ('+' | '#' | '.' | '/' | ';' | '?' | '&')) => (Some(op), &expr[1..]),
        Some(_) => (None, expr),
    };
    if vars.is_empty() {
        return Err(InvalidTemplate);
    }
    for var in vars.split(',') {
        let valid = !var.is_empty()
            && var
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '%' | '*' | ':'));
        if !valid {
            return Err(InvalidTemplate);
        }
    }
    // The hub only needs a predicate, not expansion: approximate each
    // expression with what it can possibly produce.
    Ok(match operator {
        Some('+') | Some('#') => String::from(".*"),
        Some('/') => String::from("(?:/[^/]*)*"),
        Some('.') => String::from(r"(?:\.[^/]*)*"),
        _ => String::from("[^/]*"),
    })
}
