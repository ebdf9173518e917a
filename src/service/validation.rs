//! Request validation from rule strings (`required,email,max=64`).

use crate::error::{AppError, FieldErrors};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field (JSON name) -> comma-separated rule keywords.
pub type Rules = BTreeMap<String, String>;

const UNIQUE_MARKER: &str = "unique";

/// Removes the `unique` keyword from a rule string. Returns the remaining rule
/// and whether the marker was present.
pub fn strip_unique(rule: &str) -> (String, bool) {
    let mut unique = false;
    let kept: Vec<&str> = rule
        .split(',')
        .map(str::trim)
        .filter(|token| {
            if *token == UNIQUE_MARKER {
                unique = true;
                false
            } else {
                !token.is_empty()
            }
        })
        .collect();
    (kept.join(","), unique)
}

pub struct RequestValidator;

impl RequestValidator {
    /// Validate body against every rule; missing fields fail `required`.
    pub fn validate(body: &Map<String, Value>, rules: &Rules) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();
        for (field, rule) in rules {
            validate_field(field, body.get(field), rule, &mut errors);
        }
        errors.into_result()
    }

    /// Validate only the fields present in body (for updates).
    pub fn validate_partial(body: &Map<String, Value>, rules: &Rules) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();
        for (field, v) in body {
            if let Some(rule) = rules.get(field) {
                validate_field(field, Some(v), rule, &mut errors);
            }
        }
        errors.into_result()
    }
}

fn is_empty_value(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        _ => false,
    }
}

fn parse_rule(rule: &str) -> Vec<(&str, &str)> {
    rule.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.split_once('=').unwrap_or((t, "")))
        .collect()
}

fn validate_field(field: &str, v: Option<&Value>, rule: &str, errors: &mut FieldErrors) {
    let checks = parse_rule(rule);
    let empty = is_empty_value(v);
    if checks.iter().any(|(k, _)| *k == "required") && empty {
        errors.add(field, format!("{} is required", field));
        return;
    }
    // Absent optional values pass every other check.
    let Some(v) = v.filter(|_| !empty) else {
        return;
    };
    for (keyword, param) in checks {
        if let Err(msg) = check(field, v, keyword, param) {
            errors.add(field, msg);
            return;
        }
    }
}

/// Measured size: character count for strings, length for arrays, the value for numbers.
fn measure(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(a) => Some(a.len() as f64),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn bound(field: &str, v: &Value, param: &str, keyword: &str) -> Result<(), String> {
    let limit: f64 = param
        .parse()
        .map_err(|_| format!("{} has an invalid {} rule", field, keyword))?;
    let Some(actual) = measure(v) else {
        return Ok(());
    };
    let unit = if v.is_string() { " characters" } else { "" };
    let ok = match keyword {
        "min" | "gte" => actual >= limit,
        "max" | "lte" => actual <= limit,
        "len" => actual == limit,
        _ => true,
    };
    if ok {
        return Ok(());
    }
    Err(match keyword {
        "min" | "gte" => format!("{} must be at least {}{}", field, param, unit),
        "max" | "lte" => format!("{} must be at most {}{}", field, param, unit),
        _ => format!("{} must be exactly {}{}", field, param, unit),
    })
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !s.chars().any(char::is_whitespace)
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn is_url(s: &str) -> bool {
    match s.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
                && !rest.is_empty()
                && !rest.starts_with('/')
        }
        None => false,
    }
}

fn check(field: &str, v: &Value, keyword: &str, param: &str) -> Result<(), String> {
    match keyword {
        "required" | "omitempty" => Ok(()),
        "min" | "max" | "len" | "gte" | "lte" => bound(field, v, param, keyword),
        "email" => {
            if is_email(&as_text(v)) {
                Ok(())
            } else {
                Err(format!("{} must be a valid email", field))
            }
        }
        "uuid" => uuid::Uuid::parse_str(&as_text(v))
            .map(|_| ())
            .map_err(|_| format!("{} must be a valid UUID", field)),
        "url" => {
            if is_url(&as_text(v)) {
                Ok(())
            } else {
                Err(format!("{} must be a valid URL", field))
            }
        }
        "numeric" => {
            let ok = v.is_number() || v.as_str().is_some_and(|s| s.trim().parse::<f64>().is_ok());
            if ok {
                Ok(())
            } else {
                Err(format!("{} must be numeric", field))
            }
        }
        "alphanum" => {
            let ok = v.as_str().is_some_and(|s| s.chars().all(|c| c.is_ascii_alphanumeric()));
            if ok {
                Ok(())
            } else {
                Err(format!("{} must contain only letters and digits", field))
            }
        }
        "oneof" => {
            let text = as_text(v);
            if param.split_whitespace().any(|allowed| allowed == text) {
                Ok(())
            } else {
                Err(format!("{} must be one of: {}", field, param))
            }
        }
        "regex" => {
            let re = Regex::new(param).map_err(|_| format!("invalid pattern for {}", field))?;
            if re.is_match(&as_text(v)) {
                Ok(())
            } else {
                Err(format!("{} does not match required pattern", field))
            }
        }
        other => {
            tracing::warn!(field, rule = other, "unknown validation rule ignored");
            Ok(())
        }
    }
}
