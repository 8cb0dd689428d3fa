//! Security scanning, input sanitization, and secret redaction.
//!
//! The three pattern families below are grounded on the teacher's
//! `vtcode-commons::sanitizer` (same `LazyLock<Regex>` idiom, chained
//! `replace_all`/`is_match` calls) extended from secret-redaction patterns
//! to the injection/XSS/traversal families spec.md §4.4 calls for.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::result::ValidationError;

static SCRIPT_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("valid regex")
});
static JS_PROTOCOL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(javascript|vbscript):").expect("valid regex"));
static EVENT_HANDLER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bon[a-z]+\s*=").expect("valid regex"));
static DANGEROUS_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(iframe|object|embed)\b").expect("valid regex"));

static SQL_UNION_SELECT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bUNION\b.*\bSELECT\b").expect("valid regex"));
static SQL_SELECT_FROM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bSELECT\b.*\bFROM\b").expect("valid regex"));
static SQL_DROP_TABLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDROP\s+TABLE\b").expect("valid regex"));
static SQL_COMMENT_TERMINATOR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'\s*;\s*--").expect("valid regex"));
static SQL_TAUTOLOGY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)'\s*OR\s*'1").expect("valid regex"));

static PATH_TRAVERSAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\./|\.\.\\").expect("valid regex"));
static PATH_TRAVERSAL_ENCODED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)%2e%2e(%2f|%5c|/|\\)").expect("valid regex"));

static OPENAI_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sk-[A-Za-z0-9]{20,}").expect("valid regex"));
static AWS_ACCESS_KEY_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bAKIA[0-9A-Z]{16}\b").expect("valid regex"));
static BEARER_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Bearer\s+[A-Za-z0-9\-_\.=]+").expect("valid regex"));
static SECRET_ASSIGNMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(api[\-_]?key|token|secret|password)\s*[:=]\s*"?[^\s"']{8,}"#)
        .expect("valid regex")
});

fn is_script_or_xss(value: &str) -> bool {
    SCRIPT_TAG_REGEX.is_match(value)
        || JS_PROTOCOL_REGEX.is_match(value)
        || EVENT_HANDLER_REGEX.is_match(value)
        || DANGEROUS_TAG_REGEX.is_match(value)
}

fn is_sql_injection(value: &str) -> bool {
    SQL_UNION_SELECT_REGEX.is_match(value)
        || SQL_SELECT_FROM_REGEX.is_match(value)
        || SQL_DROP_TABLE_REGEX.is_match(value)
        || SQL_COMMENT_TERMINATOR_REGEX.is_match(value)
        || SQL_TAUTOLOGY_REGEX.is_match(value)
}

fn is_path_traversal(value: &str) -> bool {
    PATH_TRAVERSAL_REGEX.is_match(value) || PATH_TRAVERSAL_ENCODED_REGEX.is_match(value)
}

/// Walks the argument tree and collects one `ValidationError` per offending
/// string leaf, with a dotted/bracketed path (`items[2].email`).
pub fn security_validate(args: &Value) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    walk(args, String::new(), &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn walk(value: &Value, path: String, errors: &mut Vec<ValidationError>) {
    match value {
        Value::String(s) => {
            if is_script_or_xss(s) {
                errors.push(ValidationError::new(path.clone(), "contains a script/XSS pattern"));
            }
            if is_sql_injection(s) {
                errors.push(ValidationError::new(path.clone(), "contains a SQL injection pattern"));
            }
            if is_path_traversal(s) {
                errors.push(ValidationError::new(path, "contains a path traversal pattern"));
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                let child_path = format!("{path}[{idx}]");
                walk(item, child_path, errors);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                walk(item, child_path, errors);
            }
        }
        _ => {}
    }
}

/// Strips ASCII control characters (`U+0000`-`U+001F`, `U+007F`) from
/// strings; other JSON value types pass through unchanged.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_control_chars(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, sanitize(v))).collect()),
        other => other,
    }
}

fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(*c as u32, 0x00..=0x1F | 0x7F))
        .collect()
}

/// Redacts secret-bearing substrings (API keys, AWS keys, bearer tokens,
/// `key: value`/`key=value` secret assignments) before a string is retained
/// in a metrics record or log line.
pub fn redact_secrets(input: &str) -> String {
    let redacted = OPENAI_KEY_REGEX.replace_all(input, "[REDACTED]");
    let redacted = AWS_ACCESS_KEY_ID_REGEX.replace_all(&redacted, "[REDACTED]");
    let redacted = BEARER_TOKEN_REGEX.replace_all(&redacted, "Bearer [REDACTED]");
    let redacted = SECRET_ASSIGNMENT_REGEX.replace_all(&redacted, "$1=[REDACTED]");
    redacted.into_owned()
}
