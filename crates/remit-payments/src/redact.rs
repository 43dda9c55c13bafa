//! Log Redaction
//!
//! Masks personal data in gateway request bodies before they reach the logs.
//! The body actually sent to the gateway is never passed through here.

use serde_json::Value;

const MASK: &str = "****";
const EMAIL_VISIBLE_CHARS: usize = 3;
const NUMBER_VISIBLE_DIGITS: usize = 4;

/// Keys whose string values are account or phone numbers
const NUMBER_KEYS: &[&str] = &[
    "account_number",
    "mobile_number",
    "phone_number",
    "wallet_number",
    "recipient_mobile",
];

/// `abcdef@example.com` → `abc****@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let visible: String = local.chars().take(EMAIL_VISIBLE_CHARS).collect();
            format!("{visible}{MASK}@{domain}")
        }
        None => MASK.to_string(),
    }
}

/// `09123456789` → `****6789`
pub fn mask_number(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(char::is_ascii_digit).collect();
    if digits.len() <= NUMBER_VISIBLE_DIGITS {
        return MASK.to_string();
    }
    let tail: String = digits[digits.len() - NUMBER_VISIBLE_DIGITS..].iter().collect();
    format!("{MASK}{tail}")
}

/// Copy of `body` with emails and account/phone numbers masked
pub fn redact_json(body: &Value) -> Value {
    match body {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), redact_field(key, value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        Value::String(s) if looks_like_email(s) => Value::String(mask_email(s)),
        other => other.clone(),
    }
}

fn redact_field(key: &str, value: &Value) -> Value {
    match value {
        Value::String(s) if NUMBER_KEYS.contains(&key) => Value::String(mask_number(s)),
        Value::String(s) if key.contains("email") => Value::String(mask_email(s)),
        other => redact_json(other),
    }
}

fn looks_like_email(s: &str) -> bool {
    s.split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
}

/// Serialize a redacted copy for logging
pub fn redacted_string<T: serde::Serialize>(body: &T) -> String {
    serde_json::to_value(body)
        .map(|v| redact_json(&v).to_string())
        .unwrap_or_else(|_| "<unserializable>".into())
}
