//! Redaction of secret material before anything reaches a log line.
//!
//! Settings and debug payloads may carry credentials. Any structured value
//! logged at any level must pass through [`redact`] first; this is a
//! correctness requirement of credential handling, not a nicety.

use serde_json::Value;

/// Placeholder written over redacted values.
pub const REDACTED: &str = "***";

/// Key fragments whose values are masked, matched case-insensitively.
const SENSITIVE_TERMS: [&str; 7] = [
    "password",
    "secret",
    "key",
    "token",
    "access_key",
    "api_key",
    "credential",
];

/// Recursively mask every value stored under a sensitive-looking key.
///
/// Objects are walked depth-first; arrays are walked element-wise. Scalars at
/// the top level are returned unchanged since there is no key to judge by.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), redact(val))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_TERMS.iter().any(|term| lowered.contains(term))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_sensitive_keys_case_insensitively() {
        let input = json!({
            "endpoint": "https://example.com",
            "Access_Key_Id": "AKIA...",
            "SECRET_ACCESS_KEY": "abc",
            "apiKey": "xyz",
        });
        let out = redact(&input);
        assert_eq!(out["endpoint"], "https://example.com");
        assert_eq!(out["Access_Key_Id"], REDACTED);
        assert_eq!(out["SECRET_ACCESS_KEY"], REDACTED);
        assert_eq!(out["apiKey"], REDACTED);
    }

    #[test]
    fn recurses_through_nested_structures() {
        let input = json!({
            "outer": {
                "password": "hunter2",
                "inner": [{ "auth_token": "t" }, { "plain": "ok" }]
            }
        });
        let out = redact(&input);
        assert_eq!(out["outer"]["password"], REDACTED);
        assert_eq!(out["outer"]["inner"][0]["auth_token"], REDACTED);
        assert_eq!(out["outer"]["inner"][1]["plain"], "ok");
    }

    #[test]
    fn leaves_non_sensitive_values_alone() {
        let input = json!({ "bucket": "downloads", "count": 3 });
        assert_eq!(redact(&input), input);
    }
}
