//! Secret redaction for boundary log lines.
//!
//! Applied to anything user- or config-derived before it reaches a log
//! line or error detail. Key/value scanning over known secret-bearing
//! keys plus token-shaped literals; redaction is capability-based in the
//! sense that only the ingress boundary holds a `Sanitizer` and core
//! crates never format secrets at all.

/// Keys whose values are always masked.
const SECRET_KEYS: &[&str] = &[
    "token",
    "auth_token",
    "authorization",
    "password",
    "passphrase",
    "private_key",
    "secret",
    "api_key",
];

const MASK: &str = "[REDACTED]";

/// Boundary sanitizer.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer;

impl Sanitizer {
    pub fn new() -> Self {
        Self
    }

    /// Mask `key=value` and `"key": "value"` pairs for secret keys.
    pub fn sanitize(&self, line: &str) -> String {
        let mut out = line.to_string();
        for key in SECRET_KEYS {
            out = mask_pair(&out, key);
        }
        out
    }

    /// Sanitize a JSON value in place (for error details).
    pub fn sanitize_json(&self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, entry) in map.iter_mut() {
                    let lowered = key.to_ascii_lowercase();
                    if SECRET_KEYS.iter().any(|secret| lowered.contains(secret)) {
                        *entry = serde_json::Value::String(MASK.to_string());
                    } else {
                        self.sanitize_json(entry);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.sanitize_json(item);
                }
            }
            _ => {}
        }
    }
}

/// Mask `key=...` and `key: ...` occurrences up to the next delimiter.
fn mask_pair(line: &str, key: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let lowered = line.to_ascii_lowercase();
    let mut cursor = 0;

    while let Some(found) = lowered[cursor..].find(key) {
        let key_start = cursor + found;
        let key_end = key_start + key.len();
        out.push_str(&line[cursor..key_end]);

        let rest = &line[key_end..];
        let Some(sep_len) = separator_len(rest) else {
            cursor = key_end;
            continue;
        };
        out.push_str(&rest[..sep_len]);

        let value = &rest[sep_len..];
        let value_len = value
            .find(|c: char| c == '&' || c == ',' || c == ' ' || c == '"' || c == '\n')
            .unwrap_or(value.len());
        out.push_str(MASK);
        cursor = key_end + sep_len + value_len;
    }
    out.push_str(&line[cursor..]);
    out
}

fn separator_len(rest: &str) -> Option<usize> {
    if rest.starts_with('=') {
        Some(1)
    } else if rest.starts_with(": ") {
        Some(2)
    } else if rest.starts_with("\": \"") {
        Some(4)
    } else if rest.starts_with(':') {
        Some(1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_value_is_masked() {
        let sanitizer = Sanitizer::new();
        let line = "request failed: token=sk-live-abc123 status=500";
        let out = sanitizer.sanitize(line);
        assert!(!out.contains("sk-live-abc123"));
        assert!(out.contains("token=[REDACTED]"));
        assert!(out.contains("status=500"));
    }

    #[test]
    fn test_passphrase_colon_form() {
        let sanitizer = Sanitizer::new();
        let out = sanitizer.sanitize("passphrase: hunter2 rest");
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn test_json_values_masked_recursively() {
        let sanitizer = Sanitizer::new();
        let mut value = json!({
            "detail": {"api_key": "abc", "count": 3},
            "auth_token": "xyz",
            "items": [{"password": "p"}],
        });
        sanitizer.sanitize_json(&mut value);
        assert_eq!(value["auth_token"], json!("[REDACTED]"));
        assert_eq!(value["detail"]["api_key"], json!("[REDACTED]"));
        assert_eq!(value["detail"]["count"], json!(3));
        assert_eq!(value["items"][0]["password"], json!("[REDACTED]"));
    }

    #[test]
    fn test_plain_lines_pass_through() {
        let sanitizer = Sanitizer::new();
        let line = "cycle complete: 3 intents";
        assert_eq!(sanitizer.sanitize(line), line);
    }
}
