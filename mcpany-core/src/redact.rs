//! Redaction of secrets and sensitive keys from caller-visible output.
//!
//! Two facilities live here. [`redact_secrets`] replaces every occurrence of
//! the secrets collected during a call with [`REDACTED`]; it runs on
//! stdout/stderr/combined buffers before they escape the command adapter.
//! The key-based helpers additionally scrub JSON documents, XML fragments and
//! HTTP headers whose names land in [`SENSITIVE_KEYS`] before log lines or
//! error bodies are emitted.

use serde_json::Value;

use crate::secrets::CallSecrets;

/// Literal marker substituted for every secret occurrence.
pub const REDACTED: &str = "[REDACTED]";

/// The closed list of sensitive key substrings. A JSON object key, XML
/// element/attribute name or HTTP header whose lowercased name contains one
/// of these has its value redacted.
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "api-key",
    "authorization",
    "cookie",
    "credential",
    "private_key",
    "access_key",
    "session",
];

/// Whether a key or header name is sensitive.
pub fn is_sensitive_key(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| lowered.contains(needle))
}

/// Replace every occurrence of every collected secret with [`REDACTED`].
pub fn redact_secrets(input: &str, secrets: &CallSecrets) -> String {
    if secrets.is_empty() {
        return input.to_string();
    }
    let mut output = input.to_string();
    for secret in secrets.values() {
        output = output.replace(secret.as_str(), REDACTED);
    }
    output
}

/// Same, over raw bytes. Non-UTF-8 buffers are scrubbed lossily.
pub fn redact_secret_bytes(input: &[u8], secrets: &CallSecrets) -> String {
    redact_secrets(&String::from_utf8_lossy(input), secrets)
}

/// Recursively redact values under sensitive keys in a JSON document.
pub fn redact_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *entry = Value::String(REDACTED.to_string());
                } else {
                    redact_json(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_json(item);
            }
        }
        _ => {}
    }
}

/// Redact sensitive element content and attribute values in an XML fragment.
///
/// Operates on the event stream rather than a DOM so malformed markup
/// degrades to pass-through instead of erroring inside a logging path.
pub fn redact_xml(input: &str) -> String {
    use quick_xml::events::{BytesText, Event};
    use quick_xml::{Reader, Writer};

    let mut reader = Reader::from_str(input);
    let mut writer = Writer::new(Vec::new());
    let mut redact_text_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                if is_sensitive_key(&name) {
                    redact_text_depth += 1;
                }
                let mut replacement = quick_xml::events::BytesStart::new(name.clone());
                for attr in start.attributes().flatten() {
                    let attr_name = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                    if is_sensitive_key(&attr_name) {
                        replacement.push_attribute((attr_name.as_str(), REDACTED));
                    } else {
                        let value = String::from_utf8_lossy(&attr.value).to_string();
                        replacement.push_attribute((attr_name.as_str(), value.as_str()));
                    }
                }
                if writer.write_event(Event::Start(replacement)).is_err() {
                    return input.to_string();
                }
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).to_string();
                if is_sensitive_key(&name) {
                    redact_text_depth = redact_text_depth.saturating_sub(1);
                }
                if writer.write_event(Event::End(end)).is_err() {
                    return input.to_string();
                }
            }
            Ok(Event::Text(text)) => {
                let event = if redact_text_depth > 0 {
                    Event::Text(BytesText::new(REDACTED))
                } else {
                    Event::Text(text)
                };
                if writer.write_event(event).is_err() {
                    return input.to_string();
                }
            }
            Ok(Event::Eof) => break,
            Ok(other) => {
                if writer.write_event(other).is_err() {
                    return input.to_string();
                }
            }
            Err(_) => return input.to_string(),
        }
    }

    String::from_utf8(writer.into_inner()).unwrap_or_else(|_| input.to_string())
}

/// Redact header values whose names are sensitive; other values pass through.
pub fn redact_header(name: &str, value: &str) -> String {
    if is_sensitive_key(name) {
        REDACTED.to_string()
    } else {
        value.to_string()
    }
}

/// Scrub an upstream 4xx error body before it reaches the caller.
///
/// Parseable JSON is redacted key-wise and re-serialized. Anything else is
/// hidden behind `MCPANY_DEBUG=true` so server stack traces never leak by
/// default.
pub fn redact_error_body(body: &str, debug: bool) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(mut value) => {
            redact_json(&mut value);
            value.to_string()
        }
        Err(_) if debug => body.to_string(),
        Err(_) => "[response body hidden; set MCPANY_DEBUG=true to include it]".to_string(),
    }
}

/// Whether `MCPANY_DEBUG=true` is set in the environment.
pub fn debug_enabled() -> bool {
    std::env::var("MCPANY_DEBUG")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secrets(values: &[&str]) -> CallSecrets {
        let mut s = CallSecrets::new();
        for v in values {
            s.record(v);
        }
        s
    }

    #[test]
    fn secret_occurrences_are_replaced() {
        let s = secrets(&["hunter2"]);
        let out = redact_secrets("SECRET=hunter2 and again hunter2", &s);
        assert_eq!(out, "SECRET=[REDACTED] and again [REDACTED]");
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn empty_secret_set_is_identity() {
        let s = CallSecrets::new();
        assert_eq!(redact_secrets("plain text", &s), "plain text");
    }

    #[test]
    fn json_keys_are_scrubbed_recursively() {
        let mut value = json!({
            "user": "alice",
            "password": "hunter2",
            "nested": { "Api_Key": "abc", "note": "fine" },
            "list": [{ "authorization": "Bearer x" }]
        });
        redact_json(&mut value);
        assert_eq!(value["password"], REDACTED);
        assert_eq!(value["nested"]["Api_Key"], REDACTED);
        assert_eq!(value["list"][0]["authorization"], REDACTED);
        assert_eq!(value["user"], "alice");
        assert_eq!(value["nested"]["note"], "fine");
    }

    #[test]
    fn xml_content_and_attributes_are_scrubbed() {
        let out = redact_xml("<creds><token>abc123</token><item api_key=\"zzz\">ok</item></creds>");
        assert!(!out.contains("abc123"));
        assert!(!out.contains("zzz"));
        assert!(out.contains("ok"));
    }

    #[test]
    fn header_redaction_matches_name_substring() {
        assert_eq!(redact_header("X-Api-Key", "zzz"), REDACTED);
        assert_eq!(redact_header("Content-Type", "application/json"), "application/json");
    }

    #[test]
    fn error_bodies_hide_non_json_without_debug() {
        let hidden = redact_error_body("<html>stack trace</html>", false);
        assert!(!hidden.contains("stack trace"));
        let shown = redact_error_body("<html>stack trace</html>", true);
        assert!(shown.contains("stack trace"));

        let scrubbed = redact_error_body(r#"{"error":"bad","token":"abc"}"#, false);
        assert!(scrubbed.contains("bad"));
        assert!(!scrubbed.contains("abc"));
    }
}
