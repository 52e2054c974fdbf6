//! Regex capture extraction for `TEXT` output transforms.
//!
//! Each extraction rule is a regular expression; the captured value is the
//! first capture group when present, the whole match otherwise.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub fn extract(body: &[u8], rules: &std::collections::BTreeMap<String, String>) -> Result<Value> {
    let text = String::from_utf8_lossy(body);

    if rules.is_empty() {
        return Ok(Value::String(text.into_owned()));
    }

    let mut out = Map::new();
    for (field, pattern) in rules {
        let regex = regex::Regex::new(pattern).map_err(|err| Error::TransformFailed {
            reason: format!("invalid capture pattern {pattern:?}: {err}"),
        })?;
        let value = match regex.captures(&text) {
            Some(captures) => {
                let matched = captures
                    .get(1)
                    .or_else(|| captures.get(0))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                Value::String(matched)
            }
            None => Value::Null,
        };
        out.insert(field.clone(), value);
    }
    Ok(super::map_to_value(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn rules(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn captures_first_group() {
        let body = b"version: 1.2.3\nstatus: ok\n";
        let out = extract(
            body,
            &rules(&[("version", r"version: (\S+)"), ("status", r"status: (\S+)")]),
        )
        .unwrap();
        assert_eq!(out["version"], "1.2.3");
        assert_eq!(out["status"], "ok");
    }

    #[test]
    fn whole_match_without_group() {
        let out = extract(b"error E123 occurred", &rules(&[("code", r"E\d+")])).unwrap();
        assert_eq!(out["code"], "E123");
    }

    #[test]
    fn no_match_yields_null() {
        let out = extract(b"nothing here", &rules(&[("code", r"E\d+")])).unwrap();
        assert_eq!(out["code"], Value::Null);
    }

    #[test]
    fn empty_rules_return_text() {
        let out = extract(b"plain body", &BTreeMap::new()).unwrap();
        assert_eq!(out, Value::String("plain body".into()));
    }
}
