//! JSONPath extraction for `JSON` output transforms.

use serde_json::{Map, Value};
use serde_json_path::JsonPath;

use crate::error::{Error, Result};

/// Parse `body` as JSON and apply the extraction rules. An empty rule set
/// returns the whole document. A path matching exactly one node yields that
/// node; multiple matches yield an array; no match yields `null`.
pub fn extract(body: &[u8], rules: &std::collections::BTreeMap<String, String>) -> Result<Value> {
    let document: Value = serde_json::from_slice(body).map_err(|err| Error::ResponseParseFailed {
        reason: format!("response is not valid JSON: {err}"),
    })?;

    if rules.is_empty() {
        return Ok(document);
    }

    let mut out = Map::new();
    for (field, expression) in rules {
        let path = JsonPath::parse(expression).map_err(|err| Error::TransformFailed {
            reason: format!("invalid JSONPath {expression:?}: {err}"),
        })?;
        let nodes: Vec<&Value> = path.query(&document).all();
        let value = match nodes.len() {
            0 => Value::Null,
            1 => nodes[0].clone(),
            _ => Value::Array(nodes.into_iter().cloned().collect()),
        };
        out.insert(field.clone(), value);
    }
    Ok(super::map_to_value(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn rules(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn extracts_single_and_multiple_nodes() {
        let body = br#"{"items":[{"id":1},{"id":2}],"total":2}"#;
        let out = extract(
            body,
            &rules(&[("total", "$.total"), ("ids", "$.items[*].id")]),
        )
        .unwrap();
        assert_eq!(out["total"], json!(2));
        assert_eq!(out["ids"], json!([1, 2]));
    }

    #[test]
    fn missing_path_yields_null() {
        let out = extract(br#"{"a":1}"#, &rules(&[("b", "$.b")])).unwrap();
        assert_eq!(out["b"], Value::Null);
    }

    #[test]
    fn empty_rules_return_whole_document() {
        let out = extract(br#"{"a":1}"#, &BTreeMap::new()).unwrap();
        assert_eq!(out, json!({"a":1}));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let err = extract(b"not json", &BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind().as_str(), "response_parse_failed");
    }
}
