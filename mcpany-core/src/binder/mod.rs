//! HTTP parameter binding and URL assembly.
//!
//! A [`HttpBinder`] is built once per tool from the call definition; per-call
//! work is a walk over the pre-parsed template segments. Binding applies the
//! declared mappings in order, resolves secrets, removes undeclared input
//! keys (mass-assignment protection) and decides the request body by the
//! webhook > inline-template > JSON-marshal precedence.

pub mod normalize;
pub mod template;

use std::collections::{BTreeMap, HashMap, HashSet};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};

use crate::definition::{HttpCall, HttpParameter, InputTransform, ParameterLocation};
use crate::error::{Error, Result};
use crate::safety::check_traversal;
use crate::secrets::{CallSecrets, SecretResolver};
use crate::transform::{render_template, WebhookClient};

use normalize::normalize_path;
use template::{Segment, UrlTemplate};

/// RFC 3986 unreserved characters stay literal; everything else is escaped.
/// `.` is never escaped, which is why traversal checks run on raw values.
const VALUE_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// The fully materialized request an HTTP adapter executes.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundHttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

/// Compiled binding state for one HTTP tool, immutable after construction.
#[derive(Debug, Clone)]
pub struct HttpBinder {
    template: UrlTemplate,
    parameters: Vec<HttpParameter>,
    static_headers: BTreeMap<String, String>,
    input_transform: Option<InputTransform>,
    path_names: HashSet<String>,
    query_names: HashSet<String>,
}

impl HttpBinder {
    pub fn new(call: &HttpCall) -> Result<Self> {
        let template = UrlTemplate::parse(&call.url_template)?;
        let path_names: HashSet<String> =
            template.path_placeholders().map(str::to_string).collect();
        let query_names: HashSet<String> =
            template.query_placeholders().map(str::to_string).collect();

        let declared: HashSet<&str> = call
            .parameters
            .iter()
            .map(|p| p.schema_name.as_str())
            .collect();
        for name in path_names.iter().chain(query_names.iter()) {
            if !declared.contains(name.as_str()) {
                return Err(Error::InitializationFailed {
                    name: call.url_template.clone(),
                    reason: format!("placeholder {{{{{name}}}}} has no parameter mapping"),
                });
            }
        }

        Ok(Self {
            template,
            parameters: call.parameters.clone(),
            static_headers: call.headers.clone(),
            input_transform: call.input_transform.clone(),
            path_names,
            query_names,
        })
    }

    pub fn method(&self) -> &str {
        &self.template.method
    }

    /// Decode the raw inputs and drop every key absent from the declared
    /// mapping. Returns the filtered map and whether anything was removed.
    pub fn filter_inputs(&self, raw_inputs: &[u8]) -> Result<(Map<String, Value>, bool)> {
        let mut inputs: Map<String, Value> = if raw_inputs.is_empty() {
            Map::new()
        } else {
            serde_json::from_slice(raw_inputs).map_err(|err| Error::SchemaViolation {
                reason: format!("request arguments are not a JSON object: {err}"),
            })?
        };

        let declared: HashSet<&str> = self
            .parameters
            .iter()
            .map(|p| p.schema_name.as_str())
            .collect();
        let before = inputs.len();
        inputs.retain(|key, _| declared.contains(key.as_str()));
        let removed = inputs.len() != before;
        Ok((inputs, removed))
    }

    pub async fn bind(
        &self,
        raw_inputs: &[u8],
        resolver: &dyn SecretResolver,
        webhook: Option<&dyn WebhookClient>,
        call_secrets: &mut CallSecrets,
    ) -> Result<BoundHttpRequest> {
        let (inputs, modified) = self.filter_inputs(raw_inputs)?;

        let mut substitutions: HashMap<&str, Option<String>> = HashMap::new();
        let mut escape_disabled: HashSet<&str> = HashSet::new();
        let mut headers: Vec<(String, String)> = self
            .static_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for parameter in &self.parameters {
            let name = parameter.schema_name.as_str();

            let value: Option<String> = if let Some(secret) = &parameter.secret {
                let resolved =
                    resolver
                        .resolve(&secret.0)
                        .await
                        .map_err(|err| match err {
                            Error::SecretResolutionFailed { reason, .. } => {
                                Error::SecretResolutionFailed {
                                    parameter: name.to_string(),
                                    reason,
                                }
                            }
                            other => other,
                        })?;
                call_secrets.record(&resolved);
                Some(resolved)
            } else {
                match inputs.get(name) {
                    Some(Value::Null) | None => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                }
            };

            if value.is_none() && parameter.required {
                return Err(Error::MissingParameter {
                    name: name.to_string(),
                });
            }

            // Path escaping leaves `.` intact, so the traversal check must
            // see the raw value.
            if self.path_names.contains(name) {
                if let Some(raw) = &value {
                    check_traversal(name, raw)?;
                }
            }

            if parameter.disable_escape {
                escape_disabled.insert(name);
            }
            if matches!(parameter.location_hint, Some(ParameterLocation::Header)) {
                if let Some(v) = &value {
                    headers.push((name.to_string(), v.clone()));
                }
                substitutions.insert(name, value);
                continue;
            }
            substitutions.insert(name, value);
        }

        let path = self.assemble_path(&substitutions, &escape_disabled);
        let query = self.assemble_query(&substitutions, &escape_disabled);

        let mut url = format!("{}{}", self.template.base, normalize_path(&path));
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        let (body, content_type) = self
            .build_body(raw_inputs, &inputs, modified, webhook)
            .await?;

        Ok(BoundHttpRequest {
            method: self.template.method.clone(),
            url,
            headers,
            body,
            content_type,
        })
    }

    fn assemble_path(
        &self,
        substitutions: &HashMap<&str, Option<String>>,
        escape_disabled: &HashSet<&str>,
    ) -> String {
        let mut out = String::new();
        for segment in &self.template.path {
            match segment {
                Segment::Literal(literal) => out.push_str(literal),
                Segment::Placeholder(name) => {
                    match substitutions.get(name.as_str()).and_then(|v| v.as_deref()) {
                        Some(value) if !value.is_empty() => {
                            if escape_disabled.contains(name.as_str()) {
                                out.push_str(value);
                            } else {
                                out.push_str(&utf8_percent_encode(value, VALUE_ESCAPE).to_string());
                            }
                        }
                        // Optional and missing: the empty string replaces the
                        // placeholder and the preceding slash goes with it.
                        _ => {
                            if out.ends_with('/') {
                                out.pop();
                            }
                        }
                    }
                }
            }
        }
        out
    }

    fn assemble_query(
        &self,
        substitutions: &HashMap<&str, Option<String>>,
        escape_disabled: &HashSet<&str>,
    ) -> String {
        let mut out = String::new();
        for segment in &self.template.query {
            match segment {
                Segment::Literal(literal) => out.push_str(literal),
                Segment::Placeholder(name) => {
                    if let Some(value) = substitutions.get(name.as_str()).and_then(|v| v.as_deref())
                    {
                        if escape_disabled.contains(name.as_str()) {
                            out.push_str(value);
                        } else {
                            out.push_str(&utf8_percent_encode(value, VALUE_ESCAPE).to_string());
                        }
                    }
                }
            }
        }

        // Declared query parameters that are absent from the template append
        // as ordinary pairs.
        for parameter in &self.parameters {
            let name = parameter.schema_name.as_str();
            if self.query_names.contains(name) || self.path_names.contains(name) {
                continue;
            }
            if !matches!(parameter.location_hint, Some(ParameterLocation::Query)) {
                continue;
            }
            if let Some(Some(value)) = substitutions.get(name) {
                if !out.is_empty() {
                    out.push('&');
                }
                out.push_str(name);
                out.push('=');
                out.push_str(&utf8_percent_encode(value, VALUE_ESCAPE).to_string());
            }
        }
        out
    }

    async fn build_body(
        &self,
        raw_inputs: &[u8],
        inputs: &Map<String, Value>,
        modified: bool,
        webhook: Option<&dyn WebhookClient>,
    ) -> Result<(Option<Vec<u8>>, Option<String>)> {
        if !matches!(self.template.method.as_str(), "POST" | "PUT" | "PATCH") {
            return Ok((None, None));
        }

        let transform = self.input_transform.as_ref();

        if let Some(url) = transform.and_then(|t| t.webhook_url.as_deref()) {
            let client = webhook.ok_or_else(|| Error::TransformFailed {
                reason: "input webhook configured but no webhook client is available".into(),
            })?;
            let body = client
                .transform(url, &Value::Object(inputs.clone()))
                .await?;
            let content_type = json_content_type(&body);
            return Ok((Some(body), content_type));
        }

        if let Some(source) = transform.and_then(|t| t.template.as_deref()) {
            let rendered = render_template(source, &Value::Object(inputs.clone()))?;
            let body = rendered.into_bytes();
            let content_type = json_content_type(&body);
            return Ok((Some(body), content_type));
        }

        // Round-trip invariant: callers that pre-serialize get their exact
        // bytes back when nothing was filtered out.
        let body = if !modified && !raw_inputs.is_empty() {
            raw_inputs.to_vec()
        } else {
            serde_json::to_vec(inputs).map_err(|err| Error::SchemaViolation {
                reason: format!("failed to serialize request body: {err}"),
            })?
        };
        Ok((Some(body), Some("application/json".to_string())))
    }
}

fn json_content_type(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()
        .map(|_| "application/json".to_string())
}
