//! Input and output transformation.
//!
//! Input side: an inline template rendered over the filtered inputs, or a
//! webhook that receives them and returns the request body. Output side: the
//! per-format extraction engines (`JSON`, `XML`, `TEXT`, `RAW_BYTES`, `JQ`)
//! plus an optional post-render template delivered as `{ "result": .. }`.

pub mod jq;
pub mod json;
pub mod text;
pub mod xml;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Map, Value};

use crate::definition::{OutputTransform, TransformFormat};
use crate::error::{Error, Result};

/// Capability for webhook-based input transformation. The HTTP adapter
/// provides a reqwest-backed implementation; tests inject fakes.
#[async_trait]
pub trait WebhookClient: Send + Sync {
    /// POST the filtered inputs to `url` and return the response body, which
    /// becomes the outgoing request body verbatim.
    async fn transform(&self, url: &str, inputs: &Value) -> Result<Vec<u8>>;
}

/// Render an inline template over a JSON context.
pub fn render_template(source: &str, context: &Value) -> Result<String> {
    let env = minijinja::Environment::new();
    env.render_str(source, minijinja::Value::from_serialize(context))
        .map_err(|err| Error::TransformFailed {
            reason: format!("template render failed: {err}"),
        })
}

/// Apply an output transform to a response body.
///
/// Extraction produces a mapping of field name to extracted value; with a
/// post-template configured the mapping feeds the template and the rendered
/// string is delivered as `{ "result": <string> }`.
pub fn apply_output_transform(spec: &OutputTransform, body: &[u8]) -> Result<Value> {
    let extracted = match spec.format {
        TransformFormat::RawBytes => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(body);
            return Ok(json!({ "raw": encoded }));
        }
        TransformFormat::Json => json::extract(body, &spec.extract)?,
        TransformFormat::Xml => xml::extract(body, &spec.extract)?,
        TransformFormat::Text => text::extract(body, &spec.extract)?,
        TransformFormat::Jq => jq::extract(body, &spec.extract)?,
    };

    match &spec.template {
        Some(template) => {
            let rendered = render_template(template, &extracted)?;
            Ok(json!({ "result": rendered }))
        }
        None => Ok(extracted),
    }
}

/// Collapse an extraction result map into a `Value`, shared by the engines.
pub(crate) fn map_to_value(map: Map<String, Value>) -> Value {
    Value::Object(map)
}
