//! Downstream-MCP transport adapter.
//!
//! The gateway forwards the call to an injected MCP-capable client and
//! translates the returned content blocks. Translation goes through the
//! result's wire-format JSON, so the adapter stays insensitive to SDK model
//! churn: `content[].text` and `structuredContent` are protocol-stable.

use async_trait::async_trait;
use rmcp::model::CallToolResult;
use serde_json::{Map, Value};
use tracing::debug;

use crate::definition::McpCall;
use crate::error::{Error, Result};
use crate::transform::apply_output_transform;

/// Capability over a connected downstream MCP client.
#[async_trait]
pub trait DownstreamMcpClient: Send + Sync {
    async fn call_tool(&self, tool: &str, arguments: Map<String, Value>) -> Result<CallToolResult>;
}

pub struct McpAdapter<C> {
    client: C,
}

impl<C: DownstreamMcpClient> McpAdapter<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        call: &McpCall,
        arguments: Map<String, Value>,
    ) -> Result<Value> {
        debug!(
            tool = tool_name,
            downstream = %call.downstream_tool,
            "forwarding call to downstream MCP server"
        );
        let result = self
            .client
            .call_tool(&call.downstream_tool, arguments)
            .await?;

        let wire = serde_json::to_value(&result).map_err(|err| Error::ResponseParseFailed {
            reason: format!("downstream result failed to serialize: {err}"),
        })?;

        if wire
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(Error::UpstreamStatus {
                status: 500,
                body: collect_text(&wire).unwrap_or_else(|| "downstream tool error".into()),
            });
        }

        // Structured content wins when the downstream server provides it.
        if let Some(structured) = wire.get("structuredContent") {
            if !structured.is_null() {
                return finish(call, structured.clone());
            }
        }

        let translated = match collect_text(&wire) {
            Some(text) => serde_json::from_str::<Value>(&text)
                .unwrap_or_else(|_| Value::String(text)),
            None => wire.get("content").cloned().unwrap_or(Value::Null),
        };
        finish(call, translated)
    }
}

fn finish(call: &McpCall, value: Value) -> Result<Value> {
    match &call.output_transform {
        Some(spec) => {
            let body = serde_json::to_vec(&value).map_err(|err| Error::ResponseParseFailed {
                reason: err.to_string(),
            })?;
            apply_output_transform(spec, &body)
        }
        None => Ok(value),
    }
}

/// Concatenate the text blocks of a wire-format tool result.
fn collect_text(wire: &Value) -> Option<String> {
    let blocks = wire.get("content")?.as_array()?;
    let texts: Vec<&str> = blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;
    use serde_json::json;

    struct FixedClient(CallToolResult);

    #[async_trait]
    impl DownstreamMcpClient for FixedClient {
        async fn call_tool(
            &self,
            _tool: &str,
            _arguments: Map<String, Value>,
        ) -> Result<CallToolResult> {
            Ok(self.0.clone())
        }
    }

    fn call() -> McpCall {
        McpCall {
            downstream_tool: "remote_tool".into(),
            input_transform: None,
            output_transform: None,
            resilience: None,
        }
    }

    #[tokio::test]
    async fn json_text_block_becomes_a_map() {
        let adapter = McpAdapter::new(FixedClient(CallToolResult::success(vec![Content::text(
            r#"{"temp": 21}"#,
        )])));
        let out = adapter
            .execute("svc.t", &call(), Map::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"temp": 21}));
    }

    #[tokio::test]
    async fn plain_text_block_becomes_a_string() {
        let adapter = McpAdapter::new(FixedClient(CallToolResult::success(vec![Content::text(
            "sunny, 21C",
        )])));
        let out = adapter
            .execute("svc.t", &call(), Map::new())
            .await
            .unwrap();
        assert_eq!(out, Value::String("sunny, 21C".into()));
    }

    #[tokio::test]
    async fn error_results_surface_as_upstream_errors() {
        let adapter = McpAdapter::new(FixedClient(CallToolResult::error(vec![Content::text(
            "downstream exploded",
        )])));
        let err = adapter
            .execute("svc.t", &call(), Map::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("downstream exploded"));
    }
}
