//! The execution pipeline.
//!
//! Per call, strictly in order: registry lookup, policy evaluation over the
//! raw argument bytes, schema validation, parameter binding, injection
//! validation, backend dispatch under the resilience wrapper, redaction.
//! A dry run stops after binding and returns the materialized request
//! payload without touching any backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adapters::{
    CommandAdapter, DownstreamMcpClient, GrpcAdapter, HttpAdapter, McpAdapter,
};
use crate::definition::{parse_call_name, HttpCall, ToolBackend};
use crate::error::{Error, Result};
use crate::policy::evaluate_chain;
use crate::pool::SharedPool;
use crate::redact::redact_header;
use crate::registry::{Tool, ToolRegistry};
use crate::schema::validate_inputs;
use crate::secrets::{CallSecrets, EnvSecretResolver, SecretResolver};
use crate::transform::{render_template, WebhookClient};

/// Grace window after cancelling a call before the gateway stops waiting for
/// the adapter to wind down.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// One tool call.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub tool_name: String,
    /// Raw argument bytes (JSON). Policy evaluation uses these byte-for-byte
    /// (after canonicalization); body round-tripping reuses them verbatim.
    pub raw_inputs: Vec<u8>,
    /// Decoded arguments; derived from `raw_inputs` when absent.
    pub arguments: Option<Map<String, Value>>,
    pub call_id: String,
    pub dry_run: bool,
}

impl ExecutionRequest {
    pub fn new(tool_name: impl Into<String>, raw_inputs: impl Into<Vec<u8>>) -> Self {
        Self {
            tool_name: tool_name.into(),
            raw_inputs: raw_inputs.into(),
            arguments: None,
            call_id: String::new(),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    /// Decode `raw_inputs` into a map; duplicate keys resolve last-wins,
    /// matching policy canonicalization.
    fn parsed_arguments(&self) -> Result<Map<String, Value>> {
        if let Some(arguments) = &self.arguments {
            return Ok(arguments.clone());
        }
        if self.raw_inputs.is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_slice(&self.raw_inputs).map_err(|err| Error::SchemaViolation {
            reason: format!("arguments are not a JSON object: {err}"),
        })
    }
}

/// The gateway: a registry plus adapters and capabilities.
pub struct Gateway {
    registry: Arc<ToolRegistry>,
    secrets: Arc<dyn SecretResolver>,
    http: HttpAdapter,
    command: CommandAdapter,
    grpc: Option<GrpcAdapter>,
    mcp: Option<McpAdapter<Arc<dyn DownstreamMcpClient>>>,
    webhook: Option<Arc<dyn WebhookClient>>,
    default_timeout: Duration,
}

#[async_trait::async_trait]
impl DownstreamMcpClient for Arc<dyn DownstreamMcpClient> {
    async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<rmcp::model::CallToolResult> {
        (**self).call_tool(tool, arguments).await
    }
}

impl Gateway {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            registry,
            secrets: Arc::new(EnvSecretResolver),
            http: HttpAdapter::new(Arc::new(SharedPool::new(client))),
            command: CommandAdapter::new(),
            grpc: None,
            mcp: None,
            webhook: None,
            default_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_secret_resolver(mut self, resolver: Arc<dyn SecretResolver>) -> Self {
        self.secrets = resolver;
        self
    }

    pub fn with_http_adapter(mut self, adapter: HttpAdapter) -> Self {
        self.http = adapter;
        self
    }

    pub fn with_command_adapter(mut self, adapter: CommandAdapter) -> Self {
        self.command = adapter;
        self
    }

    pub fn with_grpc_adapter(mut self, adapter: GrpcAdapter) -> Self {
        self.grpc = Some(adapter);
        self
    }

    pub fn with_mcp_client(mut self, client: Arc<dyn DownstreamMcpClient>) -> Self {
        self.mcp = Some(McpAdapter::new(client));
        self
    }

    pub fn with_webhook_client(mut self, client: Arc<dyn WebhookClient>) -> Self {
        self.webhook = Some(client);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one call through the pipeline.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<Value> {
        let (service, method) = parse_call_name(&request.tool_name)?;
        let lookup_name = match service {
            Some(service) => format!("{service}.{method}"),
            None => method.to_string(),
        };

        let tool = self.registry.lookup(&lookup_name)?;
        let qualified = tool.qualified_name().to_string();
        info!(tool = %qualified, call_id = %request.call_id, dry_run = request.dry_run, "executing tool call");

        evaluate_chain(
            tool.policies(),
            &qualified,
            &request.call_id,
            &request.raw_inputs,
        )?;

        let arguments = request.parsed_arguments()?;
        validate_inputs(
            &tool.definition().input_schema,
            &Value::Object(arguments.clone()),
        )?;

        let cancellation = CancellationToken::new();
        let timeout = tool
            .definition()
            .backend
            .as_command()
            .and_then(|call| call.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let dispatch = self.dispatch(&tool, &request, arguments, cancellation.clone());
        tokio::pin!(dispatch);

        let result = if request.dry_run {
            dispatch.await
        } else {
            tokio::select! {
                result = &mut dispatch => result,
                _ = tokio::time::sleep(timeout) => {
                    debug!(tool = %qualified, "call deadline reached, cancelling");
                    cancellation.cancel();
                    match tokio::time::timeout(CANCEL_GRACE, &mut dispatch).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::DeadlineExceeded { elapsed: timeout }),
                    }
                }
            }
        };

        result.map_err(|err| err.for_tool(&qualified))
    }

    async fn dispatch(
        &self,
        tool: &Arc<Tool>,
        request: &ExecutionRequest,
        arguments: Map<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<Value> {
        match &tool.definition().backend {
            ToolBackend::Http(call) => self.execute_http(tool, call, request).await,
            ToolBackend::OpenApi(call) => {
                let lowered = call.to_http_call();
                self.execute_http(tool, &lowered, request).await
            }
            ToolBackend::Grpc(call) => {
                if request.dry_run {
                    return Ok(json!({
                        "dry_run": true,
                        "backend": "grpc",
                        "method": call.method,
                        "message": Value::Object(arguments),
                    }));
                }
                let adapter = self.grpc.as_ref().ok_or_else(|| Error::UpstreamUnreachable {
                    reason: "no gRPC channel configured".into(),
                })?;
                adapter
                    .execute(tool.qualified_name(), call, &request.raw_inputs)
                    .await
            }
            ToolBackend::Mcp(call) => {
                let forwarded = match call
                    .input_transform
                    .as_ref()
                    .and_then(|transform| transform.template.as_deref())
                {
                    Some(template) => {
                        let rendered =
                            render_template(template, &Value::Object(arguments.clone()))?;
                        serde_json::from_str::<Map<String, Value>>(&rendered).map_err(|err| {
                            Error::TransformFailed {
                                reason: format!("input template must render a JSON object: {err}"),
                            }
                        })?
                    }
                    None => arguments,
                };
                if request.dry_run {
                    return Ok(json!({
                        "dry_run": true,
                        "backend": "mcp",
                        "downstream_tool": call.downstream_tool,
                        "arguments": Value::Object(forwarded),
                    }));
                }
                let adapter = self.mcp.as_ref().ok_or_else(|| Error::UpstreamUnreachable {
                    reason: "no downstream MCP client configured".into(),
                })?;
                adapter
                    .execute(tool.qualified_name(), call, forwarded)
                    .await
            }
            ToolBackend::LocalCommand(call) => {
                self.execute_command(tool, call, false, request, arguments, cancellation)
                    .await
            }
            ToolBackend::ContainerCommand(call) => {
                self.execute_command(tool, call, true, request, arguments, cancellation)
                    .await
            }
        }
    }

    async fn execute_http(
        &self,
        tool: &Arc<Tool>,
        call: &HttpCall,
        request: &ExecutionRequest,
    ) -> Result<Value> {
        let mut call_secrets = CallSecrets::new();
        let binder = tool.binder().ok_or_else(|| Error::InitializationFailed {
            name: tool.qualified_name().to_string(),
            reason: "HTTP tool has no binder".into(),
        })?;

        let bound = binder
            .bind(
                &request.raw_inputs,
                self.secrets.as_ref(),
                self.webhook.as_deref(),
                &mut call_secrets,
            )
            .await?;

        if request.dry_run {
            let headers: Vec<Value> = bound
                .headers
                .iter()
                .map(|(name, value)| json!({ "name": name, "value": redact_header(name, value) }))
                .collect();
            return Ok(json!({
                "dry_run": true,
                "backend": "http",
                "method": bound.method,
                "url": bound.url,
                "headers": headers,
                "content_type": bound.content_type,
                "body": bound
                    .body
                    .as_deref()
                    .map(|body| String::from_utf8_lossy(body).into_owned()),
            }));
        }

        self.http
            .execute(tool.qualified_name(), call, bound, &mut call_secrets)
            .await
    }

    async fn execute_command(
        &self,
        tool: &Arc<Tool>,
        call: &crate::definition::CommandCall,
        in_container: bool,
        request: &ExecutionRequest,
        arguments: Map<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<Value> {
        let mut call_secrets = CallSecrets::new();
        let prepared = self
            .command
            .prepare(
                tool,
                call,
                in_container,
                &arguments,
                self.secrets.as_ref(),
                &mut call_secrets,
            )
            .await?;

        if request.dry_run {
            let mut env_keys: Vec<&String> = prepared.env.keys().collect();
            env_keys.sort();
            return Ok(json!({
                "dry_run": true,
                "backend": if in_container { "container_command" } else { "local_command" },
                "command": prepared.program,
                "args": prepared.args,
                "env_keys": env_keys,
                "protocol": match prepared.protocol {
                    crate::definition::CommandProtocol::Streaming => "STREAMING",
                    crate::definition::CommandProtocol::Json => "JSON",
                },
            }));
        }

        self.command
            .execute(tool, call, prepared, Some(cancellation), &call_secrets)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{
        CommandCall, CommandParameter, CommandProtocol, ToolAnnotations, ToolDefinition,
    };
    use crate::policy::{PolicyAction, PolicyRule, PolicySpec};
    use crate::registry::SandboxProber;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct YesProber;

    #[async_trait]
    impl SandboxProber for YesProber {
        async fn supports_sandbox(&self, _command: &str) -> bool {
            true
        }
    }

    fn echo_tool() -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            service_id: Some("ops".into()),
            description: "echo a message".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "msg": { "type": "string" } },
                "required": ["msg"]
            }),
            output_schema: None,
            annotations: ToolAnnotations::default(),
            tags: vec![],
            profiles: vec![],
            integrity: None,
            backend: ToolBackend::LocalCommand(CommandCall {
                command: vec!["echo".into(), "{{msg}}".into()],
                parameters: vec![CommandParameter {
                    schema_name: "msg".into(),
                    required: true,
                    secret: None,
                    bind: Default::default(),
                    allow_code_substitution: false,
                }],
                env: BTreeMap::new(),
                working_dir: None,
                timeout_ms: None,
                protocol: CommandProtocol::Streaming,
                container: None,
                resilience: None,
            }),
        }
    }

    async fn gateway_with(definitions: Vec<(ToolDefinition, Vec<PolicySpec>)>) -> Gateway {
        let registry = Arc::new(ToolRegistry::with_prober(Arc::new(YesProber)));
        for (definition, policies) in definitions {
            registry.add_tool(definition, policies).await.unwrap();
        }
        Gateway::new(registry)
    }

    #[tokio::test]
    async fn full_command_pipeline_runs() {
        let gateway = gateway_with(vec![(echo_tool(), vec![])]).await;
        let result = gateway
            .execute(ExecutionRequest::new("ops.echo", br#"{"msg":"hello"}"#.to_vec()))
            .await
            .unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn unknown_tool_reports_suggestion() {
        let gateway = gateway_with(vec![(echo_tool(), vec![])]).await;
        let err = gateway
            .execute(ExecutionRequest::new("ops.ecoh", br#"{"msg":"x"}"#.to_vec()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ops.echo"));
    }

    #[tokio::test]
    async fn leading_dashes_on_method_half_are_stripped() {
        let gateway = gateway_with(vec![(echo_tool(), vec![])]).await;
        let result = gateway
            .execute(ExecutionRequest::new("ops.--echo", br#"{"msg":"hi"}"#.to_vec()))
            .await
            .unwrap();
        assert_eq!(result["status"], "success");
    }

    #[tokio::test]
    async fn policy_denies_before_any_execution() {
        let policy = PolicySpec {
            name: "deny-dangerous".into(),
            rules: vec![PolicyRule {
                name: "no-danger".into(),
                name_pattern: String::new(),
                call_id_pattern: String::new(),
                argument_pattern: ".*\"dangerous\".*".into(),
                action: PolicyAction::Deny,
            }],
            default_action: PolicyAction::Allow,
        };
        let gateway = gateway_with(vec![(echo_tool(), vec![policy])]).await;

        let err = gateway
            .execute(ExecutionRequest::new(
                "ops.echo",
                br#"{"msg":"dangerous"}"#.to_vec(),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "policy_denied");

        let ok = gateway
            .execute(ExecutionRequest::new("ops.echo", br#"{"msg":"benign"}"#.to_vec()))
            .await
            .unwrap();
        assert_eq!(ok["status"], "success");
    }

    #[tokio::test]
    async fn schema_violations_stop_the_call() {
        let gateway = gateway_with(vec![(echo_tool(), vec![])]).await;
        let err = gateway
            .execute(ExecutionRequest::new("ops.echo", br#"{"msg":42}"#.to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "schema_violation");
    }

    #[tokio::test]
    async fn dry_run_never_spawns() {
        let gateway = gateway_with(vec![(echo_tool(), vec![])]).await;
        let result = gateway
            .execute(
                ExecutionRequest::new("ops.echo", br#"{"msg":"hello"}"#.to_vec()).dry_run(),
            )
            .await
            .unwrap();
        assert_eq!(result["dry_run"], true);
        assert_eq!(result["command"], "echo");
        assert_eq!(result["args"], json!(["hello"]));
        assert!(result.get("stdout").is_none());
    }

    #[tokio::test]
    async fn injection_attempts_fail_with_tool_context() {
        let gateway = gateway_with(vec![(echo_tool(), vec![])]).await;
        let err = gateway
            .execute(ExecutionRequest::new(
                "ops.echo",
                br#"{"msg":"hi; rm -rf ."}"#.to_vec(),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "shell_injection");
        assert!(err.to_string().contains("ops.echo"));
    }

    #[tokio::test]
    async fn recursive_injection_is_rejected() {
        let gateway = gateway_with(vec![(echo_tool(), vec![])]).await;
        let err = gateway
            .execute(ExecutionRequest::new(
                "ops.echo",
                br#"{"msg":"{{payload}}"}"#.to_vec(),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "recursive_injection");
    }

    #[tokio::test]
    async fn invalid_names_fail_fast() {
        let gateway = gateway_with(vec![(echo_tool(), vec![])]).await;
        for name in ["", "///", "ops."] {
            let err = gateway
                .execute(ExecutionRequest::new(name, Vec::new()))
                .await
                .unwrap_err();
            assert_eq!(err.kind().as_str(), "invalid_tool_name", "{name:?}");
        }
    }
}
