//! Declarative tool definitions.
//!
//! A [`ToolDefinition`] is the immutable binding between an MCP-level tool
//! name plus input schema and a concrete backend invocation. Definitions are
//! deserialized from configuration, verified (see [`crate::integrity`]) and
//! compiled into registry entries; nothing in this module performs I/O.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// MCP behavior hints, matched literally against `"true"`/`"false"` by
/// profile selectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolAnnotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destructive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_world: Option<bool>,
}

/// Content digest attached to a definition. Only `"sha256"` is accepted; any
/// other algorithm is rejected at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegritySpec {
    pub algorithm: String,
    pub hash: String,
}

/// Key handed to the [`crate::secrets::SecretResolver`] capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(pub String);

/// Where a bound value lands in the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterLocation {
    Path,
    Query,
    Body,
    Header,
}

/// One HTTP parameter mapping, applied in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpParameter {
    /// Input key in the tool's JSON schema.
    pub schema_name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_hint: Option<ParameterLocation>,
    /// Insert the raw value without URL escaping. Traversal checks still run
    /// on the raw value.
    #[serde(default)]
    pub disable_escape: bool,
}

/// Input transformer: an inline template rendered over the filtered inputs,
/// or a webhook that receives them and returns the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputTransform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Output parsing strategy for a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformFormat {
    Json,
    Xml,
    Text,
    RawBytes,
    Jq,
}

/// Extraction rules plus an optional post-render template. The extraction
/// map's values are JSONPath / XPath / regex / jq expressions depending on
/// `format`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputTransform {
    pub format: TransformFormat,
    #[serde(default)]
    pub extract: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Declarative cache hint. The store itself lives outside the core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheSpec {
    pub ttl_ms: u64,
}

/// Per-tool retry tuning consumed by the resilience wrapper.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResilienceSpec {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for ResilienceSpec {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// HTTP call definition: `"METHOD scheme://host/path?query"` with `{{name}}`
/// placeholders in path and query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCall {
    pub url_template: String,
    #[serde(default)]
    pub parameters: Vec<HttpParameter>,
    /// Static headers injected on every call (service-level configuration).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transform: Option<InputTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transform: Option<OutputTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resilience: Option<ResilienceSpec>,
}

/// How a command parameter is delivered to the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandBinding {
    /// Substituted into `{{name}}` placeholders in the argv template.
    Argv,
    /// Exported as an environment variable.
    Env { var: String },
}

impl Default for CommandBinding {
    fn default() -> Self {
        Self::Argv
    }
}

/// One command parameter mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandParameter {
    pub schema_name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
    #[serde(default)]
    pub bind: CommandBinding,
    /// Explicit opt-in to substitute into a code-carrying argv position
    /// (the operand of `-c`, `-e`, `--eval` and friends).
    #[serde(default)]
    pub allow_code_substitution: bool,
}

/// Wire protocol between the gateway and the spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandProtocol {
    #[default]
    Streaming,
    Json,
}

/// Container image selection for `ContainerCommand` backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    /// Runtime binary, `docker` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

/// Command call definition: an ordered argv template whose elements may
/// contain `{{name}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandCall {
    pub command: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
    /// Static service environment, applied before parameter-derived vars.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub protocol: CommandProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resilience: Option<ResilienceSpec>,
}

/// gRPC call definition. Descriptor loading happens outside the core; the
/// adapter resolves `method` against an injected descriptor pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcCall {
    /// Fully-qualified method, `package.Service.Method` or
    /// `package.Service/Method`.
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transform: Option<OutputTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resilience: Option<ResilienceSpec>,
}

/// Downstream-MCP call definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpCall {
    /// Tool name on the downstream server.
    pub downstream_tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transform: Option<InputTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transform: Option<OutputTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resilience: Option<ResilienceSpec>,
}

/// OpenAPI operation binding, lowered onto the HTTP pipeline at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenApiCall {
    pub operation_id: String,
    pub method: String,
    pub server_base: String,
    pub path_template: String,
    #[serde(default)]
    pub parameters: Vec<HttpParameter>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transform: Option<OutputTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resilience: Option<ResilienceSpec>,
}

impl OpenApiCall {
    /// Lower the operation onto the HTTP call shape; the HTTP binder and
    /// adapter handle everything from there.
    pub fn to_http_call(&self) -> HttpCall {
        let base = self.server_base.trim_end_matches('/');
        let path = if self.path_template.starts_with('/') {
            self.path_template.clone()
        } else {
            format!("/{}", self.path_template)
        };
        HttpCall {
            url_template: format!("{} {base}{path}", self.method.to_ascii_uppercase()),
            parameters: self.parameters.clone(),
            headers: self.headers.clone(),
            input_transform: None,
            output_transform: self.output_transform.clone(),
            cache: None,
            resilience: self.resilience,
        }
    }
}

/// The backend variants a tool can bind to, dispatched at the adapter
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolBackend {
    Http(HttpCall),
    Grpc(GrpcCall),
    Mcp(McpCall),
    OpenApi(OpenApiCall),
    LocalCommand(CommandCall),
    ContainerCommand(CommandCall),
}

impl ToolBackend {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Grpc(_) => "grpc",
            Self::Mcp(_) => "mcp",
            Self::OpenApi(_) => "open_api",
            Self::LocalCommand(_) => "local_command",
            Self::ContainerCommand(_) => "container_command",
        }
    }

    /// The command payload, for either command variant.
    pub fn as_command(&self) -> Option<&CommandCall> {
        match self {
            Self::LocalCommand(call) | Self::ContainerCommand(call) => Some(call),
            _ => None,
        }
    }
}

/// Immutable description of one tool. Built once, then shared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub annotations: ToolAnnotations,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegritySpec>,
    pub backend: ToolBackend,
}

impl ToolDefinition {
    /// Canonical registry key: `service_id.name` when namespaced, the bare
    /// name otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.service_id {
            Some(service) => format!("{service}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Whether the input schema declares a property with the given name.
    pub fn declares_property(&self, name: &str) -> bool {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.contains_key(name))
            .unwrap_or(false)
    }
}

/// Split a caller-supplied tool name into `(service_id, method)`.
///
/// An optional leading `--` on the method half is stripped for compatibility
/// with CLI-flag style invocations. Empty and `/`-only names are invalid.
pub fn parse_call_name(raw: &str) -> Result<(Option<&str>, &str)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '/') {
        return Err(Error::InvalidToolName {
            name: raw.to_string(),
            reason: "name is empty".into(),
        });
    }

    let (service, method) = match trimmed.split_once('.') {
        Some((service, method)) => (Some(service), method),
        None => (None, trimmed),
    };

    let method = method.strip_prefix("--").unwrap_or(method);
    if method.is_empty() {
        return Err(Error::InvalidToolName {
            name: raw.to_string(),
            reason: "method half is empty".into(),
        });
    }
    if let Some(service) = service {
        if service.is_empty() {
            return Err(Error::InvalidToolName {
                name: raw.to_string(),
                reason: "service half is empty".into(),
            });
        }
    }

    Ok((service, method))
}
