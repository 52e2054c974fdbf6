//! Namespaced tool registry.
//!
//! Registration is all-or-nothing: integrity verification, policy
//! compilation and backend preparation all happen before the tool becomes
//! observable, so a half-built tool can never be looked up. The registry is
//! read-mostly; lookups take the shared lock, mutation (`add_tool`,
//! `set_profiles`, `set_export_policy`) the exclusive one.

pub mod export;
pub mod profile;
pub mod suggest;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::binder::HttpBinder;
use crate::definition::{ToolBackend, ToolDefinition};
use crate::error::{Error, Result};
use crate::integrity;
use crate::policy::{CompiledPolicy, PolicySpec};
use crate::safety::CommandAnalyzer;

pub use export::{ExportAction, ExportPolicy, ExportRule, ExportSpec};
pub use profile::{ProfileSelector, ServiceAccess, ServicePolicy};

/// Probe for `sed --sandbox` support. The production prober runs the binary;
/// tests inject stubs so outcomes do not depend on the host's sed flavor.
#[async_trait]
pub trait SandboxProber: Send + Sync {
    async fn supports_sandbox(&self, command: &str) -> bool;
}

/// Runs `<sed> --sandbox --version` with a one second timeout.
#[derive(Debug, Default)]
pub struct SedVersionProber;

#[async_trait]
impl SandboxProber for SedVersionProber {
    async fn supports_sandbox(&self, command: &str) -> bool {
        let mut probe = async_process::Command::new(command);
        probe
            .arg("--sandbox")
            .arg("--version")
            .stdout(async_process::Stdio::null())
            .stderr(async_process::Stdio::null());

        match tokio::time::timeout(Duration::from_secs(1), probe.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(err)) => {
                debug!(command, error = %err, "sed sandbox probe failed to spawn");
                false
            }
            Err(_) => {
                debug!(command, "sed sandbox probe timed out");
                false
            }
        }
    }
}

/// A registered tool: resolved definition, compiled policies and pre-built
/// per-backend state, shared immutably across calls.
#[derive(Debug)]
pub struct Tool {
    definition: Arc<ToolDefinition>,
    qualified_name: String,
    policies: Vec<CompiledPolicy>,
    binder: Option<HttpBinder>,
    analyzer: Option<CommandAnalyzer>,
    sed_sandbox: bool,
    init_error: Option<String>,
    mcp_view: OnceLock<Value>,
}

impl Tool {
    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn policies(&self) -> &[CompiledPolicy] {
        &self.policies
    }

    /// Pre-parsed URL template state for HTTP-backed tools.
    pub fn binder(&self) -> Option<&HttpBinder> {
        self.binder.as_ref()
    }

    /// Injection analyzer for command-backed tools.
    pub fn analyzer(&self) -> Option<&CommandAnalyzer> {
        self.analyzer.as_ref()
    }

    /// Whether invocations must prepend `--sandbox`.
    pub fn sed_sandbox(&self) -> bool {
        self.sed_sandbox
    }

    /// Construction-time failure; such a tool refuses execution.
    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    /// The MCP-facing view, derived lazily exactly once.
    pub fn mcp_view(&self) -> &Value {
        self.mcp_view.get_or_init(|| {
            json!({
                "name": self.qualified_name,
                "description": self.definition.description,
                "inputSchema": self.definition.input_schema,
                "annotations": self.definition.annotations,
            })
        })
    }
}

#[derive(Default)]
struct RegistryState {
    tools: FxHashMap<String, Arc<Tool>>,
    profiles: Vec<ProfileSelector>,
    service_policy: ServicePolicy,
    export_policy: Option<ExportPolicy>,
}

impl RegistryState {
    fn is_visible(&self, tool: &Tool) -> bool {
        if !self.service_policy.allows(&tool.definition) {
            return false;
        }
        self.profiles
            .iter()
            .all(|profile| profile.allows(&tool.definition))
    }
}

/// The registry itself. Cheap to share behind an `Arc`.
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
    prober: Arc<dyn SandboxProber>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_prober(Arc::new(SedVersionProber))
    }

    pub fn with_prober(prober: Arc<dyn SandboxProber>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            prober,
        }
    }

    /// Register a tool. Integrity, policy compilation and backend
    /// preparation run to completion before the tool becomes observable.
    pub async fn add_tool(
        &self,
        definition: ToolDefinition,
        policies: Vec<PolicySpec>,
    ) -> Result<Arc<Tool>> {
        validate_definition_name(&definition)?;
        integrity::verify(&definition)?;

        let mut compiled = Vec::with_capacity(policies.len());
        for spec in &policies {
            compiled.push(CompiledPolicy::compile(spec)?);
        }

        let qualified_name = definition.qualified_name();
        let (binder, analyzer, sed_sandbox, init_error) =
            self.prepare_backend(&definition).await?;

        let tool = Arc::new(Tool {
            definition: Arc::new(definition),
            qualified_name: qualified_name.clone(),
            policies: compiled,
            binder,
            analyzer,
            sed_sandbox,
            init_error,
            mcp_view: OnceLock::new(),
        });

        let mut state = self.state.write();
        if state.tools.contains_key(&qualified_name) {
            return Err(Error::DuplicateTool {
                name: qualified_name,
            });
        }
        state.tools.insert(qualified_name.clone(), Arc::clone(&tool));
        info!(tool = %qualified_name, backend = tool.definition.backend.kind_name(), "tool registered");
        Ok(tool)
    }

    async fn prepare_backend(
        &self,
        definition: &ToolDefinition,
    ) -> Result<(
        Option<HttpBinder>,
        Option<CommandAnalyzer>,
        bool,
        Option<String>,
    )> {
        match &definition.backend {
            ToolBackend::Http(call) => Ok((Some(HttpBinder::new(call)?), None, false, None)),
            ToolBackend::OpenApi(call) => {
                Ok((Some(HttpBinder::new(&call.to_http_call())?), None, false, None))
            }
            ToolBackend::Grpc(_) | ToolBackend::Mcp(_) => Ok((None, None, false, None)),
            ToolBackend::LocalCommand(call) => {
                if call.command.is_empty() {
                    return Err(Error::InitializationFailed {
                        name: definition.qualified_name(),
                        reason: "argv template is empty".into(),
                    });
                }
                let analyzer = CommandAnalyzer::new(&call.command, false);
                let (sed_sandbox, init_error) = if matches!(analyzer.base(), "sed" | "gsed") {
                    if self.prober.supports_sandbox(&call.command[0]).await {
                        (true, None)
                    } else {
                        warn!(
                            tool = %definition.qualified_name(),
                            "sed does not support --sandbox; marking tool initialization-failed"
                        );
                        (
                            false,
                            Some("sed binary does not support --sandbox".to_string()),
                        )
                    }
                } else {
                    (false, None)
                };
                Ok((None, Some(analyzer), sed_sandbox, init_error))
            }
            ToolBackend::ContainerCommand(call) => {
                if call.command.is_empty() {
                    return Err(Error::InitializationFailed {
                        name: definition.qualified_name(),
                        reason: "argv template is empty".into(),
                    });
                }
                if call.container.is_none() {
                    return Err(Error::InitializationFailed {
                        name: definition.qualified_name(),
                        reason: "container backend requires an image".into(),
                    });
                }
                // Sandbox probing is skipped: the in-container sed is not the
                // host's, and the executor provides the isolation boundary.
                Ok((None, Some(CommandAnalyzer::new(&call.command, true)), false, None))
            }
        }
    }

    /// Exact-key lookup, subject to profile and service visibility.
    pub fn get_tool(&self, name: &str) -> Option<Arc<Tool>> {
        let state = self.state.read();
        state
            .tools
            .get(name)
            .filter(|tool| state.is_visible(tool))
            .cloned()
    }

    /// Lookup with a typo suggestion on miss.
    pub fn lookup(&self, name: &str) -> Result<Arc<Tool>> {
        if let Some(tool) = self.get_tool(name) {
            return Ok(tool);
        }
        let state = self.state.read();
        let suggestion = suggest::suggest(
            name,
            state
                .tools
                .values()
                .filter(|tool| state.is_visible(tool))
                .map(|tool| tool.qualified_name.as_str()),
        );
        Err(Error::ToolNotFound {
            name: name.to_string(),
            suggestion,
        })
    }

    pub fn remove_tool(&self, name: &str) -> Option<Arc<Tool>> {
        self.state.write().tools.remove(name)
    }

    pub fn set_profiles(&self, profiles: Vec<ProfileSelector>) {
        self.state.write().profiles = profiles;
    }

    pub fn set_service_policy(&self, policy: ServicePolicy) {
        self.state.write().service_policy = policy;
    }

    pub fn set_export_policy(&self, spec: Option<&ExportSpec>) -> Result<()> {
        let compiled = spec.map(ExportPolicy::compile).transpose()?;
        self.state.write().export_policy = compiled;
        Ok(())
    }

    /// Tools visible under the active profiles and service policy.
    pub fn list_tools(&self) -> Vec<Arc<Tool>> {
        let state = self.state.read();
        let mut tools: Vec<Arc<Tool>> = state
            .tools
            .values()
            .filter(|tool| state.is_visible(tool))
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        tools
    }

    /// Visible tools that the export policy advertises downstream.
    pub fn exported_tools(&self) -> Vec<Arc<Tool>> {
        let state = self.state.read();
        let mut tools: Vec<Arc<Tool>> = state
            .tools
            .values()
            .filter(|tool| state.is_visible(tool))
            .filter(|tool| {
                state
                    .export_policy
                    .as_ref()
                    .map(|policy| policy.is_exported(&tool.qualified_name))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        tools
    }
}

fn validate_definition_name(definition: &ToolDefinition) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidToolName {
        name: definition.qualified_name(),
        reason: reason.to_string(),
    };

    if definition.name.trim().is_empty() || definition.name.chars().all(|c| c == '/') {
        return Err(invalid("tool name is empty"));
    }
    if definition.name.contains('.') {
        return Err(invalid("tool name may not contain '.'"));
    }
    if let Some(service) = &definition.service_id {
        if service.trim().is_empty() {
            return Err(invalid("service id is empty"));
        }
        if service.contains('.') {
            return Err(invalid("service id may not contain '.'"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{GrpcCall, IntegritySpec, ToolAnnotations};
    use crate::policy::{PolicyAction, PolicyRule};
    use std::collections::BTreeMap;

    struct StubProber(bool);

    #[async_trait]
    impl SandboxProber for StubProber {
        async fn supports_sandbox(&self, _command: &str) -> bool {
            self.0
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::with_prober(Arc::new(StubProber(true)))
    }

    fn grpc_tool(service: Option<&str>, name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            service_id: service.map(str::to_string),
            description: format!("{name} tool"),
            input_schema: json!({"type": "object", "properties": {}}),
            output_schema: None,
            annotations: ToolAnnotations::default(),
            tags: vec![],
            profiles: vec![],
            integrity: None,
            backend: ToolBackend::Grpc(GrpcCall {
                method: "pkg.Svc.Method".into(),
                timeout_ms: None,
                output_transform: None,
                resilience: None,
            }),
        }
    }

    fn command_tool(name: &str, argv: &[&str]) -> ToolDefinition {
        let mut def = grpc_tool(Some("ops"), name);
        def.backend = ToolBackend::LocalCommand(crate::definition::CommandCall {
            command: argv.iter().map(|s| s.to_string()).collect(),
            parameters: vec![],
            env: BTreeMap::new(),
            working_dir: None,
            timeout_ms: None,
            protocol: Default::default(),
            container: None,
            resilience: None,
        });
        def
    }

    #[tokio::test]
    async fn namespaced_tools_require_qualified_lookup() {
        let registry = registry();
        registry
            .add_tool(grpc_tool(Some("svc"), "t"), vec![])
            .await
            .unwrap();

        assert!(registry.get_tool("t").is_none());
        assert!(registry.get_tool("svc.t").is_some());
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let registry = registry();
        registry
            .add_tool(grpc_tool(Some("svc"), "t"), vec![])
            .await
            .unwrap();
        let err = registry
            .add_tool(grpc_tool(Some("svc"), "t"), vec![])
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "duplicate_tool");
    }

    #[tokio::test]
    async fn lookup_miss_suggests_close_names() {
        let registry = registry();
        registry
            .add_tool(grpc_tool(Some("weather"), "get_weather"), vec![])
            .await
            .unwrap();

        let err = registry.lookup("weather.get_wether").unwrap_err();
        assert!(err.to_string().contains("weather.get_weather"));

        let err = registry.lookup("get_weather").unwrap_err();
        assert!(err.to_string().contains("weather.get_weather"));
    }

    #[tokio::test]
    async fn failed_policy_compile_keeps_tool_unobservable() {
        let registry = registry();
        let spec = PolicySpec {
            name: "broken".into(),
            rules: vec![PolicyRule {
                name: String::new(),
                name_pattern: "(".into(),
                call_id_pattern: String::new(),
                argument_pattern: String::new(),
                action: PolicyAction::Deny,
            }],
            default_action: PolicyAction::Allow,
        };
        let err = registry
            .add_tool(grpc_tool(Some("svc"), "t"), vec![spec])
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "policy_compile_failed");
        assert!(registry.get_tool("svc.t").is_none());
    }

    #[tokio::test]
    async fn unsupported_integrity_algorithm_fails_registration() {
        let registry = registry();
        let mut def = grpc_tool(Some("svc"), "t");
        def.integrity = Some(IntegritySpec {
            algorithm: "md5".into(),
            hash: "00".repeat(16),
        });
        let err = registry.add_tool(def, vec![]).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "unsupported_integrity_algorithm");
        assert!(registry.get_tool("svc.t").is_none());
    }

    #[tokio::test]
    async fn integrity_round_trip_registers() {
        let registry = registry();
        let mut def = grpc_tool(Some("svc"), "t");
        let hash = crate::integrity::compute_digest(&def).unwrap();
        def.integrity = Some(IntegritySpec {
            algorithm: "sha256".into(),
            hash,
        });
        registry.add_tool(def, vec![]).await.unwrap();
        assert!(registry.get_tool("svc.t").is_some());
    }

    #[tokio::test]
    async fn profiles_filter_visibility() {
        let registry = registry();
        let mut read_tool = grpc_tool(Some("svc"), "reader");
        read_tool.tags = vec!["read".into()];
        read_tool.annotations.read_only = Some(true);
        registry.add_tool(read_tool, vec![]).await.unwrap();

        let mut write_tool = grpc_tool(Some("svc"), "writer");
        write_tool.tags = vec!["write".into()];
        registry.add_tool(write_tool, vec![]).await.unwrap();

        registry.set_profiles(vec![ProfileSelector {
            id: "readers".into(),
            tags: vec!["read".into()],
            annotations: BTreeMap::new(),
        }]);

        assert!(registry.get_tool("svc.reader").is_some());
        assert!(registry.get_tool("svc.writer").is_none());
        assert_eq!(registry.list_tools().len(), 1);

        registry.set_profiles(vec![]);
        assert_eq!(registry.list_tools().len(), 2);
    }

    #[tokio::test]
    async fn service_policy_disables_and_allowlists() {
        let registry = registry();
        registry
            .add_tool(grpc_tool(Some("svc"), "a"), vec![])
            .await
            .unwrap();
        registry
            .add_tool(grpc_tool(Some("svc"), "b"), vec![])
            .await
            .unwrap();

        let mut policy = ServicePolicy::default();
        let mut allowlist = std::collections::HashSet::new();
        allowlist.insert("a".to_string());
        policy.services.insert(
            "svc".into(),
            ServiceAccess::Enabled {
                allowlist: Some(allowlist),
            },
        );
        registry.set_service_policy(policy);

        assert!(registry.get_tool("svc.a").is_some());
        assert!(registry.get_tool("svc.b").is_none());
    }

    #[tokio::test]
    async fn export_policy_filters_advertised_tools() {
        let registry = registry();
        registry
            .add_tool(grpc_tool(Some("internal"), "debug"), vec![])
            .await
            .unwrap();
        registry
            .add_tool(grpc_tool(Some("weather"), "get_weather"), vec![])
            .await
            .unwrap();

        registry
            .set_export_policy(Some(&ExportSpec {
                rules: vec![ExportRule {
                    pattern: "^internal\\.".into(),
                    action: ExportAction::Deny,
                }],
                default_action: ExportAction::Allow,
            }))
            .unwrap();

        let exported: Vec<String> = registry
            .exported_tools()
            .iter()
            .map(|tool| tool.qualified_name().to_string())
            .collect();
        assert_eq!(exported, vec!["weather.get_weather".to_string()]);
        // Export filtering does not hide the tool from direct lookup.
        assert!(registry.get_tool("internal.debug").is_some());
    }

    #[tokio::test]
    async fn sed_tools_probe_for_sandbox_support() {
        let supported = ToolRegistry::with_prober(Arc::new(StubProber(true)));
        let tool = supported
            .add_tool(command_tool("replace", &["sed", "s/a/b/", "{{file}}"]), vec![])
            .await
            .unwrap();
        assert!(tool.sed_sandbox());
        assert!(tool.init_error().is_none());

        let unsupported = ToolRegistry::with_prober(Arc::new(StubProber(false)));
        let tool = unsupported
            .add_tool(command_tool("replace", &["sed", "s/a/b/", "{{file}}"]), vec![])
            .await
            .unwrap();
        assert!(!tool.sed_sandbox());
        assert!(tool.init_error().is_some());
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let registry = registry();
        let mut def = grpc_tool(Some("svc"), "t");
        def.name = String::new();
        assert!(registry.add_tool(def, vec![]).await.is_err());

        let mut def = grpc_tool(Some("svc"), "t");
        def.name = "///".into();
        assert!(registry.add_tool(def, vec![]).await.is_err());

        let mut def = grpc_tool(Some("svc"), "t");
        def.name = "a.b".into();
        assert!(registry.add_tool(def, vec![]).await.is_err());
    }

    #[tokio::test]
    async fn mcp_view_is_lazily_derived() {
        let registry = registry();
        let tool = registry
            .add_tool(grpc_tool(Some("svc"), "t"), vec![])
            .await
            .unwrap();
        let view = tool.mcp_view();
        assert_eq!(view["name"], "svc.t");
        assert!(view["inputSchema"].is_object());
        // Second call returns the same cached value.
        assert!(std::ptr::eq(view, tool.mcp_view()));
    }
}
