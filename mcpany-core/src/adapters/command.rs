//! Local and container command execution.
//!
//! The adapter turns validated inputs into an [`ExecSpec`]: placeholders are
//! substituted only after the injection analyzer accepts every value, the
//! child environment is assembled from a short host allow-list (local) or
//! nothing at all (container) plus service env and parameter bindings, and
//! every buffer is scrubbed of resolved secrets before it leaves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::definition::{CommandBinding, CommandCall, CommandProtocol};
use crate::error::{Error, Result};
use crate::exec::{max_stream_bytes_from_env, ContainerExecutor, ExecSpec, Executor, LocalExecutor};
use crate::redact::{redact_secret_bytes, redact_secrets};
use crate::registry::Tool;
use crate::secrets::{CallSecrets, SecretResolver};

/// Host variables a local command may inherit. Everything else the gateway
/// process carries stays invisible to children.
pub const HOST_ENV_ALLOWLIST: &[&str] = &[
    "PATH", "HOME", "USER", "SHELL", "TMPDIR", "SYSTEMROOT", "WINDIR",
];

/// A fully materialized command invocation, ready to execute (or to return
/// as-is for dry runs).
#[derive(Debug)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub protocol: CommandProtocol,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub in_container: bool,
}

pub struct CommandAdapter {
    local: Arc<dyn Executor>,
    container: Arc<dyn Executor>,
}

impl Default for CommandAdapter {
    fn default() -> Self {
        Self {
            local: Arc::new(LocalExecutor),
            container: Arc::new(ContainerExecutor::new()),
        }
    }
}

impl CommandAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executors(local: Arc<dyn Executor>, container: Arc<dyn Executor>) -> Self {
        Self { local, container }
    }

    /// Validate inputs and materialize the invocation without running it.
    pub async fn prepare(
        &self,
        tool: &Tool,
        call: &CommandCall,
        in_container: bool,
        arguments: &Map<String, Value>,
        resolver: &dyn SecretResolver,
        call_secrets: &mut CallSecrets,
    ) -> Result<PreparedCommand> {
        if let Some(reason) = tool.init_error() {
            return Err(Error::InitializationFailed {
                name: tool.qualified_name().to_string(),
                reason: reason.to_string(),
            });
        }
        let analyzer = tool
            .analyzer()
            .ok_or_else(|| Error::InitializationFailed {
                name: tool.qualified_name().to_string(),
                reason: "command tool has no analyzer".into(),
            })?;

        // Mass-assignment protection: only declared keys survive.
        let declared: HashSet<&str> = call
            .parameters
            .iter()
            .map(|p| p.schema_name.as_str())
            .collect();
        let mut inputs = arguments.clone();
        inputs.retain(|key, _| declared.contains(key.as_str()) || key == "args");

        let mut substitutions: HashMap<String, String> = HashMap::new();
        let mut env: HashMap<String, String> = HashMap::new();

        if !in_container {
            for key in HOST_ENV_ALLOWLIST {
                if let Ok(value) = std::env::var(key) {
                    env.insert(key.to_string(), value);
                }
            }
        }
        for (key, value) in &call.env {
            env.insert(key.clone(), value.clone());
        }

        for parameter in &call.parameters {
            let name = parameter.schema_name.as_str();

            let value: Option<String> = if let Some(secret) = &parameter.secret {
                let resolved = resolver.resolve(&secret.0).await?;
                call_secrets.record(&resolved);
                Some(resolved)
            } else {
                match inputs.get(name) {
                    Some(Value::Null) | None => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                }
            };

            let Some(value) = value else {
                if parameter.required {
                    return Err(Error::MissingParameter {
                        name: name.to_string(),
                    });
                }
                substitutions.insert(name.to_string(), String::new());
                continue;
            };

            match &parameter.bind {
                CommandBinding::Argv => {
                    analyzer.validate_value(name, &value, parameter.allow_code_substitution)?;
                    substitutions.insert(name.to_string(), value);
                }
                CommandBinding::Env { var } => {
                    env.insert(var.clone(), value);
                }
            }
        }

        // The reserved args array rides along only when the input schema
        // declares it, and every element is vetted.
        let mut extra_args: Vec<String> = Vec::new();
        if let Some(args_value) = arguments.get("args") {
            if !tool.definition().declares_property("args") {
                return Err(Error::ArgsParameterNotAllowed);
            }
            let elements = args_value
                .as_array()
                .ok_or_else(|| Error::SchemaViolation {
                    reason: "\"args\" must be an array of strings".into(),
                })?;
            for element in elements {
                let text = element.as_str().ok_or_else(|| Error::SchemaViolation {
                    reason: "\"args\" elements must be strings".into(),
                })?;
                analyzer.validate_args_element(text)?;
                extra_args.push(text.to_string());
            }
        }

        let mut argv = call.command.clone();
        if tool.sed_sandbox() && !argv.is_empty() {
            argv.insert(1, "--sandbox".to_string());
        }

        let mut rendered: Vec<String> = Vec::with_capacity(argv.len() + extra_args.len());
        for element in &argv {
            let mut out = element.clone();
            let had_placeholder = out.contains("{{");
            for (name, value) in &substitutions {
                out = out.replace(&format!("{{{{{name}}}}}"), value);
            }
            // An element that was nothing but an optional, absent
            // placeholder disappears instead of becoming an empty argv slot.
            if out.is_empty() && had_placeholder {
                continue;
            }
            rendered.push(out);
        }
        rendered.extend(extra_args);

        let stdin = match call.protocol {
            CommandProtocol::Json => {
                let mut body = inputs.clone();
                body.remove("args");
                Some(serde_json::to_vec(&Value::Object(body)).map_err(|err| {
                    Error::SchemaViolation {
                        reason: format!("failed to serialize stdin payload: {err}"),
                    }
                })?)
            }
            CommandProtocol::Streaming => None,
        };

        let (program, args) = rendered
            .split_first()
            .map(|(head, tail)| (head.clone(), tail.to_vec()))
            .ok_or_else(|| Error::InitializationFailed {
                name: tool.qualified_name().to_string(),
                reason: "argv template rendered empty".into(),
            })?;

        Ok(PreparedCommand {
            program,
            args,
            env,
            protocol: call.protocol,
            stdin,
            timeout: call.timeout_ms.map(Duration::from_millis),
            in_container,
        })
    }

    /// Run a prepared command and shape the response per the declared
    /// protocol. All buffers are redacted before they cross the boundary.
    pub async fn execute(
        &self,
        tool: &Tool,
        call: &CommandCall,
        prepared: PreparedCommand,
        cancellation: Option<CancellationToken>,
        call_secrets: &CallSecrets,
    ) -> Result<Value> {
        let executor = if prepared.in_container {
            &self.container
        } else {
            &self.local
        };

        let spec = ExecSpec {
            program: prepared.program.clone(),
            args: prepared.args.clone(),
            env: prepared.env,
            working_dir: call.working_dir.clone().map(Into::into),
            timeout: prepared.timeout,
            cancellation,
            max_stream_bytes: max_stream_bytes_from_env(),
            stdin: prepared.stdin,
            container: call.container.clone(),
        };

        debug!(
            tool = tool.qualified_name(),
            program = %prepared.program,
            protocol = ?prepared.protocol,
            "spawning command"
        );
        let outcome = executor.execute(spec).await?;

        match prepared.protocol {
            CommandProtocol::Json => {
                if outcome.timed_out {
                    return Err(Error::DeadlineExceeded {
                        elapsed: prepared.timeout.unwrap_or_default(),
                    });
                }
                let stdout = redact_secret_bytes(&outcome.stdout, call_secrets);
                serde_json::from_str::<Value>(&stdout).map_err(|err| Error::StdioDecodeFailed {
                    reason: err.to_string(),
                    stderr: redact_secret_bytes(&outcome.stderr, call_secrets),
                })
            }
            CommandProtocol::Streaming => {
                let status = if outcome.timed_out {
                    "timeout"
                } else if outcome.exit_code == 0 {
                    "success"
                } else {
                    "error"
                };
                Ok(json!({
                    "command": redact_secrets(&prepared.program, call_secrets),
                    "args": prepared
                        .args
                        .iter()
                        .map(|arg| redact_secrets(arg, call_secrets))
                        .collect::<Vec<_>>(),
                    "stdout": redact_secret_bytes(&outcome.stdout, call_secrets),
                    "stderr": redact_secret_bytes(&outcome.stderr, call_secrets),
                    "combined_output": redact_secret_bytes(&outcome.combined, call_secrets),
                    "start_time": outcome.start_time.to_rfc3339(),
                    "end_time": outcome.end_time.to_rfc3339(),
                    "return_code": outcome.exit_code,
                    "status": status,
                }))
            }
        }
    }
}
