//! Container executor.
//!
//! Rewrites the spec onto a container runtime CLI (`docker run --rm ...`)
//! and delegates to the local executor. The host environment is never
//! forwarded; only the env pairs in the spec become `-e` flags inside the
//! container. Process isolation itself is the runtime's job.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::{ExecOutcome, ExecSpec, Executor, LocalExecutor};

const DEFAULT_RUNTIME: &str = "docker";

#[derive(Debug, Default)]
pub struct ContainerExecutor {
    inner: LocalExecutor,
}

impl ContainerExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    async fn execute(&self, spec: ExecSpec) -> Result<ExecOutcome> {
        let container = spec.container.clone().ok_or_else(|| Error::ExecutorSpawnFailed {
            command: spec.program.clone(),
            reason: "container executor requires an image".into(),
        })?;

        let runtime = container
            .runtime
            .clone()
            .unwrap_or_else(|| DEFAULT_RUNTIME.to_string());

        let mut args = vec!["run".to_string(), "--rm".to_string(), "-i".to_string()];
        if let Some(dir) = &spec.working_dir {
            args.push("-w".into());
            args.push(dir.display().to_string());
        }
        let mut env_keys: Vec<&String> = spec.env.keys().collect();
        env_keys.sort();
        for key in env_keys {
            args.push("-e".into());
            args.push(format!("{key}={}", spec.env[key]));
        }
        args.push(container.image.clone());
        args.push(spec.program.clone());
        args.extend(spec.args.iter().cloned());

        let rewritten = ExecSpec {
            program: runtime,
            args,
            // The runtime process itself runs with an empty environment; the
            // container env travels via -e flags above.
            env: HashMap::new(),
            working_dir: None,
            timeout: spec.timeout,
            cancellation: spec.cancellation.clone(),
            max_stream_bytes: spec.max_stream_bytes,
            stdin: spec.stdin.clone(),
            container: None,
        };

        self.inner.execute(rewritten).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ContainerSpec;

    #[tokio::test]
    async fn missing_image_is_a_spawn_error() {
        let spec = ExecSpec {
            program: "ls".into(),
            ..Default::default()
        };
        let err = ContainerExecutor::new().execute(spec).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "executor_spawn_failed");
    }

    #[tokio::test]
    async fn runtime_override_is_honored() {
        // Point the "runtime" at a shell shim that prints its argv, so the
        // assembled command line is observable without a real container
        // runtime on the host.
        let dir = tempfile::tempdir().unwrap();
        let shim = dir.path().join("fake-runtime");
        std::fs::write(&shim, "#!/bin/sh\nprintf '%s\\n' \"$@\"\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&shim, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut env = HashMap::new();
        env.insert("TOKEN".to_string(), "abc".to_string());
        let spec = ExecSpec {
            program: "convert".into(),
            args: vec!["in.png".into(), "out.png".into()],
            env,
            container: Some(ContainerSpec {
                image: "imagetools:1".into(),
                runtime: Some(shim.display().to_string()),
            }),
            max_stream_bytes: 64 * 1024,
            ..Default::default()
        };

        let outcome = ContainerExecutor::new().execute(spec).await.unwrap();
        let lines: Vec<String> = String::from_utf8_lossy(&outcome.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(
            lines,
            vec![
                "run", "--rm", "-i", "-e", "TOKEN=abc", "imagetools:1", "convert", "in.png",
                "out.png"
            ]
        );
    }
}
