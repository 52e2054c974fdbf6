//! Secret resolution capability.
//!
//! Secrets are referenced by key in parameter mappings and resolved through an
//! injected [`SecretResolver`]. Every value resolved during a call is recorded
//! in a per-call [`CallSecrets`] vector so output redaction can scrub it; the
//! vector is dropped when the call returns.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Asynchronous secret backend. Implementations may hit the process
/// environment, a file, or a remote store.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, key: &str) -> Result<String>;
}

/// Resolves secrets from environment variables, `key` being the variable
/// name.
#[derive(Debug, Default)]
pub struct EnvSecretResolver;

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, key: &str) -> Result<String> {
        std::env::var(key).map_err(|_| Error::SecretResolutionFailed {
            parameter: key.to_string(),
            reason: format!("environment variable {key:?} is not set"),
        })
    }
}

/// Fixed in-memory mapping, used by tests and local configurations.
#[derive(Debug, Default)]
pub struct StaticSecretResolver {
    values: HashMap<String, String>,
}

impl StaticSecretResolver {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| Error::SecretResolutionFailed {
                parameter: key.to_string(),
                reason: format!("no secret registered under {key:?}"),
            })
    }
}

/// Per-call accumulator of every resolved secret value. Retained for output
/// redaction, discarded at call return.
#[derive(Debug, Default)]
pub struct CallSecrets {
    values: Vec<String>,
}

impl CallSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resolved value for later redaction. Empty values are ignored,
    /// redacting the empty string would corrupt every buffer.
    pub fn record(&mut self, value: &str) {
        if !value.is_empty() && !self.values.iter().any(|v| v == value) {
            self.values.push(value.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}
