//! HTTP transport adapter.
//!
//! Clients come from a per-service pool; credentials are injected by an
//! [`Authenticator`] capability and recorded for redaction. Status handling:
//! 429 and 5xx are retriable, other 4xx are permanent. Response bodies are
//! stream-counted against `MCPANY_MAX_HTTP_RESPONSE_SIZE` and overflow is a
//! failure, never a truncation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::binder::BoundHttpRequest;
use crate::definition::HttpCall;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::redact::{debug_enabled, redact_error_body, redact_header};
use crate::resilience::{run_with_retry, RetryPolicy};
use crate::secrets::CallSecrets;
use crate::transform::{apply_output_transform, WebhookClient};

/// Default response-body ceiling: 10 MiB.
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;

/// Credential injection capability. Implementations push headers (or query
/// pairs) onto the outgoing request and must record any secret material for
/// redaction.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn apply(
        &self,
        request: &mut BoundHttpRequest,
        call_secrets: &mut CallSecrets,
    ) -> Result<()>;
}

/// Static bearer-token authenticator.
pub struct BearerAuthenticator {
    token: String,
}

impl BearerAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Authenticator for BearerAuthenticator {
    async fn apply(
        &self,
        request: &mut BoundHttpRequest,
        call_secrets: &mut CallSecrets,
    ) -> Result<()> {
        call_secrets.record(&self.token);
        request
            .headers
            .push(("authorization".into(), format!("Bearer {}", self.token)));
        Ok(())
    }
}

pub struct HttpAdapter {
    pool: Arc<dyn Pool<reqwest::Client>>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl HttpAdapter {
    pub fn new(pool: Arc<dyn Pool<reqwest::Client>>) -> Self {
        Self {
            pool,
            authenticator: None,
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Execute a bound request under the tool's retry policy and parse the
    /// response through the configured output transformer.
    pub async fn execute(
        &self,
        tool_name: &str,
        call: &HttpCall,
        mut request: BoundHttpRequest,
        call_secrets: &mut CallSecrets,
    ) -> Result<Value> {
        if let Some(authenticator) = &self.authenticator {
            authenticator.apply(&mut request, call_secrets).await?;
        }

        for (name, value) in &request.headers {
            debug!(
                tool = tool_name,
                header = name.as_str(),
                value = %redact_header(name, value),
                "outgoing header"
            );
        }

        let policy = call
            .resilience
            .map(RetryPolicy::from)
            .unwrap_or_else(RetryPolicy::none);

        let body = run_with_retry(&policy, tool_name, |attempt| {
            let request = request.clone();
            async move {
                debug!(tool = tool_name, attempt, url = %request.url, "dispatching HTTP request");
                self.attempt(request).await
            }
        })
        .await?;

        match &call.output_transform {
            Some(spec) => apply_output_transform(spec, &body),
            None => Ok(parse_with_string_fallback(&body)),
        }
    }

    async fn attempt(&self, request: BoundHttpRequest) -> Result<Vec<u8>> {
        let client = self.pool.get().await?;

        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            Error::UpstreamUnreachable {
                reason: format!("invalid HTTP method {:?}", request.method),
            }
        })?;

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header("content-type", content_type);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|err| Error::UpstreamUnreachable {
            reason: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let limit = max_response_bytes_from_env();

        if let Some(length) = response.content_length() {
            if length > limit {
                self.pool.put(client);
                return Err(Error::ResponseTooLarge {
                    size: length,
                    limit,
                });
            }
        }

        let mut collected: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| Error::UpstreamUnreachable {
                reason: format!("body read failed: {err}"),
            })?;
            if collected.len() as u64 + chunk.len() as u64 > limit {
                self.pool.put(client);
                return Err(Error::ResponseTooLarge {
                    size: collected.len() as u64 + chunk.len() as u64,
                    limit,
                });
            }
            collected.extend_from_slice(&chunk);
        }
        self.pool.put(client);

        if (200..300).contains(&status) {
            return Ok(collected);
        }

        let raw = String::from_utf8_lossy(&collected);
        let body = if (400..500).contains(&status) {
            redact_error_body(&raw, debug_enabled())
        } else {
            raw.into_owned()
        };
        Err(Error::UpstreamStatus { status, body })
    }
}

/// Webhook transformer backed by the same pooled clients.
pub struct ReqwestWebhookClient {
    pool: Arc<dyn Pool<reqwest::Client>>,
}

impl ReqwestWebhookClient {
    pub fn new(pool: Arc<dyn Pool<reqwest::Client>>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookClient for ReqwestWebhookClient {
    async fn transform(&self, url: &str, inputs: &Value) -> Result<Vec<u8>> {
        let client = self.pool.get().await?;
        let response = client
            .post(url)
            .json(inputs)
            .send()
            .await
            .map_err(|err| Error::TransformFailed {
                reason: format!("webhook call failed: {err}"),
            })?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|err| Error::TransformFailed {
            reason: format!("webhook body read failed: {err}"),
        })?;
        self.pool.put(client);
        if !(200..300).contains(&status) {
            return Err(Error::TransformFailed {
                reason: format!("webhook returned status {status}"),
            });
        }
        Ok(bytes.to_vec())
    }
}

fn parse_with_string_fallback(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn max_response_bytes_from_env() -> u64 {
    std::env::var("MCPANY_MAX_HTTP_RESPONSE_SIZE")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_MAX_RESPONSE_BYTES)
}
