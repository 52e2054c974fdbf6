//! # mcpany-core - Execution pipeline for the mcpany gateway
//!
//! `mcpany-core` implements the tool-invocation pipeline behind the mcpany
//! gateway: a uniform MCP tool surface whose calls dispatch to HTTP/OpenAPI
//! endpoints, gRPC methods, downstream MCP servers, and locally or
//! container-executed command lines.
//!
//! ## Highlights
//!
//! - **Command-execution security**: a quote-context scanner, interpreter
//!   detection and per-context substitution rules decide whether each
//!   user-supplied value may enter an argv template (`safety`).
//! - **HTTP binding**: pre-parsed URL templates, ordered parameter mappings,
//!   secret resolution, mass-assignment filtering and a `//`-preserving path
//!   normalizer (`binder`).
//! - **Policy**: precompiled regex rule chains evaluated over canonicalized
//!   argument bytes (`policy`).
//! - **Registry**: namespaced registration with duplicate detection, fuzzy
//!   lookup suggestions, profile and export filtering (`registry`).
//! - **Adapters**: one per backend kind, wrapped in retry/backoff and
//!   deadline enforcement (`adapters`, `resilience`).
//! - **Redaction**: resolved secrets and sensitive keys never reach callers
//!   or logs (`redact`, `secrets`).
//!
//! The MCP server bootstrap, descriptor loading, pooling implementations and
//! the management plane live outside this crate; the pipeline consumes them
//! through the capability traits in `pool`, `secrets`, `exec`, `transform`
//! and `adapters`.
//!
//! ## Quickstart
//!
//! ```rust,ignore
//! use mcpany_core::{ExecutionRequest, Gateway, ToolRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(ToolRegistry::new());
//!     registry.add_tool(definition, policies).await?;
//!
//!     let gateway = Gateway::new(registry);
//!     let result = gateway
//!         .execute(ExecutionRequest::new("weather.get_weather", br#"{"city":"Lisbon"}"#.to_vec()))
//!         .await?;
//!     println!("{result}");
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod binder;
pub mod definition;
pub mod error;
pub mod exec;
pub mod gateway;
pub mod integrity;
pub mod policy;
pub mod pool;
pub mod redact;
pub mod registry;
pub mod resilience;
pub mod safety;
pub mod schema;
pub mod secrets;
pub mod transform;

pub use definition::{
    parse_call_name, CommandCall, GrpcCall, HttpCall, IntegritySpec, McpCall, OpenApiCall,
    ToolAnnotations, ToolBackend, ToolDefinition,
};
pub use error::{Error, ErrorKind, Result};
pub use gateway::{ExecutionRequest, Gateway};
pub use policy::{CompiledPolicy, PolicyAction, PolicyRule, PolicySpec};
pub use registry::{
    ExportAction, ExportRule, ExportSpec, ProfileSelector, SandboxProber, ServiceAccess,
    ServicePolicy, Tool, ToolRegistry,
};
pub use secrets::{CallSecrets, EnvSecretResolver, SecretResolver, StaticSecretResolver};
