//! Transport adapters, one per backend kind.
//!
//! Each adapter turns validated, bound inputs into a backend invocation and
//! a JSON result. The OpenAPI backend has no adapter of its own: operations
//! lower onto the HTTP call shape at registration and ride the HTTP adapter.

pub mod command;
pub mod grpc;
pub mod http;
pub mod mcp;

pub use command::{CommandAdapter, PreparedCommand, HOST_ENV_ALLOWLIST};
pub use grpc::GrpcAdapter;
pub use http::{Authenticator, BearerAuthenticator, HttpAdapter, ReqwestWebhookClient};
pub use mcp::{DownstreamMcpClient, McpAdapter};
