//! Error taxonomy for the execution pipeline.
//!
//! Every failure the gateway can surface carries a stable machine tag
//! (`ErrorKind`) alongside the human-readable message. Transport adapters
//! additionally classify errors as retriable or permanent; the resilience
//! wrapper consults [`Error::is_retriable`] before scheduling another attempt.

use std::time::Duration;

use thiserror::Error;

/// Stable machine tags, one per failure class. Serialized as `snake_case`
/// strings in error payloads returned to MCP callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidToolName,
    ToolNotFound,
    DuplicateTool,
    IntegrityFailed,
    UnsupportedIntegrityAlgorithm,
    PolicyDenied,
    ApprovalRequired,
    PolicyCompileFailed,
    SchemaViolation,
    PathTraversal,
    AbsolutePath,
    DangerousScheme,
    ArgumentInjection,
    ShellInjection,
    RecursiveInjection,
    ArgsParameterNotAllowed,
    TemplateSubstitutionForbidden,
    SecretResolutionFailed,
    UpstreamUnreachable,
    Upstream4xx,
    Upstream5xx,
    Upstream429,
    DeadlineExceeded,
    ResponseTooLarge,
    ResponseParseFailed,
    ExecutorSpawnFailed,
    StdioDecodeFailed,
    TransformFailed,
    MissingParameter,
    InitializationFailed,
}

impl ErrorKind {
    /// The wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidToolName => "invalid_tool_name",
            Self::ToolNotFound => "tool_not_found",
            Self::DuplicateTool => "duplicate_tool",
            Self::IntegrityFailed => "integrity_failed",
            Self::UnsupportedIntegrityAlgorithm => "unsupported_integrity_algorithm",
            Self::PolicyDenied => "policy_denied",
            Self::ApprovalRequired => "approval_required",
            Self::PolicyCompileFailed => "policy_compile_failed",
            Self::SchemaViolation => "schema_violation",
            Self::PathTraversal => "path_traversal",
            Self::AbsolutePath => "absolute_path",
            Self::DangerousScheme => "dangerous_scheme",
            Self::ArgumentInjection => "argument_injection",
            Self::ShellInjection => "shell_injection",
            Self::RecursiveInjection => "recursive_injection",
            Self::ArgsParameterNotAllowed => "args_parameter_not_allowed",
            Self::TemplateSubstitutionForbidden => "template_substitution_forbidden",
            Self::SecretResolutionFailed => "secret_resolution_failed",
            Self::UpstreamUnreachable => "upstream_unreachable",
            Self::Upstream4xx => "upstream_4xx",
            Self::Upstream5xx => "upstream_5xx",
            Self::Upstream429 => "upstream_429",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::ResponseTooLarge => "response_too_large",
            Self::ResponseParseFailed => "response_parse_failed",
            Self::ExecutorSpawnFailed => "executor_spawn_failed",
            Self::StdioDecodeFailed => "stdio_decode_failed",
            Self::TransformFailed => "transform_failed",
            Self::MissingParameter => "missing_parameter",
            Self::InitializationFailed => "initialization_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway error type. Validation and policy errors surface directly; the
/// transport adapters wrap their failures once with the tool name before the
/// error crosses back to the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid tool name {name:?}: {reason}")]
    InvalidToolName { name: String, reason: String },

    #[error("tool {name:?} not found{}", suggestion_suffix(.suggestion))]
    ToolNotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("tool {name:?} is already registered")]
    DuplicateTool { name: String },

    #[error("integrity verification failed for tool {name:?}: expected {expected}, computed {computed}")]
    IntegrityFailed {
        name: String,
        expected: String,
        computed: String,
    },

    #[error("unsupported integrity algorithm {algorithm:?} (only \"sha256\" is accepted)")]
    UnsupportedIntegrityAlgorithm { algorithm: String },

    #[error("call denied by policy rule {rule:?}")]
    PolicyDenied { rule: String },

    #[error("call requires approval (policy rule {rule:?})")]
    ApprovalRequired { rule: String },

    #[error("policy {policy:?} failed to compile: {source}")]
    PolicyCompileFailed {
        policy: String,
        #[source]
        source: regex::Error,
    },

    #[error("input schema violation: {reason}")]
    SchemaViolation { reason: String },

    #[error("path traversal detected in value for {parameter:?}")]
    PathTraversal { parameter: String },

    #[error("absolute path is not allowed in value for {parameter:?}")]
    AbsolutePath { parameter: String },

    #[error("dangerous URL scheme {scheme:?} in value for {parameter:?}")]
    DangerousScheme { parameter: String, scheme: String },

    #[error("argument injection detected in value for {parameter:?}: {reason}")]
    ArgumentInjection { parameter: String, reason: String },

    #[error("security risk: {reason}")]
    ShellInjection { parameter: String, reason: String },

    #[error("recursive injection attempt in value for {parameter:?}")]
    RecursiveInjection { parameter: String },

    #[error("the \"args\" parameter is not declared by the tool input schema")]
    ArgsParameterNotAllowed,

    #[error("security risk: template substitution is not allowed in {position}")]
    TemplateSubstitutionForbidden { position: String },

    #[error("failed to resolve secret for {parameter:?}: {reason}")]
    SecretResolutionFailed { parameter: String, reason: String },

    #[error("upstream unreachable: {reason}")]
    UpstreamUnreachable { reason: String },

    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("deadline exceeded after {:?}", .elapsed)]
    DeadlineExceeded { elapsed: Duration },

    #[error("response of {size} bytes exceeds the configured ceiling of {limit} bytes")]
    ResponseTooLarge { size: u64, limit: u64 },

    #[error("failed to parse upstream response: {reason}")]
    ResponseParseFailed { reason: String },

    #[error("failed to spawn {command:?}: {reason}")]
    ExecutorSpawnFailed { command: String, reason: String },

    #[error("failed to decode JSON from child stdout: {reason}; stderr: {stderr}")]
    StdioDecodeFailed { reason: String, stderr: String },

    #[error("output transform failed: {reason}")]
    TransformFailed { reason: String },

    #[error("required parameter {name:?} is missing")]
    MissingParameter { name: String },

    #[error("tool {name:?} failed to initialize: {reason}")]
    InitializationFailed { name: String, reason: String },

    #[error("tool {tool}: {source}")]
    Tool {
        tool: String,
        #[source]
        source: Box<Error>,
    },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(", did you mean \"{s}\"?"),
        None => String::new(),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidToolName { .. } => ErrorKind::InvalidToolName,
            Self::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            Self::DuplicateTool { .. } => ErrorKind::DuplicateTool,
            Self::IntegrityFailed { .. } => ErrorKind::IntegrityFailed,
            Self::UnsupportedIntegrityAlgorithm { .. } => {
                ErrorKind::UnsupportedIntegrityAlgorithm
            }
            Self::PolicyDenied { .. } => ErrorKind::PolicyDenied,
            Self::ApprovalRequired { .. } => ErrorKind::ApprovalRequired,
            Self::PolicyCompileFailed { .. } => ErrorKind::PolicyCompileFailed,
            Self::SchemaViolation { .. } => ErrorKind::SchemaViolation,
            Self::PathTraversal { .. } => ErrorKind::PathTraversal,
            Self::AbsolutePath { .. } => ErrorKind::AbsolutePath,
            Self::DangerousScheme { .. } => ErrorKind::DangerousScheme,
            Self::ArgumentInjection { .. } => ErrorKind::ArgumentInjection,
            Self::ShellInjection { .. } => ErrorKind::ShellInjection,
            Self::RecursiveInjection { .. } => ErrorKind::RecursiveInjection,
            Self::ArgsParameterNotAllowed => ErrorKind::ArgsParameterNotAllowed,
            Self::TemplateSubstitutionForbidden { .. } => {
                ErrorKind::TemplateSubstitutionForbidden
            }
            Self::SecretResolutionFailed { .. } => ErrorKind::SecretResolutionFailed,
            Self::UpstreamUnreachable { .. } => ErrorKind::UpstreamUnreachable,
            Self::UpstreamStatus { status, .. } => match status {
                429 => ErrorKind::Upstream429,
                400..=499 => ErrorKind::Upstream4xx,
                _ => ErrorKind::Upstream5xx,
            },
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::ResponseTooLarge { .. } => ErrorKind::ResponseTooLarge,
            Self::ResponseParseFailed { .. } => ErrorKind::ResponseParseFailed,
            Self::ExecutorSpawnFailed { .. } => ErrorKind::ExecutorSpawnFailed,
            Self::StdioDecodeFailed { .. } => ErrorKind::StdioDecodeFailed,
            Self::TransformFailed { .. } => ErrorKind::TransformFailed,
            Self::MissingParameter { .. } => ErrorKind::MissingParameter,
            Self::InitializationFailed { .. } => ErrorKind::InitializationFailed,
            Self::Tool { source, .. } => source.kind(),
        }
    }

    /// Whether the resilience wrapper may retry after this failure.
    ///
    /// 429 and 5xx responses, unreachable upstreams and deadline overruns are
    /// transient; everything else (validation, policy, 4xx, parse failures)
    /// is permanent and skips retry entirely.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Tool { source, .. } => source.is_retriable(),
            Self::UpstreamStatus { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::UpstreamUnreachable { .. } => true,
            Self::DeadlineExceeded { .. } => false,
            _ => false,
        }
    }

    /// Wrap a transport failure once with the owning tool's name. Errors that
    /// are already wrapped pass through unchanged.
    pub fn for_tool(self, tool: &str) -> Self {
        match self {
            already @ Self::Tool { .. } => already,
            other => Self::Tool {
                tool: tool.to_string(),
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_wire_tags() {
        let err = Error::PathTraversal {
            parameter: "path".into(),
        };
        assert_eq!(err.kind().as_str(), "path_traversal");

        let err = Error::UpstreamStatus {
            status: 429,
            body: String::new(),
        };
        assert_eq!(err.kind().as_str(), "upstream_429");

        let err = Error::UpstreamStatus {
            status: 404,
            body: String::new(),
        };
        assert_eq!(err.kind().as_str(), "upstream_4xx");
    }

    #[test]
    fn retriability_classification() {
        assert!(
            Error::UpstreamStatus {
                status: 503,
                body: String::new()
            }
            .is_retriable()
        );
        assert!(
            Error::UpstreamStatus {
                status: 429,
                body: String::new()
            }
            .is_retriable()
        );
        assert!(
            !Error::UpstreamStatus {
                status: 403,
                body: String::new()
            }
            .is_retriable()
        );
        assert!(
            !Error::PolicyDenied {
                rule: "deny-all".into()
            }
            .is_retriable()
        );
    }

    #[test]
    fn tool_wrapping_preserves_kind_and_retriability() {
        let inner = Error::UpstreamStatus {
            status: 500,
            body: "boom".into(),
        };
        let wrapped = inner.for_tool("weather.get_weather");
        assert_eq!(wrapped.kind(), ErrorKind::Upstream5xx);
        assert!(wrapped.is_retriable());
        assert!(wrapped.to_string().contains("weather.get_weather"));

        // A second wrap is a no-op.
        let rewrapped = wrapped.for_tool("other.tool");
        assert!(rewrapped.to_string().contains("weather.get_weather"));
        assert!(!rewrapped.to_string().contains("other.tool"));
    }

    #[test]
    fn suggestion_renders_in_message() {
        let err = Error::ToolNotFound {
            name: "weather.get_wether".into(),
            suggestion: Some("weather.get_weather".into()),
        };
        assert!(err.to_string().contains("did you mean \"weather.get_weather\""));
    }
}
