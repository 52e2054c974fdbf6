//! Call policies: ordered rule sets compiled at registration time.
//!
//! Every regex field compiles eagerly; a bad pattern is a registration error,
//! never a per-call one. Within a policy the first matching rule wins; across
//! policies `DENY` and `REQUIRE_APPROVAL` short-circuit while `ALLOW`
//! continues the chain. Arguments are canonicalized (unicode escapes
//! collapsed, duplicate keys resolved last-wins, keys sorted) before any
//! pattern sees them, closing the classic `deny`-style bypass.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyAction {
    Allow,
    Deny,
    RequireApproval,
}

/// One declarative rule. Empty patterns leave the field unconstrained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_pattern: String,
    #[serde(default)]
    pub call_id_pattern: String,
    #[serde(default)]
    pub argument_pattern: String,
    pub action: PolicyAction,
}

/// Declarative policy: ordered rules plus a default action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    pub default_action: PolicyAction,
}

#[derive(Debug)]
struct CompiledRule {
    name: String,
    name_pattern: Option<Regex>,
    call_id_pattern: Option<Regex>,
    argument_pattern: Option<Regex>,
    action: PolicyAction,
}

/// A policy with all patterns precompiled. Immutable and shareable.
#[derive(Debug)]
pub struct CompiledPolicy {
    name: String,
    rules: Vec<CompiledRule>,
    default_action: PolicyAction,
}

fn compile_field(policy: &str, pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|source| Error::PolicyCompileFailed {
            policy: policy.to_string(),
            source,
        })
}

impl CompiledPolicy {
    pub fn compile(spec: &PolicySpec) -> Result<Self> {
        let mut rules = Vec::with_capacity(spec.rules.len());
        for (index, rule) in spec.rules.iter().enumerate() {
            let label = if rule.name.is_empty() {
                format!("{}#{index}", spec.name)
            } else {
                rule.name.clone()
            };
            rules.push(CompiledRule {
                name: label,
                name_pattern: compile_field(&spec.name, &rule.name_pattern)?,
                call_id_pattern: compile_field(&spec.name, &rule.call_id_pattern)?,
                argument_pattern: compile_field(&spec.name, &rule.argument_pattern)?,
                action: rule.action,
            });
        }
        Ok(Self {
            name: spec.name.clone(),
            rules,
            default_action: spec.default_action,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First-match evaluation within this policy. `arguments` is the
    /// canonical serialization, `None` when the request carried none.
    fn evaluate(
        &self,
        tool_name: &str,
        call_id: &str,
        arguments: Option<&str>,
    ) -> (PolicyAction, String) {
        for rule in &self.rules {
            if let Some(pattern) = &rule.name_pattern {
                if !pattern.is_match(tool_name) {
                    continue;
                }
            }
            if let Some(pattern) = &rule.call_id_pattern {
                if !pattern.is_match(call_id) {
                    continue;
                }
            }
            if let Some(pattern) = &rule.argument_pattern {
                // No arguments: argument-constrained rules cannot match.
                match arguments {
                    Some(args) if pattern.is_match(args) => {}
                    _ => continue,
                }
            }
            return (rule.action, rule.name.clone());
        }
        (self.default_action, format!("{}:default", self.name))
    }
}

/// Decode-then-reserialize the raw argument bytes so escaped unicode and
/// duplicate keys cannot smuggle content past the patterns. Duplicate JSON
/// keys resolve to the last value, matching what the adapters will see.
/// Non-JSON payloads match as-is.
pub fn canonicalize_arguments(raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(raw) {
        Ok(value) => Some(value.to_string()),
        Err(_) => Some(String::from_utf8_lossy(raw).into_owned()),
    }
}

/// Evaluate the whole policy chain for a call. `DENY` and
/// `REQUIRE_APPROVAL` short-circuit; a clean pass returns `Ok(())`.
pub fn evaluate_chain(
    policies: &[CompiledPolicy],
    tool_name: &str,
    call_id: &str,
    raw_arguments: &[u8],
) -> Result<()> {
    let canonical = canonicalize_arguments(raw_arguments);
    for policy in policies {
        let (action, rule) = policy.evaluate(tool_name, call_id, canonical.as_deref());
        match action {
            PolicyAction::Allow => {}
            PolicyAction::Deny => {
                tracing::warn!(tool = tool_name, rule = %rule, "call denied by policy");
                return Err(Error::PolicyDenied { rule });
            }
            PolicyAction::RequireApproval => {
                tracing::info!(tool = tool_name, rule = %rule, "call requires approval");
                return Err(Error::ApprovalRequired { rule });
            }
        }
    }
    Ok(())
}
