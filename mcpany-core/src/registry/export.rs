//! Export policy: which registered tools are advertised to downstream MCP
//! clients. An independent ordered rule list; first regex match wins, the
//! default action covers the rest.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRule {
    pub pattern: String,
    pub action: ExportAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSpec {
    #[serde(default)]
    pub rules: Vec<ExportRule>,
    pub default_action: ExportAction,
}

#[derive(Debug)]
pub struct ExportPolicy {
    rules: Vec<(Regex, ExportAction)>,
    default_action: ExportAction,
}

impl ExportPolicy {
    pub fn compile(spec: &ExportSpec) -> Result<Self> {
        let mut rules = Vec::with_capacity(spec.rules.len());
        for rule in &spec.rules {
            let regex = Regex::new(&rule.pattern).map_err(|source| Error::PolicyCompileFailed {
                policy: format!("export:{}", rule.pattern),
                source,
            })?;
            rules.push((regex, rule.action));
        }
        Ok(Self {
            rules,
            default_action: spec.default_action,
        })
    }

    pub fn is_exported(&self, qualified_name: &str) -> bool {
        for (regex, action) in &self.rules {
            if regex.is_match(qualified_name) {
                return *action == ExportAction::Allow;
            }
        }
        self.default_action == ExportAction::Allow
    }
}
