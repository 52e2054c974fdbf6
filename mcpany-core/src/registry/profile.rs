//! Profile-based tool visibility.
//!
//! A profile selects tools by tag intersection and literal annotation
//! equality. A tool is visible iff it matches every active profile; with no
//! active profiles everything is visible. Per-service allow/block lists layer
//! on top.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::definition::ToolDefinition;

/// One active profile's selection criteria.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileSelector {
    pub id: String,
    /// At least one tag must intersect the tool's tags; empty means no tag
    /// constraint.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Annotation name to `"true"`/`"false"`, matched literally. An absent
    /// annotation on the tool reads as `"false"`.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ProfileSelector {
    pub fn allows(&self, definition: &ToolDefinition) -> bool {
        if !self.tags.is_empty() {
            let overlaps = definition
                .tags
                .iter()
                .any(|tag| self.tags.iter().any(|wanted| wanted == tag));
            if !overlaps {
                return false;
            }
        }

        for (name, wanted) in &self.annotations {
            let actual = match name.as_str() {
                "read_only" => definition.annotations.read_only,
                "destructive" => definition.annotations.destructive,
                "idempotent" => definition.annotations.idempotent,
                "open_world" => definition.annotations.open_world,
                _ => return false,
            };
            let literal = if actual.unwrap_or(false) { "true" } else { "false" };
            if literal != wanted {
                return false;
            }
        }
        true
    }
}

/// Per-service access: a service can be disabled outright or constrained to
/// an allowlist of tool method names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAccess {
    Enabled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allowlist: Option<HashSet<String>>,
    },
    Disabled,
}

/// Service allow/block configuration, keyed by service id. Unlisted services
/// are enabled without restriction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicePolicy {
    #[serde(default)]
    pub services: HashMap<String, ServiceAccess>,
}

impl ServicePolicy {
    pub fn allows(&self, definition: &ToolDefinition) -> bool {
        let Some(service) = &definition.service_id else {
            return true;
        };
        match self.services.get(service) {
            None => true,
            Some(ServiceAccess::Disabled) => false,
            Some(ServiceAccess::Enabled { allowlist }) => match allowlist {
                None => true,
                Some(names) => names.contains(&definition.name),
            },
        }
    }
}
