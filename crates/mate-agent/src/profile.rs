//! Ordered rule pipelines

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rules::Rule;

/// A named, ordered list of rule ids.
///
/// Ids may repeat (the rule runs twice) and may point at rules that no longer
/// exist; those are skipped when the profile runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub rule_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, rule_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            rule_ids,
            created_at: now,
            updated_at: now,
        }
    }

    /// Run every referenced rule over `text` in order
    pub fn run(&self, registry: &RuleRegistry<'_>, text: &str) -> String {
        self.rule_ids
            .iter()
            .fold(text.to_string(), |acc, id| match registry.get(id) {
                Some(rule) => rule.apply(&acc),
                None => {
                    tracing::trace!("Profile '{}' references missing rule {}", self.name, id);
                    acc
                }
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("profile name is required".into()));
        }
        Ok(())
    }
}

/// Id lookup over a slice of rules
pub struct RuleRegistry<'a> {
    by_id: HashMap<&'a str, &'a Rule>,
}

impl<'a> RuleRegistry<'a> {
    pub fn new(rules: &'a [Rule]) -> Self {
        let mut by_id = HashMap::with_capacity(rules.len());
        for rule in rules {
            by_id.entry(rule.id.as_str()).or_insert(rule);
        }
        Self { by_id }
    }

    pub fn get(&self, id: &str) -> Option<&'a Rule> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
