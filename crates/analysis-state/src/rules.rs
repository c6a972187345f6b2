use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rule metadata as served by the analysis server. Only `key` has meaning
/// here, the remaining fields are passed through to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub rule_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct RuleCache {
    rules: HashMap<String, Rule>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Rule> {
        self.rules.get(key)
    }

    /// Swaps in a complete rule set; entries missing from `rules` are dropped.
    pub fn replace_all(&mut self, rules: Vec<Rule>) {
        self.rules = rules
            .into_iter()
            .map(|rule| (rule.key.clone(), rule))
            .collect();
        info!("Rule cache refreshed with {} rules", self.rules.len());
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
