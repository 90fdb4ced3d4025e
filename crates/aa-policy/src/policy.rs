// policy.rs — Named, versioned rule sets.
//
// Policies are authored in YAML and assigned to agents by id. Only `active`
// policies take part in evaluation; `draft` and `archived` are kept for
// history and staging. Every rule-set edit after construction bumps
// `version` so audit records can say which revision decided a request.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigIssue, PolicyError};
use crate::rule::Rule;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    #[default]
    Active,
    Draft,
    Archived,
}

impl std::fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyStatus::Active => write!(f, "active"),
            PolicyStatus::Draft => write!(f, "draft"),
            PolicyStatus::Archived => write!(f, "archived"),
        }
    }
}

fn initial_version() -> u32 {
    1
}

/// A named rule set.
///
/// ```yaml
/// id: shopping
/// name: Shopping guardrails
/// status: active
/// rules:
///   - action: purchase
///     effect: allow
///     priority: 10
///     conditions:
///       - { field: amount, operator: lte, value: 300 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: PolicyStatus,
    #[serde(default = "initial_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Policy {
    /// New active policy at version 1 with no rules.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: PolicyStatus::Active,
            version: initial_version(),
            rules: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: PolicyStatus) -> Self {
        self.status = status;
        self
    }

    /// Add a rule while building. The version is left alone, so a policy
    /// built in code matches the same policy loaded from YAML.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == PolicyStatus::Active
    }

    /// Append a rule and bump the version.
    pub fn push_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
        self.version += 1;
    }

    /// Replace the entire rule set and bump the version.
    pub fn replace_rules(&mut self, rules: Vec<Rule>) {
        self.rules = rules;
        self.version += 1;
    }

    /// Report configuration problems. An empty list means the policy is clean.
    ///
    /// Problems found here never fail a request: the offending condition or
    /// pattern simply never matches at evaluation time.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let issue = |rule_index: Option<usize>, condition_index: Option<usize>, message: String| {
            ConfigIssue {
                policy_id: self.id.clone(),
                rule_index,
                condition_index,
                message,
            }
        };

        if self.id.trim().is_empty() {
            issues.push(issue(None, None, "policy id is empty".to_string()));
        }

        let mut seen_priorities: HashMap<i64, usize> = HashMap::new();
        for (ri, rule) in self.rules.iter().enumerate() {
            if rule.action.trim().is_empty() {
                issues.push(issue(Some(ri), None, "rule action is empty".to_string()));
            } else if rule.action.contains('*')
                && rule.action != "*"
                && !(rule.action.ends_with(".*") && rule.action.matches('*').count() == 1)
            {
                issues.push(issue(
                    Some(ri),
                    None,
                    format!(
                        "action pattern '{}' is not exact, '*' or 'prefix.*'; it only matches literally",
                        rule.action
                    ),
                ));
            }

            if let Some(pattern) = &rule.resource {
                if let Err(e) = glob::Pattern::new(pattern) {
                    issues.push(issue(
                        Some(ri),
                        None,
                        format!("invalid resource pattern '{}': {}", pattern, e),
                    ));
                }
            }

            if let Some(first) = seen_priorities.insert(rule.priority, ri) {
                issues.push(issue(
                    Some(ri),
                    None,
                    format!(
                        "priority {} duplicates rule #{}; ties are broken by list order",
                        rule.priority, first
                    ),
                ));
            }

            for (ci, condition) in rule.conditions.iter().enumerate() {
                for problem in condition.validate() {
                    issues.push(issue(Some(ri), Some(ci), problem));
                }
            }
        }
        issues
    }

    /// Load a YAML list of policies.
    pub fn load_all(path: &Path) -> Result<Vec<Policy>, PolicyError> {
        let content = fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_all(&content).map_err(|source| PolicyError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse a YAML list of policies from a string.
    pub fn parse_all(yaml: &str) -> Result<Vec<Policy>, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}
