// error.rs — Error types for the policy subsystem.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or changing policy state.
///
/// Evaluation itself never returns these: a malformed condition fails closed
/// at evaluation time and is surfaced through [`ConfigIssue`] instead.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A policy or agent file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A policy or agent document is not valid YAML for the expected shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    /// A consent state transition that the lifecycle does not permit.
    #[error("invalid consent transition for {consent_id}: {from} -> {to}")]
    InvalidConsentTransition {
        consent_id: String,
        from: String,
        to: String,
    },
}

/// One configuration problem found in a policy.
///
/// These are operator-facing: they are logged and listed by
/// `agentauth policy validate`, never returned to a request caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigIssue {
    pub policy_id: String,
    /// Index of the offending rule within the policy, if the issue is rule-scoped.
    pub rule_index: Option<usize>,
    /// Index of the offending condition within the rule, if condition-scoped.
    pub condition_index: Option<usize>,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policy '{}'", self.policy_id)?;
        if let Some(rule) = self.rule_index {
            write!(f, " rule #{}", rule)?;
        }
        if let Some(cond) = self.condition_index {
            write!(f, " condition #{}", cond)?;
        }
        write!(f, ": {}", self.message)
    }
}
