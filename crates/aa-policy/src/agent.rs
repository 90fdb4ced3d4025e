// agent.rs — Agent identity, status, and spend limits.
//
// An Agent is the autonomous identity on whose behalf actions are requested.
// Agents are never deleted while audit records reference them; they are
// soft-disabled through `status` instead.

use std::fs;
use std::path::Path;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::spend::{Period, SpendLedger, VelocityWindow};

/// Lifecycle status of an agent. Only `Active` agents can be authorized.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Inactive => write!(f, "inactive"),
            AgentStatus::Suspended => write!(f, "suspended"),
        }
    }
}

/// Hard spend caps for an agent, checked before any ALLOWED decision.
///
/// Each limit is optional; an unset limit is never exceeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpendLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_transaction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly: Option<f64>,
    /// Most committed transactions allowed in any sliding minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_hour: Option<u32>,
}

impl SpendLimits {
    /// The configured cap for a period window, if any.
    pub fn for_period(&self, period: Period) -> Option<f64> {
        match period {
            Period::Daily => self.daily,
            Period::Monthly => self.monthly,
        }
    }

    /// The configured transaction count cap for a frequency window, if any.
    pub fn for_window(&self, window: VelocityWindow) -> Option<u32> {
        match window {
            VelocityWindow::Minute => self.max_per_minute,
            VelocityWindow::Hour => self.max_per_hour,
        }
    }
}

/// An autonomous identity that requests authorization.
///
/// ```yaml
/// id: a1
/// name: Shopping assistant
/// status: active
/// capabilities: [purchase]
/// policy_ids: [shopping]
/// limits:
///   daily: 500
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: AgentStatus,
    /// Capability tags, exposed to conditions as `agent.capabilities`.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Assigned policies, in evaluation order.
    #[serde(default)]
    pub policy_ids: Vec<String>,
    #[serde(default)]
    pub limits: SpendLimits,
    /// Persisted spend counters. The aggregator seeds from this.
    #[serde(default)]
    pub spend: SpendLedger,
}

impl Agent {
    /// Create an active agent with no policies and no limits.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: AgentStatus::Active,
            capabilities: Vec::new(),
            policy_ids: Vec::new(),
            limits: SpendLimits::default(),
            spend: SpendLedger::default(),
        }
    }

    /// Assign a policy (appended to the evaluation order).
    pub fn with_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_ids.push(policy_id.into());
        self
    }

    pub fn with_limits(mut self, limits: SpendLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.push(tag.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    pub fn spent_today(&self, at: DateTime<FixedOffset>) -> f64 {
        self.spend.current_spend(Period::Daily, at)
    }

    pub fn spent_this_month(&self, at: DateTime<FixedOffset>) -> f64 {
        self.spend.current_spend(Period::Monthly, at)
    }

    /// Load a YAML list of agents.
    pub fn load_all(path: &Path) -> Result<Vec<Agent>, PolicyError> {
        let content = fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| PolicyError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
