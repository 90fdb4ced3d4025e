// decision.rs — Final decisions and the result returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{Evaluation, EvaluationTrace};

/// The outcome of an authorization request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allowed,
    Denied,
    /// Waiting on human consent.
    Pending,
}

impl Decision {
    /// Process exit code for command-line callers: 0 allowed, 2 denied, 3 pending.
    pub fn exit_code(&self) -> i32 {
        match self {
            Decision::Allowed => 0,
            Decision::Denied => 2,
            Decision::Pending => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "ALLOWED",
            Decision::Denied => "DENIED",
            Decision::Pending => "PENDING",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller gets back for one authorization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResult {
    pub decision: Decision,
    pub request_id: Uuid,
    pub reason: String,
    pub policy_id: Option<String>,
    pub rule_id: Option<String>,
    /// The pending consent to wait on. Present only when PENDING.
    pub consent_id: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    pub latency_ms: f64,
    pub trace: EvaluationTrace,
}

impl AuthorizationResult {
    pub fn from_evaluation(
        evaluation: Evaluation,
        request_id: Uuid,
        evaluated_at: DateTime<Utc>,
        latency_ms: f64,
    ) -> Self {
        let pending = evaluation.decision == Decision::Pending;
        Self {
            decision: evaluation.decision,
            request_id,
            reason: evaluation.reason,
            policy_id: evaluation.policy_id,
            rule_id: evaluation.rule_id,
            consent_id: evaluation.consent_id.filter(|_| pending),
            evaluated_at,
            latency_ms,
            trace: evaluation.trace,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allowed
    }
}
