// event.rs — Audit event data model.
//
// Every authorization decision and every consent state change is recorded
// as one AuditEvent. Events form a chain: each carries a `previous_hash`
// linking it to the prior record, which makes tampering detectable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of occurrence this event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// An authorization request was evaluated (any decision). A PENDING
    /// record carries the id of the consent it opened.
    Authorization,
    ConsentApproved,
    ConsentDenied,
    ConsentRevoked,
    ConsentExpired,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditKind::Authorization => "authorization",
            AuditKind::ConsentApproved => "consent_approved",
            AuditKind::ConsentDenied => "consent_denied",
            AuditKind::ConsentRevoked => "consent_revoked",
            AuditKind::ConsentExpired => "consent_expired",
        };
        f.write_str(s)
    }
}

/// A single audit record: one line in the JSONL audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// The agent the request was made for. Empty if the request had none.
    pub agent_id: String,
    pub kind: AuditKind,

    /// Correlates the record with the `requestId` returned to the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,

    /// `ALLOWED`, `DENIED`, or `PENDING`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,

    /// SHA-256 of the request as received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_hash: Option<String>,
    /// Who performed a consent transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Hash of the previous record's line. None for the first record.
    pub previous_hash: Option<String>,

    /// Free-form extras (e.g. the evaluation trace).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    pub fn new(agent_id: impl Into<String>, kind: AuditKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            kind,
            request_id: None,
            action: None,
            amount: None,
            merchant: None,
            decision: None,
            reason: None,
            policy_id: None,
            policy_version: None,
            rule_id: None,
            consent_id: None,
            latency_ms: None,
            request_hash: None,
            actor: None,
            previous_hash: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_request(mut self, request_id: Uuid, action: impl Into<String>) -> Self {
        self.request_id = Some(request_id);
        self.action = Some(action.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_amount(mut self, amount: Option<f64>) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_merchant(mut self, merchant: Option<String>) -> Self {
        self.merchant = merchant;
        self
    }

    pub fn with_decision(mut self, decision: impl Into<String>, reason: impl Into<String>) -> Self {
        self.decision = Some(decision.into());
        self.reason = Some(reason.into());
        self
    }

    /// Record which policy revision and rule produced the decision.
    pub fn with_rule(
        mut self,
        policy_id: Option<String>,
        policy_version: Option<u32>,
        rule_id: Option<String>,
    ) -> Self {
        self.policy_id = policy_id;
        self.policy_version = policy_version;
        self.rule_id = rule_id;
        self
    }

    pub fn with_consent(mut self, consent_id: impl Into<String>) -> Self {
        self.consent_id = Some(consent_id.into());
        self
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_request_hash(mut self, hash: impl Into<String>) -> Self {
        self.request_hash = Some(hash.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
