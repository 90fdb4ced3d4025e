// consent.rs — Human consent records and their lifecycle.
//
// A consent is created when a `require_consent` rule matches. It stays
// `pending` until a human approves or denies it, or until it expires.
//
//   pending ──→ approved ──→ revoked
//      │
//      ├──→ denied
//      ├──→ revoked
//      └──→ expired
//
// Terminal states never transition again. An approved consent authorizes
// re-submissions of the same request (by `consent_id`) until it expires or
// is revoked.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PolicyError;
use crate::request::AuthorizationRequest;
use crate::spend::exceeds_limit;

/// Default lifetime of a consent request, in seconds.
pub const DEFAULT_CONSENT_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Pending,
    Approved,
    Denied,
    Revoked,
    Expired,
}

impl ConsentStatus {
    /// Whether moving from `self` to `next` is permitted.
    pub fn can_transition_to(&self, next: ConsentStatus) -> bool {
        use ConsentStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Denied)
                | (Pending, Revoked)
                | (Pending, Expired)
                | (Approved, Revoked)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsentStatus::Denied | ConsentStatus::Revoked | ConsentStatus::Expired
        )
    }
}

impl std::fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsentStatus::Pending => write!(f, "pending"),
            ConsentStatus::Approved => write!(f, "approved"),
            ConsentStatus::Denied => write!(f, "denied"),
            ConsentStatus::Revoked => write!(f, "revoked"),
            ConsentStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A request for human approval of one agent action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    pub id: String,
    pub agent_id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    /// Policy and rule that asked for consent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// The reason shown to the approver.
    #[serde(default)]
    pub reason: String,
    pub status: ConsentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Who approved, denied, or revoked it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
}

impl Consent {
    /// Open a pending consent for `request`. `ttl` of `None` never expires.
    pub fn for_request(
        request: &AuthorizationRequest,
        reason: impl Into<String>,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("cons_{}", Uuid::new_v4().simple()),
            agent_id: request.agent_id.clone(),
            action: request.action.clone(),
            resource: request.resource.clone(),
            amount: request.amount,
            merchant: request.merchant.clone(),
            policy_id: None,
            rule_id: None,
            reason: reason.into(),
            status: ConsentStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: ttl.map(|t| now + t),
            decided_by: None,
        }
    }

    pub fn with_origin(mut self, policy_id: Option<String>, rule_id: Option<String>) -> Self {
        self.policy_id = policy_id;
        self.rule_id = rule_id;
        self
    }

    /// Move to `next`, recording who did it.
    pub fn transition(
        &mut self,
        next: ConsentStatus,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyError> {
        if !self.status.can_transition_to(next) {
            return Err(PolicyError::InvalidConsentTransition {
                consent_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(consent_id = %self.id, from = %self.status, to = %next, "consent transition");
        self.status = next;
        self.updated_at = now;
        if let Some(actor) = actor {
            self.decided_by = Some(actor.to_string());
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }

    /// Expire a pending consent whose deadline has passed. Returns true if
    /// the status changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == ConsentStatus::Pending && self.is_expired(now) {
            return self.transition(ConsentStatus::Expired, None, now).is_ok();
        }
        false
    }

    /// Whether this consent authorizes `request` right now.
    ///
    /// Requires an approved, unexpired consent for the same agent and
    /// action. Resource and merchant must match when the consent names them,
    /// and the requested amount may not exceed the approved amount.
    pub fn covers(&self, request: &AuthorizationRequest, now: DateTime<Utc>) -> bool {
        if self.status != ConsentStatus::Approved || self.is_expired(now) {
            return false;
        }
        if self.agent_id != request.agent_id || self.action != request.action {
            return false;
        }
        if self.resource.is_some() && self.resource != request.resource {
            return false;
        }
        if self.merchant.is_some() && self.merchant != request.merchant {
            return false;
        }
        match (self.amount, request.amount) {
            (Some(approved), Some(requested)) => !exceeds_limit(requested, approved),
            (_, None) => true,
            // Approved without an amount: does not stretch to a priced request.
            (None, Some(_)) => false,
        }
    }
}
