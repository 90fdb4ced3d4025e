// service.rs — The authorization service.
//
// AuthorizationService is the single entry point callers use. For each
// request it:
//
// 1. Validates the request shape (malformed → Validation error, not audited)
// 2. Looks up the agent (unknown → DENIED "agent not found")
// 3. Takes the store's spend lock, if any, and reloads the agent's counters
// 4. Loads the agent's policies and any consent the request names
// 5. Runs the PolicyEvaluator (which commits spend on ALLOWED)
// 6. Persists updated spend counters
// 7. Opens a pending Consent when the decision is PENDING
// 8. Writes exactly one audit record
//
// Store and audit failures surface as StoreUnavailable and are never
// reported as DENIED. A commit whose decision fails to persist or audit is
// rolled back, so a caller's retry is charged once. Nothing is retried here.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use aa_audit::{hasher, AuditError, AuditEvent, AuditKind, AuditLog, AuditSink};
use aa_policy::{
    AuthorizationRequest, AuthorizationResult, Consent, ConsentStatus, Decision, Evaluation,
    PolicyEvaluator, SpendAggregator, SpendLedger,
};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use uuid::Uuid;

use crate::config::{AuthzConfig, EngineSettings};
use crate::error::AuthzError;
use crate::store::{AgentStore, ConsentStore, FileStore, PolicyStore};

/// Evaluates authorization requests against stored agents and policies.
///
/// `Send + Sync`: share one instance behind an `Arc` across request threads.
/// Spend state for each agent is serialized internally.
pub struct AuthorizationService {
    agents: Arc<dyn AgentStore>,
    policies: Arc<dyn PolicyStore>,
    consents: Arc<dyn ConsentStore>,
    audit: Arc<dyn AuditSink>,
    evaluator: PolicyEvaluator,
    spend: SpendAggregator,
    consent_ttl: Option<Duration>,
}

impl AuthorizationService {
    pub fn new(
        agents: Arc<dyn AgentStore>,
        policies: Arc<dyn PolicyStore>,
        consents: Arc<dyn ConsentStore>,
        audit: Arc<dyn AuditSink>,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            agents,
            policies,
            consents,
            audit,
            evaluator: PolicyEvaluator::new(settings.engine_config()),
            spend: SpendAggregator::new(),
            consent_ttl: settings.consent_ttl(),
        }
    }

    /// Service over a project's `.agentauth/` state, auditing to its JSONL log.
    pub fn open(config: &AuthzConfig) -> Result<Self, AuthzError> {
        let settings = EngineSettings::load(&config.settings_file)?;
        let store = Arc::new(FileStore::new(config));
        let log = AuditLog::open(&config.audit_log)?;
        tracing::debug!(state_dir = %config.state_dir.display(), "opened authorization service");
        Ok(Self::new(
            store.clone(),
            store.clone(),
            store,
            Arc::new(Mutex::new(log)),
            &settings,
        ))
    }

    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    pub fn spend(&self) -> &SpendAggregator {
        &self.spend
    }

    /// Decide `request` now.
    pub fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResult, AuthzError> {
        self.authorize_at(request, Utc::now())
    }

    /// Decide `request` as of `now`.
    pub fn authorize_at(
        &self,
        request: &AuthorizationRequest,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationResult, AuthzError> {
        let started = Instant::now();
        validate(request)?;

        let at = now.with_timezone(&self.evaluator.config().utc_offset);

        // Held until the decision is persisted and audited.
        let mut _spend_lock = None;
        let mut evaluation = match self.agents.get_agent(&request.agent_id)? {
            None => {
                tracing::warn!(agent_id = %request.agent_id, "authorization for unknown agent");
                Evaluation::agent_not_found(&request.agent_id)
            }
            Some(mut agent) => {
                if let Some(lock) = self.agents.lock_spend(&agent.id)? {
                    // Another process may have committed since the lookup.
                    if let Some(fresh) = self.agents.get_agent(&agent.id)? {
                        agent = fresh;
                    }
                    self.spend.reseed(&agent.id, agent.spend.clone());
                    _spend_lock = Some(lock);
                }
                let policies = self.policies.policies_for(&agent)?;
                let consent = match &request.consent_id {
                    Some(id) => self.consents.get_consent(id)?,
                    None => None,
                };
                let evaluation = self.evaluator.evaluate_at(
                    request,
                    &agent,
                    &policies,
                    consent.as_ref(),
                    &self.spend,
                    now,
                );
                if let Some(amount) = evaluation.committed {
                    if let Err(e) = self.persist_spend(&agent.id) {
                        tracing::error!(agent_id = %agent.id, error = %e, "failed to persist spend counters");
                        self.roll_back(&agent.id, amount, at);
                        return Err(e);
                    }
                }
                evaluation
            }
        };

        let committed = evaluation.committed;
        self.record_decision(request, evaluation, now, started)
            .map_err(|e| {
                if let Some(amount) = committed {
                    self.roll_back(&request.agent_id, amount, at);
                }
                e
            })
    }

    /// Open a consent for a PENDING evaluation, then write the audit record.
    fn record_decision(
        &self,
        request: &AuthorizationRequest,
        mut evaluation: Evaluation,
        now: DateTime<Utc>,
        started: Instant,
    ) -> Result<AuthorizationResult, AuthzError> {
        let request_id = Uuid::new_v4();
        if evaluation.decision == Decision::Pending {
            let consent = Consent::for_request(request, &evaluation.reason, self.consent_ttl, now)
                .with_origin(evaluation.policy_id.clone(), evaluation.rule_id.clone());
            self.consents.save_consent(&consent)?;
            tracing::info!(consent_id = %consent.id, agent_id = %request.agent_id, "consent requested");
            evaluation.consent_id = Some(consent.id);
        }

        let policy_version = evaluation.policy_version;
        let applied_consent = evaluation.applied_consent.take();
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let result = AuthorizationResult::from_evaluation(evaluation, request_id, now, latency_ms);
        let trace = serde_json::to_value(&result.trace).map_err(AuditError::from)?;

        let mut event = AuditEvent::new(&request.agent_id, AuditKind::Authorization)
            .with_request(request_id, &request.action)
            .with_amount(request.amount)
            .with_merchant(request.merchant.clone())
            .with_decision(result.decision.as_str(), &result.reason)
            .with_rule(result.policy_id.clone(), policy_version, result.rule_id.clone())
            .with_latency(latency_ms)
            .with_request_hash(hasher::hash_json(request)?)
            .with_metadata(serde_json::json!({ "trace": trace }));
        if let Some(id) = result.consent_id.as_ref().or(applied_consent.as_ref()) {
            event = event.with_consent(id);
        }
        self.audit.record(event)?;

        tracing::info!(
            request_id = %request_id,
            agent_id = %request.agent_id,
            action = %request.action,
            decision = %result.decision,
            latency_ms,
            "authorization decision"
        );
        Ok(result)
    }

    /// Write an agent's current in-memory counters to the store, under the
    /// ledger lock so a save never races a commit.
    fn persist_spend(&self, agent_id: &str) -> Result<(), AuthzError> {
        self.spend
            .with_ledger(agent_id, SpendLedger::default, |ledger| {
                self.agents.save_spend(agent_id, ledger)
            })
            .map_err(AuthzError::from)
    }

    /// Undo a commit whose decision never became durable.
    fn roll_back(&self, agent_id: &str, amount: f64, at: DateTime<FixedOffset>) {
        self.spend.release(agent_id, amount, at);
        if let Err(e) = self.persist_spend(agent_id) {
            tracing::error!(agent_id, error = %e, "failed to persist rolled-back spend counters");
        }
        tracing::warn!(agent_id, amount, "rolled back spend commit");
    }

    pub fn get_consent(&self, consent_id: &str) -> Result<Option<Consent>, AuthzError> {
        Ok(self.consents.get_consent(consent_id)?)
    }

    pub fn list_consents(&self) -> Result<Vec<Consent>, AuthzError> {
        Ok(self.consents.list_consents()?)
    }

    /// Approve a pending consent. The agent then re-submits the request with
    /// `consent_id` set; approval itself commits no spend.
    pub fn approve_consent(&self, consent_id: &str, actor: &str) -> Result<Consent, AuthzError> {
        self.transition_consent(consent_id, ConsentStatus::Approved, Some(actor), Utc::now())
    }

    pub fn deny_consent(&self, consent_id: &str, actor: &str) -> Result<Consent, AuthzError> {
        self.transition_consent(consent_id, ConsentStatus::Denied, Some(actor), Utc::now())
    }

    pub fn revoke_consent(&self, consent_id: &str, actor: &str) -> Result<Consent, AuthzError> {
        self.transition_consent(consent_id, ConsentStatus::Revoked, Some(actor), Utc::now())
    }

    /// Expire every pending consent whose deadline has passed.
    pub fn expire_consents(&self) -> Result<Vec<Consent>, AuthzError> {
        self.expire_consents_at(Utc::now())
    }

    pub fn expire_consents_at(&self, now: DateTime<Utc>) -> Result<Vec<Consent>, AuthzError> {
        let mut expired = Vec::new();
        for mut consent in self.consents.list_consents()? {
            if consent.expire_if_due(now) {
                self.persist_transition(&consent, AuditKind::ConsentExpired, None)?;
                expired.push(consent);
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired pending consents");
        }
        Ok(expired)
    }

    /// Apply a consent transition as of `now`.
    ///
    /// A pending consent past its deadline is expired first, so a late
    /// approval fails instead of reviving it.
    pub fn transition_consent(
        &self,
        consent_id: &str,
        next: ConsentStatus,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Consent, AuthzError> {
        let mut consent = self
            .consents
            .get_consent(consent_id)?
            .ok_or_else(|| AuthzError::ConsentNotFound(consent_id.to_string()))?;

        if consent.expire_if_due(now) {
            self.persist_transition(&consent, AuditKind::ConsentExpired, None)?;
        }
        consent
            .transition(next, actor, now)
            .map_err(AuthzError::Consent)?;

        let kind = match next {
            ConsentStatus::Approved => AuditKind::ConsentApproved,
            ConsentStatus::Denied => AuditKind::ConsentDenied,
            ConsentStatus::Revoked => AuditKind::ConsentRevoked,
            // `transition` has already rejected a move back to pending.
            ConsentStatus::Expired | ConsentStatus::Pending => AuditKind::ConsentExpired,
        };
        self.persist_transition(&consent, kind, actor)?;
        tracing::info!(consent_id = %consent.id, status = %consent.status, "consent updated");
        Ok(consent)
    }

    fn persist_transition(
        &self,
        consent: &Consent,
        kind: AuditKind,
        actor: Option<&str>,
    ) -> Result<(), AuthzError> {
        self.consents.save_consent(consent)?;
        let mut event = AuditEvent::new(&consent.agent_id, kind)
            .with_action(&consent.action)
            .with_amount(consent.amount)
            .with_merchant(consent.merchant.clone())
            .with_consent(&consent.id)
            .with_rule(consent.policy_id.clone(), None, consent.rule_id.clone());
        if let Some(actor) = actor {
            event = event.with_actor(actor);
        }
        self.audit.record(event)?;
        Ok(())
    }
}

/// Reject requests that cannot be evaluated at all.
fn validate(request: &AuthorizationRequest) -> Result<(), AuthzError> {
    if request.agent_id.trim().is_empty() {
        return Err(AuthzError::Validation("agentId is required".into()));
    }
    if request.action.trim().is_empty() {
        return Err(AuthzError::Validation("action is required".into()));
    }
    if let Some(amount) = request.amount {
        if !amount.is_finite() || amount < 0.0 {
            return Err(AuthzError::Validation(format!(
                "amount must be a non-negative number, got {}",
                amount
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rules() {
        assert!(validate(&AuthorizationRequest::new("a1", "purchase")).is_ok());
        assert!(validate(&AuthorizationRequest::new("a1", "purchase").with_amount(0.0)).is_ok());

        for bad in [
            AuthorizationRequest::new("", "purchase"),
            AuthorizationRequest::new("a1", "  "),
            AuthorizationRequest::new("a1", "purchase").with_amount(-1.0),
            AuthorizationRequest::new("a1", "purchase").with_amount(f64::NAN),
            AuthorizationRequest::new("a1", "purchase").with_amount(f64::INFINITY),
        ] {
            let err = validate(&bad).unwrap_err();
            assert!(matches!(err, AuthzError::Validation(_)));
            assert_eq!(err.exit_code(), 1);
        }
    }
}
