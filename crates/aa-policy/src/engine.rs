// engine.rs — Policy evaluation engine.
//
// The PolicyEvaluator turns one request into one decision. For an agent and
// its assigned policies it checks:
//
// 1. Is the agent active? → No → Deny
// 2. Collect active policies in assignment order, flatten their rules
// 3. Sort rules by priority (highest first; ties keep policy, then rule order)
// 4. First rule that matches decides:
//      deny            → Deny
//      require_consent → Pending (or Allow under an approved consent)
//      allow           → Allow, subject to the spend-limit gate
// 5. No rule matches → configured default (deny unless configured otherwise)
// 6. Spend-limit gate: amount caps, then transaction frequency caps
// 7. Final Allow with an amount → commit spend once
//
// Steps 3-7 run under the agent's spend lock, so two requests for the same
// agent can never both pass the same remaining budget.
//
// Every step is recorded in an EvaluationTrace so the decision trail is
// observable in the audit log.

use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, SpendLimits};
use crate::consent::Consent;
use crate::decision::Decision;
use crate::policy::Policy;
use crate::request::AuthorizationRequest;
use crate::rule::{Effect, Rule, RuleMatch};
use crate::spend::{exceeds_limit, Period, SpendAggregator, SpendLedger, VelocityWindow};

/// What to decide when no rule matches.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DefaultDecision {
    Allow,
    #[default]
    Deny,
}

/// Engine-wide evaluation settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_decision: DefaultDecision,
    /// Offset used for spend period boundaries and `time.*` context fields.
    pub utc_offset: FixedOffset,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_decision: DefaultDecision::Deny,
            utc_offset: Local::now().offset().fix(),
        }
    }
}

impl EngineConfig {
    pub fn with_default_decision(mut self, default_decision: DefaultDecision) -> Self {
        self.default_decision = default_decision;
        self
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }
}

/// A step in the evaluation chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationStep {
    /// Which check was performed (e.g., "agent_status", "rule_match").
    pub check: String,
    /// The outcome of this check (e.g., "passed", "failed: inactive").
    pub outcome: String,
    /// Whether this step was the terminal decision point.
    pub terminal: bool,
}

/// Ordered record of what the evaluator looked at.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationTrace {
    pub steps: Vec<EvaluationStep>,
    /// Candidate rules in the order they were tried (`policy/rule`).
    pub rules_checked: Vec<String>,
    pub matched_rule: Option<String>,
}

impl EvaluationTrace {
    pub fn step(&mut self, check: &str, outcome: impl Into<String>, terminal: bool) {
        let outcome = outcome.into();
        tracing::debug!(check, outcome = %outcome, terminal, "evaluation step");
        self.steps.push(EvaluationStep {
            check: check.to_string(),
            outcome,
            terminal,
        });
    }
}

/// The evaluator's verdict for one request.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub decision: Decision,
    pub reason: String,
    pub policy_id: Option<String>,
    pub policy_version: Option<u32>,
    pub rule_id: Option<String>,
    /// The effect of the deciding rule, if a rule decided.
    pub effect: Option<Effect>,
    /// The consent opened for a PENDING decision. The evaluator never sets
    /// it; the caller fills it in once the consent is stored.
    pub consent_id: Option<String>,
    /// The approved consent that allowed this request. Goes to the trace and
    /// the audit record, not to the result.
    pub applied_consent: Option<String>,
    /// Amount added to the agent's spend counters, if any.
    pub committed: Option<f64>,
    /// The agent's ledger after commit, for persistence.
    pub ledger: Option<SpendLedger>,
    pub trace: EvaluationTrace,
}

impl Evaluation {
    fn new(decision: Decision, reason: impl Into<String>, trace: EvaluationTrace) -> Self {
        Self {
            decision,
            reason: reason.into(),
            policy_id: None,
            policy_version: None,
            rule_id: None,
            effect: None,
            consent_id: None,
            applied_consent: None,
            committed: None,
            ledger: None,
            trace,
        }
    }

    /// DENIED for a request naming an agent that does not exist.
    pub fn agent_not_found(agent_id: &str) -> Self {
        let mut trace = EvaluationTrace::default();
        trace.step("agent_lookup", format!("failed: no agent '{}'", agent_id), true);
        Self::new(Decision::Denied, "agent not found", trace)
    }

    fn attributed_to(mut self, candidate: &Candidate<'_>) -> Self {
        self.policy_id = Some(candidate.policy.id.clone());
        self.policy_version = Some(candidate.policy.version);
        self.rule_id = Some(candidate.rule_id());
        self.effect = Some(candidate.rule.effect);
        self
    }
}

/// A rule together with the policy it came from.
struct Candidate<'a> {
    policy: &'a Policy,
    index: usize,
    rule: &'a Rule,
}

impl Candidate<'_> {
    /// The rule's own id, or `policy#index` when it has none.
    fn rule_id(&self) -> String {
        self.rule
            .id
            .clone()
            .unwrap_or_else(|| format!("{}#{}", self.policy.id, self.index))
    }

    fn label(&self) -> String {
        format!("{}/{}", self.policy.id, self.rule.label())
    }
}

/// A tentative outcome before the spend gate runs.
enum Verdict<'a> {
    Allow {
        reason: String,
        origin: Option<&'a Candidate<'a>>,
        applied_consent: Option<String>,
    },
    Deny {
        reason: String,
        origin: Option<&'a Candidate<'a>>,
    },
    Pending {
        reason: String,
        origin: &'a Candidate<'a>,
    },
}

/// Evaluates requests against an agent's policies.
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator {
    config: EngineConfig,
}

impl PolicyEvaluator {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate `request` for `agent` at the current time.
    ///
    /// `policies` may contain more than the agent's policies; only those
    /// named in `agent.policy_ids` are considered, in that order.
    /// `consent` is the consent named by `request.consent_id`, if it exists.
    pub fn evaluate(
        &self,
        request: &AuthorizationRequest,
        agent: &Agent,
        policies: &[Policy],
        consent: Option<&Consent>,
        spend: &SpendAggregator,
    ) -> Evaluation {
        self.evaluate_at(request, agent, policies, consent, spend, Utc::now())
    }

    /// Same as [`PolicyEvaluator::evaluate`] with an explicit clock.
    pub fn evaluate_at(
        &self,
        request: &AuthorizationRequest,
        agent: &Agent,
        policies: &[Policy],
        consent: Option<&Consent>,
        spend: &SpendAggregator,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let mut trace = EvaluationTrace::default();

        // Step 1: agent status
        if !agent.is_active() {
            trace.step("agent_status", format!("failed: {}", agent.status), true);
            return Evaluation::new(Decision::Denied, "agent not active", trace);
        }
        trace.step("agent_status", "passed", false);

        // Steps 2-3: candidate rules in evaluation order
        let candidates = collect_candidates(agent, policies, &mut trace);
        trace.step(
            "rule_collection",
            format!("{} candidate rule(s)", candidates.len()),
            false,
        );

        let at = now.with_timezone(&self.config.utc_offset);
        spend.with_ledger(
            &agent.id,
            || agent.spend.clone(),
            |ledger| {
                let context = request.transaction_context(agent, ledger, at);

                // Step 4: first matching rule
                let mut allow_failures = Vec::new();
                let mut matched = None;
                for candidate in &candidates {
                    trace.rules_checked.push(candidate.label());
                    match candidate
                        .rule
                        .check(&request.action, request.resource.as_deref(), &context)
                    {
                        RuleMatch::Matched => {
                            matched = Some(candidate);
                            break;
                        }
                        RuleMatch::ConditionFailed { index } => {
                            if candidate.rule.effect == Effect::Allow {
                                allow_failures.push(format!(
                                    "{} (rule '{}')",
                                    candidate.rule.conditions[index],
                                    candidate.rule_id()
                                ));
                            }
                        }
                        RuleMatch::ActionMismatch | RuleMatch::ResourceMismatch => {}
                    }
                }

                let verdict = match matched {
                    Some(candidate) => {
                        trace.matched_rule = Some(candidate.label());
                        trace.step(
                            "rule_match",
                            format!("matched {} ({})", candidate.label(), candidate.rule.effect),
                            false,
                        );
                        self.apply_effect(candidate, request, consent, &allow_failures, now, &mut trace)
                    }
                    None => {
                        trace.step("rule_match", "no rule matched", false);
                        match self.config.default_decision {
                            DefaultDecision::Allow => Verdict::Allow {
                                reason: "no matching rule — implicit allow".to_string(),
                                origin: None,
                                applied_consent: None,
                            },
                            DefaultDecision::Deny => Verdict::Deny {
                                reason: "no matching rule — implicit deny".to_string(),
                                origin: None,
                            },
                        }
                    }
                };

                match verdict {
                    Verdict::Deny { reason, origin } => {
                        trace.step("decision", format!("denied: {}", reason), true);
                        let evaluation = Evaluation::new(Decision::Denied, reason, trace);
                        match origin {
                            Some(c) => evaluation.attributed_to(c),
                            None => evaluation,
                        }
                    }
                    Verdict::Pending { reason, origin } => {
                        trace.step("decision", "pending: consent required", true);
                        Evaluation::new(Decision::Pending, reason, trace).attributed_to(origin)
                    }
                    Verdict::Allow {
                        reason,
                        origin,
                        applied_consent,
                    } => {
                        // Step 6: spend-limit gate
                        let breach = match request.amount {
                            Some(amount) => limit_breach(&agent.limits, ledger, amount, at),
                            None => None,
                        };
                        if let Some(breach) = breach {
                            trace.step("spend_limits", format!("failed: {}", breach), true);
                            return Evaluation::new(Decision::Denied, breach, trace);
                        }
                        trace.step(
                            "spend_limits",
                            match request.amount {
                                Some(_) => "passed",
                                None => "not applicable: no amount",
                            },
                            false,
                        );

                        // Step 7: commit
                        let committed = request.amount.map(|amount| {
                            ledger.record(amount, at);
                            amount
                        });
                        trace.step("decision", "allowed", true);

                        let mut evaluation = Evaluation::new(Decision::Allowed, reason, trace);
                        if let Some(c) = origin {
                            evaluation = evaluation.attributed_to(c);
                        }
                        evaluation.applied_consent = applied_consent;
                        if committed.is_some() {
                            evaluation.committed = committed;
                            evaluation.ledger = Some(ledger.clone());
                        }
                        evaluation
                    }
                }
            },
        )
    }

    fn apply_effect<'a>(
        &self,
        candidate: &'a Candidate<'a>,
        request: &AuthorizationRequest,
        consent: Option<&Consent>,
        allow_failures: &[String],
        now: DateTime<Utc>,
        trace: &mut EvaluationTrace,
    ) -> Verdict<'a> {
        let rule = candidate.rule;
        match rule.effect {
            Effect::Allow => Verdict::Allow {
                reason: match &rule.description {
                    Some(d) => d.clone(),
                    None => format!(
                        "allowed by rule '{}' in policy '{}'",
                        candidate.rule_id(),
                        candidate.policy.id
                    ),
                },
                origin: Some(candidate),
                applied_consent: None,
            },
            Effect::Deny => Verdict::Deny {
                reason: deny_reason(candidate, allow_failures),
                origin: Some(candidate),
            },
            Effect::RequireConsent => {
                if let (Some(id), Some(consent)) = (&request.consent_id, consent) {
                    if consent.id == *id && consent.covers(request, now) {
                        trace.step("consent", format!("approved consent {} applies", id), false);
                        return Verdict::Allow {
                            reason: format!("approved by consent {}", id),
                            origin: Some(candidate),
                            applied_consent: Some(id.clone()),
                        };
                    }
                    trace.step(
                        "consent",
                        format!("consent {} not usable ({})", id, consent.status),
                        false,
                    );
                } else if let Some(id) = &request.consent_id {
                    trace.step("consent", format!("consent {} not found", id), false);
                }
                let reason = match &rule.description {
                    Some(d) => format!("{}: human consent required", d),
                    None => format!(
                        "rule '{}' in policy '{}' requires human consent for action '{}'",
                        candidate.rule_id(),
                        candidate.policy.id,
                        request.action
                    ),
                };
                Verdict::Pending {
                    reason,
                    origin: candidate,
                }
            }
        }
    }
}

/// Assigned, active policies in assignment order, flattened and sorted by
/// priority. The sort is stable, so ties keep policy order then rule order.
fn collect_candidates<'a>(
    agent: &Agent,
    policies: &'a [Policy],
    trace: &mut EvaluationTrace,
) -> Vec<Candidate<'a>> {
    let mut candidates = Vec::new();
    for policy_id in &agent.policy_ids {
        let Some(policy) = policies.iter().find(|p| &p.id == policy_id) else {
            tracing::warn!(agent_id = %agent.id, policy_id = %policy_id, "assigned policy not found");
            trace.step("policy_lookup", format!("skipped '{}': not found", policy_id), false);
            continue;
        };
        if !policy.is_active() {
            trace.step(
                "policy_lookup",
                format!("skipped '{}': {}", policy.id, policy.status),
                false,
            );
            continue;
        }
        candidates.extend(
            policy
                .rules
                .iter()
                .enumerate()
                .map(|(index, rule)| Candidate { policy, index, rule }),
        );
    }
    candidates.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
    candidates
}

/// Human-readable explanation for a deny rule.
fn deny_reason(candidate: &Candidate<'_>, allow_failures: &[String]) -> String {
    let rule = candidate.rule;
    let mut reason = format!(
        "denied by rule '{}' in policy '{}' (action '{}')",
        candidate.rule_id(),
        candidate.policy.id,
        rule.action
    );
    if let Some(d) = &rule.description {
        reason = format!("{}: {}", d, reason);
    }
    if !rule.conditions.is_empty() {
        let triggers: Vec<String> = rule.conditions.iter().map(|c| c.to_string()).collect();
        reason.push_str(&format!("; triggered by {}", triggers.join(" and ")));
    }
    if !allow_failures.is_empty() {
        reason.push_str(&format!("; not allowed because {}", allow_failures.join(", ")));
    }
    reason
}

/// The first agent limit `amount` would break, as a reason string.
fn limit_breach(
    limits: &SpendLimits,
    ledger: &SpendLedger,
    amount: f64,
    at: DateTime<FixedOffset>,
) -> Option<String> {
    if let Some(limit) = limits.per_transaction {
        if exceeds_limit(amount, limit) {
            return Some(format!(
                "per-transaction limit exceeded: {:.2} requested > {:.2}",
                amount, limit
            ));
        }
    }
    for period in Period::ALL {
        let Some(limit) = limits.for_period(period) else {
            continue;
        };
        if ledger.would_exceed(period, limit, amount, at) {
            return Some(format!(
                "{} limit exceeded: {:.2} spent + {:.2} requested > {:.2}",
                period,
                ledger.current_spend(period, at),
                amount,
                limit
            ));
        }
    }
    for window in VelocityWindow::ALL {
        let Some(max) = limits.for_window(window) else {
            continue;
        };
        let count = ledger.transactions_within(window, at);
        if count >= max as usize {
            return Some(format!(
                "frequency limit exceeded: {} transaction(s) in the last {}, limit {}",
                count, window, max
            ));
        }
    }
    None
}
