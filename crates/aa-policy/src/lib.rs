//! # aa-policy
//!
//! Rule-based authorization engine for AgentAuth.
//!
//! Given a proposed agent action (amount, merchant, category, ...) and the
//! agent's assigned [`Policy`] set, the [`PolicyEvaluator`] decides
//! ALLOWED, DENIED, or PENDING and explains why.
//!
//! ## Key invariants
//!
//! - **Default deny**: no matching rule → the configured default, which is
//!   deny unless an [`EngineConfig`] says otherwise.
//! - **Priority order**: the highest-priority matching rule decides; ties
//!   keep policy order, then rule order.
//! - **Fail closed**: a malformed condition (bad regex, non-numeric
//!   threshold) never matches. [`Policy::validate`] reports it.
//! - **Spend limits are hard caps**: no ALLOWED decision pushes an agent
//!   past its per-transaction, daily, or monthly limit.
//! - **Commit once**: spend is committed exactly once, only for ALLOWED,
//!   under a per-agent lock held from read to commit.

pub mod agent;
pub mod condition;
pub mod consent;
pub mod decision;
pub mod engine;
pub mod error;
pub mod policy;
pub mod request;
pub mod rule;
pub mod spend;

pub use agent::{Agent, AgentStatus, SpendLimits};
pub use condition::{Condition, Operator};
pub use consent::{Consent, ConsentStatus, DEFAULT_CONSENT_TTL_SECS};
pub use decision::{AuthorizationResult, Decision};
pub use engine::{
    DefaultDecision, EngineConfig, Evaluation, EvaluationStep, EvaluationTrace, PolicyEvaluator,
};
pub use error::{ConfigIssue, PolicyError};
pub use policy::{Policy, PolicyStatus};
pub use request::AuthorizationRequest;
pub use rule::{Effect, Rule, RuleMatch};
pub use spend::{Period, PeriodCounter, SpendAggregator, SpendLedger, VelocityWindow};
