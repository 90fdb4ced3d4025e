// rule.rs — Policy rules and rule matching.
//
// A rule applies to a request when its action pattern matches the action,
// its resource glob (if any) matches the resource, and every condition is
// true against the transaction context. Conditions are AND-joined; there is
// no OR within a rule. Use several rules for disjunction.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;

/// What happens when a rule matches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
    /// Route the request to a human; the caller receives PENDING.
    RequireConsent,
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::Allow => write!(f, "allow"),
            Effect::Deny => write!(f, "deny"),
            Effect::RequireConsent => write!(f, "require_consent"),
        }
    }
}

/// One rule within a policy.
///
/// ```yaml
/// id: block-gambling
/// action: purchase
/// effect: deny
/// priority: 100
/// description: blocked merchant
/// conditions:
///   - field: merchant
///     operator: in
///     value: [pokerstars.com]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    /// Optional stable identifier, reported as `ruleId` on decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Exact action name, `*`, or a `prefix.*` wildcard.
    pub action: String,
    /// Glob over the request's resource. Absent means any resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub effect: Effect,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Higher is evaluated first.
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Why a rule did or did not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatch {
    Matched,
    ActionMismatch,
    ResourceMismatch,
    /// The action matched but the condition at `index` was false.
    ConditionFailed { index: usize },
}

impl Rule {
    pub fn new(action: impl Into<String>, effect: Effect) -> Self {
        Self {
            id: None,
            action: action.into(),
            resource: None,
            effect,
            conditions: Vec::new(),
            priority: 0,
            description: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_resource(mut self, pattern: impl Into<String>) -> Self {
        self.resource = Some(pattern.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// A short human label: the rule id if set, otherwise `effect action@priority`.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{} {}@{}", self.effect, self.action, self.priority),
        }
    }

    /// Does this rule apply to `action` / `resource` under `context`?
    pub fn matches(&self, action: &str, resource: Option<&str>, context: &Value) -> bool {
        self.check(action, resource, context) == RuleMatch::Matched
    }

    /// Like [`Rule::matches`] but reports which part failed.
    pub fn check(&self, action: &str, resource: Option<&str>, context: &Value) -> RuleMatch {
        if !action_matches(&self.action, action) {
            return RuleMatch::ActionMismatch;
        }
        if let Some(pattern) = &self.resource {
            let matched = resource.is_some_and(|r| matches_resource_pattern(pattern, r));
            if !matched {
                return RuleMatch::ResourceMismatch;
            }
        }
        match self.conditions.iter().position(|c| !c.evaluate(context)) {
            Some(index) => RuleMatch::ConditionFailed { index },
            None => RuleMatch::Matched,
        }
    }
}

/// Match an action against a rule's action pattern.
///
/// - `*` matches every action
/// - `prefix.*` matches actions starting with `prefix.` (not `prefix` itself)
/// - anything else is an exact, case-sensitive comparison
pub fn action_matches(pattern: &str, action: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('.') => action.starts_with(prefix) && action.len() > prefix.len(),
        _ => pattern == action,
    }
}

/// Glob match on a resource. An invalid pattern never matches (fail-closed).
pub(crate) fn matches_resource_pattern(pattern: &str, target: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches(target),
        Err(_) => false,
    }
}
