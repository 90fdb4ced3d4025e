// request.rs — Authorization requests and the transaction context.
//
// The transaction context is the JSON object that condition field paths
// resolve against. It is rebuilt for every evaluation from the request, the
// agent, the agent's current spend, and the evaluation clock.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::agent::Agent;
use crate::spend::{Period, SpendLedger, VelocityWindow};

/// Context keys owned by the engine. A request's free-form context cannot
/// shadow them at the top level.
pub const RESERVED_CONTEXT_KEYS: &[&str] = &[
    "action",
    "resource",
    "amount",
    "merchant",
    "description",
    "context",
    "agent",
    "spend",
    "velocity",
    "time",
];

/// A proposed agent action awaiting a decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    pub agent_id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form attributes (e.g. `category`), visible to conditions.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    /// An approved consent this request is re-submitted under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<String>,
}

impl AuthorizationRequest {
    pub fn new(agent_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_merchant(mut self, merchant: impl Into<String>) -> Self {
        self.merchant = Some(merchant.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_consent(mut self, consent_id: impl Into<String>) -> Self {
        self.consent_id = Some(consent_id.into());
        self
    }

    /// Build the context object conditions are evaluated against.
    ///
    /// Layout:
    /// - free-form context keys at top level, and again under `context.*`
    /// - `action`, `resource`, `amount`, `merchant`, `description`
    /// - `agent.id`, `agent.name`, `agent.status`, `agent.capabilities`
    /// - `spend.daily`, `spend.monthly` for the window containing `at`
    /// - `velocity.per_minute`, `velocity.per_hour`: committed transactions
    ///   in the sliding window ending at `at`
    /// - `time.hour` (0-23), `time.day_of_week` (`monday`..`sunday`)
    pub fn transaction_context(
        &self,
        agent: &Agent,
        spend: &SpendLedger,
        at: DateTime<FixedOffset>,
    ) -> Value {
        let mut ctx: Map<String, Value> = self
            .context
            .iter()
            .filter(|(k, _)| !RESERVED_CONTEXT_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        ctx.insert("context".into(), Value::Object(self.context.clone()));
        ctx.insert("action".into(), json!(self.action));
        insert_some(&mut ctx, "resource", self.resource.as_ref().map(|r| json!(r)));
        insert_some(&mut ctx, "amount", self.amount.map(|a| json!(a)));
        insert_some(&mut ctx, "merchant", self.merchant.as_ref().map(|m| json!(m)));
        insert_some(
            &mut ctx,
            "description",
            self.description.as_ref().map(|d| json!(d)),
        );
        ctx.insert(
            "agent".into(),
            json!({
                "id": agent.id,
                "name": agent.name,
                "status": agent.status.to_string(),
                "capabilities": agent.capabilities,
            }),
        );
        ctx.insert(
            "spend".into(),
            json!({
                "daily": spend.current_spend(Period::Daily, at),
                "monthly": spend.current_spend(Period::Monthly, at),
            }),
        );
        ctx.insert(
            "velocity".into(),
            json!({
                "per_minute": spend.transactions_within(VelocityWindow::Minute, at),
                "per_hour": spend.transactions_within(VelocityWindow::Hour, at),
            }),
        );
        ctx.insert(
            "time".into(),
            json!({
                "hour": at.hour(),
                "day_of_week": day_name(at.weekday()),
            }),
        );
        Value::Object(ctx)
    }
}

fn insert_some(ctx: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        ctx.insert(key.to_string(), v);
    }
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::resolve;
    use chrono::TimeZone;

    fn friday_evening() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 16, 19, 30, 0)
            .unwrap()
    }

    #[test]
    fn context_exposes_request_agent_spend_and_time() {
        let at = friday_evening();
        let agent = Agent::new("a1", "Shopper").with_capability("purchase");
        let mut ledger = SpendLedger::default();
        ledger.record(149.99, at);

        let request = AuthorizationRequest::new("a1", "purchase")
            .with_amount(49.99)
            .with_merchant("amazon.com")
            .with_context("category", json!("electronics"));
        let ctx = request.transaction_context(&agent, &ledger, at);

        assert_eq!(resolve(&ctx, "amount"), Some(&json!(49.99)));
        assert_eq!(resolve(&ctx, "merchant"), Some(&json!("amazon.com")));
        assert_eq!(resolve(&ctx, "category"), Some(&json!("electronics")));
        assert_eq!(resolve(&ctx, "context.category"), Some(&json!("electronics")));
        assert_eq!(resolve(&ctx, "agent.id"), Some(&json!("a1")));
        assert_eq!(resolve(&ctx, "agent.capabilities.0"), Some(&json!("purchase")));
        assert_eq!(resolve(&ctx, "spend.daily"), Some(&json!(149.99)));
        assert_eq!(resolve(&ctx, "velocity.per_minute"), Some(&json!(1)));
        assert_eq!(resolve(&ctx, "velocity.per_hour"), Some(&json!(1)));
        assert_eq!(resolve(&ctx, "time.hour"), Some(&json!(19)));
        assert_eq!(resolve(&ctx, "time.day_of_week"), Some(&json!("friday")));
        assert!(resolve(&ctx, "resource").is_none());
    }

    #[test]
    fn free_form_context_cannot_shadow_reserved_keys() {
        let at = friday_evening();
        let agent = Agent::new("a1", "Shopper");
        let request = AuthorizationRequest::new("a1", "purchase")
            .with_context("amount", json!(1))
            .with_context("action", json!("refund"));
        let ctx = request.transaction_context(&agent, &SpendLedger::default(), at);

        assert_eq!(resolve(&ctx, "action"), Some(&json!("purchase")));
        assert!(resolve(&ctx, "amount").is_none());
        // Still visible under the namespaced path.
        assert_eq!(resolve(&ctx, "context.amount"), Some(&json!(1)));
    }

    #[test]
    fn request_serializes_camel_case_and_omits_absent_fields() {
        let request = AuthorizationRequest::new("a1", "purchase").with_consent("cons_1");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"agentId": "a1", "action": "purchase", "consentId": "cons_1"}));

        let parsed: AuthorizationRequest =
            serde_json::from_value(json!({"agentId": "a1", "action": "purchase", "amount": 20})).unwrap();
        assert_eq!(parsed.amount, Some(20.0));
    }
}
