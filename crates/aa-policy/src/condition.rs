// condition.rs — Atomic predicates over the transaction context.
//
// A Condition is `(field, operator, value)`. The field is a dot path into the
// JSON transaction context (e.g. "amount", "merchant", "context.category",
// "spend.daily"). Evaluation is a pure function and never fails: anything
// malformed evaluates to `false` (fail closed), with a warning for the
// operator when the condition itself is misconfigured.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::spend::exceeds_limit;

/// Comparison operators supported by a [`Condition`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    Matches,
    /// Budget check: `<field> + amount <= value`, where `field` names a spend
    /// counter such as `spend.daily`. Not applicable (true) without an amount.
    WithinLimit,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Nin => "nin",
            Operator::Contains => "contains",
            Operator::Matches => "matches",
            Operator::WithinLimit => "within_limit",
        };
        write!(f, "{}", s)
    }
}

/// One atomic predicate within a rule.
///
/// ```yaml
/// field: merchant
/// operator: in
/// value: ["pokerstars.com", "bet365.com"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Dot path into the transaction context.
    pub field: String,
    pub operator: Operator,
    /// Scalar, list, or regex pattern depending on the operator.
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluate this condition against a transaction context.
    pub fn evaluate(&self, context: &Value) -> bool {
        evaluate(self, context)
    }

    /// Check the condition's own shape. Returns a message per problem found.
    ///
    /// - `in` / `nin` need a list value
    /// - numeric operators and `within_limit` need a numeric value
    /// - `matches` needs a string that compiles as a regex
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.field.trim().is_empty() {
            problems.push("condition field is empty".to_string());
        }
        match self.operator {
            Operator::In | Operator::Nin => {
                if !self.value.is_array() {
                    problems.push(format!(
                        "operator '{}' on '{}' requires a list value, got {}",
                        self.operator, self.field, self.value
                    ));
                }
            }
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte | Operator::WithinLimit => {
                if as_number(&self.value).is_none() {
                    problems.push(format!(
                        "operator '{}' on '{}' requires a numeric value, got {}",
                        self.operator, self.field, self.value
                    ));
                }
            }
            Operator::Matches => match self.value.as_str() {
                Some(pattern) => {
                    if let Err(e) = Regex::new(pattern) {
                        problems.push(format!("invalid regex '{}': {}", pattern, e));
                    }
                }
                None => problems.push(format!(
                    "operator 'matches' on '{}' requires a regex string, got {}",
                    self.field, self.value
                )),
            },
            Operator::Eq | Operator::Neq | Operator::Contains => {}
        }
        problems
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

/// Evaluate a single condition against a transaction context.
pub fn evaluate(condition: &Condition, context: &Value) -> bool {
    let resolved = resolve(context, &condition.field);

    // A missing spend counter reads as zero rather than absent.
    if condition.operator == Operator::WithinLimit {
        return within_limit(condition, resolved, context);
    }

    // Absence differs from any defined value, except that a request without
    // an amount is not subject to budget comparisons on it.
    let Some(field) = resolved else {
        if condition.field == "amount" && is_budget_comparison(condition.operator) {
            return true;
        }
        return matches!(condition.operator, Operator::Neq | Operator::Nin);
    };

    match condition.operator {
        Operator::Eq => values_equal(field, &condition.value),
        Operator::Neq => !values_equal(field, &condition.value),
        Operator::Gt => compare(field, &condition.value, |a, b| a > b),
        Operator::Gte => compare(field, &condition.value, |a, b| a >= b),
        Operator::Lt => compare(field, &condition.value, |a, b| a < b),
        Operator::Lte => compare(field, &condition.value, |a, b| a <= b),
        Operator::In => match condition.value.as_array() {
            Some(items) => items.iter().any(|item| values_equal(field, item)),
            None => misconfigured(condition, "requires a list value"),
        },
        Operator::Nin => match condition.value.as_array() {
            Some(items) => !items.iter().any(|item| values_equal(field, item)),
            None => misconfigured(condition, "requires a list value"),
        },
        Operator::Contains => match (field, &condition.value) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            _ => false,
        },
        Operator::Matches => {
            let Some(pattern) = condition.value.as_str() else {
                return misconfigured(condition, "requires a regex string");
            };
            match Regex::new(pattern) {
                Ok(re) => re.is_match(&string_form(field)),
                Err(e) => misconfigured(condition, &format!("invalid regex: {}", e)),
            }
        }
        Operator::WithinLimit => within_limit(condition, Some(field), context),
    }
}

/// Resolve a dot path (`a.b.0.c`) against a JSON value.
///
/// Numeric segments index into arrays. `null` resolves to `None`, so an
/// explicit null is treated exactly like an absent field.
pub fn resolve<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Coerce a JSON value to a number: numbers as-is, strings if they parse.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn within_limit(condition: &Condition, counter: Option<&Value>, context: &Value) -> bool {
    let Some(limit) = as_number(&condition.value) else {
        return misconfigured(condition, "requires a numeric limit");
    };
    let Some(amount) = resolve(context, "amount").and_then(as_number) else {
        // No amount: the budget condition does not apply.
        return true;
    };
    let current = counter.and_then(as_number).unwrap_or(0.0);
    !exceeds_limit(current + amount, limit)
}

fn is_budget_comparison(operator: Operator) -> bool {
    matches!(
        operator,
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
    )
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(field: &Value, threshold: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(field), as_number(threshold)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn misconfigured(condition: &Condition, problem: &str) -> bool {
    tracing::warn!(
        field = %condition.field,
        operator = %condition.operator,
        value = %condition.value,
        "misconfigured condition evaluates to false: {}",
        problem
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "action": "purchase",
            "amount": 149.99,
            "merchant": "amazon.com",
            "category": "retail",
            "tags": ["books", "gifts"],
            "spend": { "daily": 450.0, "monthly": 1200.0 },
            "context": { "category": "retail", "quantity": "3" }
        })
    }

    fn cond(field: &str, operator: Operator, value: Value) -> Condition {
        Condition::new(field, operator, value)
    }

    #[test]
    fn equality_operators() {
        assert!(cond("merchant", Operator::Eq, json!("amazon.com")).evaluate(&ctx()));
        assert!(!cond("merchant", Operator::Eq, json!("ebay.com")).evaluate(&ctx()));
        assert!(cond("merchant", Operator::Neq, json!("ebay.com")).evaluate(&ctx()));
        assert!(cond("amount", Operator::Eq, json!(149.99)).evaluate(&ctx()));
    }

    #[test]
    fn numeric_operators_coerce_strings() {
        assert!(cond("amount", Operator::Lte, json!(300)).evaluate(&ctx()));
        assert!(cond("amount", Operator::Gt, json!("100")).evaluate(&ctx()));
        assert!(cond("context.quantity", Operator::Gte, json!(3)).evaluate(&ctx()));
        assert!(!cond("amount", Operator::Lt, json!(100)).evaluate(&ctx()));
    }

    #[test]
    fn non_numeric_comparison_fails_closed() {
        assert!(!cond("merchant", Operator::Gt, json!(10)).evaluate(&ctx()));
        assert!(!cond("amount", Operator::Lte, json!("lots")).evaluate(&ctx()));
    }

    #[test]
    fn missing_field_is_false_except_negations() {
        let c = ctx();
        for op in [
            Operator::Eq,
            Operator::Gt,
            Operator::Gte,
            Operator::Lt,
            Operator::Lte,
            Operator::Contains,
            Operator::Matches,
        ] {
            assert!(!cond("nope", op, json!(1)).evaluate(&c), "{} on missing field", op);
        }
        assert!(!cond("nope", Operator::In, json!([1])).evaluate(&c));
        assert!(cond("nope", Operator::Neq, json!(1)).evaluate(&c));
        assert!(cond("nope", Operator::Nin, json!([1])).evaluate(&c));
    }

    #[test]
    fn membership_operators() {
        let blocked = json!(["pokerstars.com", "bet365.com"]);
        assert!(!cond("merchant", Operator::In, blocked.clone()).evaluate(&ctx()));
        assert!(cond("merchant", Operator::Nin, blocked).evaluate(&ctx()));
        assert!(cond("category", Operator::In, json!(["retail", "travel"])).evaluate(&ctx()));
    }

    #[test]
    fn in_with_scalar_value_fails_closed() {
        assert!(!cond("merchant", Operator::In, json!("amazon.com")).evaluate(&ctx()));
        assert!(!cond("merchant", Operator::Nin, json!("amazon.com")).evaluate(&ctx()));
    }

    #[test]
    fn contains_handles_strings_and_lists() {
        assert!(cond("merchant", Operator::Contains, json!("amazon")).evaluate(&ctx()));
        assert!(cond("tags", Operator::Contains, json!("gifts")).evaluate(&ctx()));
        assert!(!cond("tags", Operator::Contains, json!("gift")).evaluate(&ctx()));
    }

    #[test]
    fn matches_uses_regex() {
        assert!(cond("merchant", Operator::Matches, json!(r"^amazon\.(com|de)$")).evaluate(&ctx()));
        assert!(cond("amount", Operator::Matches, json!(r"^149\.")).evaluate(&ctx()));
        assert!(!cond("merchant", Operator::Matches, json!("^ebay")).evaluate(&ctx()));
    }

    #[test]
    fn invalid_regex_fails_closed() {
        let bad = cond("merchant", Operator::Matches, json!("(unclosed"));
        assert!(!bad.evaluate(&ctx()));
        assert_eq!(bad.validate().len(), 1);
    }

    #[test]
    fn within_limit_checks_counter_plus_amount() {
        let c = json!({ "amount": 50.0, "spend": { "daily": 450.0 } });
        assert!(cond("spend.daily", Operator::WithinLimit, json!(500)).evaluate(&c));

        let c = json!({ "amount": 50.01, "spend": { "daily": 450.0 } });
        assert!(!cond("spend.daily", Operator::WithinLimit, json!(500)).evaluate(&c));
    }

    #[test]
    fn within_limit_not_applicable_without_amount() {
        let c = json!({ "spend": { "daily": 10_000.0 } });
        assert!(cond("spend.daily", Operator::WithinLimit, json!(500)).evaluate(&c));
    }

    #[test]
    fn amount_comparisons_do_not_apply_without_an_amount() {
        let c = json!({ "action": "purchase", "merchant": "amazon.com" });
        for op in [Operator::Gt, Operator::Gte, Operator::Lt, Operator::Lte] {
            assert!(cond("amount", op, json!(300)).evaluate(&c), "{} on missing amount", op);
        }
        // Equality and membership are not budget checks.
        assert!(!cond("amount", Operator::Eq, json!(300)).evaluate(&c));
        assert!(!cond("amount", Operator::In, json!([300])).evaluate(&c));
        // Other numeric fields still fail closed.
        assert!(!cond("context.quantity", Operator::Lte, json!(3)).evaluate(&c));
    }

    #[test]
    fn resolve_walks_objects_and_arrays() {
        let c = ctx();
        assert_eq!(resolve(&c, "tags.1"), Some(&json!("gifts")));
        assert_eq!(resolve(&c, "spend.daily"), Some(&json!(450.0)));
        assert_eq!(resolve(&c, "spend.weekly"), None);
        assert_eq!(resolve(&json!({ "a": null }), "a"), None);
    }

    #[test]
    fn validate_reports_shape_errors() {
        assert_eq!(cond("merchant", Operator::In, json!("x")).validate().len(), 1);
        assert_eq!(cond("amount", Operator::Lte, json!("abc")).validate().len(), 1);
        assert_eq!(cond("merchant", Operator::Matches, json!(5)).validate().len(), 1);
        assert!(cond("amount", Operator::Lte, json!(300)).validate().is_empty());
    }

    #[test]
    fn operator_deserializes_from_snake_case() {
        let c: Condition =
            serde_yaml::from_str("field: spend.daily\noperator: within_limit\nvalue: 500\n").unwrap();
        assert_eq!(c.operator, Operator::WithinLimit);
    }
}
