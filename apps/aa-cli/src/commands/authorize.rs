// authorize.rs — Decide one agent action against the project's policies.

use aa_authz::{AuthorizationService, AuthzConfig};
use aa_policy::{AuthorizationRequest, AuthorizationResult, Decision};
use anyhow::Context;
use clap::Args;
use serde_json::Value;

#[derive(Args)]
pub struct AuthorizeArgs {
    /// Agent requesting the action.
    #[arg(long)]
    pub agent: String,
    /// Action name (e.g., "purchase").
    #[arg(long)]
    pub action: String,
    /// Transaction amount.
    #[arg(long)]
    pub amount: Option<f64>,
    #[arg(long)]
    pub merchant: Option<String>,
    /// Resource the action targets.
    #[arg(long)]
    pub resource: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Extra context as key=value. Values that parse as JSON keep their type.
    #[arg(long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,
    /// Approved consent to apply to this request.
    #[arg(long)]
    pub consent_id: Option<String>,
    /// Print the full result as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &AuthorizeArgs, config: &AuthzConfig) -> anyhow::Result<Decision> {
    let request = build_request(args)?;
    tracing::debug!(agent_id = %request.agent_id, action = %request.action, "authorize");
    let service = AuthorizationService::open(config)
        .with_context(|| format!("failed to open AgentAuth state in {}", config.state_dir.display()))?;
    let result = service.authorize(&request)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(result.decision)
}

fn build_request(args: &AuthorizeArgs) -> anyhow::Result<AuthorizationRequest> {
    let mut request = AuthorizationRequest::new(&args.agent, &args.action);
    if let Some(amount) = args.amount {
        request = request.with_amount(amount);
    }
    if let Some(merchant) = &args.merchant {
        request = request.with_merchant(merchant);
    }
    if let Some(resource) = &args.resource {
        request = request.with_resource(resource);
    }
    if let Some(description) = &args.description {
        request = request.with_description(description);
    }
    for pair in &args.context {
        let (key, value) = parse_context(pair)?;
        request = request.with_context(key, value);
    }
    if let Some(id) = &args.consent_id {
        request = request.with_consent(id);
    }
    Ok(request)
}

fn parse_context(pair: &str) -> anyhow::Result<(String, Value)> {
    let (key, raw) = pair
        .split_once('=')
        .with_context(|| format!("context must be KEY=VALUE, got '{}'", pair))?;
    if key.is_empty() {
        anyhow::bail!("context key is empty in '{}'", pair);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn print_result(result: &AuthorizationResult) {
    println!("{}: {}", result.decision, result.reason);
    println!("  Request:  {}", result.request_id);
    if let Some(policy) = &result.policy_id {
        println!(
            "  Rule:     {}/{}",
            policy,
            result.rule_id.as_deref().unwrap_or("-")
        );
    }
    if let Some(consent) = &result.consent_id {
        println!("  Consent:  {}", consent);
        println!();
        println!("Approve with: agentauth consent approve {}", consent);
    }
    println!("  Latency:  {:.3} ms", result.latency_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args() -> AuthorizeArgs {
        AuthorizeArgs {
            agent: "a1".into(),
            action: "purchase".into(),
            amount: Some(12.5),
            merchant: Some("amazon.com".into()),
            resource: None,
            description: None,
            context: vec!["channel=web".into(), "items=3".into(), "gift=true".into()],
            consent_id: None,
            json: false,
        }
    }

    #[test]
    fn context_values_keep_json_types() {
        let request = build_request(&args()).unwrap();
        assert_eq!(request.amount, Some(12.5));
        assert_eq!(request.context["channel"], json!("web"));
        assert_eq!(request.context["items"], json!(3));
        assert_eq!(request.context["gift"], json!(true));
    }

    #[test]
    fn malformed_context_is_rejected() {
        assert!(parse_context("no-equals").is_err());
        assert!(parse_context("=value").is_err());
        assert_eq!(parse_context("note=a=b").unwrap().1, json!("a=b"));
    }
}
