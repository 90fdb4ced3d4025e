// policy.rs — Policy subcommands: validate, test.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aa_audit::MemoryAuditSink;
use aa_authz::{
    AgentStore, AuthorizationService, AuthzConfig, EngineSettings, FileStore, MemoryStore,
    PolicyStore,
};
use aa_policy::{AuthorizationRequest, Decision};
use anyhow::Context;
use clap::Subcommand;
use serde::Deserialize;

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Report configuration problems in policies and agent assignments.
    Validate,
    /// Run declarative test cases against a scratch copy of project state.
    Test {
        /// YAML file of test cases.
        cases: PathBuf,
    },
}

/// One expectation in a `policy test` file.
///
/// ```yaml
/// - name: small purchase
///   request: { agentId: a1, action: purchase, amount: 20 }
///   expect: ALLOWED
/// - name: gambling blocked
///   request: { agentId: a1, action: purchase, amount: 5, merchant: pokerstars.com }
///   expect: DENIED
///   reason_contains: blocked merchant
/// ```
#[derive(Debug, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub request: AuthorizationRequest,
    pub expect: Decision,
    #[serde(default)]
    pub reason_contains: Option<String>,
}

pub fn execute(cmd: &PolicyCommands, config: &AuthzConfig) -> anyhow::Result<()> {
    match cmd {
        PolicyCommands::Validate => validate(config),
        PolicyCommands::Test { cases } => {
            let failed = run_cases(config, cases)?;
            if failed > 0 {
                anyhow::bail!("{} test case(s) failed", failed);
            }
            Ok(())
        }
    }
}

fn validate(config: &AuthzConfig) -> anyhow::Result<()> {
    let store = FileStore::new(config);
    let policies = store.list_policies()?;
    let agents = store.list_agents()?;

    let mut problems: Vec<String> = policies
        .iter()
        .flat_map(|p| p.validate())
        .map(|issue| issue.to_string())
        .collect();
    for agent in &agents {
        for policy_id in &agent.policy_ids {
            if !policies.iter().any(|p| &p.id == policy_id) {
                problems.push(format!(
                    "agent '{}': assigned policy '{}' does not exist",
                    agent.id, policy_id
                ));
            }
        }
    }

    if problems.is_empty() {
        println!(
            "{} polic(ies), {} agent(s): no issues found.",
            policies.len(),
            agents.len()
        );
        return Ok(());
    }
    for problem in &problems {
        println!("  - {}", problem);
    }
    anyhow::bail!("{} configuration issue(s) found", problems.len())
}

/// Run every case in order against one scratch service, so spend carries
/// from case to case. Returns the number of failures.
fn run_cases(config: &AuthzConfig, cases_path: &Path) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(cases_path)
        .with_context(|| format!("failed to read {}", cases_path.display()))?;
    let cases: Vec<TestCase> = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", cases_path.display()))?;

    let files = FileStore::new(config);
    let scratch = Arc::new(MemoryStore::snapshot(&files, &files, &files)?);
    let settings = EngineSettings::load(&config.settings_file)?;
    let service = AuthorizationService::new(
        scratch.clone(),
        scratch.clone(),
        scratch,
        Arc::new(MemoryAuditSink::new()),
        &settings,
    );

    let mut failed = 0;
    for case in &cases {
        let outcome = service.authorize(&case.request);
        let verdict = match &outcome {
            Ok(result) => {
                let reason_ok = case
                    .reason_contains
                    .as_deref()
                    .map_or(true, |needle| result.reason.contains(needle));
                if result.decision == case.expect && reason_ok {
                    None
                } else {
                    Some(format!(
                        "expected {}, got {}: {}",
                        case.expect, result.decision, result.reason
                    ))
                }
            }
            Err(e) => Some(format!("expected {}, got error: {}", case.expect, e)),
        };
        match verdict {
            None => println!("PASS  {}", case.name),
            Some(why) => {
                failed += 1;
                println!("FAIL  {} ({})", case.name, why);
            }
        }
    }
    println!();
    println!("{} passed, {} failed", cases.len() - failed, failed);
    Ok(failed)
}
