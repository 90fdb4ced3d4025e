// cli_flow.rs — End-to-end test of the agentauth binary.
//
// Flow:
//   1. Author agents.yaml and policies.yaml in a scratch project
//   2. agentauth authorize → ALLOWED (0), DENIED (2), PENDING (3)
//   3. agentauth consent approve → re-submit with --consent-id → ALLOWED
//   4. agentauth audit verify → chain intact
//   5. Malformed request → exit 1

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn agentauth(project: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_agentauth"))
        .arg("--project-root")
        .arg(project)
        .args(args)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn setup() -> TempDir {
    let project = TempDir::new().unwrap();
    let state = project.path().join(".agentauth");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(
        state.join("agents.yaml"),
        r#"
- id: a1
  name: Shopping assistant
  policy_ids: [shopping]
  limits:
    daily: 500
"#,
    )
    .unwrap();
    std::fs::write(
        state.join("policies.yaml"),
        r#"
- id: shopping
  name: Everyday shopping
  rules:
    - id: gambling
      action: purchase
      effect: deny
      priority: 100
      description: blocked merchant
      conditions:
        - field: merchant
          operator: in
          value: [pokerstars.com]
    - id: small
      action: purchase
      effect: allow
      priority: 10
      conditions:
        - field: amount
          operator: lte
          value: 300
    - id: wires
      action: transfer.*
      effect: require_consent
      priority: 50
"#,
    )
    .unwrap();
    project
}

#[test]
fn authorize_exit_codes_and_consent_round_trip() {
    let project = setup();
    let root = project.path();

    let allowed = agentauth(
        root,
        &["authorize", "--agent", "a1", "--action", "purchase", "--amount", "149.99", "--merchant", "amazon.com"],
    );
    assert_eq!(allowed.status.code(), Some(0), "{}", stdout(&allowed));
    assert!(stdout(&allowed).starts_with("ALLOWED"));

    let denied = agentauth(
        root,
        &["authorize", "--agent", "a1", "--action", "purchase", "--amount", "5", "--merchant", "pokerstars.com"],
    );
    assert_eq!(denied.status.code(), Some(2));
    assert!(stdout(&denied).contains("blocked merchant"));

    let pending = agentauth(
        root,
        &["authorize", "--agent", "a1", "--action", "transfer.wire", "--amount", "50", "--json"],
    );
    assert_eq!(pending.status.code(), Some(3));
    let result: serde_json::Value = serde_json::from_slice(&pending.stdout).unwrap();
    assert_eq!(result["decision"], "PENDING");
    let consent_id = result["consentId"].as_str().unwrap().to_string();

    let approve = agentauth(root, &["consent", "approve", &consent_id, "--reviewer", "alice"]);
    assert_eq!(approve.status.code(), Some(0));

    let retry = agentauth(
        root,
        &["authorize", "--agent", "a1", "--action", "transfer.wire", "--amount", "50", "--consent-id", &consent_id],
    );
    assert_eq!(retry.status.code(), Some(0), "{}", stdout(&retry));

    let verify = agentauth(root, &["audit", "verify"]);
    assert_eq!(verify.status.code(), Some(0));
    // Four decisions plus one approval.
    assert!(stdout(&verify).contains("5 event(s)"));
}

#[test]
fn malformed_request_exits_with_one() {
    let project = setup();
    let output = agentauth(
        project.path(),
        &["authorize", "--agent", "a1", "--action", "purchase", "--amount=-10"],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(!project.path().join(".agentauth/audit.jsonl").exists()
        || std::fs::read_to_string(project.path().join(".agentauth/audit.jsonl"))
            .unwrap()
            .trim()
            .is_empty());
}

#[test]
fn policy_validate_reports_bad_regex() {
    let project = setup();
    std::fs::write(
        project.path().join(".agentauth/policies.yaml"),
        r#"
- id: shopping
  name: Broken
  rules:
    - action: purchase
      effect: deny
      conditions:
        - field: merchant
          operator: matches
          value: "([unclosed"
"#,
    )
    .unwrap();
    let output = agentauth(project.path(), &["policy", "validate"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("policy 'shopping' rule #0"));
}
