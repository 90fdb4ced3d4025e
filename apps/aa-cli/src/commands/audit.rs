// audit.rs — Audit subcommands: verify, tail.

use std::path::PathBuf;

use aa_audit::{AuditError, AuditEvent, AuditLog};
use aa_authz::AuthzConfig;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify the audit log hash chain integrity.
    Verify {
        /// Path to audit log (defaults to .agentauth/audit.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Show recent audit events.
    Tail {
        /// Path to audit log (defaults to .agentauth/audit.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Number of events to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
}

pub fn execute(cmd: &AuditCommands, config: &AuthzConfig) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::Verify { log } => {
            let path = log.clone().unwrap_or_else(|| config.audit_log.clone());
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            match AuditLog::verify_chain(&path) {
                Ok(count) => {
                    println!("Audit log verified: {} event(s), hash chain intact.", count);
                }
                Err(AuditError::IntegrityViolation {
                    line,
                    expected,
                    actual,
                }) => {
                    println!("INTEGRITY VIOLATION at line {}:", line);
                    println!("  Expected previous_hash: {}", expected);
                    println!("  Actual previous_hash:   {}", actual);
                    println!();
                    println!("The audit log may have been tampered with.");
                    anyhow::bail!("Audit log integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        AuditCommands::Tail { log, n } => {
            let path = log.clone().unwrap_or_else(|| config.audit_log.clone());
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            let recent = AuditLog::tail(&path, *n)?;
            if recent.is_empty() {
                println!("No audit events.");
                return Ok(());
            }

            println!(
                "{:<20} {:<12} {:<17} {:<14} {:<8} REASON",
                "TIMESTAMP", "AGENT", "KIND", "ACTION", "DECISION"
            );
            println!("{}", "-".repeat(100));
            for event in &recent {
                println!("{}", format_row(event));
            }
        }
    }

    Ok(())
}

fn format_row(event: &AuditEvent) -> String {
    format!(
        "{:<20} {:<12} {:<17} {:<14} {:<8} {}",
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        event.agent_id,
        event.kind.to_string(),
        event.action.as_deref().unwrap_or("-"),
        event.decision.as_deref().unwrap_or("-"),
        event
            .reason
            .as_deref()
            .or(event.consent_id.as_deref())
            .unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aa_audit::AuditKind;
    use tempfile::TempDir;

    #[test]
    fn verify_reports_tampering() {
        let dir = TempDir::new().unwrap();
        let config = AuthzConfig::for_project(dir.path());
        {
            let mut log = AuditLog::open(&config.audit_log).unwrap();
            for decision in ["ALLOWED", "DENIED"] {
                let mut event = AuditEvent::new("a1", AuditKind::Authorization)
                    .with_action("purchase")
                    .with_decision(decision, "test");
                log.append(&mut event).unwrap();
            }
        }
        let verify = AuditCommands::Verify { log: None };
        assert!(execute(&verify, &config).is_ok());

        let content = std::fs::read_to_string(&config.audit_log).unwrap();
        std::fs::write(&config.audit_log, content.replacen("ALLOWED", "DENIED", 1)).unwrap();
        assert!(execute(&verify, &config).is_err());
    }

    #[test]
    fn missing_log_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let config = AuthzConfig::for_project(dir.path());
        assert!(execute(&AuditCommands::Tail { log: None, n: 5 }, &config).is_ok());
    }

    #[test]
    fn consent_rows_fall_back_to_consent_id() {
        let event = AuditEvent::new("a1", AuditKind::ConsentApproved).with_consent("cons_1");
        let row = format_row(&event);
        assert!(row.contains("consent_approved"));
        assert!(row.ends_with("cons_1"));
    }
}
