// consent.rs — Consent subcommands: list, approve, deny, revoke, expire.

use aa_authz::{AuthorizationService, AuthzConfig};
use aa_policy::{Consent, ConsentStatus};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConsentCommands {
    /// List consents, newest first.
    List {
        /// Only show consents still awaiting a decision.
        #[arg(long)]
        pending: bool,
    },
    /// Approve a pending consent.
    Approve {
        /// Consent ID.
        id: String,
        /// Reviewer name.
        #[arg(long, default_value = "human-reviewer")]
        reviewer: String,
    },
    /// Deny a pending consent.
    Deny {
        /// Consent ID.
        id: String,
        /// Reviewer name.
        #[arg(long, default_value = "human-reviewer")]
        reviewer: String,
    },
    /// Revoke a pending or approved consent.
    Revoke {
        /// Consent ID.
        id: String,
        /// Reviewer name.
        #[arg(long, default_value = "human-reviewer")]
        reviewer: String,
    },
    /// Expire every pending consent past its deadline.
    Expire,
}

pub fn execute(cmd: &ConsentCommands, config: &AuthzConfig) -> anyhow::Result<()> {
    let service = AuthorizationService::open(config)?;
    match cmd {
        ConsentCommands::List { pending } => {
            let consents: Vec<Consent> = service
                .list_consents()?
                .into_iter()
                .filter(|c| !pending || c.status == ConsentStatus::Pending)
                .collect();
            list_consents(&consents);
        }
        ConsentCommands::Approve { id, reviewer } => {
            let consent = service.approve_consent(id, reviewer)?;
            println!("Approved consent {} by {}", consent.id, reviewer);
            println!(
                "Re-submit with: agentauth authorize --agent {} --action {} --consent-id {}",
                consent.agent_id, consent.action, consent.id
            );
        }
        ConsentCommands::Deny { id, reviewer } => {
            let consent = service.deny_consent(id, reviewer)?;
            println!("Denied consent {} by {}", consent.id, reviewer);
        }
        ConsentCommands::Revoke { id, reviewer } => {
            let consent = service.revoke_consent(id, reviewer)?;
            println!("Revoked consent {} by {}", consent.id, reviewer);
        }
        ConsentCommands::Expire => {
            let expired = service.expire_consents()?;
            println!("Expired {} consent(s).", expired.len());
        }
    }
    Ok(())
}

fn list_consents(consents: &[Consent]) {
    if consents.is_empty() {
        println!("No consents.");
        return;
    }

    println!(
        "{:<38} {:<12} {:<16} {:>10} {:<9} CREATED",
        "ID", "AGENT", "ACTION", "AMOUNT", "STATUS"
    );
    println!("{}", "-".repeat(110));
    for consent in consents {
        println!(
            "{:<38} {:<12} {:<16} {:>10} {:<9} {}",
            consent.id,
            consent.agent_id,
            consent.action,
            consent
                .amount
                .map(|a| format!("{:.2}", a))
                .unwrap_or_else(|| "-".to_string()),
            consent.status.to_string(),
            consent.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    println!();
    println!("{} consent(s)", consents.len());
}
