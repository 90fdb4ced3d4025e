// agent.rs — Agent subcommands: list.

use aa_authz::{AgentStore, AuthzConfig, EngineSettings, FileStore};
use chrono::Utc;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum AgentCommands {
    /// List agents with their limits and current spend.
    List,
}

pub fn execute(cmd: &AgentCommands, config: &AuthzConfig) -> anyhow::Result<()> {
    match cmd {
        AgentCommands::List => {
            let agents = FileStore::new(config).list_agents()?;
            if agents.is_empty() {
                println!("No agents in {}", config.agents_file.display());
                return Ok(());
            }
            let offset = EngineSettings::load(&config.settings_file)?.utc_offset();
            let at = Utc::now().with_timezone(&offset);

            println!(
                "{:<16} {:<10} {:<24} {:>12} {:>12}",
                "ID", "STATUS", "POLICIES", "TODAY", "DAILY LIMIT"
            );
            println!("{}", "-".repeat(80));
            for agent in &agents {
                println!(
                    "{:<16} {:<10} {:<24} {:>12.2} {:>12}",
                    agent.id,
                    agent.status.to_string(),
                    agent.policy_ids.join(","),
                    agent.spent_today(at),
                    agent
                        .limits
                        .daily
                        .map(|l| format!("{:.2}", l))
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
    }
    Ok(())
}
