//! # aa-cli
//!
//! Command-line interface for AgentAuth.
//!
//! - `agentauth authorize` — decide one agent action (exit 0/2/3, 1 on error)
//! - `agentauth policy validate/test` — check policies and run test cases
//! - `agentauth consent list/approve/deny/revoke/expire` — human review
//! - `agentauth agent list` — show agents and their spend
//! - `agentauth audit verify/tail` — inspect the tamper-evident audit trail

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use aa_authz::AuthzConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// AgentAuth CLI — authorize agent actions and review consents.
#[derive(Parser)]
#[command(name = "agentauth", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether an agent may perform an action.
    Authorize(commands::authorize::AuthorizeArgs),
    /// Validate and test policies.
    Policy {
        #[command(subcommand)]
        command: commands::policy::PolicyCommands,
    },
    /// Review pending consents.
    Consent {
        #[command(subcommand)]
        command: commands::consent::ConsentCommands,
    },
    /// Inspect agents.
    Agent {
        #[command(subcommand)]
        command: commands::agent::AgentCommands,
    },
    /// Inspect the audit trail.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
}

fn main() -> ExitCode {
    // Logs go to stderr so they don't interfere with decision output on stdout.
    if let Err(e) = init_tracing() {
        eprintln!("error: {:#}", e);
        return ExitCode::from(1);
    }

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let config = AuthzConfig::for_project(&project_root);

    let outcome = match &cli.command {
        Commands::Authorize(args) => {
            commands::authorize::execute(args, &config).map(|decision| decision.exit_code())
        }
        Commands::Policy { command } => commands::policy::execute(command, &config).map(|_| 0),
        Commands::Consent { command } => commands::consent::execute(command, &config).map(|_| 0),
        Commands::Agent { command } => commands::agent::execute(command, &config).map(|_| 0),
        Commands::Audit { command } => commands::audit::execute(command, &config).map(|_| 0),
    };

    match outcome {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("aa_authz=info".parse()?)
                .add_directive("aa_policy=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
    Ok(())
}
