//! Command-line argument types.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::cancel::CancelArgs;
use crate::cli::commands::costs::CostsArgs;
use crate::cli::commands::init::InitArgs;
use crate::cli::commands::maintain::MaintainArgs;
use crate::cli::commands::provision::ProvisionArgs;
use crate::cli::commands::run::RunArgs;
use crate::cli::commands::runs::RunsArgs;
use crate::cli::commands::show::ShowArgs;

#[derive(Parser)]
#[command(name = "deepthink")]
#[command(about = "Multi-pass reasoning pipeline", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .deepthink/
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write the default configuration and create the database
    Init(InitArgs),

    /// Submit a goal and wait for the answer
    Run(RunArgs),

    /// Show one run in detail
    Show(ShowArgs),

    /// List recent runs
    Runs(RunsArgs),

    /// Cancel a pending or running run
    Cancel(CancelArgs),

    /// Report spend from the cost ledger
    Costs(CostsArgs),

    /// Sweep the cache and create cost partitions
    Maintain(MaintainArgs),

    /// List configured lanes
    Lanes,

    /// Create a user's default profile
    Provision(ProvisionArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_global_json() {
        let cli = Cli::try_parse_from(["deepthink", "run", "Explain Raft", "--lane", "quick", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.goal, "Explain Raft");
                assert_eq!(args.lane.as_deref(), Some("quick"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_show_requires_uuid() {
        assert!(Cli::try_parse_from(["deepthink", "show", "not-a-uuid"]).is_err());
    }
}
