//! DeepThink CLI entry point.

use clap::Parser;

use deepthink::cli::commands;
use deepthink::cli::{handle_error, Cli, Commands};
use deepthink::infrastructure::config::ConfigLoader;
use deepthink::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => handle_error(err, json),
    };
    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, json),
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, config, json).await,
        Commands::Run(args) => commands::run::execute(args, config, json).await,
        Commands::Show(args) => commands::show::execute(args, config, json).await,
        Commands::Runs(args) => commands::runs::execute(args, config, json).await,
        Commands::Cancel(args) => commands::cancel::execute(args, config, json).await,
        Commands::Costs(args) => commands::costs::execute(args, config, json).await,
        Commands::Maintain(args) => commands::maintain::execute(args, config, json).await,
        Commands::Lanes => commands::lanes::execute(&config, json),
        Commands::Provision(args) => commands::provision::execute(args, config, json).await,
    };

    if let Err(err) = result {
        handle_error(err, json);
    }
}
