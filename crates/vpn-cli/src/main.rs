use anyhow::Context;
use clap::Parser;
use colored::*;
use std::process;

use vpn_cli::{setup_logging, Cli, CommandHandler, ConfigManager};

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        eprintln!("{} {:#}", "Error:".red(), e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_manager =
        ConfigManager::new(cli.config.clone()).context("failed to load configuration")?;

    setup_logging(cli.verbose, cli.quiet, &config_manager.get_config().logging);

    let mut handler = CommandHandler::new(config_manager);
    handler.set_output_format(cli.format);
    handler.set_actor(cli.actor.clone());

    handler.execute(cli.command).await?;
    Ok(())
}
