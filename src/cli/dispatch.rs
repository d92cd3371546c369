use super::check::cmd_check;
use super::env::CliArgs;
use super::run::cmd_run;
use crate::cli::commands::Commands;
use crate::config::AppConfig;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, config: AppConfig) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, config).await,
        Commands::Check => cmd_check(config).await,
    }
}
