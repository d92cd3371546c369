use clap::Subcommand;

use super::run::RunArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Watch for snapshots and roll out new generations until interrupted
    Run(RunArgs),

    /// Validate configuration and probe the target once
    Check,
}
