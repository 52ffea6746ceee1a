use clap::Parser;
use spotbot::cli::{Cli, Commands};
use spotbot::config::AppConfig;
use spotbot::error::Result;
use tracing::error;

mod main_modes;
mod main_runtime;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)?;
    cli.command.apply_overrides(&mut config);
    config.validate()?;

    let _log_guard = main_runtime::init_logging(&config.logging);

    let result = match &cli.command {
        Commands::Train { data, .. } => main_modes::run_train(&config, data),
        Commands::Backtest { data, .. } => main_modes::run_backtest(&config, data),
        Commands::Live { .. } => main_modes::run_live(&config).await,
    };

    if let Err(ref e) = result {
        error!("{}", e);
    }
    result
}
