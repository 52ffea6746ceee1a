use clap::{Parser, Subcommand};

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "spotbot")]
#[command(version = "0.1.0")]
#[command(about = "Single-asset spot trading bot driven by a DQN policy", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml, $SPOTBOT_ENV.toml)
    #[arg(short, long, global = true, default_value = "config", env = "SPOTBOT_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the agent offline on a candle CSV
    Train {
        /// Candle CSV (timestamp,open,high,low,close,volume)
        #[arg(short, long)]
        data: String,
        /// Number of training episodes
        #[arg(short, long)]
        episodes: Option<usize>,
        /// Where to save the trained weights
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Run the greedy policy over a candle CSV and report performance
    Backtest {
        /// Candle CSV (timestamp,open,high,low,close,volume)
        #[arg(short, long)]
        data: String,
        /// Weights to evaluate
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Trade a polled market feed with the risk overlay
    Live {
        /// Symbol to trade (e.g., BTCUSDT)
        #[arg(short, long)]
        symbol: Option<String>,
        /// Candle interval (e.g., 1m, 5m)
        #[arg(short, long)]
        timeframe: Option<String>,
        /// Replay a candle CSV instead of polling the exchange
        #[arg(long)]
        replay: Option<String>,
        /// Stop after this many cycles
        #[arg(long)]
        max_cycles: Option<usize>,
        /// Act epsilon-greedily instead of greedily
        #[arg(long)]
        explore: bool,
    },
}

impl Commands {
    /// Fold command-line overrides into the loaded config
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        match self {
            Commands::Train {
                episodes, model, ..
            } => {
                if let Some(episodes) = episodes {
                    config.training.episodes = *episodes;
                }
                if let Some(model) = model {
                    config.training.model_path = model.clone();
                }
            }
            Commands::Backtest { model, .. } => {
                if let Some(model) = model {
                    config.training.model_path = model.clone();
                }
            }
            Commands::Live {
                symbol,
                timeframe,
                replay,
                max_cycles,
                explore,
            } => {
                if let Some(symbol) = symbol {
                    config.live.symbol = symbol.clone();
                }
                if let Some(timeframe) = timeframe {
                    config.live.timeframe = timeframe.clone();
                }
                if replay.is_some() {
                    config.live.replay_csv = replay.clone();
                }
                if max_cycles.is_some() {
                    config.live.max_cycles = *max_cycles;
                }
                config.live.explore |= *explore;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_train() {
        let cli = Cli::parse_from(["spotbot", "train", "--data", "btc.csv", "--episodes", "3"]);
        assert_eq!(cli.config, "config");

        let mut config = AppConfig::default();
        cli.command.apply_overrides(&mut config);
        assert_eq!(config.training.episodes, 3);
        assert!(matches!(cli.command, Commands::Train { ref data, .. } if data == "btc.csv"));
    }

    #[test]
    fn test_live_overrides() {
        let cli = Cli::parse_from([
            "spotbot",
            "--config",
            "/etc/spotbot",
            "live",
            "--symbol",
            "ETHUSDT",
            "--max-cycles",
            "10",
        ]);
        assert_eq!(cli.config, "/etc/spotbot");

        let mut config = AppConfig::default();
        cli.command.apply_overrides(&mut config);
        assert_eq!(config.live.symbol, "ETHUSDT");
        assert_eq!(config.live.timeframe, "1m");
        assert_eq!(config.live.max_cycles, Some(10));
        assert!(!config.live.explore);
    }

    #[test]
    fn test_data_is_required() {
        assert!(Cli::try_parse_from(["spotbot", "backtest"]).is_err());
    }
}
