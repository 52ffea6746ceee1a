pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod live;
pub mod orchestrator;
pub mod rl;

pub use config::{AppConfig, LoggingConfig};
pub use coordination::{install_signal_handlers, ShutdownSignal, StopToken};
pub use domain::{load_candles_csv, Candle};
pub use error::{Result, SpotbotError};
pub use live::{
    BinanceKlineFeed, CsvReplayFeed, LiveConfig, LiveFeedAdapter, MarketDataFeed, RiskConfig,
    RiskOverlay, RiskReason,
};
pub use orchestrator::{Orchestrator, RunReport, StopReason};
pub use rl::{
    AgentConfig, DiscreteAction, DqnAgent, EnvironmentConfig, Observation, PerformanceSummary,
    TradingEnvironment, TrainingConfig,
};
