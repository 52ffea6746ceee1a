//! Live Trading
//!
//! Polled market feeds, the feed adapter that drives the simulator in real
//! time, and the risk overlay guarding it.

pub mod adapter;
pub mod feed;
pub mod risk;

pub use adapter::{AdapterState, LiveConfig, LiveFeedAdapter, LiveStepRecord, LIVE_LOG_TARGET};
pub use feed::{BinanceKlineFeed, CsvReplayFeed, MarketDataFeed};
pub use risk::{RiskConfig, RiskOverlay, RiskReason, RiskState};
