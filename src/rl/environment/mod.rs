//! Simulated Trading Environment for RL Training
//!
//! This module provides a gym-like environment for training RL agents
//! on historical or live candle data without risking real capital.

mod features;
mod trading;

pub use features::{FeatureBuilder, Features, PriceSeries, MIN_WARMUP, RET_LOOKBACK, VOL_WINDOW};
pub use trading::{
    AccountState, EnvironmentConfig, Position, StepInfo, StepResult, Trade, TradingEnvironment,
    TARGET_TOLERANCE,
};
