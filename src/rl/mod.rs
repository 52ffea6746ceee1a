//! Reinforcement Learning Module
//!
//! Value-based trading policy built on the Burn framework.
//!
//! # Features
//!
//! - **Environment**: deterministic single-asset spot simulator over candles
//! - **Action Space**: discrete Hold/Buy/Sell
//! - **Algorithm**: double DQN with experience replay
//! - **Training**: offline episodes, greedy backtests, checkpointing

pub mod algorithms;
pub mod config;
pub mod core;
pub mod environment;
pub mod memory;
pub mod networks;
pub mod training;

// Config exports
pub use config::{AgentConfig, TrainingConfig};

// Core exports
pub use core::{DiscreteAction, Observation, NUM_DISCRETE_ACTIONS, TOTAL_FEATURES};

// Algorithm exports
pub use algorithms::{DefaultBackend, DefaultDqnAgent, DqnAgent};

// Memory exports
pub use memory::{ReplayBuffer, Transition};

// Environment exports
pub use environment::{EnvironmentConfig, PriceSeries, StepInfo, StepResult, TradingEnvironment};

// Training exports
pub use training::{Checkpointer, MetricsTracker, PerformanceSummary};
