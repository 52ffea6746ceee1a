//! State Representation
//!
//! Defines the observation the environment hands to the agent.

use serde::{Deserialize, Serialize};

/// Total number of features in the state representation
pub const TOTAL_FEATURES: usize = 6;

/// Position fraction below which the account counts as flat
pub const FLAT_EPSILON: f64 = 1e-6;

/// Observation emitted by the trading environment after every reset/step
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Observation {
    /// Current close relative to the episode reference close, minus one
    pub price_rel: f64,
    /// 1-step close-to-close return
    pub ret_1: f64,
    /// 5-step close-to-close return
    pub ret_5: f64,
    /// Rolling volatility of 1-step returns over 5 steps
    pub vol_5: f64,
    /// Position value as a fraction of equity
    pub position_fraction: f64,
    /// Unrealized PnL of the open position, as a fraction of entry price
    pub unrealized_pnl_pct: f64,
}

impl Observation {
    /// Whether the account holds no position.
    ///
    /// The agent masks Sell on this signal.
    pub fn is_flat(&self) -> bool {
        self.position_fraction.abs() < FLAT_EPSILON
    }

    /// Encode to the network input vector
    pub fn to_features(&self) -> [f32; TOTAL_FEATURES] {
        [
            self.price_rel as f32,
            self.ret_1 as f32,
            self.ret_5 as f32,
            self.vol_5 as f32,
            self.position_fraction as f32,
            self.unrealized_pnl_pct as f32,
        ]
    }

    /// Decode from a network input vector
    pub fn from_features(features: &[f32; TOTAL_FEATURES]) -> Self {
        Self {
            price_rel: features[0] as f64,
            ret_1: features[1] as f64,
            ret_5: features[2] as f64,
            vol_5: features[3] as f64,
            position_fraction: features[4] as f64,
            unrealized_pnl_pct: features[5] as f64,
        }
    }

    /// True when every feature is a finite number
    pub fn is_finite(&self) -> bool {
        self.to_features().iter().all(|v| v.is_finite())
    }
}
