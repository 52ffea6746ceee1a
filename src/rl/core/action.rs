//! Action Space
//!
//! Discrete action space shared by the environment and the DQN agent.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpotbotError};

/// Number of discrete actions
pub const NUM_DISCRETE_ACTIONS: usize = 3;

/// Discrete action space for DQN-style agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum DiscreteAction {
    /// Do nothing, maintain current state
    #[default]
    Hold = 0,
    /// Move the position toward the target fraction of equity
    Buy = 1,
    /// Exit the whole position
    Sell = 2,
}

impl DiscreteAction {
    /// Convert from action index
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Hold),
            1 => Some(Self::Buy),
            2 => Some(Self::Sell),
            _ => None,
        }
    }

    /// Convert from action index, rejecting anything outside {0, 1, 2}
    pub fn try_from_index(index: usize) -> Result<Self> {
        Self::from_index(index).ok_or(SpotbotError::InvalidAction(index))
    }

    /// Convert to action index
    pub fn to_index(self) -> usize {
        self as usize
    }

    /// Get all possible actions
    pub fn all() -> &'static [DiscreteAction] {
        &[Self::Hold, Self::Buy, Self::Sell]
    }

    /// Check if this action would place an order
    pub fn is_trade(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }

    /// Short name used in log records
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for DiscreteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
