//! RL Configuration
//!
//! Configuration structs for the value-based agent and its training loops.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpotbotError};

/// DQN agent hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Learning rate
    pub lr: f64,
    /// Discount factor (gamma)
    pub gamma: f32,
    /// Mini-batch size
    pub batch_size: usize,
    /// Replay buffer capacity
    pub buffer_capacity: usize,
    /// Minimum samples before first update
    pub min_buffer_size: usize,
    /// Environment steps between gradient updates
    pub train_interval: usize,
    /// Gradient updates between target network syncs
    pub target_sync_interval: usize,
    /// Exploration rate at the start of annealing
    pub epsilon_start: f64,
    /// Exploration floor
    pub epsilon_end: f64,
    /// Steps over which epsilon is annealed linearly
    pub epsilon_decay_steps: usize,
    /// Hidden layer width of the Q-network
    pub hidden_dim: usize,
    /// Seed for exploration, replay sampling and weight init
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            gamma: 0.99,
            batch_size: 64,
            buffer_capacity: 50_000,
            min_buffer_size: 500,
            train_interval: 1,
            target_sync_interval: 500,
            epsilon_start: 1.0,
            epsilon_end: 0.05,
            epsilon_decay_steps: 20_000,
            hidden_dim: 64,
            seed: None,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(SpotbotError::Validation(format!(
                "agent.lr must be > 0 (got {})",
                self.lr
            )));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(SpotbotError::Validation(format!(
                "agent.gamma must be in [0, 1] (got {})",
                self.gamma
            )));
        }
        if self.batch_size == 0 || self.hidden_dim == 0 {
            return Err(SpotbotError::Validation(
                "agent.batch_size and agent.hidden_dim must be > 0".to_string(),
            ));
        }
        if self.train_interval == 0 || self.target_sync_interval == 0 {
            return Err(SpotbotError::Validation(
                "agent.train_interval and agent.target_sync_interval must be > 0".to_string(),
            ));
        }
        if self.buffer_capacity < self.batch_size {
            return Err(SpotbotError::Validation(format!(
                "agent.buffer_capacity ({}) must be >= batch_size ({})",
                self.buffer_capacity, self.batch_size
            )));
        }
        if self.min_buffer_size > self.buffer_capacity {
            return Err(SpotbotError::Validation(format!(
                "agent.min_buffer_size ({}) must be <= buffer_capacity ({})",
                self.min_buffer_size, self.buffer_capacity
            )));
        }
        let eps_ok = |e: f64| (0.0..=1.0).contains(&e);
        if !eps_ok(self.epsilon_start) || !eps_ok(self.epsilon_end) {
            return Err(SpotbotError::Validation(
                "agent.epsilon_start and agent.epsilon_end must be in [0, 1]".to_string(),
            ));
        }
        if self.epsilon_end > self.epsilon_start {
            return Err(SpotbotError::Validation(format!(
                "agent.epsilon_end ({}) must be <= epsilon_start ({})",
                self.epsilon_end, self.epsilon_start
            )));
        }
        Ok(())
    }
}

/// Training loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Offline training episodes
    pub episodes: usize,
    /// Weight file loaded at startup and written on exit
    pub model_path: String,
    /// Directory for periodic checkpoints
    pub checkpoint_dir: String,
    /// Cycles (live) or episodes (offline) between checkpoints, 0 disables
    pub checkpoint_every: usize,
    /// Periodic checkpoints kept on disk
    pub max_checkpoints: usize,
    /// Live loop stops once equity falls to this fraction of the starting equity
    pub global_loss_fraction: f64,
    /// Where the final performance summary is written
    pub summary_path: String,
    /// Keep learning while trading live
    pub online_learning: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            episodes: 50,
            model_path: "./models/dqn".to_string(),
            checkpoint_dir: "./checkpoints".to_string(),
            checkpoint_every: 100,
            max_checkpoints: 5,
            global_loss_fraction: 0.5,
            summary_path: "./reports/summary.json".to_string(),
            online_learning: true,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.episodes == 0 {
            return Err(SpotbotError::Validation(
                "training.episodes must be > 0".to_string(),
            ));
        }
        if !(self.global_loss_fraction >= 0.0 && self.global_loss_fraction < 1.0) {
            return Err(SpotbotError::Validation(format!(
                "training.global_loss_fraction must be in [0, 1) (got {})",
                self.global_loss_fraction
            )));
        }
        if self.model_path.trim().is_empty() || self.summary_path.trim().is_empty() {
            return Err(SpotbotError::Validation(
                "training.model_path and training.summary_path must be set".to_string(),
            ));
        }
        if self.checkpoint_every > 0 && self.max_checkpoints == 0 {
            return Err(SpotbotError::Validation(
                "training.max_checkpoints must be > 0 when checkpointing".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(AgentConfig::default().validate().is_ok());
        assert!(TrainingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_epsilon() {
        let config = AgentConfig {
            epsilon_start: 0.1,
            epsilon_end: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SpotbotError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_small_buffer() {
        let config = AgentConfig {
            buffer_capacity: 8,
            batch_size: 32,
            min_buffer_size: 8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{"lr": 0.01}"#).unwrap();
        assert_eq!(config.lr, 0.01);
        assert_eq!(config.batch_size, AgentConfig::default().batch_size);
    }
}
