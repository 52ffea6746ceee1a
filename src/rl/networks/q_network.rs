//! Q-Network (action-value function)
//!
//! Maps an observation to one Q-value per discrete action.

use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

use super::encoder::{ObservationEncoder, ObservationEncoderConfig};
use crate::rl::core::NUM_DISCRETE_ACTIONS;

/// Q-network configuration
#[derive(Config, Debug)]
pub struct QNetworkConfig {
    pub encoder: ObservationEncoderConfig,
    /// Number of discrete actions
    #[config(default = "NUM_DISCRETE_ACTIONS")]
    pub num_actions: usize,
    /// Hidden dimension of the Q head
    #[config(default = "64")]
    pub hidden_dim: usize,
}

impl Default for QNetworkConfig {
    fn default() -> Self {
        Self {
            encoder: ObservationEncoderConfig::new(),
            num_actions: NUM_DISCRETE_ACTIONS,
            hidden_dim: 64,
        }
    }
}

impl QNetworkConfig {
    /// Size every layer from a single hidden width
    pub fn with_hidden(hidden_dim: usize) -> Self {
        Self {
            encoder: ObservationEncoderConfig::new().with_width(hidden_dim),
            num_actions: NUM_DISCRETE_ACTIONS,
            hidden_dim,
        }
    }

    /// Initialize Q-network
    pub fn init<B: Backend>(&self, device: &B::Device) -> QNetwork<B> {
        let encoder = self.encoder.init(device);
        let fc_hidden = LinearConfig::new(self.encoder.width, self.hidden_dim).init(device);
        let q_head = LinearConfig::new(self.hidden_dim, self.num_actions).init(device);

        QNetwork {
            encoder,
            fc_hidden,
            q_head,
            activation: Relu::new(),
        }
    }
}

/// Q-Network
///
/// Estimates the expected discounted return of every action in a state.
/// Used as both the online and the target network in DQN.
#[derive(Module, Debug)]
pub struct QNetwork<B: Backend> {
    encoder: ObservationEncoder<B>,
    fc_hidden: Linear<B>,
    q_head: Linear<B>,
    activation: Relu,
}

impl<B: Backend> QNetwork<B> {
    /// Forward pass returning Q-values `[batch, num_actions]`
    pub fn forward(&self, state: Tensor<B, 2>) -> Tensor<B, 2> {
        let encoded = self.encoder.forward(state);
        let hidden = self.fc_hidden.forward(encoded);
        let hidden = self.activation.forward(hidden);
        self.q_head.forward(hidden)
    }
}
