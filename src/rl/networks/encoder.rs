//! Observation Encoder
//!
//! Stack of ReLU layers turning the raw observation vector into the latent
//! features the Q head reads.

use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

use crate::rl::core::TOTAL_FEATURES;

#[derive(Config, Debug)]
pub struct ObservationEncoderConfig {
    #[config(default = "TOTAL_FEATURES")]
    pub input_dim: usize,
    /// Width of every layer, and of the encoder output
    #[config(default = "64")]
    pub width: usize,
    /// Number of layers; at least one is always built
    #[config(default = "2")]
    pub depth: usize,
}

impl ObservationEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ObservationEncoder<B> {
        let layers = (0..self.depth.max(1))
            .map(|i| {
                let input = if i == 0 { self.input_dim } else { self.width };
                LinearConfig::new(input, self.width).init(device)
            })
            .collect();

        ObservationEncoder {
            layers,
            activation: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct ObservationEncoder<B: Backend> {
    layers: Vec<Linear<B>>,
    activation: Relu,
}

impl<B: Backend> ObservationEncoder<B> {
    /// `[batch, input_dim]` to `[batch, width]`
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.layers
            .iter()
            .fold(x, |x, layer| self.activation.forward(layer.forward(x)))
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}
