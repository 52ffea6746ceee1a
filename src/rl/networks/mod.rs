//! Neural Network Architectures
//!
//! State encoder and Q-network for value-based control.

pub mod encoder;
pub mod q_network;

pub use encoder::{ObservationEncoder, ObservationEncoderConfig};
pub use q_network::{QNetwork, QNetworkConfig};
