//! RL Algorithms
//!
//! Implementations of reinforcement learning algorithms.

pub mod dqn;

pub use dqn::{greedy_action, DefaultBackend, DefaultDqnAgent, DqnAgent};
