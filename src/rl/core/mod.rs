//! Core RL abstractions
//!
//! Fundamental types for observations and actions.

pub mod action;
pub mod state;

pub use action::{DiscreteAction, NUM_DISCRETE_ACTIONS};
pub use state::{Observation, FLAT_EPSILON, TOTAL_FEATURES};
