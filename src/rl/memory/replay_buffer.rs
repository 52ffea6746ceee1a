//! Replay Buffer
//!
//! Bounded experience replay buffer for off-policy learning.

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::rl::core::{DiscreteAction, Observation, TOTAL_FEATURES};

/// A single transition in the environment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// State features before action
    pub state: [f32; TOTAL_FEATURES],
    /// Action taken
    pub action: DiscreteAction,
    /// Reward received
    pub reward: f32,
    /// Next state features
    pub next_state: [f32; TOTAL_FEATURES],
    /// Whether episode terminated
    pub done: bool,
}

impl Transition {
    /// Create a new transition
    pub fn new(
        state: &Observation,
        action: DiscreteAction,
        reward: f64,
        next_state: &Observation,
        done: bool,
    ) -> Self {
        Self {
            state: state.to_features(),
            action,
            reward: reward as f32,
            next_state: next_state.to_features(),
            done,
        }
    }
}

/// Replay buffer for experience storage
#[derive(Debug)]
pub struct ReplayBuffer {
    /// Storage for transitions
    buffer: VecDeque<Transition>,
    /// Maximum capacity
    capacity: usize,
}

impl ReplayBuffer {
    /// Create a new replay buffer with given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a transition, evicting the oldest when full
    pub fn push(&mut self, transition: Transition) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Sample a random batch of distinct transitions
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<Transition> {
        let amount = batch_size.min(self.buffer.len());
        index::sample(rng, self.buffer.len(), amount)
            .into_iter()
            .map(|i| self.buffer[i])
            .collect()
    }

    /// Clear all transitions
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Get current number of transitions
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check if buffer has enough samples for training
    pub fn has_enough_samples(&self, min_samples: usize) -> bool {
        self.buffer.len() >= min_samples
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f32 {
        self.buffer.len() as f32 / self.capacity as f32
    }

    /// Oldest transition still held
    pub fn oldest(&self) -> Option<&Transition> {
        self.buffer.front()
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn make_transition(reward: f64, done: bool) -> Transition {
        let obs = Observation::default();
        Transition::new(&obs, DiscreteAction::Hold, reward, &obs, done)
    }

    #[test]
    fn test_replay_buffer_push() {
        let mut buffer = ReplayBuffer::new(10);

        for i in 0..15 {
            buffer.push(make_transition(i as f64, false));
        }

        // Should only keep last 10
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.oldest().unwrap().reward, 5.0);
        assert!((buffer.fill_ratio() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_replay_buffer_sample() {
        let mut buffer = ReplayBuffer::new(100);
        let mut rng = StdRng::seed_from_u64(7);

        for i in 0..50 {
            buffer.push(make_transition(i as f64, false));
        }

        let batch = buffer.sample(10, &mut rng);
        assert_eq!(batch.len(), 10);

        let mut rewards: Vec<i64> = batch.iter().map(|t| t.reward as i64).collect();
        rewards.sort();
        rewards.dedup();
        assert_eq!(rewards.len(), 10, "samples must be distinct");
    }

    #[test]
    fn test_sample_larger_than_buffer() {
        let mut buffer = ReplayBuffer::new(100);
        let mut rng = StdRng::seed_from_u64(1);
        buffer.push(make_transition(1.0, true));

        assert_eq!(buffer.sample(32, &mut rng).len(), 1);
        assert!(buffer.has_enough_samples(1));
        assert!(!buffer.has_enough_samples(2));
    }
}
