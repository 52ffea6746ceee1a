//! Double Deep Q-Network (DQN)
//!
//! Epsilon-greedy value-based agent with experience replay, an online and a
//! target Q-network, Huber loss and Adam updates.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::error::{Result, SpotbotError};
use crate::rl::config::AgentConfig;
use crate::rl::core::{DiscreteAction, Observation, NUM_DISCRETE_ACTIONS, TOTAL_FEATURES};
use crate::rl::memory::{ReplayBuffer, Transition};
use crate::rl::networks::{QNetwork, QNetworkConfig};
use crate::rl::training::checkpointing::{load_module, save_module, Checkpointer};

/// Default backend used by the binary and tests
pub type DefaultBackend = burn::backend::Autodiff<burn_ndarray::NdArray<f32>>;

/// Agent on the default CPU backend
pub type DefaultDqnAgent = DqnAgent<DefaultBackend>;

/// Huber transition point
const HUBER_DELTA: f32 = 1.0;

/// DQN agent
pub struct DqnAgent<B: AutodiffBackend> {
    config: AgentConfig,
    online: QNetwork<B>,
    target: QNetwork<B::InnerBackend>,
    optimizer: OptimizerAdaptor<Adam<B::InnerBackend>, QNetwork<B>, B>,
    buffer: ReplayBuffer,
    device: B::Device,
    rng: StdRng,
    epsilon: f64,
    /// Environment steps seen by `train_step`
    env_steps: usize,
    /// Epsilon annealing progress
    anneal_steps: usize,
    /// Gradient updates applied
    updates: usize,
}

impl<B: AutodiffBackend> DqnAgent<B> {
    /// Create a new agent with freshly initialized networks
    pub fn new(config: AgentConfig, device: B::Device) -> Result<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => {
                B::seed(seed);
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_entropy(),
        };

        let online = QNetworkConfig::with_hidden(config.hidden_dim).init::<B>(&device);
        let target = online.valid();
        let optimizer = AdamConfig::new().init();

        Ok(Self {
            buffer: ReplayBuffer::new(config.buffer_capacity),
            epsilon: config.epsilon_start,
            config,
            online,
            target,
            optimizer,
            device,
            rng,
            env_steps: 0,
            anneal_steps: 0,
            updates: 0,
        })
    }

    /// Pick an action for `observation`.
    ///
    /// Non-greedy mode explores uniformly over legal actions with probability
    /// epsilon. Sell is illegal while flat.
    pub fn select_action(
        &mut self,
        observation: &Observation,
        greedy: bool,
    ) -> Result<DiscreteAction> {
        let flat = observation.is_flat();

        if !greedy && self.rng.gen::<f64>() < self.epsilon {
            let legal: Vec<DiscreteAction> = DiscreteAction::all()
                .iter()
                .copied()
                .filter(|a| !(flat && *a == DiscreteAction::Sell))
                .collect();
            return Ok(*legal.choose(&mut self.rng).unwrap_or(&DiscreteAction::Hold));
        }

        let q_values = self.q_values(observation)?;
        Ok(greedy_action(&q_values, flat))
    }

    /// Online Q-values for a single observation
    pub fn q_values(&self, observation: &Observation) -> Result<[f32; NUM_DISCRETE_ACTIONS]> {
        let state = Tensor::<B::InnerBackend, 2>::from_data(
            TensorData::new(observation.to_features().to_vec(), [1, TOTAL_FEATURES]),
            &self.device,
        );
        let values = tensor_to_vec(self.online.valid().forward(state))?;

        let mut out = [0.0f32; NUM_DISCRETE_ACTIONS];
        if values.len() != NUM_DISCRETE_ACTIONS {
            return Err(SpotbotError::Tensor(format!(
                "expected {} q-values, got {}",
                NUM_DISCRETE_ACTIONS,
                values.len()
            )));
        }
        out.copy_from_slice(&values);
        Ok(out)
    }

    /// Store a transition for replay
    pub fn remember(
        &mut self,
        observation: &Observation,
        action: DiscreteAction,
        reward: f64,
        next_observation: &Observation,
        done: bool,
    ) {
        self.buffer.push(Transition::new(
            observation,
            action,
            reward,
            next_observation,
            done,
        ));
    }

    /// Count one environment step and, when due, run one gradient update.
    ///
    /// Returns the batch loss when an update ran.
    pub fn train_step(&mut self) -> Result<Option<f32>> {
        self.env_steps += 1;

        if !self.buffer.has_enough_samples(self.config.min_buffer_size.max(1)) {
            return Ok(None);
        }
        if self.env_steps % self.config.train_interval != 0 {
            return Ok(None);
        }

        let batch = self.buffer.sample(self.config.batch_size, &mut self.rng);
        let loss = self.learn(&batch)?;

        self.updates += 1;
        if self.updates % self.config.target_sync_interval == 0 {
            self.sync_target();
            debug!("Target network synced after {} updates", self.updates);
        }

        Ok(Some(loss))
    }

    fn learn(&mut self, batch: &[Transition]) -> Result<f32> {
        let n = batch.len();

        let mut states = Vec::with_capacity(n * TOTAL_FEATURES);
        let mut next_states = Vec::with_capacity(n * TOTAL_FEATURES);
        let mut actions = Vec::with_capacity(n);
        let mut rewards = Vec::with_capacity(n);
        let mut not_done = Vec::with_capacity(n);
        for t in batch {
            states.extend_from_slice(&t.state);
            next_states.extend_from_slice(&t.next_state);
            actions.push(t.action.to_index() as i64);
            rewards.push(t.reward);
            not_done.push(if t.done { 0.0f32 } else { 1.0 });
        }

        // Double DQN target: online picks the next action, target evaluates it
        let next_states = Tensor::<B::InnerBackend, 2>::from_data(
            TensorData::new(next_states, [n, TOTAL_FEATURES]),
            &self.device,
        );
        let next_best = self.online.valid().forward(next_states.clone()).argmax(1);
        let next_q = self.target.forward(next_states).gather(1, next_best);

        let rewards = Tensor::<B::InnerBackend, 2>::from_data(
            TensorData::new(rewards, [n, 1]),
            &self.device,
        );
        let not_done = Tensor::<B::InnerBackend, 2>::from_data(
            TensorData::new(not_done, [n, 1]),
            &self.device,
        );
        let targets = rewards + next_q.mul(not_done).mul_scalar(self.config.gamma);
        let targets = Tensor::<B, 2>::from_inner(targets);

        let states = Tensor::<B, 2>::from_data(
            TensorData::new(states, [n, TOTAL_FEATURES]),
            &self.device,
        );
        let actions =
            Tensor::<B, 2, Int>::from_data(TensorData::new(actions, [n, 1]), &self.device);
        let predicted = self.online.forward(states).gather(1, actions);

        let loss = huber_loss(predicted, targets);
        let loss_value = tensor_to_vec(loss.clone().inner())?
            .first()
            .copied()
            .unwrap_or_default();
        if !loss_value.is_finite() {
            return Err(SpotbotError::Tensor(format!(
                "non-finite loss {} after {} updates",
                loss_value, self.updates
            )));
        }

        let grads = GradientsParams::from_grads(loss.backward(), &self.online);
        self.online = self
            .optimizer
            .step(self.config.lr, self.online.clone(), grads);

        Ok(loss_value)
    }

    /// Copy online weights into the target network
    pub fn sync_target(&mut self) {
        self.target = self.online.valid();
    }

    /// Advance linear epsilon annealing by one step
    pub fn update_epsilon(&mut self) {
        self.anneal_steps = self.anneal_steps.saturating_add(1);
        let decay_steps = self.config.epsilon_decay_steps;
        let next = if decay_steps == 0 || self.anneal_steps >= decay_steps {
            self.config.epsilon_end
        } else {
            let progress = self.anneal_steps as f64 / decay_steps as f64;
            self.config.epsilon_start
                + (self.config.epsilon_end - self.config.epsilon_start) * progress
        };
        // Never increase, even after a manual set_epsilon below the schedule
        self.epsilon = next.min(self.epsilon);
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon.clamp(0.0, 1.0);
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn updates(&self) -> usize {
        self.updates
    }

    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Persist the online network
    pub fn save(&self, path: &Path) -> Result<()> {
        let written = save_module::<B, _>(&self.online, path)?;
        info!("Saved agent weights to {}", written.display());
        Ok(())
    }

    /// Write the online network into a rotating checkpoint directory
    pub fn checkpoint(&self, checkpointer: &Checkpointer, name: &str) -> Result<PathBuf> {
        checkpointer.save::<B, _>(&self.online, name)
    }

    /// Load the online network and sync the target; fails on missing or corrupt files
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.online = load_module::<B, _>(self.online.clone(), path, &self.device)?;
        self.sync_target();
        info!("Loaded agent weights from {}", path.display());
        Ok(())
    }
}

/// Arg-max over Q-values with Sell masked out while flat
pub fn greedy_action(q_values: &[f32; NUM_DISCRETE_ACTIONS], flat: bool) -> DiscreteAction {
    let mut best = DiscreteAction::Hold;
    let mut best_value = f32::NEG_INFINITY;
    for &action in DiscreteAction::all() {
        let value = if flat && action == DiscreteAction::Sell {
            f32::NEG_INFINITY
        } else {
            q_values[action.to_index()]
        };
        if value > best_value {
            best_value = value;
            best = action;
        }
    }
    best
}

/// Mean Huber loss with unit delta
fn huber_loss<B: Backend>(predicted: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    let abs = (predicted - target).abs();
    let quadratic = abs.clone().clamp_max(HUBER_DELTA);
    let linear = abs - quadratic.clone();
    (quadratic.clone() * quadratic * 0.5 + linear * HUBER_DELTA).mean()
}

fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| SpotbotError::Tensor(format!("{:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AgentConfig {
        AgentConfig {
            batch_size: 8,
            buffer_capacity: 64,
            min_buffer_size: 8,
            train_interval: 1,
            target_sync_interval: 2,
            epsilon_decay_steps: 10,
            hidden_dim: 16,
            seed: Some(42),
            ..Default::default()
        }
    }

    fn agent() -> DefaultDqnAgent {
        DqnAgent::new(test_config(), Default::default()).unwrap()
    }

    fn holding() -> Observation {
        Observation {
            position_fraction: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_greedy_action_masks_sell_when_flat() {
        let q = [0.1, 0.2, 5.0];
        assert_eq!(greedy_action(&q, true), DiscreteAction::Buy);
        assert_eq!(greedy_action(&q, false), DiscreteAction::Sell);
    }

    #[test]
    fn test_never_sells_when_flat() {
        let mut agent = agent();
        let flat = Observation::default();

        for greedy in [true, false] {
            for _ in 0..200 {
                let action = agent.select_action(&flat, greedy).unwrap();
                assert_ne!(action, DiscreteAction::Sell);
            }
        }
    }

    #[test]
    fn test_exploration_can_sell_when_holding() {
        let mut agent = agent();
        agent.set_epsilon(1.0);
        let sold = (0..300)
            .any(|_| agent.select_action(&holding(), false).unwrap() == DiscreteAction::Sell);
        assert!(sold);
    }

    #[test]
    fn test_train_step_waits_for_buffer() {
        let mut agent = agent();
        let obs = Observation::default();

        for _ in 0..7 {
            agent.remember(&obs, DiscreteAction::Hold, 0.0, &obs, false);
            assert_eq!(agent.train_step().unwrap(), None);
        }
        agent.remember(&obs, DiscreteAction::Buy, 1.0, &holding(), true);
        let loss = agent.train_step().unwrap();
        assert!(loss.is_some());
        assert!(loss.unwrap().is_finite());
        assert_eq!(agent.updates(), 1);
        assert_eq!(agent.buffer_len(), 8);
    }

    #[test]
    fn test_train_interval_skips_steps() {
        let config = AgentConfig {
            train_interval: 3,
            ..test_config()
        };
        let mut agent: DefaultDqnAgent = DqnAgent::new(config, Default::default()).unwrap();
        let obs = Observation::default();
        for _ in 0..8 {
            agent.remember(&obs, DiscreteAction::Hold, 0.5, &obs, false);
        }

        let results: Vec<bool> = (0..6).map(|_| agent.train_step().unwrap().is_some()).collect();
        assert_eq!(results, vec![false, false, true, false, false, true]);
        assert_eq!(agent.updates(), 2);
    }

    #[test]
    fn test_epsilon_anneals_monotonically() {
        let mut agent = agent();
        let mut previous = agent.epsilon();
        assert_eq!(previous, 1.0);

        for _ in 0..20 {
            agent.update_epsilon();
            assert!(agent.epsilon() <= previous);
            previous = agent.epsilon();
        }
        assert!((agent.epsilon() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_learning_moves_q_value_toward_reward() {
        let config = AgentConfig {
            lr: 1e-2,
            gamma: 0.0,
            target_sync_interval: 1_000,
            ..test_config()
        };
        let mut agent: DefaultDqnAgent = DqnAgent::new(config, Default::default()).unwrap();
        let obs = holding();
        for _ in 0..16 {
            agent.remember(&obs, DiscreteAction::Hold, 1.0, &obs, true);
        }

        let before = agent.q_values(&obs).unwrap()[0];
        for _ in 0..100 {
            agent.train_step().unwrap();
        }
        let after = agent.q_values(&obs).unwrap()[0];

        assert!((after - 1.0).abs() < (before - 1.0).abs());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("spotbot_dqn_{}", std::process::id()));
        let path = dir.join("agent");
        let obs = holding();

        let agent = agent();
        agent.save(&path).unwrap();
        let expected = agent.q_values(&obs).unwrap();

        let mut restored: DefaultDqnAgent = DqnAgent::new(
            AgentConfig {
                seed: Some(7),
                ..test_config()
            },
            Default::default(),
        )
        .unwrap();
        restored.load(&path).unwrap();
        let actual = restored.q_values(&obs).unwrap();

        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_fails() {
        let mut agent = agent();
        let result = agent.load(Path::new("/nonexistent/spotbot/agent"));
        assert!(matches!(result, Err(SpotbotError::Checkpoint(_))));
    }
}
