//! Training Loop
//!
//! Offline training and greedy evaluation of a DQN agent over a historical
//! price series.

use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::checkpointing::{cycle_name, Checkpointer};
use super::metrics::{MetricsTracker, PerformanceSummary};
use crate::error::Result;
use crate::rl::algorithms::DqnAgent;
use crate::rl::environment::TradingEnvironment;

/// Whether an episode updates the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeMode {
    /// Epsilon-greedy actions, replay and gradient updates
    Train,
    /// Greedy actions, no learning
    Evaluate,
}

/// Episode result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeResult {
    pub episode: usize,
    /// Total shaped reward for episode
    pub total_reward: f64,
    /// Episode length in steps
    pub length: usize,
    pub final_equity: f64,
    pub return_pct: f64,
    pub num_trades: usize,
    pub win_rate: f64,
    /// Mean loss over the updates run this episode
    pub avg_loss: Option<f32>,
    pub epsilon: f64,
}

/// Run one episode from reset to done
pub fn run_episode<B: AutodiffBackend>(
    agent: &mut DqnAgent<B>,
    env: &mut TradingEnvironment,
    mode: EpisodeMode,
    episode: usize,
) -> Result<(EpisodeResult, PerformanceSummary)> {
    let greedy = mode == EpisodeMode::Evaluate;
    let mut obs = env.reset();
    let mut tracker = MetricsTracker::new(env.equity());
    let mut total_reward = 0.0f64;
    let mut loss_sum = 0.0f32;
    let mut loss_count = 0usize;

    loop {
        let action = agent.select_action(&obs, greedy)?;
        let result = env.step(action)?;
        total_reward += result.reward;
        tracker.record_equity(result.info.equity);

        if mode == EpisodeMode::Train {
            agent.remember(&obs, action, result.reward, &result.observation, result.done);
            agent.update_epsilon();
            if let Some(loss) = agent.train_step()? {
                loss_sum += loss;
                loss_count += 1;
            }
        }

        obs = result.observation;
        if result.done {
            break;
        }
    }

    tracker.record_trades(env.trades());
    let summary = tracker.summary();

    let result = EpisodeResult {
        episode,
        total_reward,
        length: env.step_count(),
        final_equity: env.equity(),
        return_pct: summary.return_pct,
        num_trades: summary.trade_count,
        win_rate: summary.win_rate,
        avg_loss: (loss_count > 0).then(|| loss_sum / loss_count as f32),
        epsilon: agent.epsilon(),
    };
    Ok((result, summary))
}

/// Train for `episodes` episodes, checkpointing every `checkpoint_every`
pub fn train<B: AutodiffBackend>(
    agent: &mut DqnAgent<B>,
    env: &mut TradingEnvironment,
    episodes: usize,
    checkpointer: Option<&Checkpointer>,
    checkpoint_every: usize,
) -> Result<Vec<EpisodeResult>> {
    let mut results = Vec::with_capacity(episodes);

    for episode in 1..=episodes {
        let (result, _) = run_episode(agent, env, EpisodeMode::Train, episode)?;

        info!(
            "Episode {}/{}: reward={:.4}, equity={:.2}, return={:.2}%, trades={}, win_rate={:.1}%, eps={:.3}",
            episode,
            episodes,
            result.total_reward,
            result.final_equity,
            result.return_pct,
            result.num_trades,
            result.win_rate * 100.0,
            result.epsilon
        );
        if let Some(loss) = result.avg_loss {
            debug!("Episode {} avg loss {:.6} ({} updates total)", episode, loss, agent.updates());
        }

        if let Some(checkpointer) = checkpointer {
            if checkpoint_every > 0 && episode % checkpoint_every == 0 {
                if let Err(e) = agent.checkpoint(checkpointer, &cycle_name("dqn", episode)) {
                    warn!("Checkpoint after episode {} failed: {}", episode, e);
                }
            }
        }

        results.push(result);
    }

    Ok(results)
}

/// Greedy evaluation over one full pass of the series
pub fn evaluate<B: AutodiffBackend>(
    agent: &mut DqnAgent<B>,
    env: &mut TradingEnvironment,
) -> Result<(EpisodeResult, PerformanceSummary)> {
    let (result, summary) = run_episode(agent, env, EpisodeMode::Evaluate, 1)?;
    info!(
        "Backtest complete: return={:.2}%, max_dd={:.2}%, sharpe={:.3}, trades={}, win_rate={:.1}%",
        summary.return_pct,
        summary.max_drawdown_pct,
        summary.sharpe,
        summary.trade_count,
        summary.win_rate * 100.0
    );
    Ok((result, summary))
}

/// Calculate training summary statistics
pub fn summarize_results(results: &[EpisodeResult]) -> TrainingSummary {
    if results.is_empty() {
        return TrainingSummary::default();
    }

    let n = results.len() as f64;

    let avg_reward = results.iter().map(|r| r.total_reward).sum::<f64>() / n;
    let avg_return_pct = results.iter().map(|r| r.return_pct).sum::<f64>() / n;
    let avg_length = results.iter().map(|r| r.length as f64).sum::<f64>() / n;
    let avg_trades = results.iter().map(|r| r.num_trades as f64).sum::<f64>() / n;
    let avg_win_rate = results.iter().map(|r| r.win_rate).sum::<f64>() / n;
    let best_return_pct = results
        .iter()
        .map(|r| r.return_pct)
        .fold(f64::NEG_INFINITY, f64::max);

    TrainingSummary {
        num_episodes: results.len(),
        avg_reward,
        avg_return_pct,
        best_return_pct,
        avg_episode_length: avg_length,
        avg_trades,
        avg_win_rate,
    }
}

/// Training summary statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub num_episodes: usize,
    /// Average reward per episode
    pub avg_reward: f64,
    pub avg_return_pct: f64,
    pub best_return_pct: f64,
    pub avg_episode_length: f64,
    pub avg_trades: f64,
    pub avg_win_rate: f64,
}
