//! Live Orchestrator
//!
//! Owns the observe, decide, step, learn and persist cycle for a live run and
//! stops cooperatively through a [`StopToken`].

use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::coordination::StopToken;
use crate::error::Result;
use crate::live::LiveFeedAdapter;
use crate::rl::training::checkpointing::{checkpoint_exists, cycle_name};
use crate::rl::training::{Checkpointer, MetricsTracker, PerformanceSummary};
use crate::rl::{DqnAgent, TrainingConfig};

/// Why the live loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    GlobalLossLimit,
    MaxCycles,
}

/// Outcome of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub stop_reason: StopReason,
    pub cycles: usize,
    pub episodes: usize,
    pub summary: PerformanceSummary,
}

pub struct Orchestrator<B: AutodiffBackend> {
    agent: DqnAgent<B>,
    adapter: LiveFeedAdapter,
    training: TrainingConfig,
    checkpointer: Option<Checkpointer>,
    stop: StopToken,
    metrics: MetricsTracker,
    initial_equity: f64,
    poll_interval: Duration,
    explore: bool,
    max_cycles: Option<usize>,
    cycles: usize,
}

impl<B: AutodiffBackend> Orchestrator<B> {
    pub fn new(
        agent: DqnAgent<B>,
        adapter: LiveFeedAdapter,
        training: TrainingConfig,
        stop: StopToken,
    ) -> Self {
        let initial_equity = adapter.equity();
        let live = adapter.config();
        let poll_interval = Duration::from_secs(live.poll_interval_secs);
        let explore = live.explore;
        let max_cycles = live.max_cycles;
        let checkpointer = (training.checkpoint_every > 0)
            .then(|| Checkpointer::new(&training.checkpoint_dir, training.max_checkpoints));

        Self {
            agent,
            adapter,
            training,
            checkpointer,
            stop,
            metrics: MetricsTracker::new(initial_equity),
            initial_equity,
            poll_interval,
            explore,
            max_cycles,
            cycles: 0,
        }
    }

    /// Override the poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Warm start from `training.model_path`; a missing file is a cold start
    pub fn load_weights(&mut self) -> Result<()> {
        let path = Path::new(&self.training.model_path);
        if !checkpoint_exists(path) {
            warn!(
                "No weights at {}; starting from freshly initialized networks",
                path.display()
            );
            return Ok(());
        }
        self.agent.load(path)
    }

    /// Poll until a new candle arrives; false when cancelled while waiting
    async fn wait_for_candle(&mut self) -> bool {
        loop {
            if self.stop.is_cancelled() {
                return false;
            }
            if self.adapter.refresh().await {
                return true;
            }

            debug!("No new candle; sleeping {:?}", self.poll_interval);
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.stop.cancelled() => return false,
            }
        }
    }

    /// One decision cycle on the latest candle
    async fn run_cycle(&mut self) -> Result<()> {
        let observation = self.adapter.observation();
        let action = self.agent.select_action(&observation, !self.explore)?;
        let result = self.adapter.step_live(action).await?;

        if self.training.online_learning {
            self.agent.remember(
                &observation,
                action,
                result.reward,
                &result.observation,
                result.done,
            );
            self.agent.update_epsilon();
            if let Some(loss) = self.agent.train_step()? {
                debug!("Cycle {} loss {:.6}", self.cycles + 1, loss);
            }
        }

        self.cycles += 1;
        self.metrics.record_equity(result.info.equity);

        if let Some(checkpointer) = &self.checkpointer {
            if self.cycles % self.training.checkpoint_every == 0 {
                if let Err(e) = self
                    .agent
                    .checkpoint(checkpointer, &cycle_name("live", self.cycles))
                {
                    error!("Checkpoint at cycle {} failed: {}", self.cycles, e);
                }
            }
        }

        Ok(())
    }

    fn global_loss_breached(&self) -> bool {
        self.adapter.equity() <= self.initial_equity * self.training.global_loss_fraction
    }

    /// Run until cancelled, the global loss limit or the cycle cap
    pub async fn run(mut self) -> Result<RunReport> {
        info!(
            "Live loop starting: equity {:.2}, poll every {:?}",
            self.initial_equity, self.poll_interval
        );

        let stop_reason = loop {
            if let Some(max) = self.max_cycles {
                if self.cycles >= max {
                    break StopReason::MaxCycles;
                }
            }
            if !self.wait_for_candle().await {
                break StopReason::Cancelled;
            }
            if let Err(e) = self.run_cycle().await {
                error!("Live cycle {} failed: {}", self.cycles + 1, e);
                self.finish(StopReason::Cancelled);
                return Err(e);
            }
            if self.global_loss_breached() {
                error!(
                    "Global loss limit: equity {:.2} <= {:.2}; stopping",
                    self.adapter.equity(),
                    self.initial_equity * self.training.global_loss_fraction
                );
                break StopReason::GlobalLossLimit;
            }
        };

        Ok(self.finish(stop_reason))
    }

    /// Final save and summary artifact; failures are logged, not returned
    fn finish(&mut self, stop_reason: StopReason) -> RunReport {
        if let Err(e) = self.agent.save(Path::new(&self.training.model_path)) {
            error!("Final weight save failed: {}", e);
        }

        self.metrics.record_trades(self.adapter.trade_log());
        let summary = self.metrics.summary();
        if let Err(e) = write_summary(Path::new(&self.training.summary_path), &summary) {
            error!("Writing summary to {} failed: {}", self.training.summary_path, e);
        }

        info!(
            "Live loop stopped ({:?}) after {} cycles: {}",
            stop_reason,
            self.cycles,
            serde_json::to_string(&summary).unwrap_or_default()
        );

        RunReport {
            stop_reason,
            cycles: self.cycles,
            episodes: self.adapter.episode(),
            summary,
        }
    }

    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn adapter(&self) -> &LiveFeedAdapter {
        &self.adapter
    }
}

/// Write a summary as pretty JSON, creating parent directories
pub fn write_summary(path: &Path, summary: &PerformanceSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::feed::{CsvReplayFeed, MockMarketDataFeed};
    use crate::live::{LiveConfig, MarketDataFeed, RiskConfig};
    use crate::rl::environment::test_support::candles_from_closes;
    use crate::rl::environment::{EnvironmentConfig, MIN_WARMUP};
    use crate::rl::{AgentConfig, DefaultDqnAgent};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("spotbot_orch_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn agent() -> DefaultDqnAgent {
        DqnAgent::new(
            AgentConfig {
                batch_size: 4,
                buffer_capacity: 64,
                min_buffer_size: 4,
                hidden_dim: 8,
                seed: Some(11),
                ..Default::default()
            },
            Default::default(),
        )
        .unwrap()
    }

    fn training(dir: &Path) -> TrainingConfig {
        TrainingConfig {
            model_path: dir.join("model").to_string_lossy().into_owned(),
            checkpoint_dir: dir.join("ckpt").to_string_lossy().into_owned(),
            checkpoint_every: 2,
            summary_path: dir.join("summary.json").to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    fn env_config() -> EnvironmentConfig {
        EnvironmentConfig {
            min_warmup_candles: MIN_WARMUP,
            ..Default::default()
        }
    }

    async fn adapter_over(
        feed: Arc<dyn MarketDataFeed>,
        max_cycles: Option<usize>,
    ) -> LiveFeedAdapter {
        LiveFeedAdapter::initialize(
            feed,
            LiveConfig {
                lookback: 100,
                poll_interval_secs: 1,
                max_cycles,
                ..Default::default()
            },
            env_config(),
            RiskConfig {
                kill_switch_path: None,
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_run_stops_at_max_cycles_and_persists() {
        let dir = scratch("max_cycles");
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i % 7) as f64).collect();
        let feed = Arc::new(CsvReplayFeed::from_candles(candles_from_closes(&closes), 20));
        let adapter = adapter_over(feed, Some(5)).await;

        let orchestrator = Orchestrator::new(agent(), adapter, training(&dir), StopToken::new());
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.stop_reason, StopReason::MaxCycles);
        assert_eq!(report.cycles, 5);
        assert_eq!(report.summary.steps, 5);
        assert!(dir.join("model.mpk").exists());
        assert!(dir.join("ckpt").join(format!("{}.mpk", cycle_name("live", 4))).exists());

        let written: PerformanceSummary =
            serde_json::from_str(&fs::read_to_string(dir.join("summary.json")).unwrap()).unwrap();
        assert_eq!(written.steps, 5);
        assert!((written.final_equity - report.summary.final_equity).abs() < 1e-9);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_candle() {
        let dir = scratch("cancel");
        let mut mock = MockMarketDataFeed::new();
        mock.expect_get_market_data()
            .returning(|_, _, _| candles_from_closes(&[100.0; 20]));
        let adapter = adapter_over(Arc::new(mock), None).await;

        let stop = StopToken::new();
        let orchestrator = Orchestrator::new(agent(), adapter, training(&dir), stop.clone())
            .with_poll_interval(Duration::from_secs(30));

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        };
        let (report, _) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(5), orchestrator.run()),
            canceller
        );

        let report = report.expect("loop should stop promptly").unwrap();
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.cycles, 0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_cold_start_when_weights_missing() {
        let dir = scratch("cold");
        let feed = Arc::new(CsvReplayFeed::from_candles(
            candles_from_closes(&[100.0; 30]),
            20,
        ));
        let adapter = adapter_over(feed, Some(1)).await;

        let mut orchestrator = Orchestrator::new(agent(), adapter, training(&dir), StopToken::new());
        assert!(orchestrator.load_weights().is_ok());
        let _ = fs::remove_dir_all(&dir);
    }
}
