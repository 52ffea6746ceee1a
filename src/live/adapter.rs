//! Live Feed Adapter
//!
//! Drives a running [`TradingEnvironment`] from a polled market feed while the
//! [`RiskOverlay`] guards every step. Simulated capital carries across data
//! refreshes and across episode resets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::feed::MarketDataFeed;
use super::risk::{RiskConfig, RiskOverlay, RiskReason};
use crate::error::{Result, SpotbotError};
use crate::rl::core::{DiscreteAction, Observation};
use crate::rl::environment::{
    EnvironmentConfig, PriceSeries, StepResult, Trade, TradingEnvironment,
};

/// Log target for per-cycle live records
pub const LIVE_LOG_TARGET: &str = "spotbot::live";

/// Live trading loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub symbol: String,
    /// Candle interval understood by the feed ("1m", "5m", ...)
    pub timeframe: String,
    /// Candles requested per refresh
    pub lookback: usize,
    /// Seconds between polls while waiting for a new candle
    pub poll_interval_secs: u64,
    /// Steps per live episode before the environment is reseeded; 0 means
    /// the environment's own `max_steps`
    pub episode_steps: usize,
    /// Feed request timeout
    pub request_timeout_secs: u64,
    /// Explore with epsilon-greedy actions instead of acting greedily
    pub explore: bool,
    /// Stop after this many traded cycles
    pub max_cycles: Option<usize>,
    /// Replay this CSV instead of polling the exchange
    pub replay_csv: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1m".to_string(),
            lookback: 200,
            poll_interval_secs: 30,
            episode_steps: 1_440,
            request_timeout_secs: 10,
            explore: false,
            max_cycles: None,
            replay_csv: None,
        }
    }
}

impl LiveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() || self.timeframe.trim().is_empty() {
            return Err(SpotbotError::Validation(
                "live.symbol and live.timeframe must be set".to_string(),
            ));
        }
        if self.lookback == 0 || self.poll_interval_secs == 0 {
            return Err(SpotbotError::Validation(
                "live.lookback and live.poll_interval_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Adapter lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Initialized,
    Active,
    Halted(RiskReason),
    /// Episode ended; reseeded before the next step
    Exhausted,
}

/// One machine-parseable line per live step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStepRecord {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub balance: f64,
    pub position_qty: f64,
    pub reward: f64,
    /// Action the policy asked for
    pub requested_action: DiscreteAction,
    /// Action the environment was stepped with
    pub action: DiscreteAction,
    pub done: bool,
    pub forced_hold: bool,
    pub forced_liq: bool,
    pub risk_reason: Option<RiskReason>,
    pub trailing_stop_hit: bool,
    pub trailing_stop: Option<f64>,
    pub episode: usize,
}

/// Bridges a polled feed into an open-ended environment
pub struct LiveFeedAdapter {
    feed: Arc<dyn MarketDataFeed>,
    config: LiveConfig,
    env_config: EnvironmentConfig,
    env: TradingEnvironment,
    risk: RiskOverlay,
    state: AdapterState,
    /// Ratcheted trailing stop for the open position
    active_stop: Option<f64>,
    /// Fills across all episodes
    trade_log: Vec<Trade>,
    /// Fills of the current environment already copied to `trade_log`
    trades_seen: usize,
    /// A refresh brought a candle that no step has consumed yet
    pending_candle: bool,
    episode: usize,
    last_record: Option<LiveStepRecord>,
}

impl LiveFeedAdapter {
    /// Fetch the first window and build the environment and risk state
    pub async fn initialize(
        feed: Arc<dyn MarketDataFeed>,
        config: LiveConfig,
        env_config: EnvironmentConfig,
        risk_config: RiskConfig,
    ) -> Result<Self> {
        config.validate()?;
        risk_config.validate()?;

        let candles = feed
            .get_market_data(&config.symbol, &config.timeframe, config.lookback)
            .await;
        if candles.is_empty() {
            return Err(SpotbotError::InsufficientData(format!(
                "feed returned no candles for {} {}",
                config.symbol, config.timeframe
            )));
        }

        let env_config = EnvironmentConfig {
            max_steps: if config.episode_steps > 0 {
                Some(config.episode_steps)
            } else {
                env_config.max_steps
            },
            ..env_config
        };

        let series = PriceSeries::new(candles)?;
        let last_ts = series.last_timestamp();
        let env = TradingEnvironment::new_open_ended(env_config.clone(), series)?;
        let risk = RiskOverlay::new(risk_config, env.equity(), last_ts);

        info!(
            "Live adapter initialized for {} {}: {} candles, equity {:.2}",
            config.symbol,
            config.timeframe,
            env.series().len(),
            env.equity()
        );

        Ok(Self {
            feed,
            config,
            env_config,
            env,
            risk,
            state: AdapterState::Initialized,
            active_stop: None,
            trade_log: Vec::new(),
            trades_seen: 0,
            pending_candle: false,
            episode: 1,
            last_record: None,
        })
    }

    /// Re-fetch the window; true only when a newer candle arrived
    pub async fn refresh(&mut self) -> bool {
        let candles = self
            .feed
            .get_market_data(&self.config.symbol, &self.config.timeframe, self.config.lookback)
            .await;

        let Some(latest) = candles.last().map(|c| c.timestamp) else {
            debug!("Refresh: feed returned no candles");
            return false;
        };
        if let Some(seen) = self.risk.state().last_candle_ts {
            if latest <= seen {
                return false;
            }
        }

        let series = match PriceSeries::new(candles) {
            Ok(series) => series,
            Err(e) => {
                warn!("Refresh: rejected market data: {}", e);
                return false;
            }
        };

        self.env.replace_series(series);
        self.risk.on_new_candle(latest, self.env.equity());
        self.pending_candle = true;
        debug!(
            "Refresh: new candle {} close {:.4}",
            latest,
            self.env.series().candles().last().map(|c| c.close).unwrap_or_default()
        );
        true
    }

    /// Evaluate the risk overlay against current equity
    pub fn risk_controls_triggered(&mut self) -> Option<RiskReason> {
        let reason = self.risk.check(self.env.equity());
        match reason {
            Some(reason) => self.state = AdapterState::Halted(reason),
            None => {
                if matches!(self.state, AdapterState::Halted(_)) {
                    info!("Risk controls cleared; resuming");
                }
                self.state = AdapterState::Active;
            }
        }
        reason
    }

    /// Stop candidate `k` ATRs below the latest close while holding
    pub fn compute_trailing_stop(&self) -> Option<f64> {
        self.risk
            .trailing_stop(self.env.series().candles(), !self.env.position().is_empty())
    }

    /// Liquidate when the close reaches the ratcheted stop; true on a forced sell.
    ///
    /// The stop level only moves up while the position is open.
    pub fn enforce_trailing_stop(&mut self) -> bool {
        if self.env.position().is_empty() {
            self.active_stop = None;
            return false;
        }

        let close = self.env.current_close();
        if let Some(level) = self.active_stop {
            if close <= level {
                self.active_stop = None;
                if self.env.force_liquidate() {
                    warn!(
                        "Trailing stop hit: close {:.4} <= stop {:.4}; position liquidated",
                        close, level
                    );
                    return true;
                }
                return false;
            }
        }

        if let Some(candidate) = self.compute_trailing_stop() {
            let level = self
                .active_stop
                .map_or(candidate, |current| current.max(candidate));
            self.active_stop = Some(level);
        }
        false
    }

    /// One live cycle: refresh, risk, step, trailing stop, reseed on done, log.
    ///
    /// A candle already fetched by an earlier `refresh()` is consumed without
    /// fetching again, so each new candle is stepped exactly once.
    pub async fn step_live(&mut self, action: DiscreteAction) -> Result<StepResult> {
        if !self.pending_candle {
            self.refresh().await;
        }
        self.pending_candle = false;

        let risk_reason = self.risk_controls_triggered();
        let executed = if risk_reason.is_some() {
            DiscreteAction::Hold
        } else {
            action
        };

        let mut result = self.env.step(executed)?;
        if risk_reason.is_some() && action.is_trade() {
            result.info.forced_hold = true;
        }

        let stop_before = self.active_stop;
        let trailing_stop_hit = self.enforce_trailing_stop();
        // The level that fired, or the freshly ratcheted one
        let trailing_stop = if trailing_stop_hit {
            stop_before
        } else {
            self.active_stop
        };
        if trailing_stop_hit {
            result.observation = self.env.get_observation();
            result.info.equity = self.env.equity();
            result.info.balance = self.env.balance();
            result.info.position_qty = self.env.position().quantity;
            result.info.avg_entry_price = self.env.position().avg_entry_price;
            result.info.trade_count = self.env.trades().len();
            result.info.forced_liq = true;
        }

        self.collect_trades();

        if result.done {
            self.state = AdapterState::Exhausted;
            self.reseed()?;
            result.observation = self.env.get_observation();
        }

        let record = LiveStepRecord {
            timestamp: result.info.timestamp.unwrap_or_else(Utc::now),
            equity: result.info.equity,
            balance: result.info.balance,
            position_qty: result.info.position_qty,
            reward: result.reward,
            requested_action: action,
            action: executed,
            done: result.done,
            forced_hold: result.info.forced_hold,
            forced_liq: result.info.forced_liq,
            risk_reason,
            trailing_stop_hit,
            trailing_stop,
            episode: self.episode,
        };
        info!(target: LIVE_LOG_TARGET, "{}", serde_json::to_string(&record)?);
        self.last_record = Some(record);

        Ok(result)
    }

    fn collect_trades(&mut self) {
        let trades = self.env.trades();
        if trades.len() > self.trades_seen {
            self.trade_log.extend_from_slice(&trades[self.trades_seen..]);
            self.trades_seen = trades.len();
        }
    }

    /// Fresh environment over the current window seeded with realized equity
    fn reseed(&mut self) -> Result<()> {
        let equity = self.env.equity();
        let config = EnvironmentConfig {
            initial_balance: equity,
            ..self.env_config.clone()
        };
        self.env = TradingEnvironment::new_open_ended(config, self.env.series().clone())?;
        self.trades_seen = 0;
        self.active_stop = None;
        self.episode += 1;

        info!(
            "Live episode {} started with equity {:.2}",
            self.episode, equity
        );
        if !self.risk.is_halted() {
            self.state = AdapterState::Active;
        }
        Ok(())
    }

    /// Observation the policy should act on next
    pub fn observation(&self) -> Observation {
        self.env.get_observation()
    }

    pub fn environment(&self) -> &TradingEnvironment {
        &self.env
    }

    pub fn equity(&self) -> f64 {
        self.env.equity()
    }

    pub fn risk(&self) -> &RiskOverlay {
        &self.risk
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn trade_log(&self) -> &[Trade] {
        &self.trade_log
    }

    pub fn episode(&self) -> usize {
        self.episode
    }

    pub fn active_trailing_stop(&self) -> Option<f64> {
        self.active_stop
    }

    pub fn last_record(&self) -> Option<&LiveStepRecord> {
        self.last_record.as_ref()
    }
}
