//! Trading Environment for RL Training
//!
//! Deterministic single-asset spot simulator with a gym-like step/reset
//! interface. Used unchanged by offline training, backtests and the live
//! adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::features::{PriceSeries, MIN_WARMUP};
use crate::domain::TradeSide;
use crate::error::{Result, SpotbotError};
use crate::rl::core::{DiscreteAction, Observation, NUM_DISCRETE_ACTIONS, TOTAL_FEATURES};

/// Held value within this fraction of the target counts as "at target"
pub const TARGET_TOLERANCE: f64 = 0.02;

/// Trading environment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Starting cash balance (quote currency)
    pub initial_balance: f64,
    /// Proportional fee charged on every fill
    pub fee_pct: f64,
    /// Adverse price move applied to every fill
    pub slippage_pct: f64,
    /// Maximum share of equity held in the asset
    pub target_position_fraction: f64,
    /// Divide equity deltas by the initial balance
    pub reward_normalize: bool,
    /// Optional episode step cap
    pub max_steps: Option<usize>,
    /// Candles skipped at reset so features are defined
    pub min_warmup_candles: usize,
    /// Reward bonus per unit of unrealized PnL % while holding
    pub unrealized_pnl_reward_weight: f64,
    /// Penalty per step while flat and not trading
    pub inactivity_penalty: f64,
    /// Penalty on every non-forced trade
    pub per_trade_penalty: f64,
    /// Steps after a trade during which new trades are suppressed
    pub trade_cooldown_steps: usize,
    /// Optional cap on non-forced trades per episode
    pub max_trades_per_episode: Option<usize>,
    /// Penalty per step proportional to position fraction
    pub holding_penalty: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            fee_pct: 0.001,
            slippage_pct: 0.0005,
            target_position_fraction: 0.5,
            reward_normalize: true,
            max_steps: None,
            min_warmup_candles: 20,
            unrealized_pnl_reward_weight: 0.001,
            inactivity_penalty: 0.0001,
            per_trade_penalty: 0.0005,
            trade_cooldown_steps: 3,
            max_trades_per_episode: None,
            holding_penalty: 0.0,
        }
    }
}

impl EnvironmentConfig {
    /// Reject values that would break the accounting invariants
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("fee_pct", self.fee_pct),
            ("slippage_pct", self.slippage_pct),
            (
                "unrealized_pnl_reward_weight",
                self.unrealized_pnl_reward_weight,
            ),
            ("inactivity_penalty", self.inactivity_penalty),
            ("per_trade_penalty", self.per_trade_penalty),
            ("holding_penalty", self.holding_penalty),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(SpotbotError::Validation(format!(
                    "environment.{} must be finite and >= 0 (got {})",
                    name, value
                )));
            }
        }

        if !self.initial_balance.is_finite() || self.initial_balance <= 0.0 {
            return Err(SpotbotError::Validation(format!(
                "environment.initial_balance must be > 0 (got {})",
                self.initial_balance
            )));
        }
        if self.fee_pct >= 1.0 || self.slippage_pct >= 1.0 {
            return Err(SpotbotError::Validation(
                "environment.fee_pct and slippage_pct must be < 1".to_string(),
            ));
        }
        if !(self.target_position_fraction > 0.0 && self.target_position_fraction <= 1.0) {
            return Err(SpotbotError::Validation(format!(
                "environment.target_position_fraction must be in (0, 1] (got {})",
                self.target_position_fraction
            )));
        }
        if self.min_warmup_candles < MIN_WARMUP {
            return Err(SpotbotError::Validation(format!(
                "environment.min_warmup_candles must be >= {} (got {})",
                MIN_WARMUP, self.min_warmup_candles
            )));
        }
        if self.max_steps == Some(0) {
            return Err(SpotbotError::Validation(
                "environment.max_steps must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Open spot position (long only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Units held, never negative
    pub quantity: f64,
    /// Quantity-weighted average fill price, 0 when flat
    pub avg_entry_price: f64,
    /// Fees paid on the fills that built the position
    pub entry_fees: f64,
}

impl Position {
    pub fn is_empty(&self) -> bool {
        self.quantity <= 0.0
    }

    pub fn value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl_pct(&self, price: f64) -> f64 {
        if self.is_empty() || self.avg_entry_price <= 0.0 {
            return 0.0;
        }
        price / self.avg_entry_price - 1.0
    }
}

/// Cash and mark-to-market equity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub prev_equity: f64,
}

/// A simulated fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Episode step at which the fill happened
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub side: TradeSide,
    pub quantity: f64,
    /// Slippage-adjusted fill price
    pub price: f64,
    pub fee: f64,
    /// Net of entry and exit fees; sells only
    pub realized_pnl: Option<f64>,
    /// Set on end-of-episode liquidation
    pub forced: bool,
}

/// Additional step information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub step: usize,
    pub timestamp: Option<DateTime<Utc>>,
    pub price: f64,
    pub equity: f64,
    pub balance: f64,
    pub position_qty: f64,
    pub avg_entry_price: f64,
    /// Equity delta before normalization and shaping
    pub raw_reward: f64,
    pub trade_count: usize,
    pub cooldown: usize,
    /// Requested trade was coerced to Hold
    pub forced_hold: bool,
    /// Position was liquidated outside the policy's control
    pub forced_liq: bool,
}

/// Result of taking a step in the environment
#[derive(Debug, Clone)]
pub struct StepResult {
    /// New observation after action
    pub observation: Observation,
    /// Shaped reward signal
    pub reward: f64,
    /// Whether episode is done
    pub done: bool,
    /// Additional info
    pub info: StepInfo,
}

/// Trading environment for RL training
#[derive(Debug, Clone)]
pub struct TradingEnvironment {
    config: EnvironmentConfig,
    series: PriceSeries,
    /// Live feeds keep appending candles, so reaching the end is not terminal
    open_ended: bool,
    idx: usize,
    reference_price: f64,
    position: Position,
    account: AccountState,
    trades: Vec<Trade>,
    real_trades: usize,
    cooldown: usize,
    steps_since_trade: usize,
    step_count: usize,
    done: bool,
}

impl TradingEnvironment {
    /// Create a new environment over a historical series; the end of the
    /// series terminates the episode.
    pub fn new(config: EnvironmentConfig, series: PriceSeries) -> Result<Self> {
        Self::build(config, series, false)
    }

    /// Create an environment over a growing live window; only the step cap
    /// terminates the episode and reset starts at the latest candle.
    pub fn new_open_ended(config: EnvironmentConfig, series: PriceSeries) -> Result<Self> {
        Self::build(config, series, true)
    }

    fn build(config: EnvironmentConfig, series: PriceSeries, open_ended: bool) -> Result<Self> {
        config.validate()?;
        if series.len() <= config.min_warmup_candles {
            return Err(SpotbotError::InsufficientData(format!(
                "need more than {} candles, got {}",
                config.min_warmup_candles,
                series.len()
            )));
        }

        let mut env = Self {
            account: AccountState {
                balance: config.initial_balance,
                equity: config.initial_balance,
                prev_equity: config.initial_balance,
            },
            config,
            series,
            open_ended,
            idx: 0,
            reference_price: 0.0,
            position: Position::default(),
            trades: Vec::new(),
            real_trades: 0,
            cooldown: 0,
            steps_since_trade: 0,
            step_count: 0,
            done: false,
        };
        env.reset();
        Ok(env)
    }

    /// Reset the environment for a new episode
    pub fn reset(&mut self) -> Observation {
        self.idx = self.start_index();
        self.reference_price = self.series.close(self.idx);
        self.position = Position::default();
        self.account = AccountState {
            balance: self.config.initial_balance,
            equity: self.config.initial_balance,
            prev_equity: self.config.initial_balance,
        };
        self.trades.clear();
        self.real_trades = 0;
        self.cooldown = 0;
        self.steps_since_trade = 0;
        self.step_count = 0;
        self.done = false;

        self.get_observation()
    }

    fn start_index(&self) -> usize {
        if self.open_ended {
            self.series.last_index()
        } else {
            self.config.min_warmup_candles.min(self.series.last_index())
        }
    }

    /// Take a step using a raw action index
    pub fn step_index(&mut self, action: usize) -> Result<StepResult> {
        let action = DiscreteAction::try_from_index(action)?;
        self.step(action)
    }

    /// Take a step in the environment
    pub fn step(&mut self, action: DiscreteAction) -> Result<StepResult> {
        if self.done {
            return Err(SpotbotError::EpisodeDone);
        }

        let fill_price = self.series.close(self.idx);

        let mut forced_hold = false;
        let mut effective = action;
        if action.is_trade() && !self.trading_allowed() {
            effective = DiscreteAction::Hold;
            forced_hold = true;
            trace!(
                "coerced {} to hold (cooldown={}, trades={})",
                action,
                self.cooldown,
                self.real_trades
            );
        }

        let traded = match effective {
            DiscreteAction::Hold => false,
            DiscreteAction::Buy => self.execute_buy(fill_price),
            DiscreteAction::Sell => self.execute_sell(fill_price, false),
        };
        if traded {
            self.real_trades += 1;
        }

        // Advance to the next candle when one is available
        if self.idx < self.series.last_index() {
            self.idx += 1;
        }
        self.step_count += 1;
        let mark_price = self.series.close(self.idx);
        self.mark_to_market(mark_price);

        let done = self.check_done();
        let mut forced_liq = false;
        if done && !self.position.is_empty() {
            forced_liq = self.execute_sell(mark_price, true);
            self.mark_to_market(mark_price);
        }

        if traded || forced_liq {
            self.cooldown = self.config.trade_cooldown_steps;
            self.steps_since_trade = 0;
        } else {
            self.cooldown = self.cooldown.saturating_sub(1);
            self.steps_since_trade += 1;
        }

        let raw_reward = self.account.equity - self.account.prev_equity;
        let reward = self.calculate_reward(raw_reward, traded, mark_price);
        self.account.prev_equity = self.account.equity;
        self.done = done;

        if forced_liq {
            debug!(
                "episode end liquidation at {:.4}, equity={:.2}",
                mark_price, self.account.equity
            );
        }

        let info = self.build_info(raw_reward, forced_hold, forced_liq);

        Ok(StepResult {
            observation: self.get_observation(),
            reward,
            done,
            info,
        })
    }

    fn trading_allowed(&self) -> bool {
        if self.cooldown > 0 {
            return false;
        }
        match self.config.max_trades_per_episode {
            Some(cap) => self.real_trades < cap,
            None => true,
        }
    }

    /// Size toward the target fraction of equity; returns true if an order filled
    fn execute_buy(&mut self, price: f64) -> bool {
        let equity = self.account.balance + self.position.value(price);
        let target = equity * self.config.target_position_fraction;
        let held = self.position.value(price);

        if held >= target * (1.0 - TARGET_TOLERANCE) {
            return false;
        }

        let budget = (target - held).min(self.account.balance);
        if budget <= f64::EPSILON {
            return false;
        }

        let fill = price * (1.0 + self.config.slippage_pct);
        let quantity = budget / (fill * (1.0 + self.config.fee_pct));
        if quantity <= 0.0 || !quantity.is_finite() {
            return false;
        }
        let notional = quantity * fill;
        let fee = notional * self.config.fee_pct;

        self.account.balance = (self.account.balance - notional - fee).max(0.0);

        let new_qty = self.position.quantity + quantity;
        self.position.avg_entry_price =
            (self.position.quantity * self.position.avg_entry_price + notional) / new_qty;
        self.position.quantity = new_qty;
        self.position.entry_fees += fee;

        self.trades.push(Trade {
            step: self.step_count,
            timestamp: self.series.candle(self.idx).timestamp,
            side: TradeSide::Buy,
            quantity,
            price: fill,
            fee,
            realized_pnl: None,
            forced: false,
        });
        true
    }

    /// Liquidate the whole position; returns true if an order filled
    fn execute_sell(&mut self, price: f64, forced: bool) -> bool {
        if self.position.is_empty() {
            return false;
        }

        let quantity = self.position.quantity;
        let fill = price * (1.0 - self.config.slippage_pct);
        let notional = quantity * fill;
        let fee = notional * self.config.fee_pct;
        let realized =
            (fill - self.position.avg_entry_price) * quantity - fee - self.position.entry_fees;

        self.account.balance += notional - fee;
        self.position = Position::default();

        self.trades.push(Trade {
            step: self.step_count,
            timestamp: self.series.candle(self.idx).timestamp,
            side: TradeSide::Sell,
            quantity,
            price: fill,
            fee,
            realized_pnl: Some(realized),
            forced,
        });
        true
    }

    fn mark_to_market(&mut self, price: f64) {
        self.account.equity = self.account.balance + self.position.value(price);
    }

    fn check_done(&self) -> bool {
        if let Some(cap) = self.config.max_steps {
            if self.step_count >= cap {
                return true;
            }
        }
        !self.open_ended && self.idx >= self.series.last_index()
    }

    /// Calculate reward for the current step
    fn calculate_reward(&self, raw_reward: f64, traded: bool, price: f64) -> f64 {
        let mut reward = if self.config.reward_normalize {
            raw_reward / self.config.initial_balance
        } else {
            raw_reward
        };

        if self.position.is_empty() {
            if !traded {
                reward -= self.config.inactivity_penalty;
            }
        } else {
            reward +=
                self.config.unrealized_pnl_reward_weight * self.position.unrealized_pnl_pct(price);
            reward -= self.config.holding_penalty * self.position_fraction(price);
        }

        if traded {
            reward -= self.config.per_trade_penalty;
        }

        reward
    }

    fn position_fraction(&self, price: f64) -> f64 {
        if self.account.equity <= 0.0 {
            return 0.0;
        }
        self.position.value(price) / self.account.equity
    }

    fn build_info(&self, raw_reward: f64, forced_hold: bool, forced_liq: bool) -> StepInfo {
        let candle = self.series.candle(self.idx);
        StepInfo {
            step: self.step_count,
            timestamp: Some(candle.timestamp),
            price: candle.close,
            equity: self.account.equity,
            balance: self.account.balance,
            position_qty: self.position.quantity,
            avg_entry_price: self.position.avg_entry_price,
            raw_reward,
            trade_count: self.trades.len(),
            cooldown: self.cooldown,
            forced_hold,
            forced_liq,
        }
    }

    /// Get current observation
    pub fn get_observation(&self) -> Observation {
        let price = self.series.close(self.idx);
        let price_rel = if self.reference_price > 0.0 {
            price / self.reference_price - 1.0
        } else {
            0.0
        };

        Observation {
            price_rel,
            ret_1: self.series.ret_1(self.idx),
            ret_5: self.series.ret_5(self.idx),
            vol_5: self.series.vol_5(self.idx),
            position_fraction: self.position_fraction(price),
            unrealized_pnl_pct: self.position.unrealized_pnl_pct(price),
        }
    }

    /// Swap in a refreshed price series without touching accounting state.
    ///
    /// When the window brings a newer candle the index lands one before the
    /// latest, so the next step fills at the previous close and marks at the
    /// newest one. Otherwise it stays on the current candle. `prev_equity` is
    /// kept so the next reward still spans the whole equity move.
    pub fn replace_series(&mut self, series: PriceSeries) {
        let current_ts = self.series.candle(self.idx).timestamp;
        let idx = if series.last_timestamp() > current_ts {
            series.last_index().saturating_sub(1)
        } else {
            series
                .candles()
                .iter()
                .position(|c| c.timestamp == current_ts)
                .unwrap_or_else(|| series.last_index())
        };

        self.series = series;
        self.idx = idx;
        self.mark_to_market(self.series.close(self.idx));
    }

    /// Liquidate outside the policy (risk overlay); returns true if a fill happened
    pub fn force_liquidate(&mut self) -> bool {
        let price = self.series.close(self.idx);
        let sold = self.execute_sell(price, true);
        if sold {
            // The exit cost lands in the next step's equity delta
            self.mark_to_market(price);
            self.cooldown = self.config.trade_cooldown_steps;
            self.steps_since_trade = 0;
        }
        sold
    }

    /// Get observation dimension
    pub fn observation_dim(&self) -> usize {
        TOTAL_FEATURES
    }

    /// Get action dimension
    pub fn action_dim(&self) -> usize {
        NUM_DISCRETE_ACTIONS
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn series(&self) -> &PriceSeries {
        &self.series
    }

    pub fn equity(&self) -> f64 {
        self.account.equity
    }

    pub fn balance(&self) -> f64 {
        self.account.balance
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn cooldown(&self) -> usize {
        self.cooldown
    }

    pub fn steps_since_trade(&self) -> usize {
        self.steps_since_trade
    }

    pub fn current_index(&self) -> usize {
        self.idx
    }

    pub fn current_close(&self) -> f64 {
        self.series.close(self.idx)
    }

    pub fn current_timestamp(&self) -> DateTime<Utc> {
        self.series.candle(self.idx).timestamp
    }
}
