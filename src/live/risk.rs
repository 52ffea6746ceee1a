//! Risk Overlay
//!
//! Independent controls evaluated around every live step: a sticky hard stop,
//! a daily loss limit, a kill-switch file and an ATR trailing stop.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::domain::Candle;
use crate::error::{Result, SpotbotError};

/// Risk overlay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Halt for the rest of the run once equity falls to this fraction of
    /// the equity at adapter start
    pub hard_stop_fraction: f64,
    /// Halt for the day once equity falls to this fraction of start-of-day equity
    pub daily_loss_fraction: f64,
    /// Presence of this file halts trading
    pub kill_switch_path: Option<PathBuf>,
    /// ATR lookback for the trailing stop
    pub atr_window: usize,
    /// Trailing stop distance in ATRs below the last close
    pub atr_k: f64,
    /// Disable the trailing stop entirely
    pub trailing_stop_enabled: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            hard_stop_fraction: 0.7,
            daily_loss_fraction: 0.95,
            kill_switch_path: Some(PathBuf::from("./KILL_SWITCH")),
            atr_window: 14,
            atr_k: 2.0,
            trailing_stop_enabled: true,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("hard_stop_fraction", self.hard_stop_fraction),
            ("daily_loss_fraction", self.daily_loss_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(SpotbotError::Validation(format!(
                    "risk.{} must be in (0, 1] (got {})",
                    name, value
                )));
            }
        }
        if self.atr_window == 0 {
            return Err(SpotbotError::Validation(
                "risk.atr_window must be > 0".to_string(),
            ));
        }
        if !self.atr_k.is_finite() || self.atr_k <= 0.0 {
            return Err(SpotbotError::Validation(format!(
                "risk.atr_k must be > 0 (got {})",
                self.atr_k
            )));
        }
        Ok(())
    }
}

/// Why the overlay blocked trading this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskReason {
    HardStop,
    DailyLoss,
    KillSwitch,
}

impl RiskReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskReason::HardStop => "hard_stop",
            RiskReason::DailyLoss => "daily_loss",
            RiskReason::KillSwitch => "kill_switch",
        }
    }
}

impl std::fmt::Display for RiskReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Risk bookkeeping that outlives environment resets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub start_of_day_equity: f64,
    /// UTC date the daily reference belongs to
    pub day: NaiveDate,
    /// Fixed at construction
    pub hard_stop_floor: f64,
    pub last_candle_ts: Option<DateTime<Utc>>,
    /// Set once the hard stop fires; never cleared
    pub halted: Option<RiskReason>,
}

impl RiskState {
    pub fn new(initial_equity: f64, now: DateTime<Utc>, config: &RiskConfig) -> Self {
        Self {
            start_of_day_equity: initial_equity,
            day: now.date_naive(),
            hard_stop_floor: initial_equity * config.hard_stop_fraction,
            last_candle_ts: Some(now),
            halted: None,
        }
    }
}

/// Wilder ATR
#[derive(Debug, Clone)]
pub struct AtrIndicator {
    window: usize,
    prev_close: f64,
    atr_value: f64,
    count: usize,
    sum: f64,
    warm: bool,
    has_prev: bool,
}

impl AtrIndicator {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            prev_close: 0.0,
            atr_value: 0.0,
            count: 0,
            sum: 0.0,
            warm: false,
            has_prev: false,
        }
    }

    /// Feed one candle; true ranges start at the second candle
    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        if !self.has_prev {
            self.has_prev = true;
            self.prev_close = close;
            return None;
        }

        let tr = (high - low)
            .max((high - self.prev_close).abs())
            .max((low - self.prev_close).abs());
        self.prev_close = close;

        if !self.warm {
            self.sum += tr;
            self.count += 1;
            if self.count >= self.window {
                self.atr_value = self.sum / self.window as f64;
                self.warm = true;
            }
        } else {
            // Wilder smoothing: ATR = (prev_ATR * (N-1) + TR) / N
            self.atr_value =
                (self.atr_value * (self.window as f64 - 1.0) + tr) / self.window as f64;
        }

        self.warm.then_some(self.atr_value)
    }

    pub fn is_warm(&self) -> bool {
        self.warm
    }

    pub fn value(&self) -> Option<f64> {
        self.warm.then_some(self.atr_value)
    }
}

/// ATR over the whole candle window; None until `window` true ranges exist
pub fn compute_atr(candles: &[Candle], window: usize) -> Option<f64> {
    let mut atr = AtrIndicator::new(window);
    for candle in candles {
        atr.update(candle.high, candle.low, candle.close);
    }
    atr.value()
}

/// Stop price `k` ATRs below the last close
pub fn trailing_stop_price(candles: &[Candle], window: usize, k: f64) -> Option<f64> {
    let last_close = candles.last()?.close;
    let atr = compute_atr(candles, window)?;
    if !atr.is_finite() {
        return None;
    }
    Some(last_close - k * atr)
}

/// Hard stop, daily loss and kill switch checks around a shared [`RiskState`]
#[derive(Debug, Clone)]
pub struct RiskOverlay {
    config: RiskConfig,
    state: RiskState,
}

impl RiskOverlay {
    pub fn new(config: RiskConfig, initial_equity: f64, now: DateTime<Utc>) -> Self {
        let state = RiskState::new(initial_equity, now, &config);
        info!(
            "Risk overlay armed: hard stop floor {:.2}, daily loss fraction {:.3}",
            state.hard_stop_floor, config.daily_loss_fraction
        );
        Self { config, state }
    }

    /// Record a fresh candle; resets the daily reference on UTC date change.
    /// Returns true when the day rolled over.
    pub fn on_new_candle(&mut self, timestamp: DateTime<Utc>, equity: f64) -> bool {
        self.state.last_candle_ts = Some(timestamp);
        let day = timestamp.date_naive();
        if day != self.state.day {
            info!(
                "UTC day rolled over {} -> {}; start-of-day equity {:.2}",
                self.state.day, day, equity
            );
            self.state.day = day;
            self.state.start_of_day_equity = equity;
            return true;
        }
        false
    }

    /// First matching reason in order: hard stop, daily loss, kill switch
    pub fn check(&mut self, equity: f64) -> Option<RiskReason> {
        if let Some(reason) = self.state.halted {
            return Some(reason);
        }

        if equity <= self.state.hard_stop_floor {
            error!(
                "Hard stop: equity {:.2} <= floor {:.2}; halting for the rest of the run",
                equity, self.state.hard_stop_floor
            );
            self.state.halted = Some(RiskReason::HardStop);
            return Some(RiskReason::HardStop);
        }

        let daily_floor = self.state.start_of_day_equity * self.config.daily_loss_fraction;
        if equity <= daily_floor {
            warn!(
                "Daily loss limit: equity {:.2} <= {:.2} (start of day {:.2})",
                equity, daily_floor, self.state.start_of_day_equity
            );
            return Some(RiskReason::DailyLoss);
        }

        if let Some(path) = &self.config.kill_switch_path {
            if kill_switch_engaged(path) {
                warn!("Kill switch present at {}", path.display());
                return Some(RiskReason::KillSwitch);
            }
        }

        None
    }

    /// Trailing stop while holding; None when flat, disabled or warming up
    pub fn trailing_stop(&self, candles: &[Candle], holding: bool) -> Option<f64> {
        if !holding || !self.config.trailing_stop_enabled {
            return None;
        }
        trailing_stop_price(candles, self.config.atr_window, self.config.atr_k)
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted.is_some()
    }
}

fn kill_switch_engaged(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn no_kill_switch() -> RiskConfig {
        RiskConfig {
            kill_switch_path: None,
            ..Default::default()
        }
    }

    fn candle(ts: DateTime<Utc>, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_hard_stop_is_sticky() {
        let mut overlay = RiskOverlay::new(no_kill_switch(), 10_000.0, t0());
        assert_eq!(overlay.check(10_000.0), None);
        assert_eq!(overlay.check(6_900.0), Some(RiskReason::HardStop));
        assert_eq!(overlay.check(12_000.0), Some(RiskReason::HardStop));
        assert!(overlay.is_halted());
    }

    #[test]
    fn test_hard_stop_checked_before_daily_loss() {
        let mut overlay = RiskOverlay::new(no_kill_switch(), 10_000.0, t0());
        // Below both thresholds: hard stop wins
        assert_eq!(overlay.check(5_000.0), Some(RiskReason::HardStop));
    }

    #[test]
    fn test_daily_loss_resets_on_new_day() {
        let mut overlay = RiskOverlay::new(no_kill_switch(), 10_000.0, t0());
        assert_eq!(overlay.check(9_400.0), Some(RiskReason::DailyLoss));
        assert!(!overlay.is_halted());

        assert!(!overlay.on_new_candle(t0() + Duration::hours(1), 9_400.0));
        assert_eq!(overlay.check(9_400.0), Some(RiskReason::DailyLoss));

        assert!(overlay.on_new_candle(t0() + Duration::days(1), 9_400.0));
        assert_eq!(overlay.state().start_of_day_equity, 9_400.0);
        assert_eq!(overlay.check(9_400.0), None);
    }

    #[test]
    fn test_kill_switch_file() {
        let path = std::env::temp_dir().join(format!("spotbot_kill_{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let config = RiskConfig {
            kill_switch_path: Some(path.clone()),
            ..Default::default()
        };
        let mut overlay = RiskOverlay::new(config, 10_000.0, t0());
        assert_eq!(overlay.check(10_000.0), None);

        std::fs::write(&path, b"stop").unwrap();
        assert_eq!(overlay.check(10_000.0), Some(RiskReason::KillSwitch));

        std::fs::remove_file(&path).unwrap();
        assert_eq!(overlay.check(10_000.0), None);
    }

    #[test]
    fn test_atr_needs_window_true_ranges() {
        let candles: Vec<Candle> = (0..4)
            .map(|i| candle(t0() + Duration::minutes(i), 101.0, 99.0, 100.0))
            .collect();
        assert_eq!(compute_atr(&candles, 3), Some(2.0));
        assert_eq!(compute_atr(&candles[..3], 3), None);
        assert_eq!(trailing_stop_price(&candles[..3], 3, 2.0), None);
    }

    #[test]
    fn test_trailing_stop_price() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| candle(t0() + Duration::minutes(i), 102.0, 98.0, 100.0))
            .collect();
        // Constant true range of 4
        let stop = trailing_stop_price(&candles, 5, 2.0).unwrap();
        assert!((stop - 92.0).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_stop_only_while_holding() {
        let overlay = RiskOverlay::new(no_kill_switch(), 10_000.0, t0());
        let candles: Vec<Candle> = (0..30)
            .map(|i| candle(t0() + Duration::minutes(i), 102.0, 98.0, 100.0))
            .collect();
        assert!(overlay.trailing_stop(&candles, false).is_none());
        assert!(overlay.trailing_stop(&candles, true).is_some());
    }

    #[test]
    fn test_wilder_smoothing() {
        let mut atr = AtrIndicator::new(2);
        assert_eq!(atr.update(10.0, 10.0, 10.0), None);
        assert_eq!(atr.update(12.0, 10.0, 11.0), None);
        assert_eq!(atr.update(13.0, 11.0, 12.0), Some(2.0));
        // (2 * 1 + 4) / 2
        assert_eq!(atr.update(16.0, 12.0, 15.0), Some(3.0));
    }

    #[test]
    fn test_validate() {
        assert!(RiskConfig::default().validate().is_ok());
        let bad = RiskConfig {
            hard_stop_fraction: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
