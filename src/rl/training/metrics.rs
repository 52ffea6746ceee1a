//! Performance Metrics
//!
//! Equity-curve statistics shared by backtests and the live loop.

use serde::{Deserialize, Serialize};

use crate::domain::TradeSide;
use crate::rl::environment::Trade;

/// Final performance report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Total return over the run, in percent
    pub return_pct: f64,
    /// Largest peak-to-trough equity decline, in percent
    pub max_drawdown_pct: f64,
    /// Mean over standard deviation of per-step returns
    pub sharpe: f64,
    /// Fills, buys and sells
    pub trade_count: usize,
    /// Share of closed round trips with positive realized PnL
    pub win_rate: f64,
    pub final_equity: f64,
    pub steps: usize,
}

/// Accumulates equity marks and fills over a run
#[derive(Debug, Clone, Default)]
pub struct MetricsTracker {
    equity_curve: Vec<f64>,
    trade_count: usize,
    realized_pnls: Vec<f64>,
}

impl MetricsTracker {
    /// Start a curve at `initial_equity`
    pub fn new(initial_equity: f64) -> Self {
        Self {
            equity_curve: vec![initial_equity],
            ..Default::default()
        }
    }

    /// Record the equity after one step
    pub fn record_equity(&mut self, equity: f64) {
        self.equity_curve.push(equity);
    }

    /// Record fills; sells contribute their realized PnL
    pub fn record_trades<'a, I>(&mut self, trades: I)
    where
        I: IntoIterator<Item = &'a Trade>,
    {
        for trade in trades {
            self.trade_count += 1;
            if trade.side == TradeSide::Sell {
                if let Some(pnl) = trade.realized_pnl {
                    self.realized_pnls.push(pnl);
                }
            }
        }
    }

    pub fn steps(&self) -> usize {
        self.equity_curve.len().saturating_sub(1)
    }

    pub fn last_equity(&self) -> Option<f64> {
        self.equity_curve.last().copied()
    }

    pub fn equity_curve(&self) -> &[f64] {
        &self.equity_curve
    }

    pub fn summary(&self) -> PerformanceSummary {
        let initial = self.equity_curve.first().copied().unwrap_or_default();
        let final_equity = self.last_equity().unwrap_or_default();

        PerformanceSummary {
            return_pct: total_return_pct(initial, final_equity),
            max_drawdown_pct: max_drawdown_pct(&self.equity_curve),
            sharpe: sharpe_ratio(&step_returns(&self.equity_curve)),
            trade_count: self.trade_count,
            win_rate: win_rate(&self.realized_pnls),
            final_equity,
            steps: self.steps(),
        }
    }
}

pub fn total_return_pct(initial: f64, final_equity: f64) -> f64 {
    if initial <= 0.0 {
        return 0.0;
    }
    (final_equity / initial - 1.0) * 100.0
}

/// Largest relative decline from a running peak, in percent
pub fn max_drawdown_pct(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_drawdown = 0.0f64;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - equity) / peak);
        }
    }
    max_drawdown * 100.0
}

/// Simple returns between consecutive marks
pub fn step_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Unannualized Sharpe-like ratio; 0 when undefined
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if std <= f64::EPSILON {
        return 0.0;
    }
    mean / std
}

pub fn win_rate(realized_pnls: &[f64]) -> f64 {
    if realized_pnls.is_empty() {
        return 0.0;
    }
    let wins = realized_pnls.iter().filter(|p| **p > 0.0).count();
    wins as f64 / realized_pnls.len() as f64
}
