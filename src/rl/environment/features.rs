//! Price series and derived features
//!
//! Close-price returns and rolling volatility consumed by the observation.

use chrono::{DateTime, Utc};

use crate::domain::Candle;
use crate::error::{Result, SpotbotError};

/// Lookback for the multi-step return
pub const RET_LOOKBACK: usize = 5;

/// Window for the rolling volatility of 1-step returns
pub const VOL_WINDOW: usize = 5;

/// Minimum warm-up so that every feature is defined on the first observation
/// (max of RET_LOOKBACK and VOL_WINDOW, plus one)
pub const MIN_WARMUP: usize = 6;

/// Features derived from a close series, aligned index-for-index with it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    pub ret_1: Vec<f64>,
    pub ret_5: Vec<f64>,
    pub vol_5: Vec<f64>,
}

/// Derives return/volatility features from raw closes.
///
/// Undefined leading values are 0.0 so every output is finite.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureBuilder;

impl FeatureBuilder {
    pub fn build(closes: &[f64]) -> Features {
        let n = closes.len();
        let ret_1 = pct_change(closes, 1);
        let ret_5 = pct_change(closes, RET_LOOKBACK);

        let mut vol_5 = vec![0.0; n];
        for i in VOL_WINDOW..n {
            // ret_1[0] is padding, so the window starts at index 1
            let window = &ret_1[i + 1 - VOL_WINDOW..=i];
            vol_5[i] = sample_std(window);
        }

        Features {
            ret_1,
            ret_5,
            vol_5,
        }
    }
}

fn pct_change(closes: &[f64], lag: usize) -> Vec<f64> {
    let mut out = vec![0.0; closes.len()];
    for i in lag..closes.len() {
        let prev = closes[i - lag];
        if prev > 0.0 {
            out[i] = closes[i] / prev - 1.0;
        }
    }
    out
}

fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Ordered candles plus their derived features.
///
/// Immutable once built; live refreshes replace the whole series.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    candles: Vec<Candle>,
    features: Features,
}

impl PriceSeries {
    /// Build a series, rejecting empty input, invalid prices and unordered timestamps
    pub fn new(candles: Vec<Candle>) -> Result<Self> {
        if candles.is_empty() {
            return Err(SpotbotError::InsufficientData(
                "price series is empty".to_string(),
            ));
        }

        for (i, candle) in candles.iter().enumerate() {
            if !candle.is_valid() {
                return Err(SpotbotError::InvalidMarketData(format!(
                    "invalid candle at index {}",
                    i
                )));
            }
            if i > 0 && candle.timestamp <= candles[i - 1].timestamp {
                return Err(SpotbotError::InvalidMarketData(format!(
                    "timestamps not strictly increasing at index {}",
                    i
                )));
            }
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let features = FeatureBuilder::build(&closes);

        Ok(Self { candles, features })
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn candle(&self, idx: usize) -> &Candle {
        &self.candles[idx]
    }

    pub fn close(&self, idx: usize) -> f64 {
        self.candles[idx].close
    }

    pub fn ret_1(&self, idx: usize) -> f64 {
        self.features.ret_1[idx]
    }

    pub fn ret_5(&self, idx: usize) -> f64 {
        self.features.ret_5[idx]
    }

    pub fn vol_5(&self, idx: usize) -> f64 {
        self.features.vol_5[idx]
    }

    pub fn last_index(&self) -> usize {
        self.candles.len() - 1
    }

    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.candles[self.last_index()].timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::environment::test_support::series_from_closes;
    use chrono::TimeZone;

    #[test]
    fn test_returns() {
        let closes = [100.0, 110.0, 121.0, 121.0, 121.0, 121.0, 133.1];
        let f = FeatureBuilder::build(&closes);

        assert_eq!(f.ret_1[0], 0.0);
        assert!((f.ret_1[1] - 0.1).abs() < 1e-12);
        assert!((f.ret_5[5] - 0.21).abs() < 1e-12);
        assert!((f.ret_5[6] - 0.21).abs() < 1e-9);
    }

    #[test]
    fn test_flat_series_has_zero_volatility() {
        let f = FeatureBuilder::build(&[50.0; 20]);
        assert!(f.vol_5.iter().all(|v| *v == 0.0));
        assert!(f.ret_1.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_volatility_defined_after_window() {
        let closes: Vec<f64> = (0..12).map(|i| 100.0 + (i % 2) as f64).collect();
        let f = FeatureBuilder::build(&closes);
        assert_eq!(f.vol_5[VOL_WINDOW - 1], 0.0);
        assert!(f.vol_5[VOL_WINDOW] > 0.0);
    }

    #[test]
    fn test_series_rejects_bad_input() {
        assert!(PriceSeries::new(Vec::new()).is_err());

        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let unordered = vec![Candle::flat(ts, 1.0), Candle::flat(ts, 1.0)];
        assert!(PriceSeries::new(unordered).is_err());
    }

    #[test]
    fn test_series_accessors() {
        let s = series_from_closes(&[1.0, 2.0, 3.0]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.last_index(), 2);
        assert_eq!(s.close(2), 3.0);
    }
}
