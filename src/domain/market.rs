use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Result, SpotbotError};

/// A single OHLCV candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Candle with open/high/low all equal to the close
    pub fn flat(timestamp: DateTime<Utc>, close: f64) -> Self {
        Self {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }

    /// Check that prices are finite and positive and the range is consistent
    pub fn is_valid(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite() && *p > 0.0)
            && self.high >= self.low
            && self.volume.is_finite()
    }
}

/// Side of a spot fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Load candles from a CSV file
/// Expected format: timestamp,open,high,low,close,volume (header row required)
pub fn load_candles_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut candles: Vec<Candle> = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if i == 0 || line.trim().is_empty() {
            continue; // Skip header
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 6 {
            warn!("Skipping malformed line {}: insufficient columns", i);
            continue;
        }

        let timestamp = parse_timestamp(parts[0]).ok_or_else(|| {
            SpotbotError::InvalidMarketData(format!("Invalid timestamp at line {}", i))
        })?;

        let field = |idx: usize| -> Result<f64> {
            parts[idx].parse::<f64>().map_err(|e| {
                SpotbotError::InvalidMarketData(format!("Line {} column {}: {}", i, idx, e))
            })
        };

        let candle = Candle {
            timestamp,
            open: field(1)?,
            high: field(2)?,
            low: field(3)?,
            close: field(4)?,
            volume: field(5)?,
        };

        if !candle.is_valid() {
            warn!("Skipping invalid candle at line {}", i);
            continue;
        }

        if let Some(prev) = candles.last() {
            if candle.timestamp <= prev.timestamp {
                return Err(SpotbotError::InvalidMarketData(format!(
                    "Timestamps must be strictly increasing (line {})",
                    i
                )));
            }
        }

        candles.push(candle);
    }

    info!("Loaded {} candles from {}", candles.len(), path.display());
    Ok(candles)
}

/// Parse a unix (seconds or milliseconds) or ISO-8601 timestamp
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = s.parse::<i64>() {
        if ts > 1_000_000_000_000 {
            return Utc.timestamp_millis_opt(ts).single();
        } else {
            return Utc.timestamp_opt(ts, 0).single();
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    None
}
