//! Market Data Feeds
//!
//! Polled candle sources for the live adapter. Feeds report unavailable data
//! as an empty window rather than an error.

use async_trait::async_trait;
use chrono::DateTime;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{load_candles_csv, Candle};
use crate::error::{Result, SpotbotError};

const BINANCE_API_URL: &str = "https://api.binance.com";

/// Binance caps a klines request at this many rows
const MAX_KLINES_PER_REQUEST: usize = 1000;

/// Source of the most recent `lookback` candles for a symbol
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Oldest-first candles; empty when the source is unavailable
    async fn get_market_data(&self, symbol: &str, timeframe: &str, lookback: usize)
        -> Vec<Candle>;
}

/// Binance spot K-line REST feed
pub struct BinanceKlineFeed {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceKlineFeed {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(BINANCE_API_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch K-lines; interval examples "1m", "5m", "1h"
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval,
            limit.clamp(1, MAX_KLINES_PER_REQUEST)
        );

        debug!("Fetching K-lines: {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(SpotbotError::InvalidMarketData(format!(
                "K-line API error: {}",
                response.status()
            )));
        }

        let data: Vec<Vec<serde_json::Value>> = response.json().await?;
        let candles = parse_kline_rows(&data);

        debug!("Fetched {} K-lines for {}", candles.len(), symbol);
        Ok(candles)
    }
}

#[async_trait]
impl MarketDataFeed for BinanceKlineFeed {
    async fn get_market_data(
        &self,
        symbol: &str,
        timeframe: &str,
        lookback: usize,
    ) -> Vec<Candle> {
        match self.fetch_klines(symbol, timeframe, lookback).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!("K-line fetch for {} {} failed: {}", symbol, timeframe, e);
                Vec::new()
            }
        }
    }
}

/// Parse Binance kline rows, dropping malformed ones
pub fn parse_kline_rows(rows: &[Vec<serde_json::Value>]) -> Vec<Candle> {
    rows.iter()
        .filter_map(|row| parse_kline_row(row))
        .filter(|c| c.is_valid())
        .collect()
}

fn parse_kline_row(row: &[serde_json::Value]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }

    let timestamp = DateTime::from_timestamp_millis(row[0].as_i64()?)?;
    let number = |v: &serde_json::Value| -> Option<f64> {
        match v {
            serde_json::Value::String(s) => s.parse().ok(),
            other => other.as_f64(),
        }
    };

    Some(Candle {
        timestamp,
        open: number(&row[1])?,
        high: number(&row[2])?,
        low: number(&row[3])?,
        close: number(&row[4])?,
        volume: number(&row[5])?,
    })
}

/// Replays a fixed candle history as a growing live window.
///
/// The first call sees `initial` candles; every later call reveals one more
/// until the history is exhausted, after which the window stops changing.
pub struct CsvReplayFeed {
    candles: Vec<Candle>,
    cursor: AtomicUsize,
}

impl CsvReplayFeed {
    pub fn from_csv<P: AsRef<Path>>(path: P, initial: usize) -> Result<Self> {
        Ok(Self::from_candles(load_candles_csv(path)?, initial))
    }

    pub fn from_candles(candles: Vec<Candle>, initial: usize) -> Self {
        let initial = initial.clamp(1, candles.len().max(1));
        Self {
            candles,
            cursor: AtomicUsize::new(initial),
        }
    }

    /// Candles revealed so far
    pub fn revealed(&self) -> usize {
        self.cursor.load(Ordering::SeqCst).min(self.candles.len())
    }

    pub fn is_exhausted(&self) -> bool {
        self.revealed() >= self.candles.len()
    }
}

#[async_trait]
impl MarketDataFeed for CsvReplayFeed {
    async fn get_market_data(
        &self,
        _symbol: &str,
        _timeframe: &str,
        lookback: usize,
    ) -> Vec<Candle> {
        let len = self.candles.len();
        let end = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some((c + 1).min(len)))
            .unwrap_or(len)
            .min(len);
        let start = end.saturating_sub(lookback);
        self.candles[start..end].to_vec()
    }
}
