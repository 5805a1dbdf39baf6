use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, SignalError};
use crate::mtf::Timeframe;
use crate::types::Candle;

/// Source of candle history. The engine only talks to this trait, so tests
/// swap in canned data.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn klines(&self, symbol: &str, timeframe: Timeframe, limit: u32) -> Result<Vec<Candle>>;
}

/// Binance USD-M futures REST client.
pub struct BinanceFutures {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceFutures {
    pub fn new(base_url: impl Into<String>) -> Self {
        BinanceFutures {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MarketData for BinanceFutures {
    async fn klines(&self, symbol: &str, timeframe: Timeframe, limit: u32) -> Result<Vec<Candle>> {
        let url = format!("{}/fapi/v1/klines", self.base_url);
        let limit = limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", timeframe.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| SignalError::BadResponse(format!("klines body: {e}")))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            match parse_kline(row) {
                Some(candle) => candles.push(candle),
                None => warn!(symbol, timeframe = %timeframe, "skipping malformed kline row"),
            }
        }

        if candles.is_empty() {
            return Err(SignalError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.as_str().to_string(),
                reason: "exchange returned no candles".to_string(),
            });
        }
        Ok(candles)
    }
}

/// Binance kline row: [open_time, open, high, low, close, volume, close_time, ...]
/// with prices and volume as strings.
fn parse_kline(row: &Value) -> Option<Candle> {
    let arr = row.as_array()?;
    if arr.len() < 7 {
        return None;
    }
    let open_time = Utc.timestamp_millis_opt(arr[0].as_i64()?).single()?;
    let close_time = Utc.timestamp_millis_opt(arr[6].as_i64()?).single()?;
    let parse = |v: &Value| v.as_str()?.parse::<f64>().ok();
    Some(Candle {
        open_time,
        close_time,
        open: parse(&arr[1])?,
        high: parse(&arr[2])?,
        low: parse(&arr[3])?,
        close: parse(&arr[4])?,
        volume: parse(&arr[5])?,
    })
}
