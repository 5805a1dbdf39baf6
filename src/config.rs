use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Runtime configuration, loaded from `config.yaml`.
///
/// Every field has a default so a missing or partial file still yields a
/// working setup.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// "technical" or "ict".
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
    #[serde(default = "default_base_url")]
    pub binance_base_url: String,
    /// Append-only JSON lines file for emitted signals. Disabled when unset.
    #[serde(default)]
    pub signal_log_path: Option<String>,
    #[serde(default = "default_true")]
    pub mtf_enabled: bool,
    /// Minimum age of a signal before a flip is considered.
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: i64,
    /// Confidence points a flip candidate must gain over the prior signal.
    #[serde(default = "default_confidence_delta")]
    pub min_confidence_delta: f64,
    /// How close (percent) price must be to a level to count as "at" it.
    #[serde(default = "default_level_tolerance")]
    pub level_tolerance_pct: f64,
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string()]
}

fn default_timeframe() -> String {
    "15m".to_string()
}

fn default_strategy() -> String {
    "ict".to_string()
}

fn default_scan_interval() -> u64 {
    30
}

fn default_candle_limit() -> u32 {
    200
}

fn default_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cooldown() -> i64 {
    10
}

fn default_confidence_delta() -> f64 {
    15.0
}

fn default_level_tolerance() -> f64 {
    0.3
}

impl Default for AppConfig {
    fn default() -> Self {
        // serde fills every field from its default fn
        serde_yaml::from_str("{}").expect("empty config must deserialize")
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {:?}", path.as_ref()))?;
        serde_yaml::from_str(&raw).context("parsing config file")
    }
}
