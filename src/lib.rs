//! Confluence-based futures signal engine.
//!
//! Candle history flows through indicator and pattern detectors into a
//! weighted scoring pass, producing a direction with confidence, a trade
//! plan (entry, stop, targets, leverage), multi-timeframe confirmation,
//! and a stability gate that damps signal flapping.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod levels;
pub mod leverage;
pub mod logging;
pub mod mtf;
pub mod patterns;
pub mod scoring;
pub mod stability;
pub mod strategies;
pub mod structure;
pub mod types;

pub use config::AppConfig;
pub use data::{BinanceFutures, MarketData};
pub use engine::{EngineConfig, SignalEngine};
pub use error::{Result, SignalError};
pub use levels::StrategyKind;
pub use mtf::Timeframe;
pub use stability::SignalHistory;
pub use types::{Direction, SignalResponse, Strength};
