use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mtf::MtfAnalysis;

// ============================================================================
// Market data
// ============================================================================

/// A single closed kline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

// ============================================================================
// Signal classification
// ============================================================================

/// Final verdict of an analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
    #[serde(rename = "HOLD")]
    Hold,
    /// Price is away from every interesting level; wait for a retrace.
    #[serde(rename = "SETUP_PENDING")]
    SetupPending,
    /// Price tagged a level but has not confirmed a reaction yet.
    #[serde(rename = "AWAITING_CONFIRMATION")]
    AwaitingConfirmation,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::Hold => "HOLD",
            Direction::SetupPending => "SETUP_PENDING",
            Direction::AwaitingConfirmation => "AWAITING_CONFIRMATION",
        }
    }

    /// LONG and SHORT are tradeable; everything else is advisory.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Direction::Long | Direction::Short)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strength {
    #[serde(rename = "STRONG")]
    Strong,
    #[serde(rename = "MODERATE")]
    Moderate,
    #[serde(rename = "WEAK")]
    Weak,
}

impl Strength {
    /// The winning side's accumulated weight decides strength.
    pub fn from_score(score: f64) -> Self {
        if score >= 6.0 {
            Strength::Strong
        } else if score >= 4.0 {
            Strength::Moderate
        } else {
            Strength::Weak
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strength::Strong => "STRONG",
            Strength::Moderate => "MODERATE",
            Strength::Weak => "WEAK",
        }
    }
}

// ============================================================================
// Market condition labels
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    #[serde(rename = "BULLISH")]
    Bullish,
    #[serde(rename = "BEARISH")]
    Bearish,
    #[serde(rename = "RANGING")]
    Ranging,
    #[serde(rename = "NEUTRAL")]
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Volatility {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "LOW")]
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    #[serde(rename = "TRENDING_UP")]
    TrendingUp,
    #[serde(rename = "TRENDING_DOWN")]
    TrendingDown,
    #[serde(rename = "RANGING")]
    Ranging,
    #[serde(rename = "VOLATILE")]
    Volatile,
    #[serde(rename = "TRANSITIONING")]
    Transitioning,
}

// ============================================================================
// Setup lifecycle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "AWAITING_CONFIRMATION")]
    AwaitingConfirmation,
    #[serde(rename = "ACTIVE")]
    Active,
}

// ============================================================================
// Trade planning
// ============================================================================

/// A resting-order suggestion at a detected level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrderLevel {
    pub price: f64,
    pub side: Direction,
    /// What produced the level: "ORDER_BLOCK", "FVG", "SUPPORT", "RESISTANCE".
    pub source: String,
    pub stop_loss: f64,
    pub take_profits: [f64; 3],
    /// Confluence weight backing this level, used for ranking.
    pub confluence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MODERATE")]
    Moderate,
    #[serde(rename = "HIGH")]
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageSuggestion {
    pub leverage: u32,
    pub risk_level: RiskLevel,
    /// Suggested position size as a percentage of account, e.g. "7.5%".
    pub position_size: String,
    pub recommendation: String,
    pub reasoning: Vec<String>,
}

// ============================================================================
// Engine output
// ============================================================================

/// Everything one analysis pass produces for a symbol/timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResponse {
    pub symbol: String,
    pub timeframe: String,
    pub strategy: String,
    pub direction: Direction,
    pub strength: Strength,
    /// Winner share of total weight, percent, capped at 95.
    pub confidence: f64,
    /// Number of detectors that contributed weight.
    pub confluence_score: usize,
    pub bullish_score: f64,
    pub bearish_score: f64,
    pub evidence: Vec<String>,
    pub current_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_reward: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<LeverageSuggestion>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub limit_orders: Vec<LimitOrderLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_state: Option<SetupState>,
    /// Populated while the setup is pending: the levels worth waiting at.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pending_levels: Vec<LimitOrderLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtf: Option<MtfAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_signal: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killzone: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Round to two decimals, the precision used for every published price/score.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_thresholds() {
        assert_eq!(Strength::from_score(6.0), Strength::Strong);
        assert_eq!(Strength::from_score(5.9), Strength::Moderate);
        assert_eq!(Strength::from_score(4.0), Strength::Moderate);
        assert_eq!(Strength::from_score(3.9), Strength::Weak);
        assert_eq!(Strength::from_score(0.0), Strength::Weak);
    }

    #[test]
    fn direction_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&Direction::SetupPending).unwrap(),
            "\"SETUP_PENDING\""
        );
        assert_eq!(serde_json::to_string(&Direction::Long).unwrap(), "\"LONG\"");
    }

    #[test]
    fn candle_geometry() {
        let c = Candle {
            open_time: Utc::now(),
            close_time: Utc::now(),
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close: 104.0,
            volume: 1000.0,
        };
        assert!(c.is_bullish());
        assert_eq!(c.body(), 4.0);
        assert_eq!(c.upper_wick(), 6.0);
        assert_eq!(c.lower_wick(), 5.0);
        assert_eq!(c.range(), 15.0);
    }

    #[test]
    fn round2_behaviour() {
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(0.004), 0.0);
    }
}
