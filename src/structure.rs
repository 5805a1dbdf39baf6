use serde::{Deserialize, Serialize};

use crate::types::{Candle, Trend};

/// Window of candles considered for swing-point extraction.
const STRUCTURE_WINDOW: usize = 20;
/// Candles on each side that a swing point must dominate.
const SWING_NEIGHBORHOOD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStructure {
    /// Higher highs and higher lows.
    #[serde(rename = "HH_HL")]
    HhHl,
    /// Lower highs and lower lows.
    #[serde(rename = "LH_LL")]
    LhLl,
    #[serde(rename = "MIXED")]
    Mixed,
    /// Enough candles, but fewer than two swings on a side.
    #[serde(rename = "INSUFFICIENT_DATA")]
    InsufficientData,
    /// Not even a full swing window of candles to look at.
    #[serde(rename = "UNCLEAR")]
    Unclear,
}

/// Swing map of the recent window plus the derived structure label.
#[derive(Debug, Clone)]
pub struct StructureState {
    pub structure: MarketStructure,
    pub swing_highs: Vec<f64>,
    pub swing_lows: Vec<f64>,
}

impl StructureState {
    pub fn last_swing_high(&self) -> Option<f64> {
        self.swing_highs.last().copied()
    }

    pub fn last_swing_low(&self) -> Option<f64> {
        self.swing_lows.last().copied()
    }

    pub fn bias(&self) -> Trend {
        match self.structure {
            MarketStructure::HhHl => Trend::Bullish,
            MarketStructure::LhLl => Trend::Bearish,
            _ => Trend::Neutral,
        }
    }
}

/// Extract swing points from the last 20 candles and classify the structure.
///
/// Fewer than 20 candles is UNCLEAR before any swing extraction. A swing high
/// is a high strictly above the highs of the two candles on each side; swing
/// lows mirror that. Classification needs at least two swings on each side,
/// comparing the last two of each.
pub fn detect_market_structure(candles: &[Candle]) -> StructureState {
    if candles.len() < STRUCTURE_WINDOW {
        return StructureState {
            structure: MarketStructure::Unclear,
            swing_highs: Vec::new(),
            swing_lows: Vec::new(),
        };
    }
    let window = if candles.len() > STRUCTURE_WINDOW {
        &candles[candles.len() - STRUCTURE_WINDOW..]
    } else {
        candles
    };

    let mut swing_highs = Vec::new();
    let mut swing_lows = Vec::new();
    if window.len() > 2 * SWING_NEIGHBORHOOD {
        for i in SWING_NEIGHBORHOOD..window.len() - SWING_NEIGHBORHOOD {
            let neighborhood = &window[i - SWING_NEIGHBORHOOD..=i + SWING_NEIGHBORHOOD];
            let is_high = neighborhood
                .iter()
                .enumerate()
                .all(|(j, c)| j == SWING_NEIGHBORHOOD || c.high < window[i].high);
            let is_low = neighborhood
                .iter()
                .enumerate()
                .all(|(j, c)| j == SWING_NEIGHBORHOOD || c.low > window[i].low);
            if is_high {
                swing_highs.push(window[i].high);
            }
            if is_low {
                swing_lows.push(window[i].low);
            }
        }
    }

    let structure = if swing_highs.len() >= 2 && swing_lows.len() >= 2 {
        let hh = swing_highs[swing_highs.len() - 1] > swing_highs[swing_highs.len() - 2];
        let hl = swing_lows[swing_lows.len() - 1] > swing_lows[swing_lows.len() - 2];
        let lh = swing_highs[swing_highs.len() - 1] < swing_highs[swing_highs.len() - 2];
        let ll = swing_lows[swing_lows.len() - 1] < swing_lows[swing_lows.len() - 2];
        if hh && hl {
            MarketStructure::HhHl
        } else if lh && ll {
            MarketStructure::LhLl
        } else {
            MarketStructure::Mixed
        }
    } else {
        MarketStructure::InsufficientData
    };

    StructureState {
        structure,
        swing_highs,
        swing_lows,
    }
}

/// Break-of-structure and change-of-character flags for the latest close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakSignals {
    /// Close above the last swing high while structure is already bullish.
    pub bos_bullish: bool,
    /// Close below the last swing low while structure is already bearish.
    pub bos_bearish: bool,
    /// Close above the last swing high against a bearish structure.
    pub choch_bullish: bool,
    /// Close below the last swing low against a bullish structure.
    pub choch_bearish: bool,
}

pub fn detect_breaks(state: &StructureState, candles: &[Candle]) -> BreakSignals {
    let mut signals = BreakSignals::default();
    if candles.len() < 10 {
        return signals;
    }
    let close = candles[candles.len() - 1].close;
    let (Some(last_high), Some(last_low)) = (state.last_swing_high(), state.last_swing_low())
    else {
        return signals;
    };

    match state.structure {
        MarketStructure::HhHl => {
            signals.bos_bullish = close > last_high;
            signals.choch_bearish = close < last_low;
        }
        MarketStructure::LhLl => {
            signals.bos_bearish = close < last_low;
            signals.choch_bullish = close > last_high;
        }
        _ => {}
    }
    signals
}
