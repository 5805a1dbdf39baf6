use serde::{Deserialize, Serialize};

use crate::patterns::{CandidateLevel, OrderBlocks, OteZones};
use crate::types::{Direction, LimitOrderLevel, Volatility, round2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "technical")]
    Technical,
    #[serde(rename = "ict")]
    Ict,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Technical => "technical",
            StrategyKind::Ict => "ict",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "technical" => Some(StrategyKind::Technical),
            "ict" | "smc" => Some(StrategyKind::Ict),
            _ => None,
        }
    }
}

/// Complete price plan for an actionable signal.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelPlan {
    pub entry: f64,
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub risk_reward: f64,
}

/// Structural inputs the ICT variant prefers over plain ATR ladders.
pub struct StructuralContext<'a> {
    pub order_blocks: &'a OrderBlocks,
    pub supports: &'a [f64],
    pub resistances: &'a [f64],
    pub ote: Option<&'a OteZones>,
}

/// ATR multipliers per strategy and volatility: (stop, [tp1, tp2, tp3]).
///
/// The ICT tables run tighter stops and wider targets than the technical
/// ones; both widen stops as volatility rises.
fn multipliers(kind: StrategyKind, volatility: Volatility) -> (f64, [f64; 3]) {
    match (kind, volatility) {
        (StrategyKind::Technical, Volatility::High) => (2.5, [2.0, 3.5, 5.0]),
        (StrategyKind::Technical, Volatility::Medium) => (2.0, [2.0, 3.0, 4.5]),
        (StrategyKind::Technical, Volatility::Low) => (1.5, [1.5, 2.5, 3.5]),
        (StrategyKind::Ict, Volatility::High) => (2.0, [2.5, 4.0, 6.0]),
        (StrategyKind::Ict, Volatility::Medium) => (1.5, [2.5, 3.5, 5.0]),
        (StrategyKind::Ict, Volatility::Low) => (1.2, [2.0, 3.0, 4.5]),
    }
}

/// Maximum distance, as a fraction of entry, for a structural stop anchor.
const STRUCTURAL_STOP_WINDOW: f64 = 0.05;
/// Buffer placed beyond the structural anchor.
const STRUCTURAL_STOP_BUFFER: f64 = 0.005;

/// Build the price plan. Only LONG and SHORT get one.
///
/// A missing or non-positive ATR falls back to 2% of price. The ICT variant
/// anchors the stop behind the nearest order block within 5% of entry and
/// takes the nearest three S/R levels as targets when enough exist; the
/// entry itself pulls back to the 0.705 retracement when an agreeing OTE
/// band is present. Anything structural that is unavailable falls back to
/// the ATR ladder.
pub fn calculate_levels(
    kind: StrategyKind,
    direction: Direction,
    price: f64,
    atr: Option<f64>,
    volatility: Volatility,
    structural: Option<&StructuralContext<'_>>,
) -> Option<LevelPlan> {
    if !direction.is_actionable() || price <= 0.0 {
        return None;
    }
    let atr = match atr {
        Some(a) if a > 0.0 => a,
        _ => price * 0.02,
    };
    let (stop_mult, tp_mults) = multipliers(kind, volatility);

    let mut entry = price;
    if kind == StrategyKind::Ict {
        if let Some(ote) = structural.and_then(|s| s.ote) {
            let agrees = match direction {
                Direction::Long => ote.direction == crate::types::Trend::Bullish,
                Direction::Short => ote.direction == crate::types::Trend::Bearish,
                _ => false,
            };
            if agrees {
                entry = ote.ote_705;
            }
        }
    }

    let mut stop_loss = match direction {
        Direction::Long => entry - stop_mult * atr,
        Direction::Short => entry + stop_mult * atr,
        _ => unreachable!(),
    };
    let mut targets = [
        match direction {
            Direction::Long => entry + tp_mults[0] * atr,
            _ => entry - tp_mults[0] * atr,
        },
        match direction {
            Direction::Long => entry + tp_mults[1] * atr,
            _ => entry - tp_mults[1] * atr,
        },
        match direction {
            Direction::Long => entry + tp_mults[2] * atr,
            _ => entry - tp_mults[2] * atr,
        },
    ];

    if kind == StrategyKind::Ict {
        if let Some(ctx) = structural {
            if let Some(anchor) = structural_stop_anchor(ctx.order_blocks, direction, entry) {
                stop_loss = match direction {
                    Direction::Long => anchor * (1.0 - STRUCTURAL_STOP_BUFFER),
                    _ => anchor * (1.0 + STRUCTURAL_STOP_BUFFER),
                };
            }
            if let Some(structural_targets) = structural_targets(ctx, direction, entry) {
                targets = structural_targets;
            }
        }
    }

    // a structural stop on the wrong side of entry is unusable
    let risk = match direction {
        Direction::Long => entry - stop_loss,
        _ => stop_loss - entry,
    };
    if risk <= 0.0 {
        stop_loss = match direction {
            Direction::Long => entry - stop_mult * atr,
            _ => entry + stop_mult * atr,
        };
    }
    let risk = match direction {
        Direction::Long => entry - stop_loss,
        _ => stop_loss - entry,
    };
    let reward = match direction {
        Direction::Long => targets[0] - entry,
        _ => entry - targets[0],
    };
    let risk_reward = if risk > 0.0 { round2(reward / risk) } else { 0.0 };

    Some(LevelPlan {
        entry: round2(entry),
        stop_loss: round2(stop_loss),
        tp1: round2(targets[0]),
        tp2: round2(targets[1]),
        tp3: round2(targets[2]),
        risk_reward,
    })
}

/// Nearest order-block edge behind the entry, within the 5% window.
fn structural_stop_anchor(
    blocks: &OrderBlocks,
    direction: Direction,
    entry: f64,
) -> Option<f64> {
    match direction {
        Direction::Long => blocks
            .bullish
            .iter()
            .map(|ob| ob.low)
            .filter(|&low| low < entry && (entry - low) / entry <= STRUCTURAL_STOP_WINDOW)
            .fold(None, |acc: Option<f64>, low| {
                Some(acc.map_or(low, |a| a.max(low)))
            }),
        Direction::Short => blocks
            .bearish
            .iter()
            .map(|ob| ob.high)
            .filter(|&high| high > entry && (high - entry) / entry <= STRUCTURAL_STOP_WINDOW)
            .fold(None, |acc: Option<f64>, high| {
                Some(acc.map_or(high, |a| a.min(high)))
            }),
        _ => None,
    }
}

/// The nearest three S/R levels beyond entry, or None when fewer exist.
fn structural_targets(
    ctx: &StructuralContext<'_>,
    direction: Direction,
    entry: f64,
) -> Option<[f64; 3]> {
    let mut beyond: Vec<f64> = match direction {
        Direction::Long => ctx
            .resistances
            .iter()
            .copied()
            .filter(|&r| r > entry)
            .collect(),
        _ => ctx.supports.iter().copied().filter(|&s| s < entry).collect(),
    };
    match direction {
        Direction::Long => beyond.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)),
        _ => beyond.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal)),
    }
    if beyond.len() >= 3 {
        Some([beyond[0], beyond[1], beyond[2]])
    } else {
        None
    }
}

/// Resting-order plan at a detected level: 2% stop, 2/4/6% target ladder.
pub fn limit_order_from_level(level: &CandidateLevel) -> LimitOrderLevel {
    let p = level.price;
    let (stop_loss, take_profits) = match level.side {
        Direction::Long => (p * 0.98, [p * 1.02, p * 1.04, p * 1.06]),
        _ => (p * 1.02, [p * 0.98, p * 0.96, p * 0.94]),
    };
    LimitOrderLevel {
        price: round2(p),
        side: level.side,
        source: level.source.clone(),
        stop_loss: round2(stop_loss),
        take_profits: take_profits.map(round2),
        confluence: level.confluence,
    }
}
