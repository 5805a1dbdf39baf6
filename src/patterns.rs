use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Candle, Direction, Trend, round2};

/// Detectors only look this far back.
const DETECTION_WINDOW: usize = 50;
/// Displacement candle must have at least twice the body of the base candle.
const DISPLACEMENT_RATIO: f64 = 2.0;
const MAX_OB_STRENGTH: f64 = 10.0;
/// A close must breach a block boundary by this fraction to void it.
const BREAKER_BREACH: f64 = 0.005;
/// A breaker keeps this share of the violated block's strength.
const BREAKER_STRENGTH_FACTOR: f64 = 0.8;
const KEPT_PER_SIDE: usize = 3;
const KEPT_FVGS_PER_SIDE: usize = 5;
/// Std-dev of highs/lows below this fraction of their mean marks an equal cluster.
const EQUAL_CLUSTER_TOLERANCE: f64 = 0.002;

// ============================================================================
// Order blocks and breaker blocks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObSide {
    #[serde(rename = "BULLISH")]
    Bullish,
    #[serde(rename = "BEARISH")]
    Bearish,
}

/// The last opposing candle before a displacement move.
///
/// The side names the direction of the displacement, not of the base candle:
/// a bearish candle swallowed by a strong up-move forms a bullish block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBlock {
    pub side: ObSide,
    pub high: f64,
    pub low: f64,
    /// Displacement body over base body, capped at 10.
    pub strength: f64,
    pub open_time: DateTime<Utc>,
}

impl OrderBlock {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }
}

/// A violated order block, flipped to the opposite polarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerBlock {
    pub side: ObSide,
    pub high: f64,
    pub low: f64,
    /// 80% of the violated block's strength.
    pub strength: f64,
}

impl BreakerBlock {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderBlocks {
    /// Most recent first.
    pub bullish: Vec<OrderBlock>,
    pub bearish: Vec<OrderBlock>,
}

/// Scan for order blocks and the breakers they turn into when violated.
///
/// A bullish block is a bearish candle followed by a bullish candle whose body
/// is at least twice as large; a later close more than 0.5% below the block's
/// low voids it and leaves a bearish breaker carrying 80% of its strength.
/// Mirrored for bearish blocks. The three most recent surviving blocks per
/// side are kept, newest first.
pub fn detect_order_blocks(candles: &[Candle]) -> (OrderBlocks, Vec<BreakerBlock>) {
    let window = tail(candles, DETECTION_WINDOW);
    let mut blocks = OrderBlocks::default();
    let mut breakers = Vec::new();
    if window.len() < 5 {
        return (blocks, breakers);
    }

    for i in 3..window.len() - 1 {
        let base = &window[i];
        let displacement = &window[i + 1];
        if base.body() <= 0.0 || displacement.body() < base.body() * DISPLACEMENT_RATIO {
            continue;
        }

        let side = if base.is_bearish() && displacement.is_bullish() {
            ObSide::Bullish
        } else if base.is_bullish() && displacement.is_bearish() {
            ObSide::Bearish
        } else {
            continue;
        };

        let block = OrderBlock {
            side,
            high: base.high,
            low: base.low,
            strength: (displacement.body() / base.body()).min(MAX_OB_STRENGTH),
            open_time: base.open_time,
        };

        let violated = window[i + 2..].iter().any(|c| match side {
            ObSide::Bullish => c.close < block.low * (1.0 - BREAKER_BREACH),
            ObSide::Bearish => c.close > block.high * (1.0 + BREAKER_BREACH),
        });
        if violated {
            breakers.push(BreakerBlock {
                side: match side {
                    ObSide::Bullish => ObSide::Bearish,
                    ObSide::Bearish => ObSide::Bullish,
                },
                high: block.high,
                low: block.low,
                strength: block.strength * BREAKER_STRENGTH_FACTOR,
            });
        } else {
            match side {
                ObSide::Bullish => blocks.bullish.push(block),
                ObSide::Bearish => blocks.bearish.push(block),
            }
        }
    }

    for list in [&mut blocks.bullish, &mut blocks.bearish] {
        list.sort_by(|a, b| {
            b.open_time.cmp(&a.open_time).then_with(|| {
                b.strength
                    .partial_cmp(&a.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        list.truncate(KEPT_PER_SIDE);
    }
    let keep_from = breakers.len().saturating_sub(KEPT_PER_SIDE);
    breakers.drain(..keep_from);

    (blocks, breakers)
}

// ============================================================================
// Fair value gaps
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fvg {
    pub side: ObSide,
    pub top: f64,
    pub bottom: f64,
}

impl Fvg {
    pub fn midpoint(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct FvgSet {
    pub bullish: Vec<Fvg>,
    pub bearish: Vec<Fvg>,
}

/// Three-candle imbalances still relevant at the current close.
///
/// Bullish: first candle's high below third candle's low, retained only
/// while the latest close is still under the gap top. Mirrored for bearish.
/// The last five gaps per side are kept.
pub fn detect_fair_value_gaps(candles: &[Candle]) -> FvgSet {
    let window = tail(candles, DETECTION_WINDOW);
    let mut set = FvgSet::default();
    if window.len() < 3 {
        return set;
    }
    let close = window[window.len() - 1].close;

    for i in 2..window.len() {
        let first = &window[i - 2];
        let third = &window[i];
        if first.high < third.low {
            if close < third.low {
                set.bullish.push(Fvg {
                    side: ObSide::Bullish,
                    top: third.low,
                    bottom: first.high,
                });
            }
        } else if first.low > third.high && close > third.high {
            set.bearish.push(Fvg {
                side: ObSide::Bearish,
                top: first.low,
                bottom: third.high,
            });
        }
    }

    for list in [&mut set.bullish, &mut set.bearish] {
        let keep_from = list.len().saturating_sub(KEPT_FVGS_PER_SIDE);
        list.drain(..keep_from);
    }
    set
}

// ============================================================================
// Liquidity: equal highs/lows and sweeps
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct LiquidityZones {
    /// Clustered equal highs (buy-side liquidity), highest first.
    pub equal_highs: Vec<f64>,
    /// Clustered equal lows (sell-side liquidity), lowest first.
    pub equal_lows: Vec<f64>,
}

/// Find 5-candle clusters whose highs (or lows) sit within 0.2% of each other.
pub fn detect_liquidity_zones(candles: &[Candle]) -> LiquidityZones {
    let window = tail(candles, DETECTION_WINDOW);
    let mut zones = LiquidityZones::default();
    if window.len() < 5 {
        return zones;
    }

    for chunk in window.windows(5) {
        let highs: Vec<f64> = chunk.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = chunk.iter().map(|c| c.low).collect();
        if let Some(level) = cluster_level(&highs) {
            push_dedup(&mut zones.equal_highs, level);
        }
        if let Some(level) = cluster_level(&lows) {
            push_dedup(&mut zones.equal_lows, level);
        }
    }

    for list in [&mut zones.equal_highs, &mut zones.equal_lows] {
        let keep_from = list.len().saturating_sub(KEPT_PER_SIDE);
        list.drain(..keep_from);
    }
    zones
        .equal_highs
        .sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    zones
        .equal_lows
        .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    zones
}

fn cluster_level(values: &[f64]) -> Option<f64> {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean <= 0.0 {
        return None;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    if variance.sqrt() < mean * EQUAL_CLUSTER_TOLERANCE {
        Some(round2(mean))
    } else {
        None
    }
}

fn push_dedup(list: &mut Vec<f64>, level: f64) {
    if !list.iter().any(|&l| l == level) {
        list.push(level);
    }
}

/// A wick through a resting liquidity level with a close back inside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquiditySweep {
    pub level: f64,
    /// Bias after the sweep: taking out highs and failing implies downside.
    pub bias: Trend,
}

/// The latest candle wicks through an equal-high/equal-low cluster, closes
/// back on the near side, and shows a rejection wick over 40% of its range.
pub fn detect_liquidity_sweep(candles: &[Candle]) -> Option<LiquiditySweep> {
    let (last, prior) = candles.split_last()?;
    let zones = detect_liquidity_zones(prior);
    let range = last.range();
    if range <= 0.0 {
        return None;
    }

    for &level in &zones.equal_highs {
        if last.high > level && last.close < level && last.upper_wick() / range > 0.4 {
            return Some(LiquiditySweep {
                level,
                bias: Trend::Bearish,
            });
        }
    }
    for &level in &zones.equal_lows {
        if last.low < level && last.close > level && last.lower_wick() / range > 0.4 {
            return Some(LiquiditySweep {
                level,
                bias: Trend::Bullish,
            });
        }
    }
    None
}

// ============================================================================
// Premium / discount
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Zone {
    #[serde(rename = "PREMIUM")]
    Premium,
    #[serde(rename = "DISCOUNT")]
    Discount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquilibriumZones {
    pub zone: Zone,
    /// How far into the zone price sits, 0 at the midpoint, 100 at the extreme.
    pub depth_pct: f64,
    pub range_high: f64,
    pub range_low: f64,
    pub midpoint: f64,
}

pub fn detect_equilibrium(candles: &[Candle]) -> Option<EquilibriumZones> {
    let window = tail(candles, DETECTION_WINDOW);
    if window.is_empty() {
        return None;
    }
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    if high <= low {
        return None;
    }
    let mid = (high + low) / 2.0;
    let price = window[window.len() - 1].close;

    let (zone, depth) = if price > mid {
        (Zone::Premium, (price - mid) / (high - mid) * 100.0)
    } else {
        (Zone::Discount, (mid - price) / (mid - low) * 100.0)
    };
    Some(EquilibriumZones {
        zone,
        depth_pct: round2(depth.clamp(0.0, 100.0)),
        range_high: high,
        range_low: low,
        midpoint: mid,
    })
}

// ============================================================================
// Optimal trade entry
// ============================================================================

/// Fibonacci retracement band of the recent leg, 0.62 to 0.79, with the
/// 0.705 midpoint used as the entry price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OteZones {
    pub direction: Trend,
    pub fib_62: f64,
    pub fib_79: f64,
    pub ote_705: f64,
}

impl OteZones {
    pub fn contains(&self, price: f64) -> bool {
        let (lo, hi) = if self.fib_62 <= self.fib_79 {
            (self.fib_62, self.fib_79)
        } else {
            (self.fib_79, self.fib_62)
        };
        price >= lo && price <= hi
    }
}

pub fn calculate_ote(candles: &[Candle], bias: Trend) -> Option<OteZones> {
    let window = tail(candles, DETECTION_WINDOW);
    if window.len() < 10 {
        return None;
    }
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let range = high - low;
    if range <= 0.0 {
        return None;
    }

    match bias {
        Trend::Bullish => Some(OteZones {
            direction: Trend::Bullish,
            fib_62: round2(high - 0.62 * range),
            fib_79: round2(high - 0.79 * range),
            ote_705: round2(high - 0.705 * range),
        }),
        Trend::Bearish => Some(OteZones {
            direction: Trend::Bearish,
            fib_62: round2(low + 0.62 * range),
            fib_79: round2(low + 0.79 * range),
            ote_705: round2(low + 0.705 * range),
        }),
        _ => None,
    }
}

// ============================================================================
// Killzones
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillzoneStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub multiplier: f64,
}

/// Session windows in New York time, pinned to UTC-5 year round.
const KILLZONES: &[(&str, u32, u32, f64)] = &[
    ("London Open", 2, 5, 1.3),
    ("New York AM", 8, 11, 1.5),
    ("London Close", 10, 12, 1.2),
];

/// First matching session wins; overlaps resolve in declaration order.
pub fn killzone_status(now: DateTime<Utc>) -> KillzoneStatus {
    let ny = FixedOffset::west_opt(5 * 3600).expect("valid offset");
    let hour = now.with_timezone(&ny).hour();

    for &(name, start, end, multiplier) in KILLZONES {
        if hour >= start && hour < end {
            return KillzoneStatus {
                active: true,
                name: Some(name.to_string()),
                multiplier,
            };
        }
    }
    KillzoneStatus {
        active: false,
        name: None,
        multiplier: 1.0,
    }
}

// ============================================================================
// Level candidates and reaction confirmation
// ============================================================================

/// A price worth resting an order at, ranked by the weight of its source.
#[derive(Debug, Clone)]
pub struct CandidateLevel {
    pub price: f64,
    pub source: String,
    pub side: Direction,
    pub confluence: f64,
}

/// Assemble entry candidates: order-block edges, gap midpoints, and S/R.
/// Long candidates sit below price, short candidates above.
pub fn candidate_levels(
    blocks: &OrderBlocks,
    fvgs: &FvgSet,
    supports: &[f64],
    resistances: &[f64],
    price: f64,
) -> Vec<CandidateLevel> {
    let mut levels = Vec::new();

    for ob in &blocks.bullish {
        if ob.high < price {
            levels.push(CandidateLevel {
                price: ob.high,
                source: "ORDER_BLOCK".to_string(),
                side: Direction::Long,
                confluence: 2.5,
            });
        }
    }
    for ob in &blocks.bearish {
        if ob.low > price {
            levels.push(CandidateLevel {
                price: ob.low,
                source: "ORDER_BLOCK".to_string(),
                side: Direction::Short,
                confluence: 2.5,
            });
        }
    }
    for gap in &fvgs.bullish {
        if gap.midpoint() < price {
            levels.push(CandidateLevel {
                price: gap.midpoint(),
                source: "FVG".to_string(),
                side: Direction::Long,
                confluence: 1.5,
            });
        }
    }
    for gap in &fvgs.bearish {
        if gap.midpoint() > price {
            levels.push(CandidateLevel {
                price: gap.midpoint(),
                source: "FVG".to_string(),
                side: Direction::Short,
                confluence: 1.5,
            });
        }
    }
    for &s in supports {
        if s < price {
            levels.push(CandidateLevel {
                price: s,
                source: "SUPPORT".to_string(),
                side: Direction::Long,
                confluence: 1.0,
            });
        }
    }
    for &r in resistances {
        if r > price {
            levels.push(CandidateLevel {
                price: r,
                source: "RESISTANCE".to_string(),
                side: Direction::Short,
                confluence: 1.0,
            });
        }
    }

    levels.sort_by(|a, b| {
        b.confluence
            .partial_cmp(&a.confluence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    // collapse near-duplicates, keeping the higher-confluence entry
    let mut deduped: Vec<CandidateLevel> = Vec::new();
    for level in levels {
        let duplicate = deduped
            .iter()
            .any(|kept| (kept.price - level.price).abs() / level.price < 0.001);
        if !duplicate {
            deduped.push(level);
        }
    }
    deduped
}

/// The candidate whose price is within `tolerance_pct` of the current price.
pub fn at_level<'a>(
    price: f64,
    levels: &'a [CandidateLevel],
    tolerance_pct: f64,
) -> Option<&'a CandidateLevel> {
    levels
        .iter()
        .filter(|l| (price - l.price).abs() / l.price * 100.0 <= tolerance_pct)
        .min_by(|a, b| {
            let da = (price - a.price).abs();
            let db = (price - b.price).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Has the latest candle confirmed a reaction off the level?
///
/// Either a close through the level in the trade direction, or a rejection
/// wick over 40% of the range with the close in the favorable 60%.
pub fn confirms_reaction(candle: &Candle, level: f64, side: Direction) -> bool {
    let range = candle.range();
    match side {
        Direction::Long => {
            if candle.close > level {
                return true;
            }
            range > 0.0
                && candle.lower_wick() / range > 0.4
                && candle.close >= candle.low + 0.4 * range
        }
        Direction::Short => {
            if candle.close < level {
                return true;
            }
            range > 0.0
                && candle.upper_wick() / range > 0.4
                && candle.close <= candle.high - 0.4 * range
        }
        _ => false,
    }
}

fn tail(candles: &[Candle], n: usize) -> &[Candle] {
    if candles.len() > n {
        &candles[candles.len() - n..]
    } else {
        candles
    }
}
