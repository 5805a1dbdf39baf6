use crate::indicators::IndicatorSet;
use crate::types::{Candle, MarketRegime, round2};

const SR_WINDOW: usize = 50;
const SR_KEPT: usize = 5;
/// Levels closer than this fraction of price collapse into one.
const SR_DEDUP_TOLERANCE: f64 = 0.005;

// ============================================================================
// Support / resistance
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SupportResistance {
    /// Below current price, nearest first.
    pub supports: Vec<f64>,
    /// Above current price, nearest first.
    pub resistances: Vec<f64>,
}

/// Swing extremes of the trailing window plus the EMA-50 and Bollinger bands,
/// split around the current price.
pub fn detect_support_resistance(
    candles: &[Candle],
    indicators: &IndicatorSet,
) -> SupportResistance {
    let mut sr = SupportResistance::default();
    if candles.is_empty() {
        return sr;
    }
    let window = if candles.len() > SR_WINDOW {
        &candles[candles.len() - SR_WINDOW..]
    } else {
        candles
    };
    let price = candles[candles.len() - 1].close;

    let mut levels = Vec::new();
    if window.len() > 4 {
        for i in 2..window.len() - 2 {
            let high_swing = (i - 2..=i + 2)
                .filter(|&j| j != i)
                .all(|j| window[j].high < window[i].high);
            let low_swing = (i - 2..=i + 2)
                .filter(|&j| j != i)
                .all(|j| window[j].low > window[i].low);
            if high_swing {
                levels.push(window[i].high);
            }
            if low_swing {
                levels.push(window[i].low);
            }
        }
    }
    for name in ["ema_50", "bb_upper", "bb_lower"] {
        if let Some(v) = indicators.get(name) {
            levels.push(v);
        }
    }

    for level in levels {
        let level = round2(level);
        if level <= 0.0 {
            continue;
        }
        let (list, side_ok) = if level < price {
            (&mut sr.supports, true)
        } else if level > price {
            (&mut sr.resistances, true)
        } else {
            (&mut sr.supports, false)
        };
        if !side_ok {
            continue;
        }
        let duplicate = list
            .iter()
            .any(|&kept| (kept - level).abs() / price < SR_DEDUP_TOLERANCE);
        if !duplicate {
            list.push(level);
        }
    }

    sr.supports.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    sr.resistances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sr.supports.truncate(SR_KEPT);
    sr.resistances.truncate(SR_KEPT);
    sr
}

// ============================================================================
// Candlestick patterns
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandlePatterns {
    pub bullish_engulfing: bool,
    pub bearish_engulfing: bool,
    pub hammer: bool,
    pub shooting_star: bool,
    pub doji: bool,
    pub bullish_pin: bool,
    pub bearish_pin: bool,
}

/// Patterns on the latest candle (and its predecessor for engulfings).
pub fn detect_candle_patterns(candles: &[Candle]) -> CandlePatterns {
    let mut p = CandlePatterns::default();
    if candles.len() < 2 {
        return p;
    }
    let prev = &candles[candles.len() - 2];
    let cur = &candles[candles.len() - 1];
    let body = cur.body();
    let range = cur.range();

    p.bullish_engulfing = prev.is_bearish()
        && cur.is_bullish()
        && cur.close > prev.open
        && cur.open < prev.close;
    p.bearish_engulfing = prev.is_bullish()
        && cur.is_bearish()
        && cur.close < prev.open
        && cur.open > prev.close;

    if body > 0.0 {
        p.hammer = cur.lower_wick() > body * 2.0 && cur.upper_wick() < body;
        p.shooting_star = cur.upper_wick() > body * 2.0 && cur.lower_wick() < body;
    }
    if range > 0.0 {
        p.doji = body < range * 0.1;
        p.bullish_pin =
            cur.lower_wick() > range * 0.6 && cur.close >= cur.low + range * 0.5;
        p.bearish_pin =
            cur.upper_wick() > range * 0.6 && cur.close <= cur.high - range * 0.5;
    }
    p
}

// ============================================================================
// Trend strength
// ============================================================================

/// Composite 0..100 score: ADX tier, EMA stack, momentum slope, price
/// location, and volume participation.
pub fn trend_strength(candles: &[Candle], indicators: &IndicatorSet) -> f64 {
    let mut score: f64 = 0.0;
    let adx = indicators.get_or("adx", 0.0);
    if adx > 40.0 {
        score += 30.0;
    } else if adx > 25.0 {
        score += 20.0;
    } else if adx > 20.0 {
        score += 10.0;
    }

    let e9 = indicators.get_or("ema_9", 0.0);
    let e21 = indicators.get_or("ema_21", 0.0);
    let e50 = indicators.get_or("ema_50", 0.0);
    let stacked_up = e9 > e21 && e21 > e50;
    let stacked_down = e9 < e21 && e21 < e50;
    if stacked_up || stacked_down {
        score += 20.0;
    }

    if let Some(slope) = regression_slope(candles, 10) {
        let last = candles[candles.len() - 1].close;
        if last > 0.0 && (slope / last).abs() > 0.0005 {
            score += 20.0;
        }
    }

    if !candles.is_empty() {
        let price = candles[candles.len() - 1].close;
        if (stacked_up && price > e50) || (stacked_down && price < e50) {
            score += 20.0;
        }
    }

    if indicators.get_or("volume_ratio", 1.0) > 1.2 {
        score += 10.0;
    }
    score.min(100.0)
}

/// Least-squares slope of the last `n` closes, price units per candle.
fn regression_slope(candles: &[Candle], n: usize) -> Option<f64> {
    if candles.len() < n || n < 2 {
        return None;
    }
    let closes = &candles[candles.len() - n..];
    let xs_mean = (n - 1) as f64 / 2.0;
    let ys_mean = closes.iter().map(|c| c.close).sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, c) in closes.iter().enumerate() {
        let dx = i as f64 - xs_mean;
        num += dx * (c.close - ys_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

// ============================================================================
// Divergence
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Divergences {
    pub rsi_bullish: bool,
    pub rsi_bearish: bool,
}

/// Heuristic divergence: price moving one way while RSI holds a neutral band
/// on the other side.
pub fn detect_divergence(candles: &[Candle], indicators: &IndicatorSet) -> Divergences {
    let mut d = Divergences::default();
    if candles.len() < 10 {
        return d;
    }
    let now = candles[candles.len() - 1].close;
    let then = candles[candles.len() - 10].close;
    let rsi = indicators.get_or("rsi", 50.0);

    d.rsi_bullish = now < then && rsi > 35.0 && rsi < 50.0;
    d.rsi_bearish = now > then && rsi > 50.0 && rsi < 65.0;
    d
}

// ============================================================================
// Market regime
// ============================================================================

pub fn detect_market_regime(indicators: &IndicatorSet) -> MarketRegime {
    let adx = indicators.get_or("adx", 0.0);
    let e9 = indicators.get_or("ema_9", 0.0);
    let e21 = indicators.get_or("ema_21", 0.0);
    let e50 = indicators.get_or("ema_50", 0.0);
    let bb_width = indicators.get_or("bb_width", 0.0);

    if adx > 25.0 && e9 > e21 && e21 > e50 {
        MarketRegime::TrendingUp
    } else if adx > 25.0 && e9 < e21 && e21 < e50 {
        MarketRegime::TrendingDown
    } else if adx < 20.0 && bb_width < 0.1 {
        MarketRegime::Ranging
    } else if bb_width > 0.15 {
        MarketRegime::Volatile
    } else {
        MarketRegime::Transitioning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        Candle {
            open_time: t0 + Duration::minutes(15 * i),
            close_time: t0 + Duration::minutes(15 * (i + 1)),
            open,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn engulfing_patterns() {
        let candles = vec![
            candle(0, 100.0, 100.5, 99.0, 99.2),
            candle(1, 99.0, 100.8, 98.9, 100.6),
        ];
        let p = detect_candle_patterns(&candles);
        assert!(p.bullish_engulfing);
        assert!(!p.bearish_engulfing);
    }

    #[test]
    fn hammer_and_shooting_star() {
        let hammer = vec![
            candle(0, 100.0, 100.2, 99.8, 100.0),
            candle(1, 100.0, 100.3, 98.5, 100.2),
        ];
        let p = detect_candle_patterns(&hammer);
        assert!(p.hammer);
        assert!(!p.shooting_star);

        let star = vec![
            candle(0, 100.0, 100.2, 99.8, 100.0),
            candle(1, 100.2, 101.7, 99.9, 100.0),
        ];
        let p = detect_candle_patterns(&star);
        assert!(p.shooting_star);
        assert!(!p.hammer);
    }

    #[test]
    fn doji_needs_tiny_body() {
        let candles = vec![
            candle(0, 100.0, 100.5, 99.5, 100.0),
            candle(1, 100.0, 100.6, 99.4, 100.05),
        ];
        assert!(detect_candle_patterns(&candles).doji);
    }

    #[test]
    fn support_resistance_splits_around_price() {
        let candles = indicators::test_utils::drift_candles(120, 100.0, 0.3);
        let ind = indicators::compute(&candles);
        let sr = detect_support_resistance(&candles, &ind);
        let price = candles.last().unwrap().close;
        assert!(sr.supports.iter().all(|&s| s < price));
        assert!(sr.resistances.iter().all(|&r| r > price));
        assert!(!sr.supports.is_empty());
        // nearest first
        for pair in sr.supports.windows(2) {
            assert!(pair[0] > pair[1]);
        }
        for pair in sr.resistances.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn strong_uptrend_scores_high() {
        let candles = indicators::test_utils::drift_candles(120, 100.0, 0.5);
        let ind = indicators::compute(&candles);
        let score = trend_strength(&candles, &ind);
        assert!(score >= 70.0, "expected >= 70, got {score}");
        assert_eq!(detect_market_regime(&ind), MarketRegime::TrendingUp);
    }

    #[test]
    fn flat_market_scores_low() {
        let candles: Vec<Candle> = (0..120)
            .map(|i| candle(i, 100.0, 100.3, 99.7, 100.0))
            .collect();
        let ind = indicators::compute(&candles);
        let score = trend_strength(&candles, &ind);
        assert!(score <= 30.0, "expected <= 30, got {score}");
    }

    #[test]
    fn divergence_bands() {
        let falling = indicators::test_utils::drift_candles(60, 150.0, -0.1);
        let mut ind = IndicatorSet::default();
        ind.insert("rsi", 42.0);
        let d = detect_divergence(&falling, &ind);
        assert!(d.rsi_bullish);
        assert!(!d.rsi_bearish);

        let rising = indicators::test_utils::drift_candles(60, 100.0, 0.1);
        ind.insert("rsi", 58.0);
        let d = detect_divergence(&rising, &ind);
        assert!(d.rsi_bearish);
    }

    #[test]
    fn regression_slope_direction() {
        let rising = indicators::test_utils::drift_candles(20, 100.0, 0.5);
        assert!(regression_slope(&rising, 10).unwrap() > 0.0);
        let falling = indicators::test_utils::drift_candles(20, 100.0, -0.5);
        assert!(regression_slope(&falling, 10).unwrap() < 0.0);
    }
}
