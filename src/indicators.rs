use std::collections::BTreeMap;

use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SlowStochastic,
};
use ta::{DataItem, Next};

use crate::types::{Candle, Trend, Volatility};

const MIN_CANDLES: usize = 50;
const ADX_PERIOD: usize = 14;

/// Snapshot of every indicator value at the latest closed candle.
///
/// Detectors read values by name with a fallback default, so a missing
/// indicator (short history) degrades to neutral instead of erroring.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    values: BTreeMap<String, f64>,
}

impl IndicatorSet {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn candle_to_data_item(c: &Candle) -> Option<DataItem> {
    DataItem::builder()
        .open(c.open)
        .high(c.high)
        .low(c.low)
        .close(c.close)
        .volume(c.volume)
        .build()
        .ok()
}

/// Compute the full indicator snapshot over the candle history.
///
/// Returns an empty set when fewer than 50 candles are available; the
/// 200-period EMA additionally requires 200 candles.
pub fn compute(candles: &[Candle]) -> IndicatorSet {
    let mut set = IndicatorSet::default();
    if candles.len() < MIN_CANDLES {
        return set;
    }

    let mut ema9 = ExponentialMovingAverage::new(9).expect("period > 0");
    let mut ema21 = ExponentialMovingAverage::new(21).expect("period > 0");
    let mut ema50 = ExponentialMovingAverage::new(50).expect("period > 0");
    let mut ema200 = ExponentialMovingAverage::new(200).expect("period > 0");
    let mut rsi = RelativeStrengthIndex::new(14).expect("period > 0");
    let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9).expect("valid periods");
    let mut bb = BollingerBands::new(20, 2.0).expect("valid params");
    let mut stoch = SlowStochastic::new(14, 3).expect("valid periods");
    let mut stoch_d_ema = ExponentialMovingAverage::new(3).expect("period > 0");
    let mut atr = AverageTrueRange::new(14).expect("period > 0");

    let mut last = None;
    for candle in candles {
        let Some(item) = candle_to_data_item(candle) else {
            continue;
        };
        let e9 = ema9.next(&item);
        let e21 = ema21.next(&item);
        let e50 = ema50.next(&item);
        let e200 = ema200.next(&item);
        let r = rsi.next(&item);
        let m = macd.next(&item);
        let b = bb.next(&item);
        let k = stoch.next(&item);
        let d = stoch_d_ema.next(k);
        let a = atr.next(&item);
        last = Some((e9, e21, e50, e200, r, m, b, k, d, a));
    }
    let Some((e9, e21, e50, e200, r, m, b, k, d, a)) = last else {
        return set;
    };

    set.insert("ema_9", e9);
    set.insert("ema_21", e21);
    set.insert("ema_50", e50);
    if candles.len() >= 200 {
        set.insert("ema_200", e200);
    }
    set.insert("rsi", r);
    set.insert("macd", m.macd);
    set.insert("macd_signal", m.signal);
    set.insert("macd_diff", m.histogram);
    set.insert("bb_upper", b.upper);
    set.insert("bb_middle", b.average);
    set.insert("bb_lower", b.lower);
    if b.average != 0.0 {
        set.insert("bb_width", (b.upper - b.lower) / b.average);
    }
    set.insert("stoch_k", k);
    set.insert("stoch_d", d);
    set.insert("atr", a);

    if let Some((adx, plus_di, minus_di)) = wilder_adx(candles, ADX_PERIOD) {
        set.insert("adx", adx);
        set.insert("adx_pos", plus_di);
        set.insert("adx_neg", minus_di);
    }

    let last_candle = &candles[candles.len() - 1];
    set.insert("current_price", last_candle.close);
    set.insert("volume", last_candle.volume);
    let avg20: f64 = candles[candles.len() - 20..]
        .iter()
        .map(|c| c.volume)
        .sum::<f64>()
        / 20.0;
    set.insert("avg_volume_20", avg20);
    if avg20 > 0.0 {
        set.insert("volume_ratio", last_candle.volume / avg20);
    }

    set
}

/// ADX with Wilder smoothing. Needs at least `2 * period` candles.
fn wilder_adx(candles: &[Candle], period: usize) -> Option<(f64, f64, f64)> {
    if candles.len() < 2 * period || period == 0 {
        return None;
    }

    let mut tr = Vec::with_capacity(candles.len() - 1);
    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    for w in candles.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs()),
        );
    }

    let n = period as f64;
    let di = |smoothed_tr: f64, smoothed_dm: f64| {
        if smoothed_tr > 0.0 {
            100.0 * smoothed_dm / smoothed_tr
        } else {
            0.0
        }
    };
    let dx_of = |plus: f64, minus: f64| {
        let sum = plus + minus;
        if sum > 0.0 {
            100.0 * (plus - minus).abs() / sum
        } else {
            0.0
        }
    };

    let mut s_tr: f64 = tr[..period].iter().sum();
    let mut s_plus: f64 = plus_dm[..period].iter().sum();
    let mut s_minus: f64 = minus_dm[..period].iter().sum();
    let mut plus_di = di(s_tr, s_plus);
    let mut minus_di = di(s_tr, s_minus);
    let mut dx = vec![dx_of(plus_di, minus_di)];

    for i in period..tr.len() {
        s_tr = s_tr - s_tr / n + tr[i];
        s_plus = s_plus - s_plus / n + plus_dm[i];
        s_minus = s_minus - s_minus / n + minus_dm[i];
        plus_di = di(s_tr, s_plus);
        minus_di = di(s_tr, s_minus);
        dx.push(dx_of(plus_di, minus_di));
    }

    if dx.len() < period {
        return None;
    }
    let mut adx: f64 = dx[..period].iter().sum::<f64>() / n;
    for &d in &dx[period..] {
        adx = (adx * (n - 1.0) + d) / n;
    }
    Some((adx, plus_di, minus_di))
}

/// Trend label from ADX strength plus EMA stack order.
pub fn detect_trend(indicators: &IndicatorSet) -> Trend {
    let adx = indicators.get_or("adx", 0.0);
    let e9 = indicators.get_or("ema_9", 0.0);
    let e21 = indicators.get_or("ema_21", 0.0);
    let e50 = indicators.get_or("ema_50", 0.0);

    if adx > 25.0 && e9 > e21 && e21 > e50 {
        Trend::Bullish
    } else if adx > 25.0 && e9 < e21 && e21 < e50 {
        Trend::Bearish
    } else if adx < 20.0 {
        Trend::Ranging
    } else {
        Trend::Neutral
    }
}

/// Volatility label from ATR relative to price and Bollinger band width.
pub fn detect_volatility(indicators: &IndicatorSet, price: f64) -> Volatility {
    let atr = indicators.get_or("atr", 0.0);
    let bb_width = indicators.get_or("bb_width", 0.0);
    let atr_pct = if price > 0.0 { atr / price * 100.0 } else { 0.0 };

    if atr_pct > 3.0 || bb_width > 0.15 {
        Volatility::High
    } else if atr_pct > 1.5 || bb_width > 0.08 {
        Volatility::Medium
    } else {
        Volatility::Low
    }
}
