use crate::indicators::IndicatorSet;
use crate::patterns::{
    BreakerBlock, EquilibriumZones, FvgSet, KillzoneStatus, LiquiditySweep, LiquidityZones,
    ObSide, OrderBlocks, OteZones, Zone,
};
use crate::strategies::{CandlePatterns, Divergences};
use crate::structure::{BreakSignals, StructureState};
use crate::types::{Direction, MarketRegime, Strength, Trend, round2};

/// Running totals while rules fire.
///
/// Evidence-only observations add a line without weight; weighted findings
/// also bump the confluence count.
#[derive(Debug, Default, Clone)]
pub struct Tally {
    pub bullish: f64,
    pub bearish: f64,
    pub evidence: Vec<String>,
    scored: usize,
}

impl Tally {
    pub fn bull(&mut self, weight: f64, msg: String) {
        self.bullish += weight;
        self.scored += 1;
        self.evidence.push(msg);
    }

    pub fn bear(&mut self, weight: f64, msg: String) {
        self.bearish += weight;
        self.scored += 1;
        self.evidence.push(msg);
    }

    pub fn note(&mut self, msg: String) {
        self.evidence.push(msg);
    }

    /// Add weight to whichever side is strictly ahead; no-op on a tie.
    pub fn reinforce_leader(&mut self, weight: f64, msg: String) {
        if self.bullish > self.bearish {
            self.bullish += weight;
        } else if self.bearish > self.bullish {
            self.bearish += weight;
        } else {
            return;
        }
        self.scored += 1;
        self.evidence.push(msg);
    }

    /// Multiply the leading side; no-op on a tie.
    pub fn boost_leader(&mut self, multiplier: f64, msg: String) {
        if self.bullish > self.bearish {
            self.bullish *= multiplier;
        } else if self.bearish > self.bullish {
            self.bearish *= multiplier;
        } else {
            return;
        }
        self.scored += 1;
        self.evidence.push(msg);
    }

    pub fn confluence(&self) -> usize {
        self.scored
    }
}

/// Everything a rule may look at. Detector outputs a catalogue does not use
/// simply stay `None`.
pub struct EvalContext<'a> {
    pub price: f64,
    pub indicators: &'a IndicatorSet,
    pub trend: Trend,
    pub patterns: Option<&'a CandlePatterns>,
    pub divergences: Option<&'a Divergences>,
    pub regime: Option<MarketRegime>,
    pub trend_strength: Option<f64>,
    pub structure: Option<&'a StructureState>,
    pub order_blocks: Option<&'a OrderBlocks>,
    pub fvgs: Option<&'a FvgSet>,
    pub breaks: Option<BreakSignals>,
    pub equilibrium: Option<&'a EquilibriumZones>,
    pub liquidity: Option<&'a LiquidityZones>,
    pub sweep: Option<&'a LiquiditySweep>,
    pub breakers: Option<&'a [BreakerBlock]>,
    pub ote: Option<&'a OteZones>,
    pub killzone: Option<&'a KillzoneStatus>,
}

impl<'a> EvalContext<'a> {
    pub fn new(price: f64, indicators: &'a IndicatorSet, trend: Trend) -> Self {
        EvalContext {
            price,
            indicators,
            trend,
            patterns: None,
            divergences: None,
            regime: None,
            trend_strength: None,
            structure: None,
            order_blocks: None,
            fvgs: None,
            breaks: None,
            equilibrium: None,
            liquidity: None,
            sweep: None,
            breakers: None,
            ote: None,
            killzone: None,
        }
    }
}

pub struct Rule {
    pub name: &'static str,
    pub eval: fn(&EvalContext<'_>, &mut Tally),
}

/// Run a catalogue over the context.
pub fn score(rules: &[Rule], ctx: &EvalContext<'_>) -> Tally {
    let mut tally = Tally::default();
    for rule in rules {
        (rule.eval)(ctx, &mut tally);
    }
    tally
}

/// Final classification of a tally.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub direction: Direction,
    pub strength: Strength,
    pub confidence: f64,
    pub bullish: f64,
    pub bearish: f64,
    pub confluence: usize,
    pub evidence: Vec<String>,
}

/// No weight at all is a flat HOLD at 30; a dead tie is HOLD at 50.
/// Otherwise the winner's share of total weight becomes confidence, capped
/// at 95, and the winning score alone decides strength.
pub fn classify(tally: Tally) -> Verdict {
    let total = tally.bullish + tally.bearish;
    let (direction, confidence, strength) = if total == 0.0 {
        (Direction::Hold, 30.0, Strength::Weak)
    } else if tally.bullish == tally.bearish {
        (Direction::Hold, 50.0, Strength::Weak)
    } else {
        let (dir, winner) = if tally.bullish > tally.bearish {
            (Direction::Long, tally.bullish)
        } else {
            (Direction::Short, tally.bearish)
        };
        let confidence = round2((winner / total * 100.0).min(95.0));
        (dir, confidence, Strength::from_score(winner))
    };

    Verdict {
        direction,
        strength,
        confidence,
        bullish: round2(tally.bullish),
        bearish: round2(tally.bearish),
        confluence: tally.confluence(),
        evidence: tally.evidence,
    }
}

// ============================================================================
// Technical catalogue
// ============================================================================

pub fn technical_rules() -> Vec<Rule> {
    vec![
        Rule { name: "rsi", eval: rule_rsi },
        Rule { name: "macd", eval: rule_macd },
        Rule { name: "ema_stack", eval: rule_ema_stack },
        Rule { name: "price_vs_ema21", eval: rule_price_vs_ema21 },
        Rule { name: "bollinger", eval: rule_bollinger },
        Rule { name: "stochastic", eval: rule_stochastic },
        Rule { name: "adx", eval: rule_adx },
        Rule { name: "volume", eval: rule_volume },
        Rule { name: "candle_patterns", eval: rule_candle_patterns },
        Rule { name: "divergence", eval: rule_divergence },
        Rule { name: "regime", eval: rule_regime },
        Rule { name: "trend_strength", eval: rule_trend_strength },
    ]
}

fn rule_rsi(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(rsi) = ctx.indicators.get("rsi") else {
        return;
    };
    if rsi < 30.0 {
        tally.bull(2.0, format!("RSI oversold ({rsi:.1})"));
    } else if rsi < 40.0 {
        tally.bull(1.0, format!("RSI approaching oversold ({rsi:.1})"));
    } else if rsi > 70.0 {
        tally.bear(2.0, format!("RSI overbought ({rsi:.1})"));
    } else if rsi > 60.0 {
        tally.bear(1.0, format!("RSI approaching overbought ({rsi:.1})"));
    }
}

fn rule_macd(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let diff = ctx.indicators.get_or("macd_diff", 0.0);
    let macd = ctx.indicators.get_or("macd", 0.0);
    let signal = ctx.indicators.get_or("macd_signal", 0.0);
    if diff > 0.0 && macd > signal {
        tally.bull(2.0, "MACD bullish crossover".to_string());
    } else if diff < 0.0 && macd < signal {
        tally.bear(2.0, "MACD bearish crossover".to_string());
    }
}

fn rule_ema_stack(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let e9 = ctx.indicators.get_or("ema_9", 0.0);
    let e21 = ctx.indicators.get_or("ema_21", 0.0);
    let e50 = ctx.indicators.get_or("ema_50", 0.0);
    if e9 > e21 && e21 > e50 {
        tally.bull(2.0, "EMA alignment bullish (9 > 21 > 50)".to_string());
    } else if e9 < e21 && e21 < e50 {
        tally.bear(2.0, "EMA alignment bearish (9 < 21 < 50)".to_string());
    }
}

fn rule_price_vs_ema21(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(e21) = ctx.indicators.get("ema_21") else {
        return;
    };
    if ctx.price > e21 {
        tally.bull(1.0, "Price above EMA-21".to_string());
    } else {
        tally.bear(1.0, "Price below EMA-21".to_string());
    }
}

fn rule_bollinger(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let lower = ctx.indicators.get_or("bb_lower", f64::MIN);
    let upper = ctx.indicators.get_or("bb_upper", f64::MAX);
    if ctx.price < lower {
        tally.bull(1.0, "Price below lower Bollinger band".to_string());
    } else if ctx.price > upper {
        tally.bear(1.0, "Price above upper Bollinger band".to_string());
    }
}

fn rule_stochastic(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let k = ctx.indicators.get_or("stoch_k", 50.0);
    let d = ctx.indicators.get_or("stoch_d", 50.0);
    if k < 20.0 && k > d {
        tally.bull(1.0, format!("Stochastic oversold with bullish cross ({k:.1})"));
    } else if k > 80.0 && k < d {
        tally.bear(1.0, format!("Stochastic overbought with bearish cross ({k:.1})"));
    }
}

fn rule_adx(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(adx) = ctx.indicators.get("adx") else {
        return;
    };
    if adx > 25.0 {
        match ctx.trend {
            Trend::Bullish => tally.bull(1.0, format!("Strong bullish trend (ADX {adx:.1})")),
            Trend::Bearish => tally.bear(1.0, format!("Strong bearish trend (ADX {adx:.1})")),
            _ => tally.note(format!("Strong directionless reading (ADX {adx:.1})")),
        }
    } else {
        tally.note(format!("Weak trend or ranging market (ADX {adx:.1})"));
    }
}

fn rule_volume(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let ratio = ctx.indicators.get_or("volume_ratio", 1.0);
    if ratio > 1.5 {
        tally.reinforce_leader(0.5, format!("High volume confirms move ({ratio:.2}x average)"));
    }
}

fn rule_candle_patterns(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(p) = ctx.patterns else {
        return;
    };
    if p.bullish_engulfing {
        tally.bull(1.0, "Bullish engulfing candle".to_string());
    }
    if p.bearish_engulfing {
        tally.bear(1.0, "Bearish engulfing candle".to_string());
    }
    if p.hammer {
        tally.bull(1.0, "Hammer candle".to_string());
    }
    if p.shooting_star {
        tally.bear(1.0, "Shooting star candle".to_string());
    }
    if p.bullish_pin {
        tally.bull(0.5, "Bullish pin bar".to_string());
    }
    if p.bearish_pin {
        tally.bear(0.5, "Bearish pin bar".to_string());
    }
}

fn rule_divergence(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(d) = ctx.divergences else {
        return;
    };
    if d.rsi_bullish {
        tally.bull(1.0, "Bullish RSI divergence forming".to_string());
    }
    if d.rsi_bearish {
        tally.bear(1.0, "Bearish RSI divergence forming".to_string());
    }
}

fn rule_regime(ctx: &EvalContext<'_>, tally: &mut Tally) {
    match ctx.regime {
        Some(MarketRegime::TrendingUp) => tally.bull(1.0, "Regime: trending up".to_string()),
        Some(MarketRegime::TrendingDown) => tally.bear(1.0, "Regime: trending down".to_string()),
        _ => {}
    }
}

fn rule_trend_strength(ctx: &EvalContext<'_>, tally: &mut Tally) {
    if let Some(ts) = ctx.trend_strength {
        if ts >= 70.0 {
            tally.reinforce_leader(1.0, format!("Trend strength {ts:.0}/100"));
        }
    }
}

// ============================================================================
// ICT catalogue
// ============================================================================

pub fn ict_rules() -> Vec<Rule> {
    vec![
        Rule { name: "structure", eval: rule_structure },
        Rule { name: "order_block", eval: rule_order_block },
        Rule { name: "fvg", eval: rule_fvg },
        Rule { name: "bos", eval: rule_bos },
        Rule { name: "choch", eval: rule_choch },
        Rule { name: "equilibrium", eval: rule_equilibrium },
        Rule { name: "liquidity", eval: rule_liquidity },
        Rule { name: "sweep", eval: rule_sweep },
        Rule { name: "breaker", eval: rule_breaker },
        Rule { name: "ote", eval: rule_ote },
        Rule { name: "killzone", eval: rule_killzone },
    ]
}

fn rule_structure(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(state) = ctx.structure else {
        return;
    };
    match state.bias() {
        Trend::Bullish => tally.bull(2.0, "Market structure: higher highs and higher lows".to_string()),
        Trend::Bearish => tally.bear(2.0, "Market structure: lower highs and lower lows".to_string()),
        _ => tally.note(format!("Market structure: {:?}", state.structure)),
    }
}

fn rule_order_block(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(blocks) = ctx.order_blocks else {
        return;
    };
    if let Some(ob) = blocks.bullish.iter().find(|ob| ob.contains(ctx.price)) {
        tally.bull(
            2.5,
            format!("Price inside bullish order block (strength {:.1})", ob.strength),
        );
    }
    if let Some(ob) = blocks.bearish.iter().find(|ob| ob.contains(ctx.price)) {
        tally.bear(
            2.5,
            format!("Price inside bearish order block (strength {:.1})", ob.strength),
        );
    }
}

fn rule_fvg(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(fvgs) = ctx.fvgs else {
        return;
    };
    if fvgs
        .bullish
        .iter()
        .any(|g| ctx.price >= g.bottom && ctx.price <= g.top * 1.02)
    {
        tally.bull(1.5, "Price testing bullish fair value gap".to_string());
    }
    if fvgs
        .bearish
        .iter()
        .any(|g| ctx.price <= g.top && ctx.price >= g.bottom * 0.98)
    {
        tally.bear(1.5, "Price testing bearish fair value gap".to_string());
    }
}

fn rule_bos(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(breaks) = ctx.breaks else {
        return;
    };
    if breaks.bos_bullish {
        tally.bull(3.0, "Bullish break of structure".to_string());
    }
    if breaks.bos_bearish {
        tally.bear(3.0, "Bearish break of structure".to_string());
    }
}

fn rule_choch(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(breaks) = ctx.breaks else {
        return;
    };
    if breaks.choch_bullish {
        tally.bull(2.5, "Bullish change of character".to_string());
    }
    if breaks.choch_bearish {
        tally.bear(2.5, "Bearish change of character".to_string());
    }
}

fn rule_equilibrium(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(eq) = ctx.equilibrium else {
        return;
    };
    match eq.zone {
        Zone::Discount => {
            tally.note(format!("Price in discount ({:.0}% depth)", eq.depth_pct));
            if eq.depth_pct > 50.0 {
                tally.bull(1.5, "Deep discount favors longs".to_string());
            }
        }
        Zone::Premium => {
            tally.note(format!("Price in premium ({:.0}% depth)", eq.depth_pct));
            if eq.depth_pct > 50.0 {
                tally.bear(1.5, "Deep premium favors shorts".to_string());
            }
        }
    }
}

fn rule_liquidity(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(zones) = ctx.liquidity else {
        return;
    };
    if let Some(&level) = zones.equal_highs.last() {
        tally.note(format!("Buy-side liquidity resting above {level}"));
    }
    if let Some(&level) = zones.equal_lows.last() {
        tally.note(format!("Sell-side liquidity resting below {level}"));
    }
}

fn rule_sweep(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(sweep) = ctx.sweep else {
        return;
    };
    match sweep.bias {
        Trend::Bullish => tally.bull(2.0, format!("Liquidity sweep below {}", sweep.level)),
        Trend::Bearish => tally.bear(2.0, format!("Liquidity sweep above {}", sweep.level)),
        _ => {}
    }
}

fn rule_breaker(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(breakers) = ctx.breakers else {
        return;
    };
    if let Some(b) = breakers.iter().find(|b| b.contains(ctx.price)) {
        match b.side {
            ObSide::Bullish => tally.bull(1.5, "Price retesting bullish breaker block".to_string()),
            ObSide::Bearish => tally.bear(1.5, "Price retesting bearish breaker block".to_string()),
        }
    }
}

fn rule_ote(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(ote) = ctx.ote else {
        return;
    };
    if !ote.contains(ctx.price) {
        return;
    }
    match ote.direction {
        Trend::Bullish => tally.bull(2.0, "Price inside bullish optimal trade entry".to_string()),
        Trend::Bearish => tally.bear(2.0, "Price inside bearish optimal trade entry".to_string()),
        _ => {}
    }
}

fn rule_killzone(ctx: &EvalContext<'_>, tally: &mut Tally) {
    let Some(kz) = ctx.killzone else {
        return;
    };
    if kz.active {
        let name = kz.name.as_deref().unwrap_or("session");
        tally.boost_leader(kz.multiplier, format!("{name} killzone active (x{})", kz.multiplier));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicators_with(pairs: &[(&str, f64)]) -> IndicatorSet {
        let mut set = IndicatorSet::default();
        for (k, v) in pairs {
            set.insert(k, *v);
        }
        set
    }

    #[test]
    fn empty_tally_classifies_flat_hold() {
        let v = classify(Tally::default());
        assert_eq!(v.direction, Direction::Hold);
        assert_eq!(v.confidence, 30.0);
        assert_eq!(v.strength, Strength::Weak);
        assert_eq!(v.confluence, 0);
    }

    #[test]
    fn tied_tally_is_uncertain_hold() {
        let mut t = Tally::default();
        t.bull(2.0, "a".to_string());
        t.bear(2.0, "b".to_string());
        let v = classify(t);
        assert_eq!(v.direction, Direction::Hold);
        assert_eq!(v.confidence, 50.0);
    }

    #[test]
    fn confidence_is_winner_share_capped_at_95() {
        let mut t = Tally::default();
        t.bull(6.0, "a".to_string());
        t.bear(2.0, "b".to_string());
        let v = classify(t);
        assert_eq!(v.direction, Direction::Long);
        assert_eq!(v.confidence, 75.0);
        assert_eq!(v.strength, Strength::Strong);

        let mut t = Tally::default();
        t.bear(10.0, "c".to_string());
        let v = classify(t);
        assert_eq!(v.direction, Direction::Short);
        assert_eq!(v.confidence, 95.0);
    }

    #[test]
    fn strength_follows_the_winning_score_not_the_total() {
        let mut t = Tally::default();
        t.bull(3.5, "a".to_string());
        t.bear(3.0, "b".to_string());
        let v = classify(t);
        assert_eq!(v.direction, Direction::Long);
        assert_eq!(v.strength, Strength::Weak);
    }

    #[test]
    fn rsi_tiers() {
        let trend = Trend::Neutral;
        for (rsi, bull, bear) in [
            (25.0, 2.0, 0.0),
            (35.0, 1.0, 0.0),
            (50.0, 0.0, 0.0),
            (65.0, 0.0, 1.0),
            (75.0, 0.0, 2.0),
        ] {
            let ind = indicators_with(&[("rsi", rsi)]);
            let ctx = EvalContext::new(100.0, &ind, trend);
            let mut t = Tally::default();
            rule_rsi(&ctx, &mut t);
            assert_eq!((t.bullish, t.bearish), (bull, bear), "rsi {rsi}");
        }
    }

    #[test]
    fn volume_reinforces_only_a_leader() {
        let ind = indicators_with(&[("volume_ratio", 2.0)]);
        let ctx = EvalContext::new(100.0, &ind, Trend::Neutral);

        let mut tied = Tally::default();
        rule_volume(&ctx, &mut tied);
        assert_eq!(tied.bullish, 0.0);
        assert_eq!(tied.confluence(), 0);

        let mut leading = Tally::default();
        leading.bull(2.0, "seed".to_string());
        rule_volume(&ctx, &mut leading);
        assert_eq!(leading.bullish, 2.5);
    }

    #[test]
    fn killzone_multiplies_leading_side() {
        let ind = IndicatorSet::default();
        let kz = KillzoneStatus {
            active: true,
            name: Some("New York AM".to_string()),
            multiplier: 1.5,
        };
        let mut ctx = EvalContext::new(100.0, &ind, Trend::Neutral);
        ctx.killzone = Some(&kz);

        let mut t = Tally::default();
        t.bull(4.0, "seed".to_string());
        t.bear(1.0, "seed".to_string());
        rule_killzone(&ctx, &mut t);
        assert_eq!(t.bullish, 6.0);
        assert_eq!(t.bearish, 1.0);
    }

    #[test]
    fn technical_catalogue_scores_a_bullish_setup() {
        let ind = indicators_with(&[
            ("rsi", 28.0),
            ("macd", 1.0),
            ("macd_signal", 0.5),
            ("macd_diff", 0.5),
            ("ema_9", 102.0),
            ("ema_21", 101.0),
            ("ema_50", 100.0),
            ("bb_lower", 99.0),
            ("bb_upper", 108.0),
            ("adx", 30.0),
            ("volume_ratio", 2.0),
        ]);
        let ctx = EvalContext::new(103.0, &ind, Trend::Bullish);
        let v = classify(score(&technical_rules(), &ctx));
        assert_eq!(v.direction, Direction::Long);
        assert_eq!(v.strength, Strength::Strong);
        assert!(v.confidence > 90.0);
        assert!(v.confluence >= 5);
    }

    #[test]
    fn ict_catalogue_weighs_break_of_structure() {
        let ind = IndicatorSet::default();
        let breaks = BreakSignals {
            bos_bullish: true,
            ..Default::default()
        };
        let mut ctx = EvalContext::new(100.0, &ind, Trend::Bullish);
        ctx.breaks = Some(breaks);
        let v = classify(score(&ict_rules(), &ctx));
        assert_eq!(v.direction, Direction::Long);
        assert_eq!(v.bullish, 3.0);
    }
}
