use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::data::MarketData;
use crate::error::{Result, SignalError};
use crate::indicators;
use crate::levels::{self, LevelPlan, StrategyKind, StructuralContext};
use crate::leverage::{suggest_leverage, LeverageInputs};
use crate::mtf::{self, MtfAnalysis, Timeframe, TimeframeVote};
use crate::patterns::{self, CandidateLevel, FvgSet, KillzoneStatus, OrderBlocks, OteZones};
use crate::scoring::{self, EvalContext, Verdict};
use crate::stability::{evaluate_flip, SignalHistory, SignalRecord, StabilityConfig};
use crate::strategies;
use crate::structure;
use crate::types::{
    Candle, Direction, LeverageSuggestion, SetupState, SignalResponse, Strength, Trend, Volatility,
};

const MIN_HISTORY: usize = 50;
const MAX_PENDING_LEVELS: usize = 3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy: StrategyKind,
    pub candle_limit: u32,
    pub mtf_enabled: bool,
    pub level_tolerance_pct: f64,
    pub stability: StabilityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            strategy: StrategyKind::Ict,
            candle_limit: 200,
            mtf_enabled: true,
            level_tolerance_pct: 0.3,
            stability: StabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        let strategy = StrategyKind::parse(&cfg.strategy).unwrap_or_else(|| {
            warn!(strategy = %cfg.strategy, "unknown strategy in config, using ict");
            StrategyKind::Ict
        });
        EngineConfig {
            strategy,
            candle_limit: cfg.candle_limit,
            mtf_enabled: cfg.mtf_enabled,
            level_tolerance_pct: cfg.level_tolerance_pct,
            stability: StabilityConfig {
                cooldown_minutes: cfg.cooldown_minutes,
                min_confidence_delta: cfg.min_confidence_delta,
            },
        }
    }
}

/// Everything derived from one candle history, kept so the trade plan can be
/// rebuilt if the direction changes later in the pipeline.
struct CoreAnalysis {
    verdict: Verdict,
    price: f64,
    atr: Option<f64>,
    volatility: Volatility,
    killzone: KillzoneStatus,
    candidates: Vec<CandidateLevel>,
    order_blocks: OrderBlocks,
    supports: Vec<f64>,
    resistances: Vec<f64>,
    ote: Option<OteZones>,
    last_candle: Candle,
}

/// The signal pipeline: score, locate, plan, confirm across timeframes, and
/// gate against the signal history.
pub struct SignalEngine<D: MarketData> {
    data: Arc<D>,
    history: Arc<SignalHistory>,
    config: EngineConfig,
}

impl<D: MarketData> SignalEngine<D> {
    pub fn new(data: Arc<D>, history: Arc<SignalHistory>, config: EngineConfig) -> Self {
        SignalEngine {
            data,
            history,
            config,
        }
    }

    pub async fn analyze(&self, symbol: &str, timeframe: Timeframe) -> Result<SignalResponse> {
        self.analyze_at(symbol, timeframe, Utc::now()).await
    }

    /// Same as [`analyze`](Self::analyze) with an explicit clock, so session
    /// and cooldown behavior is reproducible.
    pub async fn analyze_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<SignalResponse> {
        let candles = self
            .data
            .klines(symbol, timeframe, self.config.candle_limit)
            .await?;
        let analysis = self.evaluate_core(symbol, timeframe, &candles, now)?;
        let mut response = self.assemble(symbol, timeframe, &analysis, now);

        if self.config.mtf_enabled {
            self.confirm_across_timeframes(symbol, timeframe, &analysis, &mut response, now)
                .await;
        }

        self.apply_stability_gate(symbol, timeframe, &analysis, &mut response, now);

        self.history.record(SignalRecord {
            symbol: symbol.to_string(),
            timeframe,
            direction: response.direction,
            strength: response.strength,
            confidence: response.confidence,
            recorded_at: now,
        });

        info!(
            symbol,
            timeframe = %timeframe,
            direction = %response.direction,
            confidence = response.confidence,
            confluence = response.confluence_score,
            "analysis complete"
        );
        Ok(response)
    }

    /// Score one candle history without the setup machine or trade planning.
    ///
    /// A short history is not an error: anything under [`MIN_HISTORY`] candles
    /// degrades to a low-confidence HOLD so the caller still gets a response.
    fn evaluate_core(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
        now: DateTime<Utc>,
    ) -> Result<CoreAnalysis> {
        if candles.is_empty() {
            return Err(SignalError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.as_str().to_string(),
                reason: "no candles returned".to_string(),
            });
        }
        if candles.len() < MIN_HISTORY {
            let last_candle = candles[candles.len() - 1].clone();
            let price = last_candle.close;
            return Ok(CoreAnalysis {
                verdict: Verdict {
                    direction: Direction::Hold,
                    strength: Strength::Weak,
                    confidence: 30.0,
                    bullish: 0.0,
                    bearish: 0.0,
                    confluence: 0,
                    evidence: vec![format!(
                        "Insufficient data: {} candles (minimum {MIN_HISTORY})",
                        candles.len()
                    )],
                },
                price,
                atr: None,
                volatility: Volatility::Low,
                killzone: patterns::killzone_status(now),
                candidates: Vec::new(),
                order_blocks: OrderBlocks::default(),
                supports: Vec::new(),
                resistances: Vec::new(),
                ote: None,
                last_candle,
            });
        }
        let ind = indicators::compute(candles);
        let last_candle = candles[candles.len() - 1].clone();
        let price = last_candle.close;
        let trend = indicators::detect_trend(&ind);
        let volatility = indicators::detect_volatility(&ind, price);
        let atr = ind.get("atr");
        let killzone = patterns::killzone_status(now);
        let sr = strategies::detect_support_resistance(candles, &ind);

        let verdict;
        let candidates;
        let mut order_blocks = OrderBlocks::default();
        let mut ote = None;

        match self.config.strategy {
            StrategyKind::Technical => {
                let candle_patterns = strategies::detect_candle_patterns(candles);
                let divergences = strategies::detect_divergence(candles, &ind);
                let regime = strategies::detect_market_regime(&ind);
                let ts = strategies::trend_strength(candles, &ind);

                let mut ctx = EvalContext::new(price, &ind, trend);
                ctx.patterns = Some(&candle_patterns);
                ctx.divergences = Some(&divergences);
                ctx.regime = Some(regime);
                ctx.trend_strength = Some(ts);
                verdict = scoring::classify(scoring::score(&scoring::technical_rules(), &ctx));

                candidates = patterns::candidate_levels(
                    &OrderBlocks::default(),
                    &FvgSet::default(),
                    &sr.supports,
                    &sr.resistances,
                    price,
                );
            }
            StrategyKind::Ict => {
                let state = structure::detect_market_structure(candles);
                let breaks = structure::detect_breaks(&state, candles);
                let (blocks, breakers) = patterns::detect_order_blocks(candles);
                let fvgs = patterns::detect_fair_value_gaps(candles);
                let equilibrium = patterns::detect_equilibrium(candles);
                let liquidity = patterns::detect_liquidity_zones(candles);
                let sweep = patterns::detect_liquidity_sweep(candles);
                let bias = match state.bias() {
                    Trend::Neutral => trend,
                    b => b,
                };
                let ote_zones = patterns::calculate_ote(candles, bias);

                let mut ctx = EvalContext::new(price, &ind, trend);
                ctx.structure = Some(&state);
                ctx.breaks = Some(breaks);
                ctx.order_blocks = Some(&blocks);
                ctx.fvgs = Some(&fvgs);
                ctx.equilibrium = equilibrium.as_ref();
                ctx.liquidity = Some(&liquidity);
                ctx.sweep = sweep.as_ref();
                ctx.breakers = Some(&breakers);
                ctx.ote = ote_zones.as_ref();
                ctx.killzone = Some(&killzone);
                verdict = scoring::classify(scoring::score(&scoring::ict_rules(), &ctx));

                candidates = patterns::candidate_levels(
                    &blocks,
                    &fvgs,
                    &sr.supports,
                    &sr.resistances,
                    price,
                );
                order_blocks = blocks;
                ote = ote_zones;
            }
        }

        Ok(CoreAnalysis {
            verdict,
            price,
            atr,
            volatility,
            killzone,
            candidates,
            order_blocks,
            supports: sr.supports,
            resistances: sr.resistances,
            ote,
            last_candle,
        })
    }

    /// Turn a verdict into a response, running the setup machine for the ICT
    /// variant and attaching the trade plan for actionable directions.
    fn assemble(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        analysis: &CoreAnalysis,
        now: DateTime<Utc>,
    ) -> SignalResponse {
        let verdict = &analysis.verdict;
        let mut direction = verdict.direction;
        let mut setup_state = None;
        let mut pending_levels = Vec::new();

        if self.config.strategy == StrategyKind::Ict && direction.is_actionable() {
            let side_candidates: Vec<CandidateLevel> = analysis
                .candidates
                .iter()
                .filter(|l| l.side == direction)
                .cloned()
                .collect();
            match patterns::at_level(
                analysis.price,
                &side_candidates,
                self.config.level_tolerance_pct,
            ) {
                Some(level)
                    if patterns::confirms_reaction(&analysis.last_candle, level.price, direction) =>
                {
                    setup_state = Some(SetupState::Active);
                }
                Some(_) => {
                    setup_state = Some(SetupState::AwaitingConfirmation);
                    direction = Direction::AwaitingConfirmation;
                    pending_levels = top_pending(&side_candidates);
                }
                None => {
                    setup_state = Some(SetupState::Pending);
                    direction = Direction::SetupPending;
                    pending_levels = top_pending(&side_candidates);
                }
            }
        }

        let mut response = SignalResponse {
            symbol: symbol.to_string(),
            timeframe: timeframe.as_str().to_string(),
            strategy: self.config.strategy.as_str().to_string(),
            direction,
            strength: verdict.strength,
            confidence: verdict.confidence,
            confluence_score: verdict.confluence,
            bullish_score: verdict.bullish,
            bearish_score: verdict.bearish,
            evidence: verdict.evidence.clone(),
            current_price: analysis.price,
            entry_price: None,
            stop_loss: None,
            take_profit_1: None,
            take_profit_2: None,
            take_profit_3: None,
            risk_reward: None,
            leverage: None,
            limit_orders: Vec::new(),
            setup_state,
            pending_levels,
            mtf: None,
            previous_signal: None,
            stability_note: None,
            killzone: analysis.killzone.name.clone(),
            timestamp: now,
        };
        self.attach_plan(&mut response, analysis);
        response
    }

    /// Install or clear the trade plan fields to match the response direction.
    fn attach_plan(&self, response: &mut SignalResponse, analysis: &CoreAnalysis) {
        match self.build_plan(analysis, response.direction) {
            Some((plan, leverage)) => {
                response.entry_price = Some(plan.entry);
                response.stop_loss = Some(plan.stop_loss);
                response.take_profit_1 = Some(plan.tp1);
                response.take_profit_2 = Some(plan.tp2);
                response.take_profit_3 = Some(plan.tp3);
                response.risk_reward = Some(plan.risk_reward);
                response.leverage = Some(leverage);
                response.limit_orders = analysis
                    .candidates
                    .iter()
                    .filter(|l| l.side == response.direction)
                    .take(MAX_PENDING_LEVELS)
                    .map(levels::limit_order_from_level)
                    .collect();
            }
            None => {
                response.entry_price = None;
                response.stop_loss = None;
                response.take_profit_1 = None;
                response.take_profit_2 = None;
                response.take_profit_3 = None;
                response.risk_reward = None;
                response.leverage = None;
                response.limit_orders = Vec::new();
            }
        }
    }

    fn build_plan(
        &self,
        analysis: &CoreAnalysis,
        direction: Direction,
    ) -> Option<(LevelPlan, LeverageSuggestion)> {
        if !direction.is_actionable() {
            return None;
        }
        let structural = StructuralContext {
            order_blocks: &analysis.order_blocks,
            supports: &analysis.supports,
            resistances: &analysis.resistances,
            ote: analysis.ote.as_ref(),
        };
        let structural_ref = match self.config.strategy {
            StrategyKind::Ict => Some(&structural),
            StrategyKind::Technical => None,
        };
        let plan = levels::calculate_levels(
            self.config.strategy,
            direction,
            analysis.price,
            analysis.atr,
            analysis.volatility,
            structural_ref,
        )?;
        let stop_distance_pct = if plan.entry > 0.0 {
            (plan.entry - plan.stop_loss).abs() / plan.entry * 100.0
        } else {
            0.0
        };
        let leverage = suggest_leverage(&LeverageInputs {
            confluence: analysis.verdict.confluence,
            confidence: analysis.verdict.confidence,
            risk_reward: plan.risk_reward,
            volatility: analysis.volatility,
            in_killzone: analysis.killzone.active,
            stop_distance_pct,
        });
        Some((plan, leverage))
    }

    /// Fetch and score the confirmation timeframes, merge the votes, and let
    /// a confident disagreement override the base verdict. Failed timeframes
    /// are logged and skipped; fewer than two surviving votes means no merge.
    async fn confirm_across_timeframes(
        &self,
        symbol: &str,
        base: Timeframe,
        analysis: &CoreAnalysis,
        response: &mut SignalResponse,
        now: DateTime<Utc>,
    ) {
        let others: Vec<Timeframe> = base
            .confirmation_set()
            .into_iter()
            .filter(|tf| *tf != base)
            .collect();
        if others.is_empty() {
            return;
        }

        let fetches = others.iter().map(|tf| {
            let tf = *tf;
            async move {
                let result = self
                    .data
                    .klines(symbol, tf, self.config.candle_limit)
                    .await
                    .and_then(|candles| self.evaluate_core(symbol, tf, &candles, now));
                (tf, result)
            }
        });

        let mut votes = vec![TimeframeVote {
            timeframe: base,
            direction: response.direction,
            confidence: response.confidence,
        }];
        for (tf, result) in join_all(fetches).await {
            match result {
                Ok(core) => votes.push(TimeframeVote {
                    timeframe: tf,
                    direction: core.verdict.direction,
                    confidence: core.verdict.confidence,
                }),
                Err(err) => {
                    warn!(symbol, timeframe = %tf, error = %err, "confirmation timeframe skipped");
                }
            }
        }

        let Some(merged) = mtf::merge(&votes) else {
            debug!(symbol, "not enough timeframe votes to merge");
            return;
        };

        if let Some(new_direction) = mtf::override_direction(response.direction, &merged) {
            response
                .evidence
                .insert(0, format!("Multi-timeframe override: {}", merged.reason));
            response.direction = new_direction;
            if new_direction == Direction::Hold {
                response.setup_state = None;
                response.pending_levels = Vec::new();
            }
            self.attach_plan(response, analysis);
        }

        response.mtf = Some(MtfAnalysis {
            timeframes: votes.iter().map(|v| v.timeframe.as_str().to_string()).collect(),
            direction: merged.direction,
            confidence: merged.confidence,
            alignment: merged.alignment,
            reason: merged.reason,
            votes,
        });
    }

    /// Check the candidate against the prior signal for this symbol and
    /// timeframe; a rejected flip reverts to the prior direction.
    fn apply_stability_gate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        analysis: &CoreAnalysis,
        response: &mut SignalResponse,
        now: DateTime<Utc>,
    ) {
        let prior = self.history.last_for(symbol, timeframe);
        let Some(prior) = prior else {
            return;
        };
        response.previous_signal = Some(prior.direction);

        if prior.direction == response.direction {
            return;
        }
        let decision = evaluate_flip(
            Some(&prior),
            response.direction,
            response.confidence,
            response.strength,
            now,
            &self.config.stability,
        );
        response.stability_note = Some(decision.reason.clone());
        if !decision.allow {
            debug!(symbol, timeframe = %timeframe, reason = %decision.reason, "flip rejected");
            response.direction = prior.direction;
            response.setup_state = None;
            response.pending_levels = Vec::new();
            self.attach_plan(response, analysis);
        }
    }
}

fn top_pending(candidates: &[CandidateLevel]) -> Vec<crate::types::LimitOrderLevel> {
    candidates
        .iter()
        .take(MAX_PENDING_LEVELS)
        .map(levels::limit_order_from_level)
        .collect()
}
