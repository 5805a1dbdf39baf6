use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use signal_bot::engine::{EngineConfig, SignalEngine};
use signal_bot::error::{Result, SignalError};
use signal_bot::levels::StrategyKind;
use signal_bot::mtf::{Alignment, Timeframe};
use signal_bot::stability::SignalHistory;
use signal_bot::types::{Candle, Direction};
use signal_bot::MarketData;

mod test_utils {
    use super::*;

    pub fn drift_candles(n: usize, start: f64, step: f64) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let open = start + step * i as f64;
                let close = open + step;
                let hi = open.max(close) + start * 0.001;
                let lo = open.min(close) - start * 0.001;
                Candle {
                    open_time: t0 + Duration::minutes(15 * i as i64),
                    close_time: t0 + Duration::minutes(15 * (i as i64 + 1)),
                    open,
                    high: hi,
                    low: lo,
                    close,
                    volume: 1_000.0 + i as f64,
                }
            })
            .collect()
    }

    /// Canned market data per timeframe; unlisted timeframes error.
    pub struct MockMarket {
        series: HashMap<Timeframe, Vec<Candle>>,
    }

    impl MockMarket {
        pub fn new() -> Self {
            MockMarket {
                series: HashMap::new(),
            }
        }

        pub fn with(mut self, timeframe: Timeframe, candles: Vec<Candle>) -> Self {
            self.series.insert(timeframe, candles);
            self
        }
    }

    #[async_trait]
    impl MarketData for MockMarket {
        async fn klines(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            _limit: u32,
        ) -> Result<Vec<Candle>> {
            self.series
                .get(&timeframe)
                .cloned()
                .ok_or_else(|| SignalError::DataUnavailable {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.as_str().to_string(),
                    reason: "no canned data".to_string(),
                })
        }
    }
}

use test_utils::{drift_candles, MockMarket};

fn engine_with(
    market: MockMarket,
    strategy: StrategyKind,
    mtf_enabled: bool,
) -> SignalEngine<MockMarket> {
    let config = EngineConfig {
        strategy,
        mtf_enabled,
        ..EngineConfig::default()
    };
    SignalEngine::new(Arc::new(market), Arc::new(SignalHistory::new()), config)
}

fn analysis_time() -> DateTime<Utc> {
    // 20:00 New York, outside every killzone
    Utc.with_ymd_and_hms(2024, 6, 4, 1, 0, 0).unwrap()
}

#[tokio::test]
async fn technical_uptrend_produces_long_signal() {
    let market = MockMarket::new().with(Timeframe::M15, drift_candles(200, 100.0, 0.5));
    let engine = engine_with(market, StrategyKind::Technical, false);

    let response = engine
        .analyze_at("BTCUSDT", Timeframe::M15, analysis_time())
        .await
        .unwrap();

    assert_eq!(response.direction, Direction::Long);
    assert!(response.confidence >= 70.0 && response.confidence <= 95.0);
    assert!(response.bullish_score > response.bearish_score);
    assert!(!response.evidence.is_empty());
    assert!(response.entry_price.is_some());
    assert!(response.stop_loss.unwrap() < response.entry_price.unwrap());
    assert!(response.take_profit_1.unwrap() > response.entry_price.unwrap());
    assert!(response.take_profit_3.unwrap() > response.take_profit_1.unwrap());
    let leverage = response.leverage.unwrap();
    assert!((5..=20).contains(&leverage.leverage));
}

#[tokio::test]
async fn aligned_timeframes_confirm_the_signal() {
    let market = MockMarket::new()
        .with(Timeframe::M15, drift_candles(200, 100.0, 0.5))
        .with(Timeframe::M30, drift_candles(200, 100.0, 0.5))
        .with(Timeframe::H1, drift_candles(200, 100.0, 0.5));
    let engine = engine_with(market, StrategyKind::Technical, true);

    let response = engine
        .analyze_at("BTCUSDT", Timeframe::M15, analysis_time())
        .await
        .unwrap();

    let mtf = response.mtf.expect("merged view expected");
    assert_eq!(mtf.votes.len(), 3);
    assert_eq!(mtf.alignment, Alignment::Aligned);
    assert_eq!(mtf.direction, Direction::Long);
    assert_eq!(response.direction, Direction::Long);
}

#[tokio::test]
async fn failed_confirmation_timeframe_is_skipped() {
    // H1 has no data; 15m and 30m still merge
    let market = MockMarket::new()
        .with(Timeframe::M15, drift_candles(200, 100.0, 0.5))
        .with(Timeframe::M30, drift_candles(200, 100.0, 0.5));
    let engine = engine_with(market, StrategyKind::Technical, true);

    let response = engine
        .analyze_at("BTCUSDT", Timeframe::M15, analysis_time())
        .await
        .unwrap();

    let mtf = response.mtf.expect("two votes are enough");
    assert_eq!(mtf.votes.len(), 2);
}

#[tokio::test]
async fn no_merge_with_a_single_surviving_vote() {
    let market = MockMarket::new().with(Timeframe::M15, drift_candles(200, 100.0, 0.5));
    let engine = engine_with(market, StrategyKind::Technical, true);

    let response = engine
        .analyze_at("BTCUSDT", Timeframe::M15, analysis_time())
        .await
        .unwrap();

    assert!(response.mtf.is_none());
}

#[tokio::test]
async fn disagreeing_timeframes_are_reported_without_override() {
    let market = MockMarket::new()
        .with(Timeframe::M15, drift_candles(200, 100.0, 0.5))
        .with(Timeframe::M30, drift_candles(200, 200.0, -0.5))
        .with(Timeframe::H1, drift_candles(200, 200.0, -0.5));
    let engine = engine_with(market, StrategyKind::Technical, true);

    let response = engine
        .analyze_at("BTCUSDT", Timeframe::M15, analysis_time())
        .await
        .unwrap();

    // higher timeframes disagree, but their diluted weighted confidence
    // stays under the override threshold: the merge is advisory here
    let mtf = response.mtf.expect("merged view expected");
    assert_eq!(mtf.direction, Direction::Short);
    assert_eq!(mtf.alignment, Alignment::Majority);
    assert!(mtf.confidence < 70.0);
    assert_eq!(response.direction, Direction::Long);
}

#[tokio::test]
async fn short_history_degrades_to_neutral_hold() {
    let market = MockMarket::new().with(Timeframe::M15, drift_candles(30, 100.0, 0.5));
    let engine = engine_with(market, StrategyKind::Technical, false);

    let response = engine
        .analyze_at("BTCUSDT", Timeframe::M15, analysis_time())
        .await
        .unwrap();

    assert_eq!(response.direction, Direction::Hold);
    assert_eq!(response.confidence, 30.0);
    assert!(response.evidence[0].contains("Insufficient data"));
    assert!(response.entry_price.is_none());
    assert!(response.leverage.is_none());
}

#[tokio::test]
async fn missing_market_data_propagates() {
    let market = MockMarket::new();
    let engine = engine_with(market, StrategyKind::Technical, false);

    let err = engine
        .analyze_at("BTCUSDT", Timeframe::M15, analysis_time())
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::DataUnavailable { .. }));
}

#[tokio::test]
async fn cooldown_keeps_the_prior_direction() {
    let up = drift_candles(200, 100.0, 0.5);
    let down = drift_candles(200, 200.0, -0.5);

    let history = Arc::new(SignalHistory::new());
    let config = EngineConfig {
        strategy: StrategyKind::Technical,
        mtf_enabled: false,
        ..EngineConfig::default()
    };

    let t0 = analysis_time();
    let engine_up = SignalEngine::new(
        Arc::new(MockMarket::new().with(Timeframe::M15, up)),
        history.clone(),
        config.clone(),
    );
    let first = engine_up
        .analyze_at("BTCUSDT", Timeframe::M15, t0)
        .await
        .unwrap();
    assert_eq!(first.direction, Direction::Long);

    // five minutes later the market flips hard, but the cooldown holds
    let engine_down = SignalEngine::new(
        Arc::new(MockMarket::new().with(Timeframe::M15, down.clone())),
        history.clone(),
        config.clone(),
    );
    let second = engine_down
        .analyze_at("BTCUSDT", Timeframe::M15, t0 + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(second.direction, Direction::Long);
    assert_eq!(second.previous_signal, Some(Direction::Long));
    let note = second.stability_note.expect("gate reason expected");
    assert!(note.contains("cooldown"), "unexpected note: {note}");

    // well past the cooldown the gate re-evaluates: a strong short flips in
    // on its own merits, anything less stays held for lack of a gain
    let engine_down2 = SignalEngine::new(
        Arc::new(MockMarket::new().with(Timeframe::M15, down)),
        history,
        config,
    );
    let third = engine_down2
        .analyze_at("BTCUSDT", Timeframe::M15, t0 + Duration::minutes(30))
        .await
        .unwrap();
    let note = third.stability_note.expect("gate reason expected");
    match third.direction {
        Direction::Short => assert!(note.contains("strong"), "unexpected note: {note}"),
        other => {
            assert_eq!(other, Direction::Long);
            assert!(note.contains("confidence"), "unexpected note: {note}");
        }
    }
}

#[tokio::test]
async fn ict_response_is_internally_consistent() {
    let market = MockMarket::new().with(Timeframe::M15, drift_candles(200, 100.0, 0.5));
    let engine = engine_with(market, StrategyKind::Ict, false);

    let response = engine
        .analyze_at("BTCUSDT", Timeframe::M15, analysis_time())
        .await
        .unwrap();

    assert!(response.confidence >= 0.0 && response.confidence <= 95.0);
    assert_eq!(response.strategy, "ict");
    if response.direction.is_actionable() {
        assert_eq!(response.setup_state, Some(signal_bot::types::SetupState::Active));
        assert!(response.entry_price.is_some());
    } else {
        assert!(response.entry_price.is_none());
        assert!(response.leverage.is_none());
    }
    match response.setup_state {
        Some(signal_bot::types::SetupState::Pending) => {
            assert_eq!(response.direction, Direction::SetupPending);
        }
        Some(signal_bot::types::SetupState::AwaitingConfirmation) => {
            assert_eq!(response.direction, Direction::AwaitingConfirmation);
        }
        _ => {}
    }
}

#[tokio::test]
async fn killzone_session_is_reported() {
    let market = MockMarket::new().with(Timeframe::M15, drift_candles(200, 100.0, 0.5));
    let engine = engine_with(market, StrategyKind::Ict, false);

    // 09:00 New York
    let ny_am = Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap();
    let response = engine
        .analyze_at("BTCUSDT", Timeframe::M15, ny_am)
        .await
        .unwrap();
    assert_eq!(response.killzone.as_deref(), Some("New York AM"));

    let response = engine
        .analyze_at("BTCUSDT", Timeframe::M15, analysis_time())
        .await
        .unwrap();
    assert!(response.killzone.is_none());
}

#[tokio::test]
async fn signals_accumulate_in_history() {
    let market = MockMarket::new().with(Timeframe::M15, drift_candles(200, 100.0, 0.5));
    let history = Arc::new(SignalHistory::new());
    let engine = SignalEngine::new(
        Arc::new(market),
        history.clone(),
        EngineConfig {
            strategy: StrategyKind::Technical,
            mtf_enabled: false,
            ..EngineConfig::default()
        },
    );

    let t0 = analysis_time();
    for i in 0..3 {
        engine
            .analyze_at("BTCUSDT", Timeframe::M15, t0 + Duration::minutes(i))
            .await
            .unwrap();
    }

    let consistency = history.consistency("BTCUSDT", t0 + Duration::minutes(5), 60);
    assert_eq!(consistency.sample, 3);
    assert_eq!(consistency.long_pct, 100.0);

    let last = history.last_for("BTCUSDT", Timeframe::M15).unwrap();
    assert_eq!(last.direction, Direction::Long);
}
