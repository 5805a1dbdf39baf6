use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::mtf::Timeframe;
use crate::types::{Direction, Strength, round2};

const HISTORY_CAPACITY: usize = 50;

/// One emitted signal, as remembered for flip gating and consistency stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub strength: Strength,
    pub confidence: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Per-symbol FIFO of recent signals, capped at 50 entries each.
///
/// Shared across analysis tasks; the engine takes it by `Arc`.
#[derive(Debug, Default)]
pub struct SignalHistory {
    inner: Mutex<HashMap<String, VecDeque<SignalRecord>>>,
}

impl SignalHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: SignalRecord) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let queue = map.entry(record.symbol.clone()).or_default();
        queue.push_back(record);
        while queue.len() > HISTORY_CAPACITY {
            queue.pop_front();
        }
    }

    /// Most recent record for the symbol on the given timeframe.
    pub fn last_for(&self, symbol: &str, timeframe: Timeframe) -> Option<SignalRecord> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(symbol)?
            .iter()
            .rev()
            .find(|r| r.timeframe == timeframe)
            .cloned()
    }

    /// Records newer than `minutes` before `now`, oldest first.
    pub fn recent(&self, symbol: &str, now: DateTime<Utc>, minutes: i64) -> Vec<SignalRecord> {
        let cutoff = now - Duration::minutes(minutes);
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(symbol)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|r| r.recorded_at >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn consistency(&self, symbol: &str, now: DateTime<Utc>, minutes: i64) -> Consistency {
        let recent = self.recent(symbol, now, minutes);
        if recent.is_empty() {
            return Consistency {
                long_pct: 0.0,
                short_pct: 0.0,
                hold_pct: 100.0,
                sample: 0,
            };
        }
        let total = recent.len() as f64;
        let longs = recent.iter().filter(|r| r.direction == Direction::Long).count() as f64;
        let shorts = recent.iter().filter(|r| r.direction == Direction::Short).count() as f64;
        Consistency {
            long_pct: round2(longs / total * 100.0),
            short_pct: round2(shorts / total * 100.0),
            hold_pct: round2((total - longs - shorts) / total * 100.0),
            sample: recent.len(),
        }
    }
}

/// Share of recent signals per direction; non-tradeable verdicts count as hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consistency {
    pub long_pct: f64,
    pub short_pct: f64,
    pub hold_pct: f64,
    pub sample: usize,
}

#[derive(Debug, Clone)]
pub struct StabilityConfig {
    pub cooldown_minutes: i64,
    pub min_confidence_delta: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        StabilityConfig {
            cooldown_minutes: 10,
            min_confidence_delta: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub allow: bool,
    pub reason: String,
}

impl GateDecision {
    fn allow(reason: String) -> Self {
        GateDecision { allow: true, reason }
    }

    fn reject(reason: String) -> Self {
        GateDecision { allow: false, reason }
    }
}

/// Decide whether a direction change may be published.
///
/// Inside the cooldown window no direction change goes through, regardless
/// of confidence. After it, the candidate needs a confidence gain of at
/// least the configured delta; an insufficient gain is overridden only by a
/// STRONG candidate at 75+, a weak prior yielding to a 65+ candidate, or an
/// 80+ candidate that is at least MODERATE.
pub fn evaluate_flip(
    prior: Option<&SignalRecord>,
    candidate: Direction,
    confidence: f64,
    strength: Strength,
    now: DateTime<Utc>,
    cfg: &StabilityConfig,
) -> GateDecision {
    let Some(prior) = prior else {
        return GateDecision::allow("first signal for symbol".to_string());
    };
    if prior.direction == candidate {
        return GateDecision::allow("same direction as previous signal".to_string());
    }

    let age_minutes = (now - prior.recorded_at).num_seconds() as f64 / 60.0;
    if age_minutes < cfg.cooldown_minutes as f64 {
        return GateDecision::reject(format!(
            "cooldown: previous signal is {age_minutes:.1} min old (< {} min)",
            cfg.cooldown_minutes
        ));
    }

    let delta = confidence - prior.confidence;
    if delta >= cfg.min_confidence_delta {
        return GateDecision::allow(format!("confidence improved by {delta:.1} points"));
    }
    if strength == Strength::Strong && confidence >= 75.0 {
        return GateDecision::allow(format!("strong signal at {confidence:.0}% confidence"));
    }
    if prior.strength == Strength::Weak && confidence >= 65.0 {
        return GateDecision::allow(format!(
            "previous signal weak, new signal at {confidence:.0}%"
        ));
    }
    if confidence >= 80.0 && strength != Strength::Weak {
        return GateDecision::allow(format!(
            "confident {} signal ({confidence:.0}%)",
            strength.as_str()
        ));
    }

    GateDecision::reject(format!(
        "confidence gain {delta:.1} below required {:.1}",
        cfg.min_confidence_delta
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap()
    }

    fn record(direction: Direction, confidence: f64, minute: u32) -> SignalRecord {
        SignalRecord {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M15,
            direction,
            strength: Strength::Moderate,
            confidence,
            recorded_at: at(minute),
        }
    }

    #[test]
    fn first_signal_always_allowed() {
        let d = evaluate_flip(
            None,
            Direction::Long,
            60.0,
            Strength::Moderate,
            at(0),
            &StabilityConfig::default(),
        );
        assert!(d.allow);
    }

    #[test]
    fn same_direction_passes_through() {
        let prior = record(Direction::Long, 70.0, 0);
        let d = evaluate_flip(
            Some(&prior),
            Direction::Long,
            55.0,
            Strength::Weak,
            at(1),
            &StabilityConfig::default(),
        );
        assert!(d.allow);
    }

    #[test]
    fn hold_prior_is_gated_like_any_other_direction() {
        // leaving a HOLD is still a direction change and respects the cooldown
        let prior = record(Direction::Hold, 40.0, 0);
        let d = evaluate_flip(
            Some(&prior),
            Direction::Long,
            90.0,
            Strength::Strong,
            at(5),
            &StabilityConfig::default(),
        );
        assert!(!d.allow);
        assert!(d.reason.contains("cooldown"));

        let d = evaluate_flip(
            Some(&prior),
            Direction::Long,
            55.0,
            Strength::Weak,
            at(15),
            &StabilityConfig::default(),
        );
        // 40 -> 55 clears the delta requirement
        assert!(d.allow);
    }

    #[test]
    fn cooldown_blocks_early_flip() {
        let prior = record(Direction::Long, 60.0, 0);
        let d = evaluate_flip(
            Some(&prior),
            Direction::Short,
            95.0,
            Strength::Strong,
            at(5),
            &StabilityConfig::default(),
        );
        assert!(!d.allow);
        assert!(d.reason.contains("cooldown"));
    }

    #[test]
    fn confidence_delta_allows_flip_after_cooldown() {
        let prior = record(Direction::Long, 60.0, 0);
        let d = evaluate_flip(
            Some(&prior),
            Direction::Short,
            76.0,
            Strength::Moderate,
            at(15),
            &StabilityConfig::default(),
        );
        assert!(d.allow);

        let d = evaluate_flip(
            Some(&prior),
            Direction::Short,
            70.0,
            Strength::Moderate,
            at(15),
            &StabilityConfig::default(),
        );
        assert!(!d.allow);
    }

    #[test]
    fn strong_candidate_overrides_small_delta_at_75() {
        let prior = record(Direction::Long, 70.0, 0);
        let d = evaluate_flip(
            Some(&prior),
            Direction::Short,
            76.0,
            Strength::Strong,
            at(15),
            &StabilityConfig::default(),
        );
        assert!(d.allow);
        assert!(d.reason.contains("strong"));

        let d = evaluate_flip(
            Some(&prior),
            Direction::Short,
            74.0,
            Strength::Strong,
            at(15),
            &StabilityConfig::default(),
        );
        assert!(!d.allow);
    }

    #[test]
    fn weak_candidate_is_rejected_despite_high_confidence() {
        let prior = record(Direction::Long, 80.0, 0);
        let d = evaluate_flip(
            Some(&prior),
            Direction::Short,
            86.0,
            Strength::Weak,
            at(15),
            &StabilityConfig::default(),
        );
        assert!(!d.allow);
    }

    #[test]
    fn moderate_candidate_needs_80() {
        let prior = record(Direction::Long, 80.0, 0);
        let d = evaluate_flip(
            Some(&prior),
            Direction::Short,
            82.0,
            Strength::Moderate,
            at(15),
            &StabilityConfig::default(),
        );
        assert!(d.allow);

        let d = evaluate_flip(
            Some(&prior),
            Direction::Short,
            78.0,
            Strength::Moderate,
            at(15),
            &StabilityConfig::default(),
        );
        assert!(!d.allow);
    }

    #[test]
    fn weak_prior_yields_only_at_65_and_above() {
        let mut prior = record(Direction::Long, 55.0, 0);
        prior.strength = Strength::Weak;
        let d = evaluate_flip(
            Some(&prior),
            Direction::Short,
            60.0,
            Strength::Moderate,
            at(15),
            &StabilityConfig::default(),
        );
        assert!(!d.allow);

        let d = evaluate_flip(
            Some(&prior),
            Direction::Short,
            66.0,
            Strength::Moderate,
            at(15),
            &StabilityConfig::default(),
        );
        assert!(d.allow);
    }

    #[test]
    fn history_caps_at_fifty_per_symbol() {
        let history = SignalHistory::new();
        for i in 0..60u32 {
            history.record(record(Direction::Long, 50.0, i % 60));
        }
        let all = history.recent("BTCUSDT", at(59), 24 * 60);
        assert_eq!(all.len(), 50);
    }

    #[test]
    fn last_for_filters_by_timeframe() {
        let history = SignalHistory::new();
        history.record(record(Direction::Long, 50.0, 0));
        let mut other = record(Direction::Short, 70.0, 1);
        other.timeframe = Timeframe::H1;
        history.record(other);

        let last = history.last_for("BTCUSDT", Timeframe::M15).unwrap();
        assert_eq!(last.direction, Direction::Long);
        assert!(history.last_for("BTCUSDT", Timeframe::M5).is_none());
        assert!(history.last_for("ETHUSDT", Timeframe::M15).is_none());
    }

    #[test]
    fn consistency_percentages() {
        let history = SignalHistory::new();
        history.record(record(Direction::Long, 50.0, 0));
        history.record(record(Direction::Long, 55.0, 1));
        history.record(record(Direction::Short, 60.0, 2));
        history.record(record(Direction::Hold, 40.0, 3));

        let c = history.consistency("BTCUSDT", at(10), 60);
        assert_eq!(c.long_pct, 50.0);
        assert_eq!(c.short_pct, 25.0);
        assert_eq!(c.hold_pct, 25.0);
        assert_eq!(c.sample, 4);

        let empty = history.consistency("ETHUSDT", at(10), 60);
        assert_eq!(empty.hold_pct, 100.0);
        assert_eq!(empty.sample, 0);
    }
}
