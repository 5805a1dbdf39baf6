use crate::types::{LeverageSuggestion, RiskLevel, Volatility};

const BASE_LEVERAGE: i32 = 5;
const MIN_LEVERAGE: i32 = 5;
const MAX_LEVERAGE: i32 = 20;
/// Account fraction risked per trade when sizing the position.
const ACCOUNT_RISK_PCT: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct LeverageInputs {
    pub confluence: usize,
    pub confidence: f64,
    pub risk_reward: f64,
    pub volatility: Volatility,
    pub in_killzone: bool,
    /// Distance from entry to stop, percent of entry.
    pub stop_distance_pct: f64,
}

/// Additive leverage model: start at 5x, reward confluence, confidence,
/// risk/reward and killzone timing, then let volatility pull the result
/// back toward the floor. Always lands in 5..=20.
pub fn suggest_leverage(inputs: &LeverageInputs) -> LeverageSuggestion {
    let mut leverage = BASE_LEVERAGE;
    let mut reasoning = Vec::new();

    if inputs.confluence >= 8 {
        leverage += 5;
        reasoning.push(format!("Very high confluence ({} factors): +5", inputs.confluence));
    } else if inputs.confluence >= 6 {
        leverage += 3;
        reasoning.push(format!("High confluence ({} factors): +3", inputs.confluence));
    } else if inputs.confluence >= 4 {
        leverage += 1;
        reasoning.push(format!("Moderate confluence ({} factors): +1", inputs.confluence));
    }

    if inputs.confidence > 80.0 {
        leverage += 3;
        reasoning.push(format!("Confidence {:.0}%: +3", inputs.confidence));
    } else if inputs.confidence > 70.0 {
        leverage += 2;
        reasoning.push(format!("Confidence {:.0}%: +2", inputs.confidence));
    } else if inputs.confidence > 60.0 {
        leverage += 1;
        reasoning.push(format!("Confidence {:.0}%: +1", inputs.confidence));
    }

    if inputs.risk_reward > 5.0 {
        leverage += 4;
        reasoning.push(format!("Risk/reward {:.1}: +4", inputs.risk_reward));
    } else if inputs.risk_reward > 3.0 {
        leverage += 2;
        reasoning.push(format!("Risk/reward {:.1}: +2", inputs.risk_reward));
    } else if inputs.risk_reward > 2.0 {
        leverage += 1;
        reasoning.push(format!("Risk/reward {:.1}: +1", inputs.risk_reward));
    }

    if inputs.in_killzone {
        leverage += 2;
        reasoning.push("Inside killzone session: +2".to_string());
    }

    match inputs.volatility {
        Volatility::High => {
            leverage = (leverage - 3).max(MIN_LEVERAGE);
            reasoning.push("High volatility: -3".to_string());
        }
        Volatility::Low => {
            leverage = (leverage + 1).min(MAX_LEVERAGE);
            reasoning.push("Low volatility: +1".to_string());
        }
        Volatility::Medium => {}
    }

    let leverage = leverage.clamp(MIN_LEVERAGE, MAX_LEVERAGE) as u32;

    let risk_level = if leverage <= 8 {
        RiskLevel::Low
    } else if leverage <= 14 {
        RiskLevel::Moderate
    } else {
        RiskLevel::High
    };

    let stop_pct = if inputs.stop_distance_pct > 0.0 {
        inputs.stop_distance_pct
    } else {
        2.0
    };
    let position_pct = (ACCOUNT_RISK_PCT / stop_pct * leverage as f64).min(100.0);

    let recommendation = match risk_level {
        RiskLevel::Low => "Low risk: standard position size acceptable".to_string(),
        RiskLevel::Moderate => "Moderate risk: reduce position size".to_string(),
        RiskLevel::High => {
            "High risk: minimal position size with tight management".to_string()
        }
    };

    LeverageSuggestion {
        leverage,
        risk_level,
        position_size: format!("{position_pct:.1}%"),
        recommendation,
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_setup_in_low_volatility_maxes_out() {
        let suggestion = suggest_leverage(&LeverageInputs {
            confluence: 8,
            confidence: 85.0,
            risk_reward: 3.5,
            volatility: Volatility::Low,
            in_killzone: true,
            stop_distance_pct: 2.0,
        });
        // 5 +5 +3 +2 +2, then low volatility +1
        assert_eq!(suggestion.leverage, 18);
        assert_eq!(suggestion.risk_level, RiskLevel::High);
    }

    #[test]
    fn weak_setup_stays_at_floor() {
        let suggestion = suggest_leverage(&LeverageInputs {
            confluence: 2,
            confidence: 45.0,
            risk_reward: 1.0,
            volatility: Volatility::Medium,
            in_killzone: false,
            stop_distance_pct: 2.0,
        });
        assert_eq!(suggestion.leverage, 5);
        assert_eq!(suggestion.risk_level, RiskLevel::Low);
    }

    #[test]
    fn high_volatility_pulls_back_but_never_below_floor() {
        let suggestion = suggest_leverage(&LeverageInputs {
            confluence: 4,
            confidence: 65.0,
            risk_reward: 2.5,
            volatility: Volatility::High,
            in_killzone: false,
            stop_distance_pct: 2.0,
        });
        // 5 +1 +1 +1 = 8, minus 3 = 5
        assert_eq!(suggestion.leverage, 5);

        let floor = suggest_leverage(&LeverageInputs {
            confluence: 0,
            confidence: 0.0,
            risk_reward: 0.0,
            volatility: Volatility::High,
            in_killzone: false,
            stop_distance_pct: 2.0,
        });
        assert_eq!(floor.leverage, 5);
    }

    #[test]
    fn never_exceeds_cap() {
        let suggestion = suggest_leverage(&LeverageInputs {
            confluence: 10,
            confidence: 95.0,
            risk_reward: 6.0,
            volatility: Volatility::Low,
            in_killzone: true,
            stop_distance_pct: 2.0,
        });
        // 5 +5 +3 +4 +2 = 19, +1 = 20
        assert_eq!(suggestion.leverage, 20);
    }

    #[test]
    fn position_size_scales_with_stop_distance() {
        let tight = suggest_leverage(&LeverageInputs {
            confluence: 4,
            confidence: 65.0,
            risk_reward: 2.5,
            volatility: Volatility::Medium,
            in_killzone: false,
            stop_distance_pct: 1.0,
        });
        // leverage 8, 1% risk over 1% stop
        assert_eq!(tight.position_size, "8.0%");

        let zero_stop = suggest_leverage(&LeverageInputs {
            confluence: 4,
            confidence: 65.0,
            risk_reward: 2.5,
            volatility: Volatility::Medium,
            in_killzone: false,
            stop_distance_pct: 0.0,
        });
        // falls back to a 2% stop assumption
        assert_eq!(zero_stop.position_size, "4.0%");
    }

    #[test]
    fn reasoning_lists_each_adjustment() {
        let suggestion = suggest_leverage(&LeverageInputs {
            confluence: 6,
            confidence: 75.0,
            risk_reward: 2.5,
            volatility: Volatility::High,
            in_killzone: true,
            stop_distance_pct: 2.0,
        });
        assert_eq!(suggestion.reasoning.len(), 5);
    }
}
