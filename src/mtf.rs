use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::types::{Direction, round2};

/// Supported analysis timeframes, ordered by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Also the Binance kline interval string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 2,
            Timeframe::M15 => 3,
            Timeframe::M30 => 4,
            Timeframe::H1 => 5,
            Timeframe::H4 => 6,
            Timeframe::D1 => 7,
        }
    }

    /// Voting weight: higher timeframes speak louder.
    pub fn weight(&self) -> f64 {
        match self {
            Timeframe::M1 => 1.0,
            Timeframe::M5 => 1.5,
            Timeframe::M15 => 2.0,
            Timeframe::M30 => 2.5,
            Timeframe::H1 => 3.0,
            Timeframe::H4 => 4.0,
            Timeframe::D1 => 5.0,
        }
    }

    /// The base timeframe plus up to two higher ones.
    pub fn confirmation_set(&self) -> Vec<Timeframe> {
        let mut set = vec![*self];
        set.extend(
            Timeframe::ALL
                .iter()
                .copied()
                .filter(|tf| tf.rank() > self.rank())
                .take(2),
        );
        set
    }
}

impl std::str::FromStr for Timeframe {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| SignalError::UnknownTimeframe(s.to_string()))
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timeframe's verdict entering the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeVote {
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alignment {
    #[serde(rename = "ALIGNED")]
    Aligned,
    #[serde(rename = "MAJORITY")]
    Majority,
    #[serde(rename = "CONFLICTING")]
    Conflicting,
}

#[derive(Debug, Clone)]
pub struct MtfScore {
    pub direction: Direction,
    pub confidence: f64,
    pub alignment: Alignment,
    pub reason: String,
}

/// Merged view published with the signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtfAnalysis {
    pub timeframes: Vec<String>,
    pub direction: Direction,
    pub confidence: f64,
    pub alignment: Alignment,
    pub reason: String,
    pub votes: Vec<TimeframeVote>,
}

fn effective_direction(d: Direction) -> Direction {
    if d.is_actionable() {
        d
    } else {
        Direction::Hold
    }
}

/// Merge per-timeframe votes into one verdict.
///
/// Votes are weighted by timeframe rank. Full agreement keeps the weighted
/// confidence (capped at 95); a two-thirds majority keeps 90% of it (capped
/// at 85); anything less collapses to HOLD at 40. Needs at least two votes.
pub fn merge(votes: &[TimeframeVote]) -> Option<MtfScore> {
    if votes.len() < 2 {
        return None;
    }

    let mut weighted = [(Direction::Long, 0.0), (Direction::Short, 0.0), (Direction::Hold, 0.0)];
    let mut total_weight = 0.0;
    for vote in votes {
        let dir = effective_direction(vote.direction);
        let weight = vote.timeframe.weight();
        total_weight += weight;
        for slot in weighted.iter_mut() {
            if slot.0 == dir {
                slot.1 += weight * vote.confidence;
            }
        }
    }
    if total_weight <= 0.0 {
        return None;
    }

    let (winner, winner_score) = weighted
        .iter()
        .copied()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    let weighted_confidence = winner_score / total_weight;

    let n = votes.len();
    let winner_count = votes
        .iter()
        .filter(|v| effective_direction(v.direction) == winner)
        .count();

    let score = if winner_count == n {
        MtfScore {
            direction: winner,
            confidence: round2(weighted_confidence.min(95.0)),
            alignment: Alignment::Aligned,
            reason: format!("all {n} timeframes agree on {winner}"),
        }
    } else if winner_count as f64 >= n as f64 * 0.66 {
        MtfScore {
            direction: winner,
            confidence: round2((weighted_confidence * 0.9).min(85.0)),
            alignment: Alignment::Majority,
            reason: format!("{winner_count} of {n} timeframes favor {winner}"),
        }
    } else {
        MtfScore {
            direction: Direction::Hold,
            confidence: 40.0,
            alignment: Alignment::Conflicting,
            reason: "timeframes conflict".to_string(),
        }
    };
    Some(score)
}

/// Should the merged view replace the base verdict?
///
/// A confident merged HOLD vetoes an actionable base signal; a confident
/// merged direction different from the base replaces it.
pub fn override_direction(base: Direction, merged: &MtfScore) -> Option<Direction> {
    if merged.direction == Direction::Hold && base != Direction::Hold && merged.confidence > 50.0 {
        return Some(Direction::Hold);
    }
    if merged.direction != base && merged.direction != Direction::Hold && merged.confidence > 70.0 {
        return Some(merged.direction);
    }
    None
}
