//! Scoring and session payload types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Operating mode of the scoring pipeline
///
/// - `Shooting`: fused impacts are localized, corrected and scored
/// - `Scoring`: operator is walking the range; impacts are ignored
/// - `Calibration`: impacts become calibration samples awaiting a click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Shooting,
    Scoring,
    Calibration,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Shooting => write!(f, "shooting"),
            Mode::Scoring => write!(f, "scoring"),
            Mode::Calibration => write!(f, "calibration"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shooting" => Ok(Mode::Shooting),
            "scoring" => Ok(Mode::Scoring),
            "calibration" => Ok(Mode::Calibration),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// Ring a shot landed in
///
/// `score` is the point value (X counts as 10), `is_x` flags the inner X ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingScore {
    pub score: u8,
    pub is_x: bool,
}

impl RingScore {
    /// Outside the outermost ring
    pub const MISS: RingScore = RingScore { score: 0, is_x: false };

    /// Inner X ring
    pub const X: RingScore = RingScore { score: 10, is_x: true };

    /// Plain ring value (1..=10)
    pub fn points(score: u8) -> Self {
        Self { score, is_x: false }
    }

    /// Scorecard label: "X", "10".."1", or "M" for a miss
    pub fn label(&self) -> String {
        if self.is_x {
            "X".to_string()
        } else if self.score == 0 {
            "M".to_string()
        } else {
            self.score.to_string()
        }
    }

    pub fn is_miss(&self) -> bool {
        !self.is_x && self.score == 0
    }
}

/// A scored, corrected impact
///
/// Never mutated after creation. `session_id`, `end_number` and
/// `shot_number` are `None` when no session was active (or the active
/// session was already complete) when the shot was scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub shot_id: Uuid,
    pub session_id: Option<Uuid>,
    pub end_number: Option<u32>,
    pub shot_number: Option<u32>,
    /// Corrected position (sensor-plane units)
    pub x: f64,
    pub y: f64,
    pub r: f64,
    /// Uncorrected estimator output
    pub raw_x: f64,
    pub raw_y: f64,
    pub score: u8,
    pub is_x: bool,
    /// Version of the calibration model that corrected this shot
    pub calibration_version: u64,
    /// When the first bundle of the impact reached the backend
    pub detected_at: DateTime<Utc>,
    pub scored_at: DateTime<Utc>,
}

impl Shot {
    pub fn ring(&self) -> RingScore {
        RingScore {
            score: self.score,
            is_x: self.is_x,
        }
    }
}

/// Count of shots for one scorecard label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCount {
    pub label: String,
    pub count: u32,
}

/// One end (row) of a scorecard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndRow {
    pub end: u32,
    pub arrows: Vec<String>,
    pub score: u32,
    pub running: u32,
}

/// Scorecard snapshot of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub session_id: Uuid,
    pub ends: Vec<EndRow>,
    /// Counts in ring order X, 10..1, M. X shots are also counted as 10.
    pub counts: Vec<ScoreCount>,
    pub total: u32,
    pub total_arrows: u32,
    pub arrows_per_end: u32,
    pub num_ends: u32,
    pub is_complete: bool,
}

/// Session overview used by session control and listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub arrows_per_end: u32,
    pub num_ends: u32,
    pub current_arrows: u32,
    pub target_arrows: u32,
    pub total_score: u32,
    pub is_complete: bool,
    pub current_end: u32,
    pub arrows_in_current_end: u32,
    pub notes: Option<String>,
}

/// Per-end statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndStats {
    pub end: u32,
    pub arrows: u32,
    pub score: u32,
    pub avg_score: f64,
}

/// Aggregate statistics for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub avg_score: f64,
    pub x_count: u32,
    pub score_distribution: Vec<ScoreCount>,
    pub avg_r: f64,
    pub ends: Vec<EndStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip_strings() {
        for mode in [Mode::Shooting, Mode::Scoring, Mode::Calibration] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
        assert!("walking".parse::<Mode>().is_err());
        assert_eq!(" Scoring ".parse::<Mode>().unwrap(), Mode::Scoring);
    }

    #[test]
    fn test_mode_default_is_shooting() {
        assert_eq!(Mode::default(), Mode::Shooting);
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Mode::Calibration).unwrap(),
            "\"calibration\""
        );
    }

    #[test]
    fn test_ring_labels() {
        assert_eq!(RingScore::X.label(), "X");
        assert_eq!(RingScore::points(10).label(), "10");
        assert_eq!(RingScore::points(3).label(), "3");
        assert_eq!(RingScore::MISS.label(), "M");
        assert!(RingScore::MISS.is_miss());
        assert!(!RingScore::X.is_miss());
    }
}
