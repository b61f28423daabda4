//! Status banding: the one table mapping a score to a status.
//!
//! RULE: Nothing else in the engine (or any presentation consumer) may
//! hard-code 90/75/60. The table travels with the status query so the
//! dashboard colours from the same source.

use crate::error::{GovError, GovResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBand {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl StatusBand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good      => "good",
            Self::Fair      => "fair",
            Self::Poor      => "poor",
        }
    }

    /// Higher is healthier. Used to tell an improvement from a decline.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Excellent => 3,
            Self::Good      => 2,
            Self::Fair      => 1,
            Self::Poor      => 0,
        }
    }
}

impl fmt::Display for StatusBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StatusBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "excellent" => Ok(Self::Excellent),
            "good"      => Ok(Self::Good),
            "fair"      => Ok(Self::Fair),
            "poor"      => Ok(Self::Poor),
            other       => Err(format!("unknown status band '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandThreshold {
    pub status:    StatusBand,
    pub min_score: f64,
}

/// Thresholds in descending `min_score` order; the last entry is the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBands {
    pub thresholds: Vec<BandThreshold>,
}

impl Default for StatusBands {
    fn default() -> Self {
        Self {
            thresholds: vec![
                BandThreshold { status: StatusBand::Excellent, min_score: 90.0 },
                BandThreshold { status: StatusBand::Good,      min_score: 75.0 },
                BandThreshold { status: StatusBand::Fair,      min_score: 60.0 },
                BandThreshold { status: StatusBand::Poor,      min_score: 0.0 },
            ],
        }
    }
}

impl StatusBands {
    pub fn classify(&self, score: f64) -> StatusBand {
        self.thresholds
            .iter()
            .find(|t| score >= t.min_score)
            .or_else(|| self.thresholds.last())
            .map(|t| t.status)
            .unwrap_or(StatusBand::Poor)
    }

    pub fn validate(&self) -> GovResult<()> {
        if self.thresholds.is_empty() {
            return Err(GovError::InvalidConfig("status band table is empty".into()));
        }
        let in_range = self
            .thresholds
            .iter()
            .all(|t| t.min_score.is_finite() && (0.0..=100.0).contains(&t.min_score));
        let descending = self
            .thresholds
            .windows(2)
            .all(|w| w[0].min_score > w[1].min_score);
        if !in_range || !descending {
            return Err(GovError::InvalidConfig(
                "status bands must lie in [0, 100] in strictly descending order".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_boundaries() {
        let bands = StatusBands::default();
        assert_eq!(bands.classify(100.0), StatusBand::Excellent);
        assert_eq!(bands.classify(90.0), StatusBand::Excellent);
        assert_eq!(bands.classify(89.99), StatusBand::Good);
        assert_eq!(bands.classify(75.0), StatusBand::Good);
        assert_eq!(bands.classify(60.0), StatusBand::Fair);
        assert_eq!(bands.classify(59.9), StatusBand::Poor);
        assert_eq!(bands.classify(0.0), StatusBand::Poor);
    }

    #[test]
    fn unordered_table_is_rejected() {
        let bands = StatusBands {
            thresholds: vec![
                BandThreshold { status: StatusBand::Good, min_score: 75.0 },
                BandThreshold { status: StatusBand::Excellent, min_score: 90.0 },
            ],
        };
        assert!(bands.validate().is_err());
    }
}
