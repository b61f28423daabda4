//! Anomaly classification: pure functions over actual/expected pairs and
//! the series' earlier observations. Persistence lives in anomaly_stage.rs.
//!
//! deltaPct = (actual − expected) / expected · 100
//! expected == 0 never divides: it becomes `baseline_unavailable` with 0%.

use crate::{
    config::{AnomalyConfig, SeverityThresholds},
    store::TrendPoint,
    types::{ScoreDate, Series, format_date},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Low      => "low",
            Self::Medium   => "medium",
            Self::High     => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low"      => Ok(Self::Low),
            "medium"   => Ok(Self::Medium),
            "high"     => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other      => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SuddenDrop,
    SuddenSpike,
    SustainedDecline,
    SustainedImprovement,
    BaselineUnavailable,
}

impl AnomalyKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SuddenDrop           => "sudden_drop",
            Self::SuddenSpike          => "sudden_spike",
            Self::SustainedDecline     => "sustained_decline",
            Self::SustainedImprovement => "sustained_improvement",
            Self::BaselineUnavailable  => "baseline_unavailable",
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Self::SuddenDrop | Self::SustainedDecline)
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AnomalyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sudden_drop"           => Ok(Self::SuddenDrop),
            "sudden_spike"          => Ok(Self::SuddenSpike),
            "sustained_decline"     => Ok(Self::SustainedDecline),
            "sustained_improvement" => Ok(Self::SustainedImprovement),
            "baseline_unavailable"  => Ok(Self::BaselineUnavailable),
            other                   => Err(format!("unknown anomaly type '{other}'")),
        }
    }
}

/// Where the expected value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    Forecast,
    TrailingMean,
}

impl BaselineSource {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Forecast     => "forecast",
            Self::TrailingMean => "trailing_mean",
        }
    }
}

impl FromStr for BaselineSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forecast"      => Ok(Self::Forecast),
            "trailing_mean" => Ok(Self::TrailingMean),
            other           => Err(format!("unknown baseline source '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub expected: f64,
    pub sigma:    f64,
    pub source:   BaselineSource,
}

/// `None` when expected is zero.
pub fn delta_pct(actual: f64, expected: f64) -> Option<f64> {
    if expected == 0.0 {
        None
    } else {
        Some((actual - expected) / expected * 100.0)
    }
}

/// Monotone in |delta|: a larger deviation never maps to a lower severity.
pub fn classify_severity(delta_pct: f64, thresholds: &SeverityThresholds) -> Option<Severity> {
    let magnitude = delta_pct.abs();
    if magnitude >= thresholds.critical {
        Some(Severity::Critical)
    } else if magnitude >= thresholds.high {
        Some(Severity::High)
    } else if magnitude >= thresholds.medium {
        Some(Severity::Medium)
    } else if magnitude >= thresholds.low {
        Some(Severity::Low)
    } else {
        None
    }
}

/// `prior` holds earlier observations as (date, deltaPct), ascending.
/// Sustained means this delta plus the `sustained_days - 1` calendar days
/// immediately before it all share its sign.
pub fn classify_kind(
    date:           ScoreDate,
    delta_pct:      f64,
    prior:          &[(ScoreDate, f64)],
    sustained_days: usize,
) -> AnomalyKind {
    let negative = delta_pct < 0.0;
    let needed = sustained_days.saturating_sub(1);

    let streak = (1..=needed).all(|back| {
        let day = date - Duration::days(back as i64);
        prior
            .iter()
            .find(|(d, _)| *d == day)
            .map(|(_, d)| if negative { *d < 0.0 } else { *d > 0.0 })
            .unwrap_or(false)
    });

    match (negative, streak) {
        (true, true)   => AnomalyKind::SustainedDecline,
        (true, false)  => AnomalyKind::SuddenDrop,
        (false, true)  => AnomalyKind::SustainedImprovement,
        (false, false) => AnomalyKind::SuddenSpike,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub actual:    f64,
    pub expected:  f64,
    pub delta_pct: f64,
    /// `Some` only when the deviation is an anomaly.
    pub finding:   Option<(AnomalyKind, Severity)>,
}

pub fn evaluate(
    date:     ScoreDate,
    actual:   f64,
    baseline: &Baseline,
    prior:    &[(ScoreDate, f64)],
    cfg:      &AnomalyConfig,
) -> Evaluation {
    match delta_pct(actual, baseline.expected) {
        None => Evaluation {
            actual,
            expected:  baseline.expected,
            delta_pct: 0.0,
            finding:   Some((AnomalyKind::BaselineUnavailable, Severity::Low)),
        },
        Some(delta) => Evaluation {
            actual,
            expected:  baseline.expected,
            delta_pct: delta,
            finding:   classify_severity(delta, &cfg.severity)
                .map(|sev| (classify_kind(date, delta, prior, cfg.sustained_days), sev)),
        },
    }
}

/// Mean and population std-dev of scores in the `days` days strictly
/// before `date`. `None` when that window is empty.
pub fn trailing_baseline(trend: &[TrendPoint], date: ScoreDate, days: u32) -> Option<Baseline> {
    let start = date - Duration::days(i64::from(days));
    let window: Vec<f64> = trend
        .iter()
        .filter(|p| p.date >= start && p.date < date)
        .map(|p| p.score)
        .collect();
    if window.is_empty() {
        return None;
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let var = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Some(Baseline { expected: mean, sigma: var.sqrt(), source: BaselineSource::TrailingMean })
}

/// The date an open anomaly resolves on, if the most recent observations
/// after it form a calm streak of the configured length.
pub fn resolution_date(
    anomaly_date: ScoreDate,
    observations: &[(ScoreDate, f64)],
    cfg:          &AnomalyConfig,
) -> Option<ScoreDate> {
    let later: Vec<&(ScoreDate, f64)> =
        observations.iter().filter(|(d, _)| *d > anomaly_date).collect();
    if later.len() < cfg.resolve_after_calm {
        return None;
    }
    let tail = &later[later.len() - cfg.resolve_after_calm..];
    if tail.iter().all(|(_, delta)| delta.abs() < cfg.resolve_below_pct) {
        tail.last().map(|(d, _)| *d)
    } else {
        None
    }
}

/// Deterministic so that re-running a date never duplicates its anomaly.
pub fn anomaly_id(series: Series, date: ScoreDate) -> String {
    format!("ANOM-{}-{}", series.name(), format_date(date))
}

/// Audit message stored on the anomaly row. Localized text lives in insight.rs.
pub fn describe(series: Series, eval: &Evaluation, kind: AnomalyKind, severity: Severity) -> String {
    match kind {
        AnomalyKind::BaselineUnavailable => format!(
            "{series}: expected baseline is zero, deviation cannot be measured (actual {:.1})",
            eval.actual
        ),
        _ => format!(
            "{series}: {kind} of {:+.1}% ({severity}); actual {:.1} vs expected {:.1}",
            eval.delta_pct, eval.actual, eval.expected
        ),
    }
}
