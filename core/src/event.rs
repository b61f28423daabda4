//! Stage events: what each stage of a run emitted.
//!
//! RULE: Stages communicate ONLY through events and the store.
//! A stage never calls another stage's functions directly.
//! Every event is appended to the run's event log.

use crate::{
    anomaly::{AnomalyKind, BaselineSource, Severity},
    band::StatusBand,
    collector::UnavailableReason,
    types::{Pillar, RunId, ScoreDate, Series},
};
use serde::{Deserialize, Serialize};

/// Variants are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovEvent {
    // ── Engine events ──────────────────────────────
    RunStarted {
        run_id: RunId,
        kind:   String,
        as_of:  ScoreDate,
    },
    RunCompleted {
        run_id: RunId,
        as_of:  ScoreDate,
    },
    RunCancelled {
        run_id: RunId,
        as_of:  ScoreDate,
        stage:  String,
    },

    // ── Score recorder ─────────────────────────────
    PillarScored {
        date:    ScoreDate,
        pillar:  Pillar,
        score:   f64,
        changed: bool,
    },
    PillarDegraded {
        date:   ScoreDate,
        pillar: Pillar,
        reason: UnavailableReason,
    },
    CompositeScored {
        date:     ScoreDate,
        score:    f64,
        status:   StatusBand,
        degraded: bool,
        changed:  bool,
    },
    CompositeUnavailable {
        date: ScoreDate,
    },
    BandChanged {
        series:         Series,
        date:           ScoreDate,
        previous_date:  ScoreDate,
        from:           StatusBand,
        to:             StatusBand,
        previous_score: f64,
        score:          f64,
    },

    // ── Forecaster ─────────────────────────────────
    ForecastGenerated {
        series: Series,
        as_of:  ScoreDate,
        points: usize,
        sigma:  f64,
    },
    ForecastSkipped {
        series:    Series,
        as_of:     ScoreDate,
        required:  usize,
        available: usize,
    },

    // ── Anomaly detector ───────────────────────────
    DeviationObserved {
        series:    Series,
        date:      ScoreDate,
        delta_pct: f64,
        source:    BaselineSource,
    },
    AnomalyOpened {
        anomaly_id: String,
        series:     Series,
        date:       ScoreDate,
        kind:       AnomalyKind,
        severity:   Severity,
        delta_pct:  f64,
    },
    AnomalyWithdrawn {
        anomaly_id: String,
        series:     Series,
        date:       ScoreDate,
    },
    AnomalyResolved {
        anomaly_id:  String,
        series:      Series,
        date:        ScoreDate,
        resolved_on: ScoreDate,
    },

    // ── Insight generator ──────────────────────────
    InsightsGenerated {
        date:       ScoreDate,
        count:      usize,
        superseded: usize,
    },
}

impl GovEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. }           => "run_started",
            Self::RunCompleted { .. }         => "run_completed",
            Self::RunCancelled { .. }         => "run_cancelled",
            Self::PillarScored { .. }         => "pillar_scored",
            Self::PillarDegraded { .. }       => "pillar_degraded",
            Self::CompositeScored { .. }      => "composite_scored",
            Self::CompositeUnavailable { .. } => "composite_unavailable",
            Self::BandChanged { .. }          => "band_changed",
            Self::ForecastGenerated { .. }    => "forecast_generated",
            Self::ForecastSkipped { .. }      => "forecast_skipped",
            Self::DeviationObserved { .. }    => "deviation_observed",
            Self::AnomalyOpened { .. }        => "anomaly_opened",
            Self::AnomalyWithdrawn { .. }     => "anomaly_withdrawn",
            Self::AnomalyResolved { .. }      => "anomaly_resolved",
            Self::InsightsGenerated { .. }    => "insights_generated",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    pub date:       ScoreDate,
    pub stage:      String,
    pub event_type: String,
    pub payload:    String, // JSON-serialized GovEvent
}
