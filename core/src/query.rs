//! Query layer: the four operations exposed to callers, each checked
//! against an `AccessPolicy` before touching the engine.
//!
//! Missing values are `None` and serialize as `null`; a missing pillar is
//! never reported as zero.

use crate::{
    band::{BandThreshold, StatusBand},
    config::ForecastMethod,
    engine::{ForecastRunReport, GovEngine},
    error::{GovError, GovResult},
    insight::ConfidenceLabel,
    store::{AnomalyRow, InsightRow, TrendPoint},
    types::{Locale, Pillar, RunId, ScoreDate, Series},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Days of composite history returned with the status view.
pub const STATUS_TREND_DAYS: i64 = 30;

// ── Access control ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Viewer   => "viewer",
            Self::Operator => "operator",
            Self::Admin    => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer"   => Ok(Self::Viewer),
            "operator" => Ok(Self::Operator),
            "admin"    => Ok(Self::Admin),
            other      => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReadStatus,
    ReadTrends,
    RecomputeDaily,
    RecomputeForecast,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadStatus        => "read_status",
            Self::ReadTrends        => "read_trends",
            Self::RecomputeDaily    => "recompute_daily",
            Self::RecomputeForecast => "recompute_forecast",
        }
    }
}

/// Authorization is decided outside the engine; the engine only asks.
pub trait AccessPolicy: Send + Sync {
    fn authorize(&self, role: Role, action: Action) -> GovResult<()>;
}

/// Reads need operator, recomputes need admin. Higher roles inherit.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleTablePolicy;

impl AccessPolicy for RoleTablePolicy {
    fn authorize(&self, role: Role, action: Action) -> GovResult<()> {
        let required = match action {
            Action::ReadStatus | Action::ReadTrends            => Role::Operator,
            Action::RecomputeDaily | Action::RecomputeForecast => Role::Admin,
        };
        if role >= required {
            Ok(())
        } else {
            Err(GovError::Forbidden { role: role.name().to_string(), action: action.name() })
        }
    }
}

// ── Views ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarScoreView {
    pub pillar: Pillar,
    pub score:  Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendView {
    pub as_of: ScoreDate,
    pub score: f64,
}

impl From<TrendPoint> for TrendView {
    fn from(p: TrendPoint) -> Self {
        Self { as_of: p.date, score: p.score }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightView {
    pub id:               String,
    pub series:           String,
    pub date:             ScoreDate,
    pub kind:             String,
    pub confidence:       f64,
    pub confidence_label: ConfidenceLabel,
    pub text:             String,
}

impl From<InsightRow> for InsightView {
    fn from(r: InsightRow) -> Self {
        Self {
            confidence_label: ConfidenceLabel::from_confidence(r.confidence),
            id:               r.insight_id,
            series:           r.series,
            date:             r.date,
            kind:             r.kind,
            confidence:       r.confidence,
            text:             r.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyView {
    pub id:          String,
    pub series:      String,
    pub date:        ScoreDate,
    pub kind:        String,
    pub severity:    String,
    pub delta_pct:   f64,
    pub expected:    f64,
    pub actual:      f64,
    pub message:     String,
    pub resolved:    bool,
    pub resolved_at: Option<ScoreDate>,
}

impl From<AnomalyRow> for AnomalyView {
    fn from(r: AnomalyRow) -> Self {
        Self {
            id:          r.anomaly_id,
            series:      r.series,
            date:        r.date,
            kind:        r.kind,
            severity:    r.severity,
            delta_pct:   r.delta_pct,
            expected:    r.expected,
            actual:      r.actual,
            message:     r.message,
            resolved:    r.resolved,
            resolved_at: r.resolved_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastView {
    pub forecast_date: ScoreDate,
    pub horizon:       u32,
    pub score:         f64,
    pub lower:         f64,
    pub upper:         f64,
}

// ── Status ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub locale:   Locale,
    /// List resolved anomalies instead of open ones.
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub as_of:              Option<ScoreDate>,
    pub intelligence_score: Option<f64>,
    pub status:             Option<StatusBand>,
    pub degraded:           bool,
    pub pillar_scores:      Vec<PillarScoreView>,
    pub insights:           Vec<InsightView>,
    pub anomalies:          Vec<AnomalyView>,
    pub trend:              Vec<TrendView>,
    pub bands:              Vec<BandThreshold>,
}

pub fn status(
    engine: &GovEngine,
    policy: &dyn AccessPolicy,
    role: Role,
    req: &StatusRequest,
) -> GovResult<StatusResponse> {
    policy.authorize(role, Action::ReadStatus)?;
    let store = engine.store();
    let as_of = store.latest_score_date()?;

    let (pillar_scores, composite, trend) = match as_of {
        Some(date) => {
            let rows = store.pillar_scores_for_date(date)?;
            let pillars = Pillar::ALL
                .iter()
                .map(|p| PillarScoreView {
                    pillar: *p,
                    score:  rows.iter().find(|r| r.pillar == p.name()).map(|r| r.score),
                })
                .collect();
            let from = date - Duration::days(STATUS_TREND_DAYS - 1);
            let trend = store
                .trend(Series::Composite, from, date)?
                .into_iter()
                .map(TrendView::from)
                .collect();
            (pillars, store.composite_for_date(date)?, trend)
        }
        None => (
            Pillar::ALL.iter().map(|p| PillarScoreView { pillar: *p, score: None }).collect(),
            None,
            Vec::new(),
        ),
    };

    let status = composite
        .as_ref()
        .map(|c| c.status.parse::<StatusBand>())
        .transpose()
        .map_err(|e| GovError::Other(anyhow::anyhow!("composite row: {e}")))?;

    Ok(StatusResponse {
        as_of,
        intelligence_score: composite.as_ref().map(|c| c.score),
        status,
        degraded: composite.as_ref().map(|c| c.degraded).unwrap_or(true),
        pillar_scores,
        insights: store
            .current_insights(req.locale.code())?
            .into_iter()
            .map(InsightView::from)
            .collect(),
        anomalies: store
            .anomalies(req.resolved)?
            .into_iter()
            .map(AnomalyView::from)
            .collect(),
        trend,
        bands: engine.config().bands.thresholds.clone(),
    })
}

// ── Trends ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendsRequest {
    pub from:   ScoreDate,
    pub to:     ScoreDate,
    /// A pillar name or "composite".
    #[serde(default = "default_series")]
    pub pillar: Series,
}

fn default_series() -> Series {
    Series::Composite
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendsResponse {
    pub series:     Series,
    pub historical: Vec<TrendView>,
    pub forecast:   Vec<ForecastView>,
}

pub fn trends(
    engine: &GovEngine,
    policy: &dyn AccessPolicy,
    role: Role,
    req: &TrendsRequest,
) -> GovResult<TrendsResponse> {
    policy.authorize(role, Action::ReadTrends)?;
    let store = engine.store();
    let historical = store
        .trend(req.pillar, req.from, req.to)?
        .into_iter()
        .map(TrendView::from)
        .collect();
    let forecast = store
        .latest_forecasts(req.pillar)?
        .into_iter()
        .map(|p| ForecastView {
            forecast_date: p.target_date,
            horizon:       p.horizon_days,
            score:         p.predicted,
            lower:         p.lower_bound,
            upper:         p.upper_bound,
        })
        .collect();
    Ok(TrendsResponse { series: req.pillar, historical, forecast })
}

// ── Recomputes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyRecomputeRequest {
    /// Defaults to the engine clock's today.
    #[serde(default)]
    pub as_of: Option<ScoreDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub finance:   Option<f64>,
    pub health:    Option<f64>,
    pub ai:        Option<f64>,
    pub menu:      Option<f64>,
    pub composite: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecomputeResponse {
    pub run_id:   RunId,
    pub as_of:    ScoreDate,
    pub scores:   ScoreSet,
    pub degraded: bool,
}

pub fn recompute_daily(
    engine: &mut GovEngine,
    policy: &dyn AccessPolicy,
    role: Role,
    req: &DailyRecomputeRequest,
) -> GovResult<DailyRecomputeResponse> {
    policy.authorize(role, Action::RecomputeDaily)?;
    let as_of = req.as_of.unwrap_or_else(|| engine.today());
    let report = engine.run_daily(as_of)?;
    let pillar = |p: Pillar| report.scores.pillars.get(&p).copied().flatten();

    Ok(DailyRecomputeResponse {
        scores: ScoreSet {
            finance:   pillar(Pillar::Finance),
            health:    pillar(Pillar::Health),
            ai:        pillar(Pillar::Ai),
            menu:      pillar(Pillar::Menu),
            composite: report.scores.composite.as_ref().map(|c| c.score),
        },
        degraded: report.scores.degraded(),
        run_id: report.run_id,
        as_of,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForecastRecomputeRequest {
    #[serde(default)]
    pub horizons: Option<Vec<u32>>,
    #[serde(default)]
    pub method:   Option<ForecastMethod>,
}

pub fn recompute_forecast(
    engine: &mut GovEngine,
    policy: &dyn AccessPolicy,
    role: Role,
    req: &ForecastRecomputeRequest,
) -> GovResult<ForecastRunReport> {
    policy.authorize(role, Action::RecomputeForecast)?;
    engine.recompute_forecasts(req.horizons.clone(), req.method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_reads_but_cannot_recompute() {
        let policy = RoleTablePolicy;
        assert!(policy.authorize(Role::Operator, Action::ReadStatus).is_ok());
        assert!(matches!(
            policy.authorize(Role::Operator, Action::RecomputeDaily),
            Err(GovError::Forbidden { .. })
        ));
        assert!(policy.authorize(Role::Admin, Action::RecomputeForecast).is_ok());
        assert!(policy.authorize(Role::Viewer, Action::ReadTrends).is_err());
    }
}
