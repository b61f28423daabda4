//! Exponential-smoothing forecaster. Pure functions only; persistence lives
//! in forecast_stage.rs.
//!
//! Model over the trailing window s_0..s_T:
//!   level_t = α·s_t + (1-α)·level_{t-1}
//!   trend_t = β·(level_t - level_{t-1}) + (1-β)·trend_{t-1}      (Holt only)
//!   forecast(h) = level_T + h·trend_T                             (level_T for SES)
//!
//! Band: forecast(h) ± z·σ·√h, σ = RMS of one-step-ahead fitting errors.
//! The point is clipped to [0, 100] first and both bounds are derived from
//! the clipped point, so lower ≤ predicted ≤ upper always holds.

use crate::{
    config::{ForecastConfig, ForecastMethod},
    error::{GovError, GovResult},
    store::TrendPoint,
    types::ScoreDate,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};

pub const MAX_HORIZON_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastParams {
    pub alpha:      f64,
    pub beta:       f64,
    pub method:     ForecastMethod,
    pub z:          f64,
    pub min_points: usize,
}

impl ForecastParams {
    pub fn new(alpha: f64, beta: f64, method: ForecastMethod) -> GovResult<Self> {
        let in_unit = |x: f64| x.is_finite() && x > 0.0 && x <= 1.0;
        if !in_unit(alpha) {
            return Err(GovError::InvalidRange(format!("alpha {alpha} must lie in (0, 1]")));
        }
        if method == ForecastMethod::Holt && !in_unit(beta) {
            return Err(GovError::InvalidRange(format!("beta {beta} must lie in (0, 1]")));
        }
        Ok(Self { alpha, beta, method, z: 1.28, min_points: 3 })
    }

    pub fn from_config(cfg: &ForecastConfig) -> GovResult<Self> {
        let params = Self::new(cfg.alpha, cfg.beta, cfg.method)?;
        Ok(Self { z: cfg.z, min_points: cfg.min_points, ..params })
    }

    pub fn with_method(self, method: ForecastMethod) -> Self {
        Self { method, ..self }
    }
}

pub fn validate_horizons(horizons: &[u32]) -> GovResult<()> {
    if horizons.is_empty() {
        return Err(GovError::InvalidRange("at least one horizon is required".into()));
    }
    if let Some(h) = horizons.iter().find(|h| **h == 0 || **h > MAX_HORIZON_DAYS) {
        return Err(GovError::InvalidRange(format!(
            "horizon {h} outside 1..={MAX_HORIZON_DAYS} days"
        )));
    }
    Ok(())
}

/// Not enough observations in the window. Recovered by omitting the forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsufficientData {
    pub required:  usize,
    pub available: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedModel {
    pub level:  f64,
    pub trend:  f64,
    pub sigma:  f64,
    pub points: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonForecast {
    pub horizon_days: u32,
    pub predicted:    f64,
    pub lower:        f64,
    pub upper:        f64,
    pub sigma:        f64,
}

/// Fit the smoothing recursion. Needs at least two points.
pub fn fit(series: &[f64], params: &ForecastParams) -> Option<FittedModel> {
    if series.len() < 2 {
        return None;
    }
    let holt = params.method == ForecastMethod::Holt;
    let (alpha, beta) = (params.alpha, params.beta);

    let mut level = series[0];
    let mut trend = if holt { series[1] - series[0] } else { 0.0 };
    let mut squared = 0.0f64;

    for &score in &series[1..] {
        let error = score - (level + trend);
        squared += error * error;

        let prev_level = level;
        level = alpha * score + (1.0 - alpha) * prev_level;
        if holt {
            trend = beta * (level - prev_level) + (1.0 - beta) * trend;
        }
    }

    let errors = (series.len() - 1) as f64;
    Some(FittedModel { level, trend, sigma: (squared / errors).sqrt(), points: series.len() })
}

impl FittedModel {
    pub fn project(&self, horizon_days: u32, z: f64) -> HorizonForecast {
        let h = horizon_days as f64;
        let predicted = (self.level + h * self.trend).clamp(0.0, 100.0);
        let half_width = z * self.sigma * h.sqrt();
        HorizonForecast {
            horizon_days,
            predicted,
            lower: (predicted - half_width).clamp(0.0, 100.0),
            upper: (predicted + half_width).clamp(0.0, 100.0),
            sigma: self.sigma,
        }
    }
}

/// Forecast every horizon from one series. Deterministic in (series, params).
pub fn forecast(
    series:   &[f64],
    params:   &ForecastParams,
    horizons: &[u32],
) -> Result<Vec<HorizonForecast>, InsufficientData> {
    let required = params.min_points.max(2);
    let insufficient = InsufficientData { required, available: series.len() };
    if series.len() < required {
        return Err(insufficient);
    }
    let model = fit(series, params).ok_or(insufficient)?;
    Ok(horizons.iter().map(|h| model.project(*h, params.z)).collect())
}

/// Scores inside the trailing window ending at `as_of` (inclusive), in date
/// order. Gaps stay gaps.
pub fn window_scores(trend: &[TrendPoint], as_of: ScoreDate, window_days: u32) -> Vec<f64> {
    let start = as_of - Duration::days(i64::from(window_days));
    trend
        .iter()
        .filter(|p| p.date > start && p.date <= as_of)
        .map(|p| p.score)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ses_ignores_trend() {
        let params = ForecastParams::new(0.5, 0.5, ForecastMethod::Ses).unwrap();
        let model = fit(&[10.0, 20.0, 30.0], &params).unwrap();
        assert_eq!(model.trend, 0.0);
        // level: 10 → 15 → 22.5
        assert!((model.level - 22.5).abs() < 1e-9);
    }

    #[test]
    fn zero_horizon_rejected() {
        assert!(validate_horizons(&[7, 0]).is_err());
        assert!(validate_horizons(&[]).is_err());
        assert!(validate_horizons(&[1, 365]).is_ok());
    }
}
