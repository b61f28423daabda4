//! Engine configuration.
//!
//! Weights, status bands and severity thresholds are defaults pending
//! stakeholder confirmation, so every one of them is loadable from
//! `{data_dir}/engine_config.json`. Missing sections fall back to the
//! defaults below.

use crate::{
    band::StatusBands,
    error::{GovError, GovResult},
    types::{Locale, Pillar},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeWeights {
    pub finance: f64,
    pub health:  f64,
    pub ai:      f64,
    pub menu:    f64,
}

impl CompositeWeights {
    pub fn weight(&self, pillar: Pillar) -> f64 {
        match pillar {
            Pillar::Finance => self.finance,
            Pillar::Health  => self.health,
            Pillar::Ai      => self.ai,
            Pillar::Menu    => self.menu,
        }
    }
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self { finance: 0.25, health: 0.25, ai: 0.25, menu: 0.25 }
    }
}

/// Minimum |deltaPct| for each severity. Must be strictly increasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityThresholds {
    pub low:      f64,
    pub medium:   f64,
    pub high:     f64,
    pub critical: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self { low: 3.0, medium: 7.0, high: 15.0, critical: 25.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    /// Single exponential smoothing: flat forecast at the final level.
    Ses,
    /// Holt's linear (double) smoothing.
    Holt,
}

impl ForecastMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ses  => "ses",
            Self::Holt => "holt",
        }
    }
}

impl std::str::FromStr for ForecastMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ses"  => Ok(Self::Ses),
            "holt" => Ok(Self::Holt),
            other  => Err(format!("unknown forecast method '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Trailing window in calendar days, ending at the as-of date.
    pub window_days:  u32,
    pub alpha:        f64,
    pub beta:         f64,
    pub method:       ForecastMethod,
    /// z-score for the band; 1.28 is roughly an 80% interval.
    pub z:            f64,
    pub horizons:     Vec<u32>,
    /// Fewer points than this inside the window and no forecast is produced.
    pub min_points:   usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            window_days: 14,
            alpha:       0.4,
            beta:        0.2,
            method:      ForecastMethod::Holt,
            z:           1.28,
            horizons:    vec![7, 14, 30],
            min_points:  3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub severity:            SeverityThresholds,
    /// Fallback baseline: mean of scores in this many days before the date.
    pub baseline_days:       u32,
    /// |deltaPct| below this counts as a calm observation.
    pub resolve_below_pct:   f64,
    /// Consecutive calm observations required to resolve.
    pub resolve_after_calm:  usize,
    /// Consecutive same-sign observations that make a deviation "sustained".
    pub sustained_days:      usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            severity:           SeverityThresholds::default(),
            baseline_days:      7,
            resolve_below_pct:  3.0,
            resolve_after_calm: 2,
            sustained_days:     3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightConfig {
    pub locales:     Vec<Locale>,
    /// σ (in score points) that maps to zero confidence.
    pub sigma_scale: f64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self { locales: Locale::ALL.to_vec(), sigma_scale: 20.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Upper bound on a single pillar's collector call.
    pub timeout_ms: u64,
    /// Timed-out calls still running per pillar before that pillar is
    /// skipped instead of queried again.
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,
}

fn default_max_outstanding() -> usize {
    2
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { timeout_ms: 2_000, max_outstanding: default_max_outstanding() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub weights:   CompositeWeights,
    #[serde(default)]
    pub bands:     StatusBands,
    #[serde(default)]
    pub forecast:  ForecastConfig,
    #[serde(default)]
    pub anomaly:   AnomalyConfig,
    #[serde(default)]
    pub insight:   InsightConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/engine_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with a short collector timeout so timeout tests stay fast.
    pub fn default_test() -> Self {
        Self {
            collector: CollectorConfig { timeout_ms: 200, ..CollectorConfig::default() },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> GovResult<()> {
        let w = &self.weights;
        let weights = [w.finance, w.health, w.ai, w.menu];
        if weights.iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(GovError::InvalidConfig("weights must be finite and non-negative".into()));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(GovError::InvalidConfig("at least one weight must be positive".into()));
        }

        self.bands.validate()?;

        let s = &self.anomaly.severity;
        let ordered = 0.0 < s.low && s.low < s.medium && s.medium < s.high && s.high < s.critical;
        if !ordered {
            return Err(GovError::InvalidConfig(
                "severity thresholds must be positive and strictly increasing".into(),
            ));
        }

        let f = &self.forecast;
        if f.window_days == 0 {
            return Err(GovError::InvalidConfig("forecast window must be at least one day".into()));
        }
        if f.min_points < 2 {
            return Err(GovError::InvalidConfig("forecast needs at least 2 points to fit".into()));
        }
        if !(f.z.is_finite() && f.z >= 0.0) {
            return Err(GovError::InvalidConfig("forecast z must be finite and non-negative".into()));
        }
        crate::forecast::ForecastParams::from_config(f)?;
        crate::forecast::validate_horizons(&f.horizons)?;

        if self.anomaly.resolve_after_calm == 0 || self.anomaly.sustained_days < 2 {
            return Err(GovError::InvalidConfig(
                "resolve_after_calm must be >= 1 and sustained_days >= 2".into(),
            ));
        }
        if self.insight.locales.is_empty() {
            return Err(GovError::InvalidConfig("at least one insight locale is required".into()));
        }
        if !(self.insight.sigma_scale.is_finite() && self.insight.sigma_scale > 0.0) {
            return Err(GovError::InvalidConfig("sigma_scale must be positive".into()));
        }
        if self.collector.timeout_ms == 0 {
            return Err(GovError::InvalidConfig("collector timeout must be positive".into()));
        }
        if self.collector.max_outstanding == 0 {
            return Err(GovError::InvalidConfig("collector max_outstanding must be at least 1".into()));
        }
        Ok(())
    }

    /// Weights keyed by pillar name, for reporting.
    pub fn weight_table(&self) -> BTreeMap<&'static str, f64> {
        Pillar::ALL
            .iter()
            .map(|p| (p.name(), self.weights.weight(*p)))
            .collect()
    }
}
