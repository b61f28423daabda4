//! Anomaly detector stage: compares each series' actual score against its
//! expected value, records the observation, raises anomalies and resolves
//! old ones.
//!
//! Execution order: after the forecaster.
//!
//! Design:
//!   - Expected = the forecast made before this date that targets it
//!     (most recent as-of wins), else the trailing baseline_days mean.
//!   - No forecast and no trailing history → the series is not evaluated.
//!   - Every evaluation upserts one observation per (series, date); those rows
//!     drive sustained classification and the calm streak that resolves.
//!   - A re-evaluated date that no longer deviates withdraws its open anomaly.

use crate::{
    anomaly::{
        anomaly_id, describe, evaluate, resolution_date, trailing_baseline, Baseline,
        BaselineSource,
    },
    error::GovResult,
    event::GovEvent,
    stage::{GovStage, StageContext},
    store::{AnomalyRow, ObservationRow},
    types::{ScoreDate, Series},
};
use chrono::Duration;

pub const STAGE_NAME: &str = "anomaly_detector";

#[derive(Default)]
pub struct AnomalyDetector;

impl AnomalyDetector {
    pub fn new() -> Self {
        Self
    }

    /// Expected value for `series` on the context date, if any.
    pub fn baseline(ctx: &StageContext<'_>, series: Series) -> GovResult<Option<Baseline>> {
        if let Some(fp) = ctx.store.forecast_for_target(series, ctx.date, ctx.run_id)? {
            return Ok(Some(Baseline {
                expected: fp.predicted,
                sigma:    fp.sigma,
                source:   BaselineSource::Forecast,
            }));
        }
        let days = ctx.config.anomaly.baseline_days;
        let from = ctx.date - Duration::days(i64::from(days));
        let trend = ctx.store.trend(series, from, ctx.date)?;
        Ok(trailing_baseline(&trend, ctx.date, days))
    }

    fn deltas(
        ctx: &StageContext<'_>,
        series: Series,
        from: ScoreDate,
        to: ScoreDate,
    ) -> GovResult<Vec<(ScoreDate, f64)>> {
        Ok(ctx
            .store
            .observations_between(series, from, to)?
            .into_iter()
            .map(|o| (o.date, o.delta_pct))
            .collect())
    }

    fn evaluate_series(
        &self,
        ctx: &StageContext<'_>,
        series: Series,
        events: &mut Vec<GovEvent>,
    ) -> GovResult<()> {
        let date = ctx.date;
        let cfg = &ctx.config.anomaly;

        let Some(actual) = ctx.store.score_on(series, date)? else {
            log::debug!("date={date} anomaly: {series} has no score, not evaluated");
            return Ok(());
        };
        let Some(baseline) = Self::baseline(ctx, series)? else {
            log::debug!("date={date} anomaly: {series} has no baseline yet");
            return Ok(());
        };

        let lookback = cfg.sustained_days.saturating_sub(1) as i64;
        let prior = Self::deltas(
            ctx,
            series,
            date - Duration::days(lookback),
            date - Duration::days(1),
        )?;
        let eval = evaluate(date, actual, &baseline, &prior, cfg);

        ctx.store.upsert_observation(&ObservationRow {
            series:          series.name().to_string(),
            date,
            actual,
            expected:        baseline.expected,
            baseline_source: baseline.source.name().to_string(),
            delta_pct:       eval.delta_pct,
            sigma:           baseline.sigma,
            run_id:          ctx.run_id.to_string(),
        })?;
        events.push(GovEvent::DeviationObserved {
            series,
            date,
            delta_pct: eval.delta_pct,
            source: baseline.source,
        });

        let id = anomaly_id(series, date);
        match eval.finding {
            Some((kind, severity)) => {
                let changed = ctx.store.upsert_anomaly(&AnomalyRow {
                    anomaly_id:  id.clone(),
                    series:      series.name().to_string(),
                    date,
                    kind:        kind.name().to_string(),
                    severity:    severity.name().to_string(),
                    delta_pct:   eval.delta_pct,
                    expected:    eval.expected,
                    actual,
                    message:     describe(series, &eval, kind, severity),
                    resolved:    false,
                    resolved_at: None,
                    run_id:      ctx.run_id.to_string(),
                })?;
                if changed {
                    log::info!(
                        "date={date} anomaly: {series} {kind} {severity} ({:+.1}% vs {})",
                        eval.delta_pct,
                        baseline.source.name()
                    );
                    events.push(GovEvent::AnomalyOpened {
                        anomaly_id: id,
                        series,
                        date,
                        kind,
                        severity,
                        delta_pct: eval.delta_pct,
                    });
                }
            }
            None => {
                if ctx.store.withdraw_open_anomaly(&id, ctx.run_id)? {
                    events.push(GovEvent::AnomalyWithdrawn { anomaly_id: id, series, date });
                }
            }
        }

        for open in ctx.store.open_anomalies_before(series, date)? {
            let later = Self::deltas(ctx, series, open.date + Duration::days(1), date)?;
            let Some(resolved_on) = resolution_date(open.date, &later, cfg) else {
                continue;
            };
            if ctx.store.resolve_anomaly(&open.anomaly_id, resolved_on, ctx.run_id)? {
                log::info!("date={date} anomaly: {} resolved on {resolved_on}", open.anomaly_id);
                events.push(GovEvent::AnomalyResolved {
                    anomaly_id: open.anomaly_id,
                    series,
                    date: open.date,
                    resolved_on,
                });
            }
        }
        Ok(())
    }
}

impl GovStage for AnomalyDetector {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn run(&mut self, ctx: &StageContext<'_>, _events_in: &[GovEvent]) -> GovResult<Vec<GovEvent>> {
        let mut events = Vec::new();
        for series in Series::ALL {
            ctx.checkpoint(STAGE_NAME)?;
            self.evaluate_series(ctx, series, &mut events)?;
        }
        Ok(events)
    }
}
