//! Forecaster stage: fits every series' trailing window and persists the
//! multi-horizon points under the current run id.
//!
//! Execution order: after the score recorder, so the as-of date's scores
//! are already in the trend it reads.
//!
//! Reads happen on the batch thread; the pure fits fan out one scoped thread
//! per series over owned window snapshots; writes return to the batch thread.

use crate::{
    config::ForecastMethod,
    error::{GovError, GovResult},
    event::GovEvent,
    forecast::{forecast, validate_horizons, window_scores, ForecastParams, HorizonForecast, InsufficientData},
    stage::{GovStage, StageContext},
    store::{ForecastPointRow, GovStore},
    types::{ScoreDate, Series},
};
use chrono::Duration;
use std::thread;

pub const STAGE_NAME: &str = "forecaster";

type SeriesOutcome = (Series, Result<Vec<HorizonForecast>, InsufficientData>);

#[derive(Default)]
pub struct Forecaster {
    horizons: Option<Vec<u32>>,
    method:   Option<ForecastMethod>,
}

impl Forecaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the configured horizons (on-demand recompute).
    pub fn with_horizons(mut self, horizons: Vec<u32>) -> Self {
        self.horizons = Some(horizons);
        self
    }

    pub fn with_method(mut self, method: ForecastMethod) -> Self {
        self.method = Some(method);
        self
    }

    fn settings(&self, ctx: &StageContext<'_>) -> GovResult<(ForecastParams, Vec<u32>)> {
        let cfg = &ctx.config.forecast;
        let mut params = ForecastParams::from_config(cfg)?;
        if let Some(method) = self.method {
            params = params.with_method(method);
        }
        let horizons = self.horizons.clone().unwrap_or_else(|| cfg.horizons.clone());
        validate_horizons(&horizons)?;
        Ok((params, horizons))
    }
}

/// Window scores for one series ending at `as_of`.
pub fn read_window(
    store: &GovStore,
    series: Series,
    as_of: ScoreDate,
    window_days: u32,
) -> GovResult<Vec<f64>> {
    let from = as_of - Duration::days(i64::from(window_days.saturating_sub(1)));
    let trend = store.trend(series, from, as_of)?;
    Ok(window_scores(&trend, as_of, window_days))
}

fn fit_all(
    windows: Vec<(Series, Vec<f64>)>,
    params: &ForecastParams,
    horizons: &[u32],
) -> GovResult<Vec<SeriesOutcome>> {
    thread::scope(|s| {
        let handles: Vec<_> = windows
            .iter()
            .map(|(series, scores)| {
                s.spawn(move || (*series, forecast(scores, params, horizons)))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .map_err(|_| GovError::Other(anyhow::anyhow!("forecast worker panicked")))
            })
            .collect()
    })
}

impl GovStage for Forecaster {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn run(&mut self, ctx: &StageContext<'_>, _events_in: &[GovEvent]) -> GovResult<Vec<GovEvent>> {
        let as_of = ctx.date;
        let (params, horizons) = self.settings(ctx)?;
        let window_days = ctx.config.forecast.window_days;

        let mut windows = Vec::with_capacity(Series::ALL.len());
        for series in Series::ALL {
            windows.push((series, read_window(ctx.store, series, as_of, window_days)?));
        }

        let outcomes = fit_all(windows, &params, &horizons)?;

        let mut events = Vec::new();
        let mut written = 0usize;
        for (series, outcome) in outcomes {
            ctx.checkpoint(STAGE_NAME)?;
            match outcome {
                Ok(points) => {
                    let sigma = points.first().map(|p| p.sigma).unwrap_or(0.0);
                    for p in &points {
                        ctx.store.insert_forecast_point(&ForecastPointRow {
                            series:       series.name().to_string(),
                            as_of_date:   as_of,
                            horizon_days: p.horizon_days,
                            target_date:  as_of + Duration::days(i64::from(p.horizon_days)),
                            predicted:    p.predicted,
                            lower_bound:  p.lower,
                            upper_bound:  p.upper,
                            sigma:        p.sigma,
                            method:       params.method.name().to_string(),
                            run_id:       ctx.run_id.to_string(),
                        })?;
                    }
                    written += points.len();
                    events.push(GovEvent::ForecastGenerated {
                        series,
                        as_of,
                        points: points.len(),
                        sigma,
                    });
                }
                Err(InsufficientData { required, available }) => {
                    log::debug!(
                        "date={as_of} forecaster: {series} skipped, {available} of {required} points"
                    );
                    events.push(GovEvent::ForecastSkipped { series, as_of, required, available });
                }
            }
        }

        log::info!(
            "date={as_of} forecaster: {written} points ({} horizons, method={})",
            horizons.len(),
            params.method.name()
        );
        Ok(events)
    }
}
