//! Insight generator stage: turns the current anomaly picture and today's
//! band transitions into localized sentences.
//!
//! Execution order: last stage of every daily run.
//!
//! The whole current insight set is rebuilt each run and swapped in one
//! transaction; earlier rows remain, flagged superseded.

use crate::{
    anomaly::{trailing_baseline, AnomalyKind, Severity},
    error::{GovError, GovResult},
    event::GovEvent,
    insight::{confidence, render, InsightSubject},
    stage::{GovStage, StageContext},
    store::{AnomalyRow, InsightRow},
    types::{Series, ScoreDate},
};
use chrono::Duration;
use uuid::Uuid;

pub const STAGE_NAME: &str = "insight_generator";

#[derive(Default)]
pub struct InsightGenerator;

impl InsightGenerator {
    pub fn new() -> Self {
        Self
    }

    /// σ behind a series' expected value on `date`: the recorded observation
    /// if there is one, else the trailing window, else zero.
    fn sigma_for(ctx: &StageContext<'_>, series: Series, date: ScoreDate) -> GovResult<f64> {
        if let Some(obs) = ctx.store.observation(series, date)? {
            return Ok(obs.sigma);
        }
        let days = ctx.config.anomaly.baseline_days;
        let trend = ctx.store.trend(series, date - Duration::days(i64::from(days)), date)?;
        Ok(trailing_baseline(&trend, date, days).map(|b| b.sigma).unwrap_or(0.0))
    }

    fn parse_anomaly(row: &AnomalyRow) -> GovResult<(Series, AnomalyKind, Severity)> {
        let bad = |what: String| GovError::Other(anyhow::anyhow!("anomaly {}: {what}", row.anomaly_id));
        let series = row.series.parse::<Series>().map_err(bad)?;
        let kind = row.kind.parse::<AnomalyKind>().map_err(bad)?;
        let severity = row.severity.parse::<Severity>().map_err(bad)?;
        Ok((series, kind, severity))
    }

    /// Everything worth a sentence as of the context date.
    fn subjects(ctx: &StageContext<'_>, events_in: &[GovEvent]) -> GovResult<Vec<InsightSubject>> {
        let date = ctx.date;
        let mut subjects = Vec::new();

        for row in ctx.store.anomalies(false)? {
            if row.date > date {
                continue;
            }
            let (series, kind, severity) = Self::parse_anomaly(&row)?;
            subjects.push(InsightSubject::Anomaly {
                series,
                date: row.date,
                kind,
                severity,
                delta_pct: row.delta_pct,
                actual: row.actual,
                expected: row.expected,
            });
        }

        // Read from the store rather than this run's events so a re-run of
        // the date reproduces the same set.
        for row in ctx.store.anomalies(true)? {
            let Some(resolved_on) = row.resolved_at else { continue };
            if resolved_on != date {
                continue;
            }
            let (series, kind, _) = Self::parse_anomaly(&row)?;
            subjects.push(InsightSubject::Resolved { series, date: row.date, kind, resolved_on });
        }

        for event in events_in {
            if let GovEvent::BandChanged { series, date, from, to, previous_score, score, .. } = event {
                subjects.push(InsightSubject::BandChange {
                    series:         *series,
                    date:           *date,
                    from:           *from,
                    to:             *to,
                    previous_score: *previous_score,
                    score:          *score,
                });
            }
        }
        Ok(subjects)
    }
}

impl GovStage for InsightGenerator {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn run(&mut self, ctx: &StageContext<'_>, events_in: &[GovEvent]) -> GovResult<Vec<GovEvent>> {
        let date = ctx.date;
        let cfg = &ctx.config.insight;
        let subjects = Self::subjects(ctx, events_in)?;

        let mut rows = Vec::with_capacity(subjects.len() * cfg.locales.len());
        for subject in &subjects {
            let sigma = Self::sigma_for(ctx, subject.series(), subject.date())?;
            let conf = confidence(sigma, cfg.sigma_scale);
            for locale in &cfg.locales {
                rows.push(InsightRow {
                    insight_id: format!("INS-{}", Uuid::new_v4().simple()),
                    series:     subject.series().name().to_string(),
                    date:       subject.date(),
                    kind:       subject.kind().name().to_string(),
                    confidence: conf,
                    text:       render(subject, conf, *locale),
                    locale:     locale.code().to_string(),
                    superseded: false,
                    run_id:     ctx.run_id.to_string(),
                });
            }
        }

        ctx.checkpoint(STAGE_NAME)?;
        let superseded = ctx.store.replace_current_insights(&rows, ctx.run_id, ctx.clock.now())?;

        log::info!(
            "date={date} insight_generator: {} insights ({} subjects, {superseded} superseded)",
            rows.len(),
            subjects.len()
        );
        Ok(vec![GovEvent::InsightsGenerated { date, count: rows.len(), superseded }])
    }
}
