//! Score recorder: collects the four pillars for a date, upserts them, and
//! derives the composite from what is persisted for that date.
//!
//! Execution order: first stage of every daily run.
//!
//! Design:
//!   - Available readings are upserted; unavailable ones leave any earlier
//!     row for that date in place (a failing collector never erases data)
//!     and emit PillarDegraded.
//!   - The composite is a pure function of the persisted rows for the date,
//!     so it is identical however many times the date is recomputed.
//!   - Band transitions against each series' previous recorded day are
//!     emitted here as BandChanged for the insight generator.

use crate::{
    collector::{CollectorSet, PillarReading},
    composite::{compose, CompositeOutcome},
    config::EngineConfig,
    error::GovResult,
    event::GovEvent,
    stage::{GovStage, StageContext},
    store::GovStore,
    types::{Pillar, ScoreDate, Series},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STAGE_NAME: &str = "recorder";

/// What a daily recompute produced. `None` means unavailable, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyScores {
    pub as_of:     ScoreDate,
    pub pillars:   BTreeMap<Pillar, Option<f64>>,
    pub composite: Option<CompositeOutcome>,
}

impl DailyScores {
    pub fn degraded(&self) -> bool {
        self.composite.as_ref().map(|c| c.degraded).unwrap_or(true)
    }
}

pub struct ScoreRecorder {
    collectors: CollectorSet,
}

impl ScoreRecorder {
    pub fn new(collectors: CollectorSet) -> Self {
        Self { collectors }
    }

    /// Read back what is persisted for a date.
    pub fn scores_for(
        store: &GovStore,
        config: &EngineConfig,
        date: ScoreDate,
    ) -> GovResult<DailyScores> {
        let present = store.present_pillars(date)?;
        let pillars = Pillar::ALL
            .iter()
            .map(|p| (*p, present.iter().find(|(q, _)| q == p).map(|(_, s)| *s)))
            .collect();
        let composite = compose(&config.weights, &config.bands, &present);
        Ok(DailyScores { as_of: date, pillars, composite })
    }

    fn band_change(
        ctx: &StageContext<'_>,
        series: Series,
        score: f64,
    ) -> GovResult<Option<GovEvent>> {
        let Some(prev) = ctx.store.previous_point(series, ctx.date)? else {
            return Ok(None);
        };
        let bands = &ctx.config.bands;
        let (from, to) = (bands.classify(prev.score), bands.classify(score));
        if from == to {
            return Ok(None);
        }
        Ok(Some(GovEvent::BandChanged {
            series,
            date: ctx.date,
            previous_date: prev.date,
            from,
            to,
            previous_score: prev.score,
            score,
        }))
    }
}

impl GovStage for ScoreRecorder {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn run(&mut self, ctx: &StageContext<'_>, _events_in: &[GovEvent]) -> GovResult<Vec<GovEvent>> {
        let date = ctx.date;
        let now = ctx.clock.now();
        let mut events = Vec::new();

        let readings = self.collectors.collect(date);

        for pillar in Pillar::ALL {
            match readings.get(pillar) {
                PillarReading::Available { score } => {
                    let changed =
                        ctx.store.upsert_pillar_score(date, pillar, *score, now, ctx.run_id)?;
                    events.push(GovEvent::PillarScored { date, pillar, score: *score, changed });
                }
                PillarReading::Unavailable { why } => {
                    events.push(GovEvent::PillarDegraded { date, pillar, reason: why.clone() });
                }
            }
        }

        let scores = Self::scores_for(ctx.store, ctx.config, date)?;

        match &scores.composite {
            Some(outcome) => {
                let changed = ctx.store.upsert_composite_score(date, outcome, now, ctx.run_id)?;
                events.push(GovEvent::CompositeScored {
                    date,
                    score: outcome.score,
                    status: outcome.status,
                    degraded: outcome.degraded,
                    changed,
                });
            }
            None => {
                log::warn!("date={date} recorder: no pillar available, composite not recorded");
                events.push(GovEvent::CompositeUnavailable { date });
            }
        }

        for series in Series::ALL {
            let score = match series {
                Series::Pillar(p) => scores.pillars.get(&p).copied().flatten(),
                Series::Composite => scores.composite.as_ref().map(|c| c.score),
            };
            if let Some(score) = score {
                if let Some(event) = Self::band_change(ctx, series, score)? {
                    events.push(event);
                }
            }
        }

        log::info!(
            "date={date} recorder: {} of 4 pillars, composite={}",
            scores.pillars.values().filter(|s| s.is_some()).count(),
            scores
                .composite
                .as_ref()
                .map(|c| format!("{:.2} ({})", c.score, c.status))
                .unwrap_or_else(|| "unavailable".into()),
        );

        Ok(events)
    }
}
