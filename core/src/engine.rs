//! The batch engine: runs the intelligence pipeline for one date at a time.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Score recorder     (collect pillars, upsert scores, composite, bands)
//!   2. Forecaster         (fit trailing windows, persist horizons)
//!   3. Anomaly detector   (actual vs expected, open / withdraw / resolve)
//!   4. Insight generator  (localized sentences, supersede the previous set)
//!
//! RULES:
//!   - Stages execute in registration order, once per run.
//!   - Scores for a date are recorded before anything reads that date.
//!   - No stage calls another stage's functions directly.
//!   - Every row a run writes carries its run_id; every event is logged.
//!   - A cancelled or failed run stays visible until purge_run removes it.

use crate::{
    clock::{BatchClock, CancelToken, SystemClock},
    collector::{CollectorSet, MetricCollector},
    config::{EngineConfig, ForecastMethod},
    error::{GovError, GovResult},
    event::{EventLogEntry, GovEvent},
    forecast::{forecast, validate_horizons, ForecastParams, HorizonForecast},
    forecast_stage::{read_window, Forecaster},
    anomaly_stage::AnomalyDetector,
    insight_stage::InsightGenerator,
    recorder_stage::{DailyScores, ScoreRecorder},
    stage::{GovStage, StageContext},
    store::{GovStore, PurgeReport},
    types::{format_date, RunId, ScoreDate, Series},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const ENGINE_STAGE: &str = "engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Daily,
    Forecast,
}

impl RunKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Daily    => "daily",
            Self::Forecast => "forecast",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRunReport {
    pub run_id: RunId,
    pub scores: DailyScores,
    pub events: Vec<GovEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRunReport {
    pub run_id:          RunId,
    pub as_of:           ScoreDate,
    pub forecast_count:  usize,
    pub runtime_seconds: f64,
}

/// A forecast computed on request and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedForecast {
    pub series: Series,
    pub as_of:  ScoreDate,
    pub method: ForecastMethod,
    pub points: Vec<HorizonForecast>,
}

pub struct GovEngine {
    config: EngineConfig,
    store:  GovStore,
    clock:  Arc<dyn BatchClock>,
    stages: Vec<Box<dyn GovStage>>,
}

impl GovEngine {
    pub fn new(config: EngineConfig, store: GovStore, clock: Arc<dyn BatchClock>) -> Self {
        Self { config, store, clock, stages: Vec::new() }
    }

    /// Build a fully wired engine with every stage registered.
    /// Call this instead of new() + manual register() calls.
    pub fn build(
        config: EngineConfig,
        store: GovStore,
        collectors: CollectorSet,
        clock: Arc<dyn BatchClock>,
    ) -> GovResult<Self> {
        config.validate()?;
        store.migrate()?;
        let mut engine = Self::new(config, store, clock);

        // EXECUTION ORDER: fixed, documented, never reordered.
        engine.register(Box::new(ScoreRecorder::new(collectors)));
        engine.register(Box::new(Forecaster::new()));
        engine.register(Box::new(AnomalyDetector::new()));
        engine.register(Box::new(InsightGenerator::new()));
        Ok(engine)
    }

    /// In-memory engine over one collector for every pillar, test config.
    pub fn build_test(collector: Arc<dyn MetricCollector>) -> GovResult<Self> {
        let config = EngineConfig::default_test();
        let timeout = std::time::Duration::from_millis(config.collector.timeout_ms);
        let collectors = CollectorSet::uniform(collector, timeout)
            .with_max_outstanding(config.collector.max_outstanding);
        Self::build(
            config,
            GovStore::in_memory()?,
            collectors,
            Arc::new(SystemClock),
        )
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, stage: Box<dyn GovStage>) {
        self.stages.push(stage);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &GovStore {
        &self.store
    }

    pub fn today(&self) -> ScoreDate {
        self.clock.today()
    }

    /// Recompute one date end to end.
    pub fn run_daily(&mut self, date: ScoreDate) -> GovResult<DailyRunReport> {
        self.run_daily_with_cancel(date, &CancelToken::new())
    }

    /// As run_daily, aborting at the next checkpoint once `cancel` fires.
    /// A cancelled run returns `Cancelled` carrying its run id.
    pub fn run_daily_with_cancel(
        &mut self,
        date: ScoreDate,
        cancel: &CancelToken,
    ) -> GovResult<DailyRunReport> {
        let mut stages = std::mem::take(&mut self.stages);
        let outcome = self.execute(RunKind::Daily, date, &mut stages, cancel);
        self.stages = stages;

        let (run_id, events) = outcome?;
        let scores = ScoreRecorder::scores_for(&self.store, &self.config, date)?;
        Ok(DailyRunReport { run_id, scores, events })
    }

    /// Backfill every date in [from, to], in order.
    pub fn run_range(&mut self, from: ScoreDate, to: ScoreDate) -> GovResult<Vec<DailyRunReport>> {
        if from > to {
            return Err(GovError::InvalidRange(format!(
                "run range {} > {}",
                format_date(from),
                format_date(to)
            )));
        }
        let mut reports = Vec::new();
        let mut date = from;
        while date <= to {
            reports.push(self.run_daily(date)?);
            date += Duration::days(1);
        }
        Ok(reports)
    }

    /// Refit every series at the latest recorded date as a standalone
    /// `forecast` run. `None` falls back to the configured value.
    pub fn recompute_forecasts(
        &mut self,
        horizons: Option<Vec<u32>>,
        method: Option<ForecastMethod>,
    ) -> GovResult<ForecastRunReport> {
        if let Some(h) = &horizons {
            validate_horizons(h)?;
        }
        let as_of = self.latest_date()?;

        let mut forecaster = Forecaster::new();
        if let Some(h) = horizons {
            forecaster = forecaster.with_horizons(h);
        }
        if let Some(m) = method {
            forecaster = forecaster.with_method(m);
        }
        let mut stages: Vec<Box<dyn GovStage>> = vec![Box::new(forecaster)];

        let started = Instant::now();
        let (run_id, _) = self.execute(RunKind::Forecast, as_of, &mut stages, &CancelToken::new())?;
        let forecast_count = self.store.forecasts_for_run(&run_id)?.len();

        Ok(ForecastRunReport {
            run_id,
            as_of,
            forecast_count,
            runtime_seconds: started.elapsed().as_secs_f64(),
        })
    }

    /// What the forecaster would produce right now, without writing.
    pub fn simulate_forecast(
        &self,
        series: Series,
        horizons: Option<Vec<u32>>,
        method: Option<ForecastMethod>,
    ) -> GovResult<SimulatedForecast> {
        let cfg = &self.config.forecast;
        let mut params = ForecastParams::from_config(cfg)?;
        if let Some(m) = method {
            params = params.with_method(m);
        }
        let horizons = horizons.unwrap_or_else(|| cfg.horizons.clone());
        validate_horizons(&horizons)?;

        let as_of = self.latest_date()?;
        let window = read_window(&self.store, series, as_of, cfg.window_days)?;
        let points = forecast(&window, &params, &horizons).map_err(|e| {
            GovError::InsufficientData {
                series:    series.name().to_string(),
                required:  e.required,
                available: e.available,
            }
        })?;
        Ok(SimulatedForecast { series, as_of, method: params.method, points })
    }

    /// Remove everything a cancelled or failed run wrote.
    pub fn purge_run(&self, run_id: &str) -> GovResult<PurgeReport> {
        self.store.purge_run(run_id)
    }

    fn latest_date(&self) -> GovResult<ScoreDate> {
        self.store.latest_score_date()?.ok_or_else(|| GovError::InsufficientData {
            series:    "composite".into(),
            required:  self.config.forecast.min_points,
            available: 0,
        })
    }

    fn new_run_id(kind: RunKind, date: ScoreDate) -> RunId {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", kind.name(), format_date(date), &suffix[..8])
    }

    fn log_event(&self, run_id: &str, date: ScoreDate, stage: &str, event: &GovEvent) -> GovResult<()> {
        self.store.append_event(&EventLogEntry {
            id:         None,
            run_id:     run_id.to_string(),
            date,
            stage:      stage.to_string(),
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
        })
    }

    /// One run: insert the run row, drive the stages, close the run row.
    fn execute(
        &self,
        kind: RunKind,
        date: ScoreDate,
        stages: &mut [Box<dyn GovStage>],
        cancel: &CancelToken,
    ) -> GovResult<(RunId, Vec<GovEvent>)> {
        let run_id = Self::new_run_id(kind, date);
        self.store.insert_run(&run_id, kind.name(), date, self.clock.now())?;

        let started = GovEvent::RunStarted {
            run_id: run_id.clone(),
            kind:   kind.name().to_string(),
            as_of:  date,
        };
        self.log_event(&run_id, date, ENGINE_STAGE, &started)?;
        let mut events = vec![started];

        let ctx = StageContext {
            run_id: &run_id,
            date,
            config: &self.config,
            store:  &self.store,
            clock:  self.clock.as_ref(),
            cancel,
        };

        for stage in stages.iter_mut() {
            // Each stage sees everything emitted so far this run.
            let result = ctx
                .checkpoint(stage.name())
                .and_then(|_| stage.run(&ctx, &events));

            let new_events = match result {
                Ok(new_events) => new_events,
                Err(GovError::Cancelled { run_id: id, stage: at }) => {
                    log::warn!("date={date} engine: run {id} cancelled during {at}");
                    let cancelled = GovEvent::RunCancelled {
                        run_id: id.clone(),
                        as_of:  date,
                        stage:  at.to_string(),
                    };
                    self.log_event(&id, date, ENGINE_STAGE, &cancelled)?;
                    self.store.finish_run(&id, "cancelled", self.clock.now(), Some(at))?;
                    return Err(GovError::Cancelled { run_id: id, stage: at });
                }
                Err(e) => {
                    log::error!("date={date} engine: run {run_id} failed in {}: {e}", stage.name());
                    let note = format!("{}: {e}", stage.name());
                    self.store.finish_run(&run_id, "failed", self.clock.now(), Some(&note))?;
                    return Err(e);
                }
            };

            for event in &new_events {
                self.log_event(&run_id, date, stage.name(), event)?;
            }
            events.extend(new_events);
        }

        let completed = GovEvent::RunCompleted { run_id: run_id.clone(), as_of: date };
        self.log_event(&run_id, date, ENGINE_STAGE, &completed)?;
        events.push(completed);
        self.store.finish_run(&run_id, "completed", self.clock.now(), None)?;

        log::info!("date={date} engine: {} run {run_id} completed, {} events", kind.name(), events.len());
        Ok((run_id, events))
    }
}
