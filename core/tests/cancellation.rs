//! Cancelled and failed runs keep their rows tagged with the run id until
//! purged; purging puts back the row versions the run replaced.

use chrono::{Duration, NaiveDate};
use governance_core::{
    anomaly_stage::AnomalyDetector,
    clock::{CancelToken, SystemClock},
    collector::{CollectorSet, StaticCollector},
    config::EngineConfig,
    engine::GovEngine,
    error::{GovError, GovResult},
    event::GovEvent,
    forecast_stage::Forecaster,
    insight_stage::InsightGenerator,
    recorder_stage::ScoreRecorder,
    stage::{GovStage, StageContext},
    store::{ForecastPointRow, GovStore},
    types::{Pillar, ScoreDate, Series},
};
use std::sync::Arc;

fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 1).unwrap() + Duration::days(n - 1)
}

/// Fires the token when the run reaches it on the chosen date, after
/// letting `skip` earlier visits of that date through.
struct CancelOn {
    date:  ScoreDate,
    token: CancelToken,
    skip:  usize,
}

impl GovStage for CancelOn {
    fn name(&self) -> &'static str {
        "cancel_on"
    }

    fn run(&mut self, ctx: &StageContext<'_>, _events_in: &[GovEvent]) -> GovResult<Vec<GovEvent>> {
        if ctx.date == self.date {
            if self.skip == 0 {
                self.token.cancel();
            } else {
                self.skip -= 1;
            }
        }
        Ok(Vec::new())
    }
}

/// Errors out on the chosen date, leaving the run `failed`.
struct FailOn {
    date: ScoreDate,
}

impl GovStage for FailOn {
    fn name(&self) -> &'static str {
        "fail_on"
    }

    fn run(&mut self, ctx: &StageContext<'_>, _events_in: &[GovEvent]) -> GovResult<Vec<GovEvent>> {
        if ctx.date == self.date {
            return Err(GovError::InvalidConfig("downstream export rejected the run".into()));
        }
        Ok(Vec::new())
    }
}

/// The standard pipeline with `extra` inserted after the first `after` stages.
fn pipeline(collector: Arc<StaticCollector>, extra: Box<dyn GovStage>, after: usize) -> GovEngine {
    let config = EngineConfig::default_test();
    let timeout = std::time::Duration::from_millis(config.collector.timeout_ms);
    let store = GovStore::in_memory().unwrap();
    store.migrate().unwrap();
    let mut engine = GovEngine::new(config, store, Arc::new(SystemClock));

    let standard: Vec<Box<dyn GovStage>> = vec![
        Box::new(ScoreRecorder::new(CollectorSet::uniform(collector, timeout))),
        Box::new(Forecaster::new()),
        Box::new(AnomalyDetector::new()),
        Box::new(InsightGenerator::new()),
    ];
    let mut extra = Some(extra);
    for (i, stage) in standard.into_iter().enumerate() {
        if i == after {
            if let Some(extra) = extra.take() {
                engine.register(extra);
            }
        }
        engine.register(stage);
    }
    if let Some(extra) = extra {
        engine.register(extra);
    }
    engine
}

/// Cancels after the recorder, or after the anomaly detector.
fn engine_cancelling(
    collector: Arc<StaticCollector>,
    on: ScoreDate,
    token: &CancelToken,
    after_anomalies: bool,
) -> GovEngine {
    engine_cancelling_rerun(collector, on, 0, token, after_anomalies)
}

fn engine_cancelling_rerun(
    collector: Arc<StaticCollector>,
    on: ScoreDate,
    skip: usize,
    token: &CancelToken,
    after_anomalies: bool,
) -> GovEngine {
    let cancel = Box::new(CancelOn { date: on, token: token.clone(), skip });
    pipeline(collector, cancel, if after_anomalies { 3 } else { 1 })
}

#[test]
fn cancelled_run_is_marked_and_its_rows_are_purged() {
    let collector = Arc::new(StaticCollector::new());
    for n in 1..=4 {
        collector.set_day(day(n), [Some(80.0 + n as f64); 4]);
    }
    let token = CancelToken::new();
    let mut engine = engine_cancelling(collector, day(4), &token, false);
    engine.run_range(day(1), day(3)).unwrap();

    let err = engine.run_daily_with_cancel(day(4), &token).unwrap_err();
    let GovError::Cancelled { run_id, stage } = err else {
        panic!("expected Cancelled, got {err:?}");
    };
    assert_eq!(stage, "forecaster");

    let store = engine.store();
    assert_eq!(store.get_run(&run_id).unwrap().unwrap().status, "cancelled");
    let partial = store.pillar_scores_for_date(day(4)).unwrap();
    assert_eq!(partial.len(), 4);
    assert!(partial.iter().all(|r| r.run_id == run_id));
    assert!(store.forecasts_for_run(&run_id).unwrap().is_empty());

    let report = engine.purge_run(&run_id).unwrap();
    assert_eq!(report.pillar_scores, 4);
    assert_eq!(report.composite_scores, 1);

    let store = engine.store();
    assert!(store.pillar_scores_for_date(day(4)).unwrap().is_empty());
    assert!(store.composite_for_date(day(4)).unwrap().is_none());
    assert_eq!(store.pillar_scores_for_date(day(3)).unwrap().len(), 4);
    assert!(store.events_for_run(&run_id).unwrap().is_empty());
    assert_eq!(store.get_run(&run_id).unwrap().unwrap().status, "purged");
}

#[test]
fn purge_reopens_anomalies_the_cancelled_run_resolved() {
    let collector = Arc::new(StaticCollector::new());
    for n in 1..=8 {
        collector.set_day(day(n), [Some(80.0); 4]);
    }
    collector.set_day(day(9), [Some(60.0), Some(80.0), Some(80.0), Some(80.0)]);
    collector.set_day(day(10), [Some(80.0); 4]);
    collector.set_day(day(11), [Some(80.0); 4]);

    let token = CancelToken::new();
    let mut engine = engine_cancelling(collector, day(11), &token, true);
    engine.run_range(day(1), day(10)).unwrap();

    let err = engine.run_daily_with_cancel(day(11), &token).unwrap_err();
    let GovError::Cancelled { run_id, stage } = err else {
        panic!("expected Cancelled, got {err:?}");
    };
    assert_eq!(stage, "insight_generator");

    let id = format!("ANOM-finance-{}", day(9).format("%Y-%m-%d"));
    assert!(engine.store().get_anomaly(&id).unwrap().unwrap().resolved);

    let report = engine.purge_run(&run_id).unwrap();
    assert!(report.reopened >= 1);
    let reopened = engine.store().get_anomaly(&id).unwrap().unwrap();
    assert!(!reopened.resolved);
    assert_eq!(reopened.resolved_at, None);
}

#[test]
fn completed_runs_cannot_be_purged() {
    let collector = Arc::new(StaticCollector::new());
    collector.set_day(day(1), [Some(80.0); 4]);
    let mut engine = GovEngine::build_test(collector).unwrap();
    let report = engine.run_daily(day(1)).unwrap();

    assert!(matches!(
        engine.purge_run(&report.run_id),
        Err(GovError::RunNotPurgeable { .. })
    ));
    assert!(matches!(engine.purge_run("daily-nope"), Err(GovError::RunNotFound(_))));
}

#[test]
fn token_cancelled_up_front_writes_nothing() {
    let collector = Arc::new(StaticCollector::new());
    collector.set_day(day(1), [Some(80.0); 4]);
    let mut engine = GovEngine::build_test(collector).unwrap();
    let token = CancelToken::new();
    token.cancel();

    let err = engine.run_daily_with_cancel(day(1), &token).unwrap_err();

    assert!(matches!(err, GovError::Cancelled { stage: "recorder", .. }));
    assert!(engine.store().pillar_scores_for_date(day(1)).unwrap().is_empty());
}

#[test]
fn forecasts_from_cancelled_runs_are_not_used_as_expected_values() {
    let collector = Arc::new(StaticCollector::new());
    for n in 1..=3 {
        collector.set_day(day(n), [Some(80.0); 4]);
    }
    let token = CancelToken::new();
    let mut engine = engine_cancelling(collector, day(3), &token, true);
    engine.run_range(day(1), day(2)).unwrap();
    assert!(engine.run_daily_with_cancel(day(3), &token).is_err());

    // The cancelled day-3 run forecast day 10; nothing completed did.
    let store = engine.store();
    let target = day(3) + Duration::days(7);
    assert!(store
        .forecast_for_target(Series::Composite, target, "daily-later-run")
        .unwrap()
        .is_none());
}

#[test]
fn purging_a_cancelled_rerun_restores_the_completed_scores() {
    let collector = Arc::new(StaticCollector::new());
    for n in 1..=3 {
        collector.set_day(day(n), [Some(80.0); 4]);
    }
    let token = CancelToken::new();
    let mut engine = engine_cancelling_rerun(collector.clone(), day(2), 1, &token, false);
    let reports = engine.run_range(day(1), day(3)).unwrap();
    let completed = reports[1].run_id.clone();

    collector.set_day(day(2), [Some(70.0); 4]);
    let err = engine.run_daily_with_cancel(day(2), &token).unwrap_err();
    let GovError::Cancelled { run_id, .. } = err else {
        panic!("expected Cancelled, got {err:?}");
    };
    let overwritten = engine.store().pillar_scores_for_date(day(2)).unwrap();
    assert!(overwritten.iter().all(|r| r.score == 70.0 && r.run_id == run_id));

    let report = engine.purge_run(&run_id).unwrap();
    assert_eq!(report.pillar_scores, 4);
    assert_eq!(report.composite_scores, 1);
    assert_eq!(report.restored, 5);

    let store = engine.store();
    let restored = store.pillar_scores_for_date(day(2)).unwrap();
    assert_eq!(restored.len(), 4);
    assert!(restored.iter().all(|r| r.score == 80.0 && r.run_id == completed));
    let composite = store.composite_for_date(day(2)).unwrap().expect("composite restored");
    assert_eq!(composite.score, 80.0);
    assert_eq!(composite.run_id, completed);
    assert_eq!(store.trend(Series::Composite, day(1), day(3)).unwrap().len(), 3);
}

#[test]
fn purging_a_cancelled_rerun_brings_back_a_withdrawn_anomaly() {
    let collector = Arc::new(StaticCollector::new());
    for n in 1..=8 {
        collector.set_day(day(n), [Some(80.0); 4]);
    }
    collector.set_day(day(9), [Some(60.0), Some(80.0), Some(80.0), Some(80.0)]);
    let token = CancelToken::new();
    let mut engine = engine_cancelling_rerun(collector.clone(), day(9), 1, &token, true);
    let reports = engine.run_range(day(1), day(9)).unwrap();
    let completed = reports[8].run_id.clone();

    let id = format!("ANOM-finance-{}", day(9).format("%Y-%m-%d"));
    assert_eq!(engine.store().get_anomaly(&id).unwrap().unwrap().run_id, completed);

    // A re-run with corrected figures withdraws it, then is cancelled.
    collector.set_day(day(9), [Some(80.0); 4]);
    let err = engine.run_daily_with_cancel(day(9), &token).unwrap_err();
    let GovError::Cancelled { run_id, stage } = err else {
        panic!("expected Cancelled, got {err:?}");
    };
    assert_eq!(stage, "insight_generator");
    assert!(engine.store().get_anomaly(&id).unwrap().is_none());

    engine.purge_run(&run_id).unwrap();

    let store = engine.store();
    let anomaly = store.get_anomaly(&id).unwrap().expect("anomaly restored");
    assert_eq!(anomaly.run_id, completed);
    assert!(!anomaly.resolved);
    assert_eq!(store.score_on(Series::Pillar(Pillar::Finance), day(9)).unwrap(), Some(60.0));
    let obs = store
        .observation(Series::Pillar(Pillar::Finance), day(9))
        .unwrap()
        .expect("observation restored");
    assert_eq!(obs.actual, 60.0);
    assert_eq!(obs.run_id, completed);
}

#[test]
fn purging_a_failed_run_makes_the_previous_insights_current_again() {
    let collector = Arc::new(StaticCollector::new());
    for n in 1..=8 {
        collector.set_day(day(n), [Some(80.0); 4]);
    }
    collector.set_day(day(9), [Some(60.0), Some(80.0), Some(80.0), Some(80.0)]);
    collector.set_day(day(10), [Some(80.0); 4]);
    let mut engine = pipeline(collector, Box::new(FailOn { date: day(10) }), 4);
    engine.run_range(day(1), day(9)).unwrap();
    let mut before: Vec<String> = engine
        .store()
        .current_insights("en")
        .unwrap()
        .into_iter()
        .map(|i| i.insight_id)
        .collect();
    before.sort();
    assert!(!before.is_empty());

    assert!(engine.run_daily(day(10)).is_err());
    let failed = engine
        .store()
        .current_insights("en")
        .unwrap()
        .first()
        .map(|i| i.run_id.clone())
        .expect("failed run swapped in its insights");
    assert_eq!(engine.store().get_run(&failed).unwrap().unwrap().status, "failed");

    let report = engine.purge_run(&failed).unwrap();
    assert!(report.insights > 0);

    let mut after: Vec<String> = engine
        .store()
        .current_insights("en")
        .unwrap()
        .into_iter()
        .map(|i| i.insight_id)
        .collect();
    after.sort();
    assert_eq!(after, before);
}

#[test]
fn purging_overlapping_failed_runs_in_either_order_restores_the_original() {
    let store = GovStore::in_memory().unwrap();
    store.migrate().unwrap();
    let now = chrono::Utc::now();
    let write = |run_id: &str, score: f64, status: &str| {
        store.insert_run(run_id, "daily", day(1), now).unwrap();
        store.upsert_pillar_score(day(1), Pillar::Menu, score, now, run_id).unwrap();
        store.finish_run(run_id, status, now, None).unwrap();
    };
    write("daily-a", 80.0, "completed");
    write("daily-x", 70.0, "failed");
    write("daily-y", 60.0, "failed");

    // Older failure first: the newer one still holds the current row.
    store.purge_run("daily-x").unwrap();
    assert_eq!(store.score_on(Series::Pillar(Pillar::Menu), day(1)).unwrap(), Some(60.0));

    store.purge_run("daily-y").unwrap();
    let rows = store.pillar_scores_for_date(day(1)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].score, 80.0);
    assert_eq!(rows[0].run_id, "daily-a");
}

#[test]
fn completing_a_run_makes_its_overwrites_final() {
    let store = GovStore::in_memory().unwrap();
    store.migrate().unwrap();
    let now = chrono::Utc::now();
    for (run_id, score, status) in [("daily-a", 80.0, "completed"), ("daily-b", 75.0, "completed")] {
        store.insert_run(run_id, "daily", day(1), now).unwrap();
        store.upsert_pillar_score(day(1), Pillar::Ai, score, now, run_id).unwrap();
        store.finish_run(run_id, status, now, None).unwrap();
    }
    store.insert_run("daily-c", "daily", day(1), now).unwrap();
    store.upsert_pillar_score(day(1), Pillar::Ai, 50.0, now, "daily-c").unwrap();
    store.finish_run("daily-c", "cancelled", now, None).unwrap();

    let report = store.purge_run("daily-c").unwrap();

    assert_eq!(report.restored, 1);
    let rows = store.pillar_scores_for_date(day(1)).unwrap();
    assert_eq!((rows[0].score, rows[0].run_id.as_str()), (75.0, "daily-b"));
}

#[test]
fn stale_running_forecasts_are_ignored_unless_they_belong_to_the_current_run() {
    let store = GovStore::in_memory().unwrap();
    store.migrate().unwrap();
    let now = chrono::Utc::now();
    let point = |run_id: &str, predicted: f64| ForecastPointRow {
        series:       "composite".into(),
        as_of_date:   day(1),
        horizon_days: 7,
        target_date:  day(8),
        predicted,
        lower_bound:  predicted - 2.0,
        upper_bound:  predicted + 2.0,
        sigma:        1.0,
        method:       "ses".into(),
        run_id:       run_id.to_string(),
    };
    // A run that crashed mid-way never reached a terminal status.
    store.insert_run("daily-crashed", "daily", day(1), now).unwrap();
    store.insert_forecast_point(&point("daily-crashed", 55.0)).unwrap();

    assert!(store.forecast_for_target(Series::Composite, day(8), "daily-now").unwrap().is_none());
    let own = store
        .forecast_for_target(Series::Composite, day(8), "daily-crashed")
        .unwrap()
        .expect("a run sees its own forecasts");
    assert_eq!(own.predicted, 55.0);

    store.insert_run("daily-done", "daily", day(1), now).unwrap();
    store.insert_forecast_point(&point("daily-done", 81.0)).unwrap();
    store.finish_run("daily-done", "completed", now, None).unwrap();
    let used = store
        .forecast_for_target(Series::Composite, day(8), "daily-now")
        .unwrap()
        .expect("completed forecast");
    assert_eq!(used.run_id, "daily-done");
}
