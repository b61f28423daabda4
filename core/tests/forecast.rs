//! Forecaster: smoothing fits, confidence bands, persistence.

use chrono::{Duration, NaiveDate};
use governance_core::{
    collector::StaticCollector,
    config::ForecastMethod,
    engine::GovEngine,
    error::GovError,
    event::GovEvent,
    forecast::{forecast, ForecastParams, InsufficientData},
    types::{Pillar, Series},
};
use proptest::prelude::*;
use std::sync::Arc;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
}

fn params(method: ForecastMethod) -> ForecastParams {
    ForecastParams::new(0.4, 0.2, method).unwrap()
}

#[test]
fn constant_series_forecasts_itself_with_zero_width() {
    let series = vec![75.0; 14];
    for method in [ForecastMethod::Ses, ForecastMethod::Holt] {
        let points = forecast(&series, &params(method), &[7, 14, 30]).unwrap();
        assert_eq!(points.len(), 3);
        for p in points {
            assert!((p.predicted - 75.0).abs() < 1e-9, "{method:?} h={}", p.horizon_days);
            assert!((p.upper - p.lower).abs() < 1e-9);
            assert_eq!(p.sigma, 0.0);
        }
    }
}

#[test]
fn fewer_than_three_points_is_insufficient() {
    let err = forecast(&[70.0, 71.0], &params(ForecastMethod::Holt), &[7]).unwrap_err();
    assert_eq!(err, InsufficientData { required: 3, available: 2 });
    assert!(forecast(&[], &params(ForecastMethod::Ses), &[7]).is_err());
}

#[test]
fn holt_follows_a_rising_trend_that_ses_flattens() {
    let rising: Vec<f64> = (0..14).map(|i| 50.0 + 2.0 * i as f64).collect();
    let last = *rising.last().unwrap();

    let ses = forecast(&rising, &params(ForecastMethod::Ses), &[7]).unwrap()[0];
    let holt = forecast(&rising, &params(ForecastMethod::Holt), &[7]).unwrap()[0];

    assert!(ses.predicted < last, "ses should lag: {}", ses.predicted);
    assert!(holt.predicted > last, "holt should extrapolate: {}", holt.predicted);
}

#[test]
fn predictions_and_bands_are_clipped_to_score_range() {
    let climbing: Vec<f64> = (0..10).map(|i| 90.0 + i as f64).collect();
    let points = forecast(&climbing, &params(ForecastMethod::Holt), &[30]).unwrap();
    let p = points[0];
    assert!(p.predicted <= 100.0);
    assert!(p.upper <= 100.0);
    assert!(p.lower <= p.predicted && p.predicted <= p.upper);
}

#[test]
fn band_widens_with_horizon() {
    let noisy = [70.0, 74.0, 69.0, 73.0, 71.0, 75.0, 68.0, 72.0];
    let points = forecast(&noisy, &params(ForecastMethod::Ses), &[1, 7, 30]).unwrap();
    let widths: Vec<f64> = points.iter().map(|p| p.upper - p.lower).collect();
    assert!(widths[0] < widths[1] && widths[1] < widths[2], "{widths:?}");
}

#[test]
fn invalid_smoothing_parameters_are_rejected() {
    assert!(matches!(
        ForecastParams::new(0.0, 0.2, ForecastMethod::Ses),
        Err(GovError::InvalidRange(_))
    ));
    assert!(ForecastParams::new(0.5, 1.5, ForecastMethod::Holt).is_err());
    // beta is unused by SES
    assert!(ForecastParams::new(0.5, 1.5, ForecastMethod::Ses).is_ok());
}

#[test]
fn engine_skips_series_until_window_has_enough_points() {
    let collector = Arc::new(StaticCollector::new());
    for i in 0..3 {
        collector.set_day(start() + Duration::days(i), [Some(80.0); 4]);
    }
    let mut engine = GovEngine::build_test(collector).unwrap();

    let first = engine.run_daily(start()).unwrap();
    let skipped = first
        .events
        .iter()
        .filter(|e| matches!(e, GovEvent::ForecastSkipped { .. }))
        .count();
    assert_eq!(skipped, 5);
    assert!(engine.store().forecasts_for_run(&first.run_id).unwrap().is_empty());

    engine.run_daily(start() + Duration::days(1)).unwrap();
    let third = engine.run_daily(start() + Duration::days(2)).unwrap();
    let points = engine.store().forecasts_for_run(&third.run_id).unwrap();
    assert_eq!(points.len(), 5 * 3);
    for p in &points {
        assert_eq!(p.as_of_date, start() + Duration::days(2));
        assert_eq!(p.target_date, p.as_of_date + Duration::days(i64::from(p.horizon_days)));
        assert!((p.predicted - 80.0).abs() < 1e-9);
        assert_eq!(p.method, "holt");
    }
}

#[test]
fn recompute_forecasts_runs_a_standalone_forecast_run() {
    let collector = Arc::new(StaticCollector::new());
    for i in 0..5 {
        collector.set_day(start() + Duration::days(i), [Some(70.0 + i as f64); 4]);
    }
    let mut engine = GovEngine::build_test(collector).unwrap();
    engine.run_range(start(), start() + Duration::days(4)).unwrap();

    let report = engine
        .recompute_forecasts(Some(vec![1, 2]), Some(ForecastMethod::Ses))
        .unwrap();

    assert_eq!(report.as_of, start() + Duration::days(4));
    assert_eq!(report.forecast_count, 5 * 2);
    assert!(report.runtime_seconds >= 0.0);
    let run = engine.store().get_run(&report.run_id).unwrap().unwrap();
    assert_eq!(run.kind, "forecast");
    assert_eq!(run.status, "completed");

    let latest = engine.store().latest_forecasts(Series::Pillar(Pillar::Ai)).unwrap();
    let h1 = latest.iter().find(|p| p.horizon_days == 1).unwrap();
    assert_eq!(h1.method, "ses");
    assert_eq!(h1.run_id, report.run_id);
}

#[test]
fn recompute_forecasts_rejects_bad_horizons() {
    let collector = Arc::new(StaticCollector::new());
    let mut engine = GovEngine::build_test(collector).unwrap();
    assert!(matches!(
        engine.recompute_forecasts(Some(vec![0]), None),
        Err(GovError::InvalidRange(_))
    ));
    assert!(matches!(
        engine.recompute_forecasts(Some(vec![]), None),
        Err(GovError::InvalidRange(_))
    ));
}

#[test]
fn simulate_forecast_does_not_persist() {
    let collector = Arc::new(StaticCollector::new());
    for i in 0..4 {
        collector.set_day(start() + Duration::days(i), [Some(82.0); 4]);
    }
    let mut engine = GovEngine::build_test(collector).unwrap();
    engine.run_range(start(), start() + Duration::days(3)).unwrap();
    let before = engine.store().latest_forecasts(Series::Composite).unwrap();

    let sim = engine
        .simulate_forecast(Series::Composite, Some(vec![3]), Some(ForecastMethod::Ses))
        .unwrap();

    assert_eq!(sim.points.len(), 1);
    assert!((sim.points[0].predicted - 82.0).abs() < 1e-9);
    assert_eq!(engine.store().latest_forecasts(Series::Composite).unwrap(), before);
}

#[test]
fn simulate_forecast_reports_insufficient_data() {
    let collector = Arc::new(StaticCollector::new());
    collector.set_day(start(), [Some(82.0); 4]);
    let mut engine = GovEngine::build_test(collector).unwrap();
    engine.run_daily(start()).unwrap();

    let err = engine.simulate_forecast(Series::Composite, None, None).unwrap_err();
    assert!(matches!(err, GovError::InsufficientData { required: 3, available: 1, .. }));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    /// Every forecast point satisfies lower <= predicted <= upper, all inside [0, 100].
    #[test]
    fn forecast_points_stay_inside_their_band(
        series in prop::collection::vec(0.0f64..=100.0, 3..30),
        alpha in 0.05f64..=1.0,
        beta in 0.05f64..=1.0,
        horizon in 1u32..=90,
        holt in any::<bool>(),
    ) {
        let method = if holt { ForecastMethod::Holt } else { ForecastMethod::Ses };
        let params = ForecastParams::new(alpha, beta, method).unwrap();
        for p in forecast(&series, &params, &[horizon]).unwrap() {
            prop_assert!(p.lower <= p.predicted && p.predicted <= p.upper);
            prop_assert!(p.lower >= 0.0 && p.upper <= 100.0);
            prop_assert!(p.sigma >= 0.0);
        }
    }
}
