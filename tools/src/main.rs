//! gov-runner: headless batch runner for the governance intelligence engine.
//!
//! Usage:
//!   gov-runner --from 2026-01-01 --days 60 --seed 7 --db gov.db
//!   gov-runner --days 90 --dropout 0.05 --dip-rate 0.1 --busy-timeout-ms 2000
//!   gov-runner --db gov.db --role operator --ipc-mode

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use governance_core::{
    clock::{BatchClock, SystemClock},
    collector::{CollectorSet, SyntheticCollector},
    config::{EngineConfig, ForecastMethod},
    engine::GovEngine,
    query::{self, Role, RoleTablePolicy},
    store::GovStore,
    types::{parse_date, Series},
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Status(query::StatusRequest),
    Trends(query::TrendsRequest),
    RecomputeDaily(query::DailyRecomputeRequest),
    RecomputeForecast(query::ForecastRecomputeRequest),
    Simulate {
        series:   Series,
        #[serde(default)]
        horizons: Option<Vec<u32>>,
        #[serde(default)]
        method:   Option<ForecastMethod>,
    },
    PurgeRun {
        run_id: String,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let days = parse_arg(&args, "--days", 30i64).max(1);
    let dropout = parse_arg(&args, "--dropout", 0.02f64);
    let dip_rate = parse_arg(&args, "--dip-rate", 0.04f64);
    let busy_ms = parse_arg(&args, "--busy-timeout-ms", 5_000u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = str_arg(&args, "--db").unwrap_or(":memory:");
    let data_dir = str_arg(&args, "--data-dir").unwrap_or("./data");
    let role: Role = match str_arg(&args, "--role") {
        Some(r) => r.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        None    => Role::Admin,
    };

    let clock: Arc<dyn BatchClock> = Arc::new(SystemClock);
    let to = clock.today() - Duration::days(1);
    let from = match str_arg(&args, "--from") {
        Some(s) => parse_date(s)?,
        None    => to - Duration::days(days - 1),
    };

    let config = load_config(data_dir)?;
    let timeout = std::time::Duration::from_millis(config.collector.timeout_ms);
    let collector = Arc::new(
        SyntheticCollector::new(seed)
            .with_dropout_rate(dropout)
            .with_dip_rate(dip_rate),
    );
    let collectors = CollectorSet::uniform(collector, timeout)
        .with_max_outstanding(config.collector.max_outstanding);
    let store = GovStore::open(db)?.with_busy_timeout(std::time::Duration::from_millis(busy_ms))?;
    let mut engine = GovEngine::build(config, store, collectors, clock)?;

    if ipc_mode {
        run_ipc_loop(&mut engine, role)?;
    } else {
        let to = from + Duration::days(days - 1);
        println!("Governance intelligence: gov-runner");
        println!("  seed:      {seed}");
        println!("  from:      {from}");
        println!("  to:        {to}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
        engine.run_range(from, to)?;
        print_summary(&engine, from, to)?;
    }
    Ok(())
}

fn load_config(data_dir: &str) -> Result<EngineConfig> {
    if Path::new(data_dir).join("engine_config.json").exists() {
        EngineConfig::load(data_dir)
    } else {
        log::info!("no engine_config.json in {data_dir}, using defaults");
        Ok(EngineConfig::default())
    }
}

fn run_ipc_loop(engine: &mut GovEngine, role: Role) -> Result<()> {
    let policy = RoleTablePolicy;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Status(req) => {
                query::status(engine, &policy, role, &req).map(|r| serde_json::to_value(r))
            }
            IpcCommand::Trends(req) => {
                query::trends(engine, &policy, role, &req).map(|r| serde_json::to_value(r))
            }
            IpcCommand::RecomputeDaily(req) => {
                query::recompute_daily(engine, &policy, role, &req).map(|r| serde_json::to_value(r))
            }
            IpcCommand::RecomputeForecast(req) => {
                query::recompute_forecast(engine, &policy, role, &req)
                    .map(|r| serde_json::to_value(r))
            }
            IpcCommand::Simulate { series, horizons, method } => engine
                .simulate_forecast(series, horizons, method)
                .map(|r| serde_json::to_value(r)),
            IpcCommand::PurgeRun { run_id } => {
                engine.purge_run(&run_id).map(|r| serde_json::to_value(r))
            }
        };

        let line = match reply {
            Ok(value) => value?,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn print_summary(engine: &GovEngine, from: NaiveDate, to: NaiveDate) -> Result<()> {
    let store = engine.store();
    let trend = store.trend(Series::Composite, from, to)?;
    let bands = &engine.config().bands;

    println!("=== COMPOSITE (last 7 days) ===");
    if trend.is_empty() {
        println!("  (no composite recorded)");
    }
    for point in trend.iter().rev().take(7).collect::<Vec<_>>().into_iter().rev() {
        println!("  {} | {:6.2} | {}", point.date, point.score, bands.classify(point.score));
    }

    let open = store.anomalies(false)?;
    let resolved = store.anomalies(true)?;
    println!();
    println!("=== ANOMALIES ===");
    println!("  open:      {}", open.len());
    println!("  resolved:  {}", resolved.len());
    for a in open.iter().take(5) {
        println!("  {} | {} | {:+.1}%", a.anomaly_id, a.severity, a.delta_pct);
    }

    println!();
    println!("=== INSIGHTS (en) ===");
    let insights = store.current_insights("en")?;
    if insights.is_empty() {
        println!("  (none)");
    }
    for i in insights.iter().take(5) {
        println!("  [{:.2}] {}", i.confidence, i.text);
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
