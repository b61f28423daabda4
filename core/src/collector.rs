//! Metric collector boundary: "give me this pillar's 0–100 score for a date".
//!
//! RULE: Nothing a collector does may escape this module as an error.
//! Errors, panics, out-of-range values and slow calls all become a tagged
//! `PillarReading::Unavailable` for that pillar only; the other pillars are
//! collected as normal.
//!
//! A timed-out call cannot be interrupted; its worker thread keeps running
//! until the collector returns. Each pillar allows at most `max_outstanding`
//! such workers at once. While a pillar is at that limit it is reported
//! `Backlogged` without spawning, so a hung upstream costs a bounded number
//! of threads.

use crate::{
    error::GovResult,
    rng::SignalRng,
    types::{Pillar, ScoreDate},
};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

/// Upstream provider of one or more pillars' daily scores.
pub trait MetricCollector: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means "no score today", which is not the same as a score of 0.
    fn get_score(&self, pillar: Pillar, date: ScoreDate) -> GovResult<Option<f64>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum UnavailableReason {
    Missing,
    Failed(String),
    TimedOut,
    Backlogged,
    OutOfRange(f64),
}

impl UnavailableReason {
    pub fn describe(&self) -> String {
        match self {
            Self::Missing         => "no score reported".into(),
            Self::Failed(msg)     => format!("collector failed: {msg}"),
            Self::TimedOut        => "collector timed out".into(),
            Self::Backlogged      => "earlier calls still running".into(),
            Self::OutOfRange(v)   => format!("score {v} outside [0, 100]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PillarReading {
    Available { score: f64 },
    Unavailable { why: UnavailableReason },
}

impl PillarReading {
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Available { score } => Some(*score),
            Self::Unavailable { .. }  => None,
        }
    }

    fn from_result(result: GovResult<Option<f64>>) -> Self {
        match result {
            Ok(Some(score)) if score.is_finite() && (0.0..=100.0).contains(&score) => {
                Self::Available { score }
            }
            Ok(Some(score)) => Self::Unavailable { why: UnavailableReason::OutOfRange(score) },
            Ok(None)        => Self::Unavailable { why: UnavailableReason::Missing },
            Err(e)          => Self::Unavailable { why: UnavailableReason::Failed(e.to_string()) },
        }
    }
}

/// One reading per pillar for a single date. Always holds all four.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarReadings {
    pub date:     ScoreDate,
    pub readings: BTreeMap<Pillar, PillarReading>,
}

impl PillarReadings {
    pub fn get(&self, pillar: Pillar) -> &PillarReading {
        // Constructors insert every pillar.
        &self.readings[&pillar]
    }

    pub fn score(&self, pillar: Pillar) -> Option<f64> {
        self.readings.get(&pillar).and_then(PillarReading::score)
    }

    pub fn available(&self) -> Vec<(Pillar, f64)> {
        Pillar::ALL
            .iter()
            .filter_map(|p| self.score(*p).map(|s| (*p, s)))
            .collect()
    }

    pub fn unavailable(&self) -> Vec<(Pillar, UnavailableReason)> {
        self.readings
            .iter()
            .filter_map(|(p, r)| match r {
                PillarReading::Unavailable { why } => Some((*p, why.clone())),
                PillarReading::Available { .. }    => None,
            })
            .collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.available().len() < Pillar::ALL.len()
    }
}

/// Routes each pillar to its collector and enforces the per-pillar timeout.
/// Clones share the outstanding-worker counts.
#[derive(Clone)]
pub struct CollectorSet {
    collectors:      HashMap<Pillar, Arc<dyn MetricCollector>>,
    timeout:         Duration,
    max_outstanding: usize,
    outstanding:     Arc<HashMap<Pillar, AtomicUsize>>,
}

impl CollectorSet {
    pub fn new(timeout: Duration) -> Self {
        let outstanding = Pillar::ALL.iter().map(|p| (*p, AtomicUsize::new(0))).collect();
        Self {
            collectors: HashMap::new(),
            timeout,
            max_outstanding: 2,
            outstanding: Arc::new(outstanding),
        }
    }

    /// Cap on a pillar's still-running workers; at least one.
    pub fn with_max_outstanding(mut self, max: usize) -> Self {
        self.max_outstanding = max.max(1);
        self
    }

    /// Workers for `pillar` that have not returned yet.
    pub fn outstanding(&self, pillar: Pillar) -> usize {
        self.outstanding.get(&pillar).map_or(0, |n| n.load(Ordering::SeqCst))
    }

    /// One collector serving all four pillars.
    pub fn uniform(collector: Arc<dyn MetricCollector>, timeout: Duration) -> Self {
        let mut set = Self::new(timeout);
        for pillar in Pillar::ALL {
            set = set.with(pillar, collector.clone());
        }
        set
    }

    pub fn with(mut self, pillar: Pillar, collector: Arc<dyn MetricCollector>) -> Self {
        self.collectors.insert(pillar, collector);
        self
    }

    /// Query every pillar in parallel. Never fails; a pillar that does not
    /// answer before the deadline is recorded as `TimedOut` and its worker is
    /// left to finish on its own, counted against `max_outstanding`.
    pub fn collect(&self, date: ScoreDate) -> PillarReadings {
        let (tx, rx) = mpsc::channel::<(Pillar, PillarReading)>();
        let mut readings: BTreeMap<Pillar, PillarReading> = BTreeMap::new();

        for pillar in Pillar::ALL {
            let Some(collector) = self.collectors.get(&pillar).cloned() else {
                readings.insert(
                    pillar,
                    PillarReading::Unavailable {
                        why: UnavailableReason::Failed("no collector registered".into()),
                    },
                );
                continue;
            };
            if self.outstanding(pillar) >= self.max_outstanding {
                readings.insert(
                    pillar,
                    PillarReading::Unavailable { why: UnavailableReason::Backlogged },
                );
                continue;
            }
            if let Some(n) = self.outstanding.get(&pillar) {
                n.fetch_add(1, Ordering::SeqCst);
            }
            let tx = tx.clone();
            let counts = Arc::clone(&self.outstanding);
            let spawned = thread::Builder::new()
                .name(format!("collect-{}", pillar.name()))
                .spawn(move || {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| collector.get_score(pillar, date)));
                    let reading = match outcome {
                        Ok(result) => PillarReading::from_result(result),
                        Err(_) => PillarReading::Unavailable {
                            why: UnavailableReason::Failed("collector panicked".into()),
                        },
                    };
                    if let Some(n) = counts.get(&pillar) {
                        n.fetch_sub(1, Ordering::SeqCst);
                    }
                    // Receiver may be gone after a timeout.
                    let _ = tx.send((pillar, reading));
                });
            if let Err(e) = spawned {
                if let Some(n) = self.outstanding.get(&pillar) {
                    n.fetch_sub(1, Ordering::SeqCst);
                }
                readings.insert(
                    pillar,
                    PillarReading::Unavailable { why: UnavailableReason::Failed(e.to_string()) },
                );
            }
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        while readings.len() < Pillar::ALL.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((pillar, reading)) => {
                    readings.insert(pillar, reading);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        for pillar in Pillar::ALL {
            readings
                .entry(pillar)
                .or_insert(PillarReading::Unavailable { why: UnavailableReason::TimedOut });
        }

        let collected = PillarReadings { date, readings };
        for (pillar, why) in collected.unavailable() {
            log::warn!("date={date} collector: {pillar} unavailable ({})", why.describe());
        }
        collected
    }
}

// ── Collectors ─────────────────────────────────────────────────────

/// In-memory score table. Used by tests and for replaying recorded feeds.
#[derive(Default)]
pub struct StaticCollector {
    scores: RwLock<HashMap<(Pillar, ScoreDate), f64>>,
}

impl StaticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pillar: Pillar, date: ScoreDate, score: f64) {
        if let Ok(mut scores) = self.scores.write() {
            scores.insert((pillar, date), score);
        }
    }

    pub fn clear(&self, pillar: Pillar, date: ScoreDate) {
        if let Ok(mut scores) = self.scores.write() {
            scores.remove(&(pillar, date));
        }
    }

    /// Set all four pillars for a date; `None` leaves that pillar absent.
    pub fn set_day(&self, date: ScoreDate, scores: [Option<f64>; 4]) {
        for (pillar, score) in Pillar::ALL.iter().zip(scores) {
            match score {
                Some(s) => self.set(*pillar, date, s),
                None    => self.clear(*pillar, date),
            }
        }
    }
}

impl MetricCollector for StaticCollector {
    fn name(&self) -> &str {
        "static"
    }

    fn get_score(&self, pillar: Pillar, date: ScoreDate) -> GovResult<Option<f64>> {
        let scores = self
            .scores
            .read()
            .map_err(|_| anyhow::anyhow!("static collector lock poisoned"))?;
        Ok(scores.get(&(pillar, date)).copied())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalProfile {
    pub baseline:  f64,
    /// Amplitude of the weekly service cycle.
    pub weekly:    f64,
    pub noise:     f64,
}

/// Seeded synthetic feed: a weekly cycle around a per-pillar baseline,
/// gaussian noise, occasional sharp dips and occasional dropouts.
pub struct SyntheticCollector {
    seed:         u64,
    profiles:     BTreeMap<Pillar, SignalProfile>,
    dip_rate:     f64,
    dip_depth:    f64,
    dropout_rate: f64,
}

impl SyntheticCollector {
    pub fn new(seed: u64) -> Self {
        let profiles = [
            (Pillar::Finance, SignalProfile { baseline: 91.0, weekly: 1.5, noise: 1.2 }),
            (Pillar::Health,  SignalProfile { baseline: 84.0, weekly: 3.0, noise: 2.0 }),
            (Pillar::Ai,      SignalProfile { baseline: 88.0, weekly: 1.0, noise: 1.5 }),
            (Pillar::Menu,    SignalProfile { baseline: 77.0, weekly: 4.0, noise: 2.5 }),
        ]
        .into();
        Self { seed, profiles, dip_rate: 0.04, dip_depth: 22.0, dropout_rate: 0.02 }
    }

    pub fn with_dropout_rate(mut self, rate: f64) -> Self {
        self.dropout_rate = rate;
        self
    }

    pub fn with_dip_rate(mut self, rate: f64) -> Self {
        self.dip_rate = rate;
        self
    }
}

impl MetricCollector for SyntheticCollector {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn get_score(&self, pillar: Pillar, date: ScoreDate) -> GovResult<Option<f64>> {
        let mut rng = SignalRng::for_reading(self.seed, pillar, date);
        if rng.chance(self.dropout_rate) {
            return Ok(None);
        }
        let profile = self.profiles[&pillar];
        let weekday = date.weekday().num_days_from_monday() as f64;
        let cycle = (weekday / 7.0 * std::f64::consts::TAU).sin() * profile.weekly;
        let mut score = rng.gaussian(profile.baseline + cycle, profile.noise);
        if rng.chance(self.dip_rate) {
            score -= self.dip_depth;
        }
        Ok(Some((score.clamp(0.0, 100.0) * 100.0).round() / 100.0))
    }
}
