//! Batch clock and cancellation.
//!
//! The engine never reads the system time directly: "today" and every
//! computed_at timestamp come from a `BatchClock`, so tests pin time with
//! `FixedClock` and re-runs stay reproducible.

use crate::types::ScoreDate;
use chrono::{DateTime, NaiveTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

pub trait BatchClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> ScoreDate {
        self.now().date_naive()
    }
}

pub struct SystemClock;

impl BatchClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: RwLock::new(now) }
    }

    /// Noon UTC on the given day.
    pub fn at_date(date: ScoreDate) -> Self {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default();
        Self::new(date.and_time(noon).and_utc())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.write() {
            *guard = now;
        }
    }

    pub fn set_date(&self, date: ScoreDate) {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default();
        self.set(date.and_time(noon).and_utc());
    }
}

impl BatchClock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.read().map(|g| *g).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Shared flag checked between stages and between series.
/// Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
