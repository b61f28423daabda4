//! SQLite persistence layer.
//!
//! RULE: Only the store module talks to the database.
//! Stages call store methods; they never execute SQL directly.
//!
//! Every row carries the run_id of the run that wrote it, so a cancelled
//! or failed run can be purged without touching earlier runs. A row version
//! a run overwrote or withdrew waits in its `*_prior` table until that run
//! completes; purging the run puts it back.

use crate::{
    error::{GovError, GovResult},
    event::EventLogEntry,
    types::{format_date, parse_date, RunId, ScoreDate},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::time::Duration;

mod anomaly;
mod forecast;
mod insight;
mod score;

pub struct GovStore {
    conn:    Connection,
    /// Writes that hit a busy/locked database and were retried.
    retries: Cell<u64>,
}

// ── Row types ──────────────────────────────────────────────────────

/// One point of a persisted trend. Trends are ascending and duplicate-free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date:  ScoreDate,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarScoreRow {
    pub date:        ScoreDate,
    pub pillar:      String,
    pub score:       f64,
    pub computed_at: String,
    pub run_id:      RunId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScoreRow {
    pub date:         ScoreDate,
    pub score:        f64,
    pub status:       String,
    pub degraded:     bool,
    pub pillar_count: i64,
    pub computed_at:  String,
    pub run_id:       RunId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPointRow {
    pub series:       String,
    pub as_of_date:   ScoreDate,
    pub horizon_days: u32,
    pub target_date:  ScoreDate,
    pub predicted:    f64,
    pub lower_bound:  f64,
    pub upper_bound:  f64,
    pub sigma:        f64,
    pub method:       String,
    pub run_id:       RunId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub series:          String,
    pub date:            ScoreDate,
    pub actual:          f64,
    pub expected:        f64,
    pub baseline_source: String,
    pub delta_pct:       f64,
    pub sigma:           f64,
    pub run_id:          RunId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRow {
    pub anomaly_id:  String,
    pub series:      String,
    pub date:        ScoreDate,
    pub kind:        String,
    pub severity:    String,
    pub delta_pct:   f64,
    pub expected:    f64,
    pub actual:      f64,
    pub message:     String,
    pub resolved:    bool,
    pub resolved_at: Option<ScoreDate>,
    pub run_id:      RunId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRow {
    pub insight_id: String,
    pub series:     String,
    pub date:       ScoreDate,
    pub kind:       String,
    pub confidence: f64,
    pub text:       String,
    pub locale:     String,
    pub superseded: bool,
    pub run_id:     RunId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub run_id:      RunId,
    pub kind:        String,
    pub as_of:       ScoreDate,
    pub status:      String,
    pub started_at:  String,
    pub finished_at: Option<String>,
    pub note:        Option<String>,
}

/// Rows removed by `purge_run`, per table, plus earlier versions put back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub run_id:            RunId,
    pub pillar_scores:     usize,
    pub composite_scores:  usize,
    pub forecast_points:   usize,
    pub observations:      usize,
    pub anomalies:         usize,
    pub reopened:          usize,
    pub restored:          usize,
    pub insights:          usize,
    pub events:            usize,
}

impl GovStore {
    pub fn open(path: &str) -> GovResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL: readers proceed while another connection holds the write lock.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, retries: Cell::new(0) })
    }

    /// Private in-memory database: tests and `--db :memory:` runs.
    pub fn in_memory() -> GovResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, retries: Cell::new(0) })
    }

    /// How long one write attempt waits on a locked database before it
    /// counts as a conflict.
    pub fn with_busy_timeout(self, timeout: Duration) -> GovResult<Self> {
        self.conn.busy_timeout(timeout)?;
        Ok(self)
    }

    pub fn conflict_retries(&self) -> u64 {
        self.retries.get()
    }

    /// Apply all schema migrations in order. Safe to call repeatedly.
    pub fn migrate(&self) -> GovResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/002_scores.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/003_forecasts.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/004_anomalies.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/005_insights.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/006_prior_rows.sql"))?;
        Ok(())
    }

    /// Run a write, retrying once when SQLite reports a busy/locked database.
    /// Each write re-reads current state inside its own statement, so the
    /// retry acts on a fresh read.
    pub(crate) fn write_with_retry<T>(
        &self,
        entity: &'static str,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> GovResult<T> {
        match op(&self.conn) {
            Ok(v) => Ok(v),
            Err(e) if is_conflict(&e) => {
                self.retries.set(self.retries.get() + 1);
                log::warn!("store: {entity} write conflicted ({e}), retrying once");
                op(&self.conn).map_err(|source| {
                    if is_conflict(&source) {
                        GovError::PersistenceConflict { entity, source }
                    } else {
                        GovError::Database(source)
                    }
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(
        &self,
        run_id: &str,
        kind: &str,
        as_of: ScoreDate,
        started_at: DateTime<Utc>,
    ) -> GovResult<()> {
        self.write_with_retry("gov_run", |conn| {
            conn.execute(
                "INSERT INTO gov_run (run_id, kind, as_of, status, started_at)
                 VALUES (?1, ?2, ?3, 'running', ?4)",
                params![run_id, kind, format_date(as_of), started_at.to_rfc3339()],
            )
        })?;
        Ok(())
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        status: &str,
        finished_at: DateTime<Utc>,
        note: Option<&str>,
    ) -> GovResult<()> {
        let updated = self.write_with_retry("gov_run", |conn| {
            let tx = begin_write(conn)?;
            let n = tx.execute(
                "UPDATE gov_run SET status = ?2, finished_at = ?3, note = ?4
                 WHERE run_id = ?1",
                params![run_id, status, finished_at.to_rfc3339(), note],
            )?;
            // A completed run's overwrites are final.
            if n > 0 && status == "completed" {
                for t in &PRIOR_TABLES {
                    tx.execute(
                        &format!("DELETE FROM {}_prior WHERE replaced_by = ?1", t.table),
                        params![run_id],
                    )?;
                }
            }
            tx.commit()?;
            Ok(n)
        })?;
        if updated == 0 {
            return Err(GovError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> GovResult<Option<RunRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, kind, as_of, status, started_at, finished_at, note
                 FROM gov_run WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRow {
                        run_id:      row.get(0)?,
                        kind:        row.get(1)?,
                        as_of:       date_col(row, 2)?,
                        status:      row.get(3)?,
                        started_at:  row.get(4)?,
                        finished_at: row.get(5)?,
                        note:        row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Delete every row a cancelled or failed run wrote, put back the row
    /// versions it overwrote or withdrew, reopen any anomaly it resolved and
    /// make the insight set it superseded current again. Completed runs are
    /// never purged.
    pub fn purge_run(&self, run_id: &str) -> GovResult<PurgeReport> {
        let run = self
            .get_run(run_id)?
            .ok_or_else(|| GovError::RunNotFound(run_id.to_string()))?;
        if run.status != "cancelled" && run.status != "failed" {
            return Err(GovError::RunNotPurgeable {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }

        let report = self.write_with_retry("purge", |conn| {
            let tx = begin_write(conn)?;
            let delete = |table: &str| -> rusqlite::Result<usize> {
                tx.execute(&format!("DELETE FROM {table} WHERE run_id = ?1"), params![run_id])
            };
            // First insight swap by another run after this one's; read before
            // this run's events go.
            let next_swap: Option<String> = tx
                .query_row(
                    "SELECT later.run_id FROM event_log later
                     WHERE later.event_type = ?2 AND later.run_id <> ?1
                       AND later.id > (SELECT MAX(id) FROM event_log
                                       WHERE run_id = ?1 AND event_type = ?2)
                     ORDER BY later.id ASC LIMIT 1",
                    params![run_id, INSIGHTS_SWAPPED],
                    |row| row.get(0),
                )
                .optional()?;
            let mut report = PurgeReport {
                run_id:           run_id.to_string(),
                pillar_scores:    delete("pillar_score")?,
                composite_scores: delete("composite_score")?,
                forecast_points:  delete("forecast_point")?,
                observations:     delete("deviation_observation")?,
                anomalies:        delete("anomaly")?,
                insights:         delete("insight")?,
                events:           delete("event_log")?,
                ..PurgeReport::default()
            };

            for t in &PRIOR_TABLES {
                report.restored += restore_prior(&tx, t, run_id)?;
            }
            report.reopened = tx.execute(
                "UPDATE anomaly SET resolved = 0, resolved_at = NULL, resolved_run_id = NULL
                 WHERE resolved_run_id = ?1",
                params![run_id],
            )?;

            match next_swap.as_deref() {
                None => {
                    report.restored += tx.execute(
                        "UPDATE insight SET superseded = 0, superseded_run_id = NULL
                         WHERE superseded_run_id = ?1",
                        params![run_id],
                    )?;
                }
                // A later set is current; its run now owns the older rows.
                Some(next) => {
                    tx.execute(
                        "UPDATE insight SET superseded_run_id = ?2 WHERE superseded_run_id = ?1",
                        params![run_id, next],
                    )?;
                }
            }

            tx.execute(
                "UPDATE gov_run SET status = 'purged' WHERE run_id = ?1",
                params![run_id],
            )?;
            tx.commit()?;
            Ok(report)
        })?;

        log::info!(
            "store: purged run {run_id} ({} scores, {} forecasts, {} anomalies, {} insights, {} restored)",
            report.pillar_scores + report.composite_scores,
            report.forecast_points,
            report.anomalies,
            report.insights,
            report.restored,
        );
        Ok(report)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> GovResult<()> {
        self.write_with_retry("event_log", |conn| {
            conn.execute(
                "INSERT INTO event_log (run_id, event_date, stage, event_type, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.run_id,
                    format_date(entry.date),
                    entry.stage,
                    entry.event_type,
                    entry.payload,
                ],
            )
        })?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> GovResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, event_date, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    date:       date_col(row, 2)?,
                    stage:      row.get(3)?,
                    event_type: row.get(4)?,
                    payload:    row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// `GovEvent::InsightsGenerated` as logged; marks a committed insight swap.
const INSIGHTS_SWAPPED: &str = "insights_generated";

/// A live table whose overwritten rows are kept in `{table}_prior`.
struct PriorTable {
    table:   &'static str,
    key:     &'static [&'static str],
    columns: &'static str,
}

const PRIOR_TABLES: [PriorTable; 4] = [
    PriorTable {
        table:   "pillar_score",
        key:     &["score_date", "pillar"],
        columns: "score_date, pillar, score, computed_at, run_id",
    },
    PriorTable {
        table:   "composite_score",
        key:     &["score_date"],
        columns: "score_date, score, status, degraded, pillar_count, computed_at, run_id",
    },
    PriorTable {
        table:   "deviation_observation",
        key:     &["series", "obs_date"],
        columns: "series, obs_date, actual, expected, baseline_source, delta_pct, sigma, run_id",
    },
    PriorTable {
        table:   "anomaly",
        key:     &["anomaly_id"],
        columns: anomaly::PRIOR_COLUMNS,
    },
];

/// Put back the versions `run_id` replaced, then drop its prior rows.
/// A version of `run_id`'s own that a later run replaced is swapped for the
/// version `run_id` replaced, so purging the later run restores that one.
fn restore_prior(conn: &Connection, t: &PriorTable, run_id: &str) -> rusqlite::Result<usize> {
    let PriorTable { table, key, columns } = t;
    let same_key = key
        .iter()
        .map(|k| format!("p.{k} = q.{k}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let p_columns = columns
        .split(',')
        .map(|c| format!("p.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");

    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {table}_prior ({columns}, replaced_by)
             SELECT {p_columns}, q.replaced_by
             FROM {table}_prior p JOIN {table}_prior q ON {same_key}
             WHERE p.replaced_by = ?1 AND q.run_id = ?1"
        ),
        params![run_id],
    )?;
    let restored = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {table} ({columns})
             SELECT {columns} FROM {table}_prior WHERE replaced_by = ?1"
        ),
        params![run_id],
    )?;
    conn.execute(
        &format!("DELETE FROM {table}_prior WHERE replaced_by = ?1 OR run_id = ?1"),
        params![run_id],
    )?;
    Ok(restored)
}

/// Take the write lock up front, so a busy database waits out the busy
/// timeout instead of failing when a read would upgrade.
pub(crate) fn begin_write(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

fn is_conflict(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

/// Read a TEXT date column.
pub(crate) fn date_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<ScoreDate> {
    let raw: String = row.get(idx)?;
    parse_date(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn opt_date_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<ScoreDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        parse_date(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}
