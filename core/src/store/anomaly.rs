use super::{begin_write, date_col, opt_date_col, AnomalyRow, GovStore, ObservationRow};
use crate::{
    error::GovResult,
    types::{format_date, ScoreDate, Series},
};
use rusqlite::{params, OptionalExtension};

const ANOMALY_COLUMNS: &str = "anomaly_id, series, anomaly_date, kind, severity, delta_pct,
    expected, actual, message, resolved, resolved_at, run_id";

/// Every stored anomaly column, for copying rows to and from `anomaly_prior`.
pub(super) const PRIOR_COLUMNS: &str = "anomaly_id, series, anomaly_date, kind, severity,
    delta_pct, expected, actual, message, resolved, resolved_at, resolved_run_id, run_id";

impl GovStore {
    // ── Deviation observations ─────────────────────────────────────

    pub fn upsert_observation(&self, o: &ObservationRow) -> GovResult<()> {
        self.write_with_retry("deviation_observation", |conn| {
            let tx = begin_write(conn)?;
            tx.execute(
                "INSERT OR IGNORE INTO deviation_observation_prior
                    (series, obs_date, actual, expected, baseline_source, delta_pct, sigma,
                     run_id, replaced_by)
                 SELECT series, obs_date, actual, expected, baseline_source, delta_pct, sigma,
                        run_id, ?3
                 FROM deviation_observation
                 WHERE series = ?1 AND obs_date = ?2 AND run_id <> ?3
                   AND (actual IS NOT ?4 OR expected IS NOT ?5
                     OR baseline_source IS NOT ?6 OR sigma IS NOT ?7)",
                params![
                    o.series,
                    format_date(o.date),
                    o.run_id,
                    o.actual,
                    o.expected,
                    o.baseline_source,
                    o.sigma,
                ],
            )?;
            tx.execute(
                "INSERT INTO deviation_observation
                    (series, obs_date, actual, expected, baseline_source, delta_pct, sigma, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (series, obs_date) DO UPDATE SET
                    actual = excluded.actual,
                    expected = excluded.expected,
                    baseline_source = excluded.baseline_source,
                    delta_pct = excluded.delta_pct,
                    sigma = excluded.sigma,
                    run_id = excluded.run_id
                 WHERE deviation_observation.actual IS NOT excluded.actual
                    OR deviation_observation.expected IS NOT excluded.expected
                    OR deviation_observation.baseline_source IS NOT excluded.baseline_source
                    OR deviation_observation.sigma IS NOT excluded.sigma",
                params![
                    o.series,
                    format_date(o.date),
                    o.actual,
                    o.expected,
                    o.baseline_source,
                    o.delta_pct,
                    o.sigma,
                    o.run_id,
                ],
            )?;
            tx.commit()
        })?;
        Ok(())
    }

    pub fn observation(&self, series: Series, date: ScoreDate) -> GovResult<Option<ObservationRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT series, obs_date, actual, expected, baseline_source, delta_pct, sigma, run_id
                 FROM deviation_observation WHERE series = ?1 AND obs_date = ?2",
                params![series.name(), format_date(date)],
                map_observation_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Observations with from <= date <= to, ascending.
    pub fn observations_between(
        &self,
        series: Series,
        from: ScoreDate,
        to: ScoreDate,
    ) -> GovResult<Vec<ObservationRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT series, obs_date, actual, expected, baseline_source, delta_pct, sigma, run_id
             FROM deviation_observation
             WHERE series = ?1 AND obs_date >= ?2 AND obs_date <= ?3
             ORDER BY obs_date ASC",
        )?;
        let rows = stmt
            .query_map(
                params![series.name(), format_date(from), format_date(to)],
                map_observation_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Anomalies ──────────────────────────────────────────────────

    /// Insert an anomaly, or refresh it when the same date is re-evaluated
    /// while still open. Resolved anomalies are never rewritten.
    /// Returns true when a row was inserted or changed.
    pub fn upsert_anomaly(&self, a: &AnomalyRow) -> GovResult<bool> {
        let changed = self.write_with_retry("anomaly", |conn| {
            let tx = begin_write(conn)?;
            tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO anomaly_prior ({PRIOR_COLUMNS}, replaced_by)
                     SELECT {PRIOR_COLUMNS}, ?2 FROM anomaly
                     WHERE anomaly_id = ?1 AND run_id <> ?2 AND resolved = 0
                       AND (kind IS NOT ?3 OR severity IS NOT ?4
                         OR expected IS NOT ?5 OR actual IS NOT ?6)"
                ),
                params![a.anomaly_id, a.run_id, a.kind, a.severity, a.expected, a.actual],
            )?;
            let n = tx.execute(
                "INSERT INTO anomaly
                    (anomaly_id, series, anomaly_date, kind, severity, delta_pct,
                     expected, actual, message, resolved, resolved_at, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, NULL, ?10)
                 ON CONFLICT (anomaly_id) DO UPDATE SET
                    kind = excluded.kind,
                    severity = excluded.severity,
                    delta_pct = excluded.delta_pct,
                    expected = excluded.expected,
                    actual = excluded.actual,
                    message = excluded.message,
                    run_id = excluded.run_id
                 WHERE anomaly.resolved = 0
                   AND (anomaly.kind IS NOT excluded.kind
                     OR anomaly.severity IS NOT excluded.severity
                     OR anomaly.expected IS NOT excluded.expected
                     OR anomaly.actual IS NOT excluded.actual)",
                params![
                    a.anomaly_id,
                    a.series,
                    format_date(a.date),
                    a.kind,
                    a.severity,
                    a.delta_pct,
                    a.expected,
                    a.actual,
                    a.message,
                    a.run_id,
                ],
            )?;
            tx.commit()?;
            Ok(n)
        })?;
        Ok(changed > 0)
    }

    /// Remove an open anomaly whose date no longer deviates on re-evaluation.
    /// The removed row is kept in `anomaly_prior` until `run_id` completes.
    pub fn withdraw_open_anomaly(&self, anomaly_id: &str, run_id: &str) -> GovResult<bool> {
        let removed = self.write_with_retry("anomaly", |conn| {
            let tx = begin_write(conn)?;
            tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO anomaly_prior ({PRIOR_COLUMNS}, replaced_by)
                     SELECT {PRIOR_COLUMNS}, ?2 FROM anomaly
                     WHERE anomaly_id = ?1 AND resolved = 0 AND run_id <> ?2"
                ),
                params![anomaly_id, run_id],
            )?;
            let n = tx.execute(
                "DELETE FROM anomaly WHERE anomaly_id = ?1 AND resolved = 0",
                params![anomaly_id],
            )?;
            tx.commit()?;
            Ok(n)
        })?;
        Ok(removed > 0)
    }

    /// Mark resolved. Only an open anomaly transitions; returns whether it did.
    pub fn resolve_anomaly(
        &self,
        anomaly_id: &str,
        resolved_at: ScoreDate,
        run_id: &str,
    ) -> GovResult<bool> {
        let updated = self.write_with_retry("anomaly", |conn| {
            conn.execute(
                "UPDATE anomaly SET resolved = 1, resolved_at = ?2, resolved_run_id = ?3
                 WHERE anomaly_id = ?1 AND resolved = 0",
                params![anomaly_id, format_date(resolved_at), run_id],
            )
        })?;
        Ok(updated > 0)
    }

    pub fn get_anomaly(&self, anomaly_id: &str) -> GovResult<Option<AnomalyRow>> {
        let sql = format!("SELECT {ANOMALY_COLUMNS} FROM anomaly WHERE anomaly_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![anomaly_id], map_anomaly_row)
            .optional()?;
        Ok(row)
    }

    /// Open anomalies for a series dated strictly before `before`, oldest first.
    pub fn open_anomalies_before(
        &self,
        series: Series,
        before: ScoreDate,
    ) -> GovResult<Vec<AnomalyRow>> {
        let sql = format!(
            "SELECT {ANOMALY_COLUMNS} FROM anomaly
             WHERE resolved = 0 AND series = ?1 AND anomaly_date < ?2
             ORDER BY anomaly_date ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![series.name(), format_date(before)], map_anomaly_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All anomalies with the given resolution state, newest first.
    pub fn anomalies(&self, resolved: bool) -> GovResult<Vec<AnomalyRow>> {
        let sql = format!(
            "SELECT {ANOMALY_COLUMNS} FROM anomaly
             WHERE resolved = ?1
             ORDER BY anomaly_date DESC, series ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![resolved], map_anomaly_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_observation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObservationRow> {
    Ok(ObservationRow {
        series:          row.get(0)?,
        date:            date_col(row, 1)?,
        actual:          row.get(2)?,
        expected:        row.get(3)?,
        baseline_source: row.get(4)?,
        delta_pct:       row.get(5)?,
        sigma:           row.get(6)?,
        run_id:          row.get(7)?,
    })
}

fn map_anomaly_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnomalyRow> {
    Ok(AnomalyRow {
        anomaly_id:  row.get(0)?,
        series:      row.get(1)?,
        date:        date_col(row, 2)?,
        kind:        row.get(3)?,
        severity:    row.get(4)?,
        delta_pct:   row.get(5)?,
        expected:    row.get(6)?,
        actual:      row.get(7)?,
        message:     row.get(8)?,
        resolved:    row.get(9)?,
        resolved_at: opt_date_col(row, 10)?,
        run_id:      row.get(11)?,
    })
}
