use super::{begin_write, date_col, GovStore, InsightRow};
use crate::{error::GovResult, types::format_date};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl GovStore {
    /// Replace the current insight set: earlier rows stay for audit but are
    /// flagged superseded by `run_id`. Runs in one transaction so readers
    /// never see an empty or doubled current set.
    pub fn replace_current_insights(
        &self,
        rows: &[InsightRow],
        run_id: &str,
        created_at: DateTime<Utc>,
    ) -> GovResult<usize> {
        self.write_with_retry("insight", |conn| {
            let tx = begin_write(conn)?;
            let superseded = tx.execute(
                "UPDATE insight SET superseded = 1, superseded_run_id = ?1 WHERE superseded = 0",
                params![run_id],
            )?;
            for r in rows {
                tx.execute(
                    "INSERT INTO insight
                        (insight_id, series, insight_date, kind, confidence, text, locale,
                         superseded, run_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)",
                    params![
                        r.insight_id,
                        r.series,
                        format_date(r.date),
                        r.kind,
                        r.confidence,
                        r.text,
                        r.locale,
                        r.run_id,
                        created_at.to_rfc3339(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(superseded)
        })
    }

    pub fn current_insights(&self, locale: &str) -> GovResult<Vec<InsightRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT insight_id, series, insight_date, kind, confidence, text, locale,
                    superseded, run_id
             FROM insight WHERE superseded = 0 AND locale = ?1
             ORDER BY insight_date DESC, series ASC, kind ASC",
        )?;
        let rows = stmt
            .query_map(params![locale], map_insight_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every insight row, current and superseded, oldest first.
    pub fn insight_history(&self) -> GovResult<Vec<InsightRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT insight_id, series, insight_date, kind, confidence, text, locale,
                    superseded, run_id
             FROM insight ORDER BY created_at ASC, insight_id ASC",
        )?;
        let rows = stmt
            .query_map([], map_insight_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_insight_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InsightRow> {
    Ok(InsightRow {
        insight_id: row.get(0)?,
        series:     row.get(1)?,
        date:       date_col(row, 2)?,
        kind:       row.get(3)?,
        confidence: row.get(4)?,
        text:       row.get(5)?,
        locale:     row.get(6)?,
        superseded: row.get(7)?,
        run_id:     row.get(8)?,
    })
}
