use super::{begin_write, date_col, CompositeScoreRow, GovStore, PillarScoreRow, TrendPoint};
use crate::{
    composite::CompositeOutcome,
    error::{GovError, GovResult},
    types::{format_date, Pillar, ScoreDate, Series},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl GovStore {
    // ── Pillar scores ──────────────────────────────────────────────

    /// Upsert one pillar's score for a date. A re-run with the same score
    /// leaves the row untouched (computed_at and run_id included), so
    /// recomputing an unchanged date is byte-identical.
    /// Returns true when the row was inserted or its score changed.
    /// A row owned by another run is copied to `pillar_score_prior` first.
    pub fn upsert_pillar_score(
        &self,
        date: ScoreDate,
        pillar: Pillar,
        score: f64,
        computed_at: DateTime<Utc>,
        run_id: &str,
    ) -> GovResult<bool> {
        let changed = self.write_with_retry("pillar_score", |conn| {
            let tx = begin_write(conn)?;
            tx.execute(
                "INSERT OR IGNORE INTO pillar_score_prior
                    (score_date, pillar, score, computed_at, run_id, replaced_by)
                 SELECT score_date, pillar, score, computed_at, run_id, ?3
                 FROM pillar_score
                 WHERE score_date = ?1 AND pillar = ?2 AND run_id <> ?3 AND score IS NOT ?4",
                params![format_date(date), pillar.name(), run_id, score],
            )?;
            let n = tx.execute(
                "INSERT INTO pillar_score (score_date, pillar, score, computed_at, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (score_date, pillar) DO UPDATE SET
                    score = excluded.score,
                    computed_at = excluded.computed_at,
                    run_id = excluded.run_id
                 WHERE pillar_score.score IS NOT excluded.score",
                params![
                    format_date(date),
                    pillar.name(),
                    score,
                    computed_at.to_rfc3339(),
                    run_id,
                ],
            )?;
            tx.commit()?;
            Ok(n)
        })?;
        Ok(changed > 0)
    }

    pub fn pillar_scores_for_date(&self, date: ScoreDate) -> GovResult<Vec<PillarScoreRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT score_date, pillar, score, computed_at, run_id
             FROM pillar_score WHERE score_date = ?1
             ORDER BY pillar ASC",
        )?;
        let rows = stmt
            .query_map(params![format_date(date)], |row| {
                Ok(PillarScoreRow {
                    date:        date_col(row, 0)?,
                    pillar:      row.get(1)?,
                    score:       row.get(2)?,
                    computed_at: row.get(3)?,
                    run_id:      row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persisted pillar scores for a date as typed pairs, in pillar order.
    pub fn present_pillars(&self, date: ScoreDate) -> GovResult<Vec<(Pillar, f64)>> {
        let rows = self.pillar_scores_for_date(date)?;
        let mut present = Vec::with_capacity(rows.len());
        for pillar in Pillar::ALL {
            if let Some(row) = rows.iter().find(|r| r.pillar == pillar.name()) {
                present.push((pillar, row.score));
            }
        }
        Ok(present)
    }

    // ── Composite scores ───────────────────────────────────────────

    pub fn upsert_composite_score(
        &self,
        date: ScoreDate,
        outcome: &CompositeOutcome,
        computed_at: DateTime<Utc>,
        run_id: &str,
    ) -> GovResult<bool> {
        let changed = self.write_with_retry("composite_score", |conn| {
            let tx = begin_write(conn)?;
            tx.execute(
                "INSERT OR IGNORE INTO composite_score_prior
                    (score_date, score, status, degraded, pillar_count, computed_at, run_id,
                     replaced_by)
                 SELECT score_date, score, status, degraded, pillar_count, computed_at, run_id, ?2
                 FROM composite_score
                 WHERE score_date = ?1 AND run_id <> ?2
                   AND (score IS NOT ?3 OR status IS NOT ?4
                     OR degraded IS NOT ?5 OR pillar_count IS NOT ?6)",
                params![
                    format_date(date),
                    run_id,
                    outcome.score,
                    outcome.status.name(),
                    outcome.degraded,
                    outcome.pillar_count as i64,
                ],
            )?;
            let n = tx.execute(
                "INSERT INTO composite_score
                    (score_date, score, status, degraded, pillar_count, computed_at, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (score_date) DO UPDATE SET
                    score = excluded.score,
                    status = excluded.status,
                    degraded = excluded.degraded,
                    pillar_count = excluded.pillar_count,
                    computed_at = excluded.computed_at,
                    run_id = excluded.run_id
                 WHERE composite_score.score IS NOT excluded.score
                    OR composite_score.status IS NOT excluded.status
                    OR composite_score.degraded IS NOT excluded.degraded
                    OR composite_score.pillar_count IS NOT excluded.pillar_count",
                params![
                    format_date(date),
                    outcome.score,
                    outcome.status.name(),
                    outcome.degraded,
                    outcome.pillar_count as i64,
                    computed_at.to_rfc3339(),
                    run_id,
                ],
            )?;
            tx.commit()?;
            Ok(n)
        })?;
        Ok(changed > 0)
    }

    pub fn composite_for_date(&self, date: ScoreDate) -> GovResult<Option<CompositeScoreRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT score_date, score, status, degraded, pillar_count, computed_at, run_id
                 FROM composite_score WHERE score_date = ?1",
                params![format_date(date)],
                |row| {
                    Ok(CompositeScoreRow {
                        date:         date_col(row, 0)?,
                        score:        row.get(1)?,
                        status:       row.get(2)?,
                        degraded:     row.get(3)?,
                        pillar_count: row.get(4)?,
                        computed_at:  row.get(5)?,
                        run_id:       row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ── Trends ─────────────────────────────────────────────────────

    /// Ascending by date, one row per date, no gap filling.
    /// Collected eagerly; calling again re-reads from the database.
    pub fn trend(&self, series: Series, from: ScoreDate, to: ScoreDate) -> GovResult<Vec<TrendPoint>> {
        if from > to {
            return Err(GovError::InvalidRange(format!(
                "trend range {} > {}",
                format_date(from),
                format_date(to)
            )));
        }
        let (sql, args): (&str, Vec<String>) = match series {
            Series::Pillar(p) => (
                "SELECT score_date, score FROM pillar_score
                 WHERE pillar = ?1 AND score_date >= ?2 AND score_date <= ?3
                 ORDER BY score_date ASC",
                vec![p.name().to_string(), format_date(from), format_date(to)],
            ),
            Series::Composite => (
                "SELECT score_date, score FROM composite_score
                 WHERE score_date >= ?1 AND score_date <= ?2
                 ORDER BY score_date ASC",
                vec![format_date(from), format_date(to)],
            ),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let points = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok(TrendPoint { date: date_col(row, 0)?, score: row.get(1)? })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(points)
    }

    pub fn score_on(&self, series: Series, date: ScoreDate) -> GovResult<Option<f64>> {
        Ok(self.trend(series, date, date)?.first().map(|p| p.score))
    }

    /// Most recent recorded point strictly before `date`.
    pub fn previous_point(&self, series: Series, date: ScoreDate) -> GovResult<Option<TrendPoint>> {
        let (sql, args): (&str, Vec<String>) = match series {
            Series::Pillar(p) => (
                "SELECT score_date, score FROM pillar_score
                 WHERE pillar = ?1 AND score_date < ?2
                 ORDER BY score_date DESC LIMIT 1",
                vec![p.name().to_string(), format_date(date)],
            ),
            Series::Composite => (
                "SELECT score_date, score FROM composite_score
                 WHERE score_date < ?1
                 ORDER BY score_date DESC LIMIT 1",
                vec![format_date(date)],
            ),
        };
        let point = self
            .conn
            .query_row(sql, rusqlite::params_from_iter(args.iter()), |row| {
                Ok(TrendPoint { date: date_col(row, 0)?, score: row.get(1)? })
            })
            .optional()?;
        Ok(point)
    }

    /// Latest date with any recorded pillar score.
    pub fn latest_score_date(&self) -> GovResult<Option<ScoreDate>> {
        let raw: Option<String> = self.conn.query_row(
            "SELECT MAX(score_date) FROM pillar_score",
            [],
            |row| row.get(0),
        )?;
        raw.map(|s| crate::types::parse_date(&s))
            .transpose()
            .map_err(|e| GovError::Other(anyhow::anyhow!("corrupt score_date: {e}")))
    }
}
