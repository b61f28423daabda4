use super::{date_col, ForecastPointRow, GovStore};
use crate::{
    error::GovResult,
    types::{format_date, ScoreDate, Series},
};
use rusqlite::{params, OptionalExtension};

const FORECAST_COLUMNS: &str = "fp.series, fp.as_of_date, fp.horizon_days, fp.target_date,
    fp.predicted, fp.lower_bound, fp.upper_bound, fp.sigma, fp.method, fp.run_id";

impl GovStore {
    pub fn insert_forecast_point(&self, p: &ForecastPointRow) -> GovResult<()> {
        self.write_with_retry("forecast_point", |conn| {
            conn.execute(
                "INSERT INTO forecast_point
                    (series, as_of_date, horizon_days, target_date, predicted,
                     lower_bound, upper_bound, sigma, method, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    p.series,
                    format_date(p.as_of_date),
                    p.horizon_days,
                    format_date(p.target_date),
                    p.predicted,
                    p.lower_bound,
                    p.upper_bound,
                    p.sigma,
                    p.method,
                    p.run_id,
                ],
            )
        })?;
        Ok(())
    }

    /// The forecast that predicted `date` for `series`: target matches, made
    /// strictly before the date by a completed run or by `current_run`. A
    /// run left `running` by a crash never counts. The most recent as-of
    /// wins, then the latest run.
    pub fn forecast_for_target(
        &self,
        series: Series,
        date: ScoreDate,
        current_run: &str,
    ) -> GovResult<Option<ForecastPointRow>> {
        let sql = format!(
            "SELECT {FORECAST_COLUMNS}
             FROM forecast_point fp JOIN gov_run r ON r.run_id = fp.run_id
             WHERE fp.series = ?1 AND fp.target_date = ?2 AND fp.as_of_date < ?2
               AND (r.status = 'completed' OR fp.run_id = ?3)
             ORDER BY fp.as_of_date DESC, fp.id DESC
             LIMIT 1"
        );
        let row = self
            .conn
            .query_row(
                &sql,
                params![series.name(), format_date(date), current_run],
                map_forecast_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Authoritative forecast per horizon: the latest completed run's point
    /// for each (series, horizon).
    pub fn latest_forecasts(&self, series: Series) -> GovResult<Vec<ForecastPointRow>> {
        let sql = format!(
            "SELECT {FORECAST_COLUMNS}
             FROM forecast_point fp
             WHERE fp.series = ?1
               AND fp.id = (
                   SELECT MAX(f2.id)
                   FROM forecast_point f2 JOIN gov_run r2 ON r2.run_id = f2.run_id
                   WHERE f2.series = fp.series
                     AND f2.horizon_days = fp.horizon_days
                     AND r2.status = 'completed')
             ORDER BY fp.horizon_days ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![series.name()], map_forecast_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn forecasts_for_run(&self, run_id: &str) -> GovResult<Vec<ForecastPointRow>> {
        let sql = format!(
            "SELECT {FORECAST_COLUMNS}
             FROM forecast_point fp WHERE fp.run_id = ?1
             ORDER BY fp.series ASC, fp.horizon_days ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![run_id], map_forecast_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_forecast_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ForecastPointRow> {
    Ok(ForecastPointRow {
        series:       row.get(0)?,
        as_of_date:   date_col(row, 1)?,
        horizon_days: row.get(2)?,
        target_date:  date_col(row, 3)?,
        predicted:    row.get(4)?,
        lower_bound:  row.get(5)?,
        upper_bound:  row.get(6)?,
        sigma:        row.get(7)?,
        method:       row.get(8)?,
        run_id:       row.get(9)?,
    })
}
