//! Archival price and rank history per item.

use chrono::NaiveDate;
use rusqlite::params;
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::model::Metric;

/// One dated observation. The date is the calendar day in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeseriesPoint {
    pub metric: Metric,
    pub recorded_date: NaiveDate,
    pub value: i64,
}

/// Inserts points, overwriting existing values for the same day and metric.
pub fn upsert_points(
    db: &Database,
    job_id: &str,
    identifier: &str,
    source: &str,
    points: &[TimeseriesPoint],
) -> Result<usize, DatabaseError> {
    if points.is_empty() {
        return Ok(0);
    }
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO timeseries
                    (job_id, identifier, metric, recorded_date, value, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for point in points {
                written += stmt.execute(params![
                    job_id,
                    identifier,
                    point.metric,
                    point.recorded_date.format("%Y-%m-%d").to_string(),
                    point.value,
                    source,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    })
}

/// Points of one item and metric, oldest first.
pub fn list_for_item(
    db: &Database,
    job_id: &str,
    identifier: &str,
    metric: Metric,
) -> Result<Vec<TimeseriesPoint>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT metric, recorded_date, value FROM timeseries
             WHERE job_id = ?1 AND identifier = ?2 AND metric = ?3
             ORDER BY recorded_date",
        )?;
        let raw = stmt
            .query_map(params![job_id, identifier, metric], |r| {
                Ok((
                    r.get::<_, Metric>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(metric, date, value)| {
                let recorded_date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
                    DatabaseError::CorruptValue {
                        column: "recorded_date".to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(TimeseriesPoint {
                    metric,
                    recorded_date,
                    value,
                })
            })
            .collect()
    })
}
