//! Job repository: the `jobs` table and its aggregate counters.

use rusqlite::{params, Row};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{decimal_column, now_timestamp, Database, DatabaseError};
use crate::calculator::Thresholds;
use crate::model::{Classification, ItemState, JobStatus};

/// A raw job row from the database.
#[derive(Debug, Clone, Serialize)]
pub struct JobRow {
    pub id: String,
    pub status: JobStatus,
    pub point_rate_normal: Decimal,
    pub point_rate_bonus: Decimal,
    pub point_rate_total: Decimal,
    pub threshold_profit_amount: i64,
    pub threshold_profit_rate: Decimal,
    pub threshold_rank: i64,
    pub threshold_sales_30: i64,
    pub total_count: i64,
    pub success_count: i64,
    pub fail_count: i64,
    pub pass_count: i64,
    pub review_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            point_rate_normal: decimal_column(row, "point_rate_normal")?,
            point_rate_bonus: decimal_column(row, "point_rate_bonus")?,
            point_rate_total: decimal_column(row, "point_rate_total")?,
            threshold_profit_amount: row.get("threshold_profit_amount")?,
            threshold_profit_rate: decimal_column(row, "threshold_profit_rate")?,
            threshold_rank: row.get("threshold_rank")?,
            threshold_sales_30: row.get("threshold_sales_30")?,
            total_count: row.get("total_count")?,
            success_count: row.get("success_count")?,
            fail_count: row.get("fail_count")?,
            pass_count: row.get("pass_count")?,
            review_count: row.get("review_count")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            profit_amount: self.threshold_profit_amount,
            profit_rate: self.threshold_profit_rate,
            rank: self.threshold_rank,
            sales_30: self.threshold_sales_30,
        }
    }

    pub fn counts(&self) -> JobCounts {
        JobCounts {
            total: self.total_count,
            success: self.success_count,
            fail: self.fail_count,
            pass: self.pass_count,
            review: self.review_count,
        }
    }
}

/// Aggregate counters derived from item states.
///
/// `pass` and `review` only count items that reached `SUCCESS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub total: i64,
    pub success: i64,
    pub fail: i64,
    pub pass: i64,
    pub review: i64,
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a job and one `PENDING` item per identifier in a single
/// transaction. Identifiers must already be normalized and de-duplicated.
pub fn insert_with_items(
    db: &Database,
    job: &JobRow,
    identifiers: &[String],
) -> Result<(), DatabaseError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO jobs (id, status, point_rate_normal, point_rate_bonus, point_rate_total,
             threshold_profit_amount, threshold_profit_rate, threshold_rank, threshold_sales_30,
             total_count, success_count, fail_count, pass_count, review_count,
             created_at, updated_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                job.id,
                job.status,
                job.point_rate_normal.to_string(),
                job.point_rate_bonus.to_string(),
                job.point_rate_total.to_string(),
                job.threshold_profit_amount,
                job.threshold_profit_rate.to_string(),
                job.threshold_rank,
                job.threshold_sales_30,
                job.total_count,
                job.success_count,
                job.fail_count,
                job.pass_count,
                job.review_count,
                job.created_at,
                job.updated_at,
                job.started_at,
                job.completed_at,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO items (job_id, identifier, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
            )?;
            for identifier in identifiers {
                stmt.execute(params![job.id, identifier, ItemState::Pending, job.created_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs newest first, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(50) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Moves a job to `status`. Entering `RUNNING` stamps `started_at`; entering
/// `DONE` or `FAILED` stamps `completed_at`; returning to `PENDING` clears it.
pub fn update_status(db: &Database, id: &str, status: JobStatus) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        let sql = match status {
            JobStatus::Running => {
                "UPDATE jobs SET status = ?2, updated_at = ?3, started_at = ?3,
                 completed_at = NULL WHERE id = ?1"
            }
            JobStatus::Done | JobStatus::Failed => {
                "UPDATE jobs SET status = ?2, updated_at = ?3, completed_at = ?3 WHERE id = ?1"
            }
            JobStatus::Pending => {
                "UPDATE jobs SET status = ?2, updated_at = ?3, completed_at = NULL WHERE id = ?1"
            }
        };
        conn.execute(sql, params![id, status, now])?;
        Ok(())
    })
}

/// Recomputes the job's counters from the current item states and stores
/// them. Reads and writes under one lock, so running it twice without item
/// changes yields identical counters.
pub fn recompute_counts(db: &Database, id: &str) -> Result<JobCounts, DatabaseError> {
    let now = now_timestamp();
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let mut counts = JobCounts::default();
        {
            let mut stmt = tx.prepare(
                "SELECT state, classification, COUNT(*) FROM items
                 WHERE job_id = ?1 GROUP BY state, classification",
            )?;
            let groups = stmt.query_map(params![id], |r| {
                Ok((
                    r.get::<_, ItemState>(0)?,
                    r.get::<_, Option<Classification>>(1)?,
                    r.get::<_, i64>(2)?,
                ))
            })?;
            for group in groups {
                let (state, classification, count) = group?;
                counts.total += count;
                match state {
                    ItemState::Success => {
                        counts.success += count;
                        match classification {
                            Some(Classification::Pass) => counts.pass += count,
                            Some(Classification::Review) => counts.review += count,
                            _ => {}
                        }
                    }
                    ItemState::Failed => counts.fail += count,
                    _ => {}
                }
            }
        }
        tx.execute(
            "UPDATE jobs SET total_count = ?2, success_count = ?3, fail_count = ?4,
             pass_count = ?5, review_count = ?6, updated_at = ?7 WHERE id = ?1",
            params![
                id,
                counts.total,
                counts.success,
                counts.fail,
                counts.pass,
                counts.review,
                now
            ],
        )?;
        tx.commit()?;
        Ok(counts)
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::item_repo;

    pub(crate) fn sample_job(id: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            status: JobStatus::Pending,
            point_rate_normal: Decimal::new(1, 2),
            point_rate_bonus: Decimal::new(7, 2),
            point_rate_total: Decimal::new(8, 2),
            threshold_profit_amount: 1000,
            threshold_profit_rate: Decimal::new(15, 2),
            threshold_rank: 50_000,
            threshold_sales_30: 10,
            total_count: 0,
            success_count: 0,
            fail_count: 0,
            pass_count: 0,
            review_count: 0,
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    fn identifiers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        let mut job = sample_job("job-1");
        job.total_count = 2;
        insert_with_items(&db, &job, &identifiers(&["B000000001", "B000000002"])).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.point_rate_total, Decimal::new(8, 2));
        assert_eq!(found.total_count, 2);

        let items = item_repo::list_for_job(&db, "job-1").unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.state == ItemState::Pending));
    }

    #[test]
    fn test_find_nonexistent() {
        let db = Database::open_in_memory().unwrap();
        assert!(find_by_id(&db, "nope").unwrap().is_none());
    }

    #[test]
    fn test_insert_rolls_back_on_duplicate_identifier() {
        let db = Database::open_in_memory().unwrap();
        let result = insert_with_items(
            &db,
            &sample_job("job-dup"),
            &identifiers(&["B000000001", "B000000001"]),
        );
        assert!(result.is_err());
        assert!(find_by_id(&db, "job-dup").unwrap().is_none());
    }

    #[test]
    fn test_query_with_status_filter() {
        let db = Database::open_in_memory().unwrap();
        insert_with_items(&db, &sample_job("a"), &[]).unwrap();
        let mut done = sample_job("b");
        done.status = JobStatus::Done;
        insert_with_items(&db, &done, &[]).unwrap();

        let (rows, total) = query(&db, &JobFilter::default()).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);

        let (rows, total) = query(
            &db,
            &JobFilter {
                status: Some(JobStatus::Done),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, "b");
    }

    #[test]
    fn test_query_pagination() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            insert_with_items(&db, &sample_job(&format!("p{}", i)), &[]).unwrap();
        }
        let (rows, total) = query(
            &db,
            &JobFilter {
                limit: Some(2),
                offset: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 5);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_update_status_stamps_times() {
        let db = Database::open_in_memory().unwrap();
        insert_with_items(&db, &sample_job("s1"), &[]).unwrap();

        update_status(&db, "s1", JobStatus::Running).unwrap();
        let running = find_by_id(&db, "s1").unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        update_status(&db, "s1", JobStatus::Done).unwrap();
        let done = find_by_id(&db, "s1").unwrap().unwrap();
        assert!(done.completed_at.is_some());

        update_status(&db, "s1", JobStatus::Pending).unwrap();
        let pending = find_by_id(&db, "s1").unwrap().unwrap();
        assert!(pending.completed_at.is_none());
    }

    #[test]
    fn test_recompute_counts_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        insert_with_items(
            &db,
            &sample_job("c1"),
            &identifiers(&["B000000001", "B000000002", "B000000003", "B000000004"]),
        )
        .unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "UPDATE items SET state = 'SUCCESS', classification = 'PASS' WHERE identifier = 'B000000001';
                 UPDATE items SET state = 'SUCCESS', classification = 'REVIEW' WHERE identifier = 'B000000002';
                 UPDATE items SET state = 'FAILED', fail_reason = 'boom' WHERE identifier = 'B000000003';",
            )?;
            Ok(())
        })
        .unwrap();

        let first = recompute_counts(&db, "c1").unwrap();
        let second = recompute_counts(&db, "c1").unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first,
            JobCounts {
                total: 4,
                success: 2,
                fail: 1,
                pass: 1,
                review: 1,
            }
        );
        assert_eq!(find_by_id(&db, "c1").unwrap().unwrap().counts(), first);
    }
}
