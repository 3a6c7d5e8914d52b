//! Cache entry repository: the `api_cache` table.
//!
//! Expiry is not enforced here; `cache::CacheLayer` compares `expires_at`
//! against its own clock.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub cache_key: String,
    pub source: String,
    pub request_params: Option<String>,
    pub payload: String,
    pub fetched_at: String,
    pub expires_at: String,
}

impl CacheRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            cache_key: row.get("cache_key")?,
            source: row.get("source")?,
            request_params: row.get("request_params")?,
            payload: row.get("payload")?,
            fetched_at: row.get("fetched_at")?,
            expires_at: row.get("expires_at")?,
        })
    }
}

pub fn find(db: &Database, cache_key: &str) -> Result<Option<CacheRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM api_cache WHERE cache_key = ?1",
                params![cache_key],
                CacheRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Replaces any entry under the same key (delete then insert, one transaction).
pub fn replace(db: &Database, entry: &CacheRow) -> Result<(), DatabaseError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM api_cache WHERE cache_key = ?1",
            params![entry.cache_key],
        )?;
        tx.execute(
            "INSERT INTO api_cache (cache_key, source, request_params, payload, fetched_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.cache_key,
                entry.source,
                entry.request_params,
                entry.payload,
                entry.fetched_at,
                entry.expires_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, payload: &str) -> CacheRow {
        CacheRow {
            cache_key: key.to_string(),
            source: "DEMAND".to_string(),
            request_params: Some(r#"{"identifier":"B000000001"}"#.to_string()),
            payload: payload.to_string(),
            fetched_at: "2026-01-01T00:00:00.000Z".to_string(),
            expires_at: "2026-01-02T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_find_missing() {
        let db = Database::open_in_memory().unwrap();
        assert!(find(&db, "nope").unwrap().is_none());
    }

    #[test]
    fn test_replace_supersedes() {
        let db = Database::open_in_memory().unwrap();
        replace(&db, &row("k", "{\"v\":1}")).unwrap();
        replace(&db, &row("k", "{\"v\":2}")).unwrap();

        let found = find(&db, "k").unwrap().unwrap();
        assert_eq!(found.payload, "{\"v\":2}");

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM api_cache", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
