//! Sourcing candidate repository.
//!
//! Candidates are derived data: every matcher run replaces the full set for
//! an item instead of appending to it.

use rusqlite::{params, Row};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{decimal_column, now_timestamp, Database, DatabaseError};
use crate::matcher::SourcingCandidate;
use crate::model::{MatchType, ShippingStatus};

#[derive(Debug, Clone, Serialize)]
pub struct CandidateRow {
    pub id: i64,
    pub job_id: String,
    pub identifier: String,
    pub position: i64,
    pub match_type: MatchType,
    pub match_value: Option<String>,
    pub listing_code: Option<String>,
    pub item_name: Option<String>,
    pub item_url: Option<String>,
    pub shop_code: Option<String>,
    pub shop_name: Option<String>,
    pub price: i64,
    pub shipping: Option<i64>,
    pub shipping_status: ShippingStatus,
    pub gross_cost: i64,
    pub point_rate: Decimal,
    pub point_amount: i64,
    pub net_cost: i64,
    pub is_chosen: bool,
    pub created_at: String,
}

impl CandidateRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            identifier: row.get("identifier")?,
            position: row.get("position")?,
            match_type: row.get("match_type")?,
            match_value: row.get("match_value")?,
            listing_code: row.get("listing_code")?,
            item_name: row.get("item_name")?,
            item_url: row.get("item_url")?,
            shop_code: row.get("shop_code")?,
            shop_name: row.get("shop_name")?,
            price: row.get("price")?,
            shipping: row.get("shipping")?,
            shipping_status: row.get("shipping_status")?,
            gross_cost: row.get("gross_cost")?,
            point_rate: decimal_column(row, "point_rate")?,
            point_amount: row.get("point_amount")?,
            net_cost: row.get("net_cost")?,
            is_chosen: row.get("is_chosen")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Deletes the item's previous candidates and inserts `candidates` in their
/// given order, in one transaction.
pub fn replace_for_item(
    db: &Database,
    job_id: &str,
    identifier: &str,
    candidates: &[SourcingCandidate],
) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM sourcing_candidates WHERE job_id = ?1 AND identifier = ?2",
            params![job_id, identifier],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sourcing_candidates (
                    job_id, identifier, position, match_type, match_value, listing_code,
                    item_name, item_url, shop_code, shop_name, price, shipping,
                    shipping_status, gross_cost, point_rate, point_amount, net_cost,
                    is_chosen, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                           ?16, ?17, ?18, ?19)",
            )?;
            for (position, c) in candidates.iter().enumerate() {
                stmt.execute(params![
                    job_id,
                    identifier,
                    position as i64,
                    c.match_type,
                    c.match_value,
                    c.listing_code,
                    c.item_name,
                    c.item_url,
                    c.shop_code,
                    c.shop_name,
                    c.price,
                    c.shipping,
                    c.shipping_status,
                    c.gross_cost,
                    c.point_rate.to_string(),
                    c.point_amount,
                    c.net_cost,
                    c.is_chosen,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
}

/// Candidates of one item, cheapest first (persisted position order).
pub fn list_for_item(
    db: &Database,
    job_id: &str,
    identifier: &str,
) -> Result<Vec<CandidateRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM sourcing_candidates
             WHERE job_id = ?1 AND identifier = ?2 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![job_id, identifier], CandidateRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
