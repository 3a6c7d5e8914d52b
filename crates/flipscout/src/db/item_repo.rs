//! Item repository: per-identifier research rows inside a job.
//!
//! The pipeline owns every column except `is_candidate` and `user_note`,
//! which only `update_candidate` writes.

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{now_timestamp, optional_decimal_column, Database, DatabaseError};
use crate::model::{Classification, ItemState, MatchType, RestrictionStatus, ShippingStatus};

/// A raw item row from the database.
#[derive(Debug, Clone, Serialize)]
pub struct ItemRow {
    pub id: i64,
    pub job_id: String,
    pub identifier: String,
    pub state: ItemState,
    pub fail_reason: Option<String>,

    pub title: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub catalog_code: Option<String>,
    pub model_number: Option<String>,
    pub rank_current: Option<i64>,
    pub rank_avg_30: Option<i64>,
    pub rank_avg_90: Option<i64>,
    pub sales_30: Option<i64>,
    pub sales_90: Option<i64>,
    pub sales_180: Option<i64>,
    pub seller_count: Option<i64>,
    pub fulfilled_seller_count: Option<i64>,

    pub sell_price: Option<i64>,
    pub fee_referral: Option<i64>,
    pub fee_fulfillment: Option<i64>,
    pub fee_other: Option<i64>,
    pub fee_total: Option<i64>,
    pub payout: Option<i64>,
    pub listing_restricted: Option<bool>,
    pub listing_restriction_status: Option<RestrictionStatus>,

    pub match_type: Option<MatchType>,
    pub buy_item_name: Option<String>,
    pub buy_shop_name: Option<String>,
    pub buy_item_url: Option<String>,
    pub buy_price: Option<i64>,
    pub buy_shipping: Option<i64>,
    pub buy_shipping_status: Option<ShippingStatus>,
    pub buy_point_amount: Option<i64>,
    pub buy_cost_gross: Option<i64>,
    pub buy_cost_net: Option<i64>,

    pub profit_amount: Option<i64>,
    pub profit_rate: Option<Decimal>,
    pub classification: Option<Classification>,
    pub reasons: Vec<String>,

    pub is_candidate: bool,
    pub user_note: Option<String>,

    pub fetched_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let reasons: Option<String> = row.get("reasons")?;
        let reasons = match reasons {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            identifier: row.get("identifier")?,
            state: row.get("state")?,
            fail_reason: row.get("fail_reason")?,
            title: row.get("title")?,
            brand: row.get("brand")?,
            category: row.get("category")?,
            catalog_code: row.get("catalog_code")?,
            model_number: row.get("model_number")?,
            rank_current: row.get("rank_current")?,
            rank_avg_30: row.get("rank_avg_30")?,
            rank_avg_90: row.get("rank_avg_90")?,
            sales_30: row.get("sales_30")?,
            sales_90: row.get("sales_90")?,
            sales_180: row.get("sales_180")?,
            seller_count: row.get("seller_count")?,
            fulfilled_seller_count: row.get("fulfilled_seller_count")?,
            sell_price: row.get("sell_price")?,
            fee_referral: row.get("fee_referral")?,
            fee_fulfillment: row.get("fee_fulfillment")?,
            fee_other: row.get("fee_other")?,
            fee_total: row.get("fee_total")?,
            payout: row.get("payout")?,
            listing_restricted: row.get("listing_restricted")?,
            listing_restriction_status: row.get("listing_restriction_status")?,
            match_type: row.get("match_type")?,
            buy_item_name: row.get("buy_item_name")?,
            buy_shop_name: row.get("buy_shop_name")?,
            buy_item_url: row.get("buy_item_url")?,
            buy_price: row.get("buy_price")?,
            buy_shipping: row.get("buy_shipping")?,
            buy_shipping_status: row.get("buy_shipping_status")?,
            buy_point_amount: row.get("buy_point_amount")?,
            buy_cost_gross: row.get("buy_cost_gross")?,
            buy_cost_net: row.get("buy_cost_net")?,
            profit_amount: row.get("profit_amount")?,
            profit_rate: optional_decimal_column(row, "profit_rate")?,
            classification: row.get("classification")?,
            reasons,
            is_candidate: row.get("is_candidate")?,
            user_note: row.get("user_note")?,
            fetched_at: row.get("fetched_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Everything the pipeline writes when an item reaches `SUCCESS`.
///
/// Fields left `None` are stored as NULL, so a screened-out item carries no
/// stale sell-side or buy-side values from an earlier attempt.
#[derive(Debug, Clone, Default)]
pub struct ItemOutcome {
    pub title: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub catalog_code: Option<String>,
    pub model_number: Option<String>,
    pub rank_current: Option<i64>,
    pub rank_avg_30: Option<i64>,
    pub rank_avg_90: Option<i64>,
    pub sales_30: Option<i64>,
    pub sales_90: Option<i64>,
    pub sales_180: Option<i64>,
    pub seller_count: Option<i64>,
    pub fulfilled_seller_count: Option<i64>,

    pub sell_price: Option<i64>,
    pub fee_referral: Option<i64>,
    pub fee_fulfillment: Option<i64>,
    pub fee_other: Option<i64>,
    pub fee_total: Option<i64>,
    pub payout: Option<i64>,
    pub listing_restricted: Option<bool>,
    pub listing_restriction_status: Option<RestrictionStatus>,

    pub match_type: Option<MatchType>,
    pub buy_item_name: Option<String>,
    pub buy_shop_name: Option<String>,
    pub buy_item_url: Option<String>,
    pub buy_price: Option<i64>,
    pub buy_shipping: Option<i64>,
    pub buy_shipping_status: Option<ShippingStatus>,
    pub buy_point_amount: Option<i64>,
    pub buy_cost_gross: Option<i64>,
    pub buy_cost_net: Option<i64>,

    pub profit_amount: Option<i64>,
    pub profit_rate: Option<Decimal>,
    pub classification: Option<Classification>,
    pub reasons: Vec<String>,
}

/// Sortable item columns. Names outside this list are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemSortKey {
    #[default]
    ProfitAmount,
    ProfitRate,
    Payout,
    RankCurrent,
    Sales30,
    SellPrice,
    BuyCostNet,
    Identifier,
    CreatedAt,
}

impl ItemSortKey {
    pub const ALL: [ItemSortKey; 9] = [
        Self::ProfitAmount,
        Self::ProfitRate,
        Self::Payout,
        Self::RankCurrent,
        Self::Sales30,
        Self::SellPrice,
        Self::BuyCostNet,
        Self::Identifier,
        Self::CreatedAt,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ProfitAmount => "profit_amount",
            Self::ProfitRate => "profit_rate",
            Self::Payout => "payout",
            Self::RankCurrent => "rank_current",
            Self::Sales30 => "sales_30",
            Self::SellPrice => "sell_price",
            Self::BuyCostNet => "buy_cost_net",
            Self::Identifier => "identifier",
            Self::CreatedAt => "created_at",
        }
    }

    /// The SQL expression ordered on. `profit_rate` is stored as decimal text
    /// and must be compared numerically.
    fn sql_expr(&self) -> &'static str {
        match self {
            Self::ProfitRate => "CAST(profit_rate AS REAL)",
            Self::CreatedAt => "id",
            other => other.name(),
        }
    }
}

impl fmt::Display for ItemSortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ItemSortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.name() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
                format!(
                    "unknown sort key '{}' (allowed: {})",
                    s,
                    allowed.join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("unknown sort order '{}' (allowed: asc, desc)", other)),
        }
    }
}

/// Query parameters for item listing within one job.
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub job_id: String,
    pub classification: Option<Classification>,
    pub is_candidate: Option<bool>,
    pub sort: ItemSortKey,
    pub order: SortOrder,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Classification histogram for one job. Items without a classification
/// (pending, failed, skipped) land in `unclassified`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationCounts {
    pub pass: i64,
    pub fail: i64,
    pub review: i64,
    pub unclassified: i64,
}

fn find_one(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Option<ItemRow>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query_map(params, ItemRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ItemRow>, DatabaseError> {
    db.with_conn(|conn| find_one(conn, "SELECT * FROM items WHERE id = ?1", &[&id]))
}

pub fn find_by_identifier(
    db: &Database,
    job_id: &str,
    identifier: &str,
) -> Result<Option<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        find_one(
            conn,
            "SELECT * FROM items WHERE job_id = ?1 AND identifier = ?2",
            &[&job_id, &identifier],
        )
    })
}

/// All items of a job in submission order.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM items WHERE job_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![job_id], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Up to `limit` `PENDING` items of a job, in submission order.
pub fn list_pending(
    db: &Database,
    job_id: &str,
    limit: usize,
) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM items WHERE job_id = ?1 AND state = ?2 ORDER BY id LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![job_id, ItemState::Pending, limit as i64],
                ItemRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves one item `PENDING -> PROCESSING`. Returns `false` if the item was
/// no longer pending, which makes a repeated run of the same job harmless.
pub fn claim(db: &Database, item_id: i64) -> Result<bool, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE items SET state = ?2, updated_at = ?3 WHERE id = ?1 AND state = ?4",
            params![item_id, ItemState::Processing, now, ItemState::Pending],
        )?;
        Ok(changed == 1)
    })
}

/// Returns items stuck in `PROCESSING` (an interrupted run) to `PENDING`.
pub fn reset_stale_processing(db: &Database, job_id: &str) -> Result<usize, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE items SET state = ?2, updated_at = ?3 WHERE job_id = ?1 AND state = ?4",
            params![job_id, ItemState::Pending, now, ItemState::Processing],
        )?;
        Ok(changed)
    })
}

/// Terminal `FAILED` with a reason. The caller truncates the reason.
pub fn mark_failed(db: &Database, item_id: i64, reason: &str) -> Result<(), DatabaseError> {
    set_terminal(db, item_id, ItemState::Failed, reason)
}

/// Terminal `SKIPPED` with a reason.
pub fn mark_skipped(db: &Database, item_id: i64, reason: &str) -> Result<(), DatabaseError> {
    set_terminal(db, item_id, ItemState::Skipped, reason)
}

fn set_terminal(
    db: &Database,
    item_id: i64,
    state: ItemState,
    reason: &str,
) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE items SET state = ?2, fail_reason = ?3, updated_at = ?4 WHERE id = ?1",
            params![item_id, state, reason, now],
        )?;
        Ok(())
    })
}

/// Stores a finished evaluation and moves the item to `SUCCESS`.
pub fn save_outcome(
    db: &Database,
    item_id: i64,
    outcome: &ItemOutcome,
) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    let reasons = reasons_json(&outcome.reasons)?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE items SET
                state = ?2, fail_reason = NULL,
                title = ?3, brand = ?4, category = ?5, catalog_code = ?6, model_number = ?7,
                rank_current = ?8, rank_avg_30 = ?9, rank_avg_90 = ?10,
                sales_30 = ?11, sales_90 = ?12, sales_180 = ?13,
                seller_count = ?14, fulfilled_seller_count = ?15,
                sell_price = ?16, fee_referral = ?17, fee_fulfillment = ?18, fee_other = ?19,
                fee_total = ?20, payout = ?21,
                listing_restricted = ?22, listing_restriction_status = ?23,
                match_type = ?24, buy_item_name = ?25, buy_shop_name = ?26, buy_item_url = ?27,
                buy_price = ?28, buy_shipping = ?29, buy_shipping_status = ?30,
                buy_point_amount = ?31, buy_cost_gross = ?32, buy_cost_net = ?33,
                profit_amount = ?34, profit_rate = ?35, classification = ?36, reasons = ?37,
                fetched_at = ?38, updated_at = ?38
             WHERE id = ?1",
            params![
                item_id,
                ItemState::Success,
                outcome.title,
                outcome.brand,
                outcome.category,
                outcome.catalog_code,
                outcome.model_number,
                outcome.rank_current,
                outcome.rank_avg_30,
                outcome.rank_avg_90,
                outcome.sales_30,
                outcome.sales_90,
                outcome.sales_180,
                outcome.seller_count,
                outcome.fulfilled_seller_count,
                outcome.sell_price,
                outcome.fee_referral,
                outcome.fee_fulfillment,
                outcome.fee_other,
                outcome.fee_total,
                outcome.payout,
                outcome.listing_restricted,
                outcome.listing_restriction_status,
                outcome.match_type,
                outcome.buy_item_name,
                outcome.buy_shop_name,
                outcome.buy_item_url,
                outcome.buy_price,
                outcome.buy_shipping,
                outcome.buy_shipping_status,
                outcome.buy_point_amount,
                outcome.buy_cost_gross,
                outcome.buy_cost_net,
                outcome.profit_amount,
                outcome.profit_rate.map(|r| r.to_string()),
                outcome.classification,
                reasons,
                now,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites only the computed profit and verdict columns of an item.
pub fn update_evaluation(
    db: &Database,
    item_id: i64,
    payout: Option<i64>,
    profit_amount: Option<i64>,
    profit_rate: Option<Decimal>,
    classification: Classification,
    reasons: &[String],
) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    let reasons = reasons_json(reasons)?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE items SET payout = ?2, profit_amount = ?3, profit_rate = ?4,
             classification = ?5, reasons = ?6, updated_at = ?7 WHERE id = ?1",
            params![
                item_id,
                payout,
                profit_amount,
                profit_rate.map(|r| r.to_string()),
                classification,
                reasons,
                now
            ],
        )?;
        Ok(())
    })
}

/// Resets every `FAILED` item of a job to `PENDING` and clears its reason.
/// Returns the number of items reset.
pub fn reset_failed(db: &Database, job_id: &str) -> Result<usize, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE items SET state = ?2, fail_reason = NULL, updated_at = ?3
             WHERE job_id = ?1 AND state = ?4",
            params![job_id, ItemState::Pending, now, ItemState::Failed],
        )?;
        Ok(changed)
    })
}

/// Sets the user-owned candidate flag. The note is only replaced when given.
/// Returns `false` if no such item exists.
pub fn update_candidate(
    db: &Database,
    item_id: i64,
    is_candidate: bool,
    note: Option<&str>,
) -> Result<bool, DatabaseError> {
    let now = now_timestamp();
    db.with_conn(|conn| {
        let changed = match note {
            Some(note) => conn.execute(
                "UPDATE items SET is_candidate = ?2, user_note = ?3, updated_at = ?4 WHERE id = ?1",
                params![item_id, is_candidate, note, now],
            )?,
            None => conn.execute(
                "UPDATE items SET is_candidate = ?2, updated_at = ?3 WHERE id = ?1",
                params![item_id, is_candidate, now],
            )?,
        };
        Ok(changed == 1)
    })
}

/// Filtered, sorted, paginated listing. NULLs sort last in both directions.
pub fn query(db: &Database, q: &ItemQuery) -> Result<(Vec<ItemRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = vec!["job_id = ?1".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(q.job_id.clone())];

        if let Some(classification) = q.classification {
            conditions.push(format!("classification = ?{}", param_values.len() + 1));
            param_values.push(Box::new(classification));
        }
        if let Some(is_candidate) = q.is_candidate {
            conditions.push(format!("is_candidate = ?{}", param_values.len() + 1));
            param_values.push(Box::new(is_candidate));
        }

        let where_clause = format!("WHERE {}", conditions.join(" AND "));

        let count_sql = format!("SELECT COUNT(*) FROM items {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let expr = q.sort.sql_expr();
        let direction = match q.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let limit = q.limit.unwrap_or(50) as i64;
        let offset = q.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM items {} ORDER BY ({}) IS NULL, {} {}, id ASC LIMIT ?{} OFFSET ?{}",
            where_clause,
            expr,
            expr,
            direction,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

pub fn classification_counts(
    db: &Database,
    job_id: &str,
) -> Result<ClassificationCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT classification, COUNT(*) FROM items WHERE job_id = ?1 GROUP BY classification",
        )?;
        let groups = stmt.query_map(params![job_id], |r| {
            Ok((r.get::<_, Option<Classification>>(0)?, r.get::<_, i64>(1)?))
        })?;

        let mut counts = ClassificationCounts::default();
        for group in groups {
            let (classification, count) = group?;
            match classification {
                Some(Classification::Pass) => counts.pass += count,
                Some(Classification::Fail) => counts.fail += count,
                Some(Classification::Review) => counts.review += count,
                None => counts.unclassified += count,
            }
        }
        Ok(counts)
    })
}

/// Items flagged as purchase candidates, most profitable first.
pub fn list_candidates(
    db: &Database,
    job_id: Option<&str>,
) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let order = "ORDER BY profit_amount IS NULL, profit_amount DESC, id ASC";
        let rows = match job_id {
            Some(job_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT * FROM items WHERE is_candidate = 1 AND job_id = ?1 {}",
                    order
                ))?;
                let rows = stmt
                    .query_map(params![job_id], ItemRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT * FROM items WHERE is_candidate = 1 {}",
                    order
                ))?;
                let rows = stmt
                    .query_map([], ItemRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}

fn reasons_json(reasons: &[String]) -> Result<Option<String>, DatabaseError> {
    if reasons.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(reasons)
        .map(Some)
        .map_err(|e| DatabaseError::CorruptValue {
            column: "reasons".to_string(),
            reason: e.to_string(),
        })
}
