//! Response cache with a single process-wide lifetime.
//!
//! Entries live in the `api_cache` table. A read only hits when
//! `now < expires_at`; expired rows stay in place until a later `put` for the
//! same key supersedes them.
//!
//! [`CacheLayer::get_or_fetch`] allows one fetch per key at a time. Callers
//! that miss while another fetch of the same key is running wait for it and
//! read its result from the cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::db::cache_repo::{self, CacheRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// Which lookup produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Demand,
    SellSideOffers,
    SellSideFees,
    SellSideCatalog,
    SellSideRestrictions,
    BuySideSearch,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Demand => "DEMAND",
            Self::SellSideOffers => "SELL_SIDE_OFFERS",
            Self::SellSideFees => "SELL_SIDE_FEES",
            Self::SellSideCatalog => "SELL_SIDE_CATALOG",
            Self::SellSideRestrictions => "SELL_SIDE_RESTRICTIONS",
            Self::BuySideSearch => "BUY_SIDE_SEARCH",
        }
    }
}

pub fn demand_key(identifier: &str) -> String {
    format!("demand_product_{}", identifier)
}

pub fn offers_key(identifier: &str) -> String {
    format!("sell_side_offers_{}", identifier)
}

/// Fee estimates depend on the price, so each price caches separately.
pub fn fees_key(identifier: &str, price: i64) -> String {
    format!("sell_side_fees_{}_{}", identifier, price)
}

pub fn catalog_key(identifier: &str) -> String {
    format!("sell_side_catalog_{}", identifier)
}

pub fn restrictions_key(identifier: &str) -> String {
    format!("sell_side_restrictions_{}", identifier)
}

/// Search results are shared by every item that searches the same term.
pub fn search_key(term: &str) -> String {
    format!("buy_side_search_{}", term.trim())
}

type KeyLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

#[derive(Clone)]
pub struct CacheLayer {
    db: Database,
    ttl_seconds: u64,
    in_flight: KeyLocks,
}

impl CacheLayer {
    pub fn new(db: Database, ttl_seconds: u64) -> Self {
        Self {
            db,
            ttl_seconds,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>, DatabaseError> {
        let Some(row) = cache_repo::find(&self.db, key)? else {
            return Ok(None);
        };
        let expires_at = parse_timestamp("expires_at", &row.expires_at)?;
        if now < expires_at {
            Ok(Some(row.payload))
        } else {
            log::debug!("Cache entry '{}' expired at {}", key, row.expires_at);
            Ok(None)
        }
    }

    pub fn put(
        &self,
        key: &str,
        source: CacheSource,
        params: &serde_json::Value,
        payload: &str,
    ) -> Result<(), DatabaseError> {
        self.put_at(key, source, params, payload, Utc::now())
    }

    pub fn put_at(
        &self,
        key: &str,
        source: CacheSource,
        params: &serde_json::Value,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let row = CacheRow {
            cache_key: key.to_string(),
            source: source.as_str().to_string(),
            request_params: Some(params.to_string()),
            payload: payload.to_string(),
            fetched_at: format_timestamp(now),
            expires_at: format_timestamp(self.expiry(key, now)?),
        };
        cache_repo::replace(&self.db, &row)
    }

    fn expiry(&self, key: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, DatabaseError> {
        i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| DatabaseError::ExpiryOutOfRange {
                key: key.to_string(),
                ttl_seconds: self.ttl_seconds,
            })
    }

    /// Typed read. A payload that no longer decodes counts as a miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DatabaseError> {
        let Some(payload) = self.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::warn!("Ignoring undecodable cache entry '{}': {}", key, e);
                Ok(None)
            }
        }
    }

    pub fn put_json<T: Serialize>(
        &self,
        key: &str,
        source: CacheSource,
        params: &serde_json::Value,
        value: &T,
    ) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(value).map_err(|e| DatabaseError::CorruptValue {
            column: "payload".to_string(),
            reason: e.to_string(),
        })?;
        self.put(key, source, params, &payload)
    }

    /// Waits until no other fetch of `key` is running and returns a guard
    /// that keeps it that way until dropped.
    pub async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Cached value for `key`, or the result of `fetch`.
    ///
    /// The fetch runs with the key locked and the cache is read again once
    /// the lock is held, so concurrent misses on one key make one request.
    /// `Ok(Some(_))` from `fetch` is stored; `Ok(None)` and errors are not.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        source: CacheSource,
        params: &serde_json::Value,
        fetch: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<DatabaseError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(cached) = self.get_json::<T>(key)? {
            log::debug!("Cache hit: {}", key);
            return Ok(Some(cached));
        }

        let _guard = self.lock_key(key).await;
        if let Some(cached) = self.get_json::<T>(key)? {
            log::debug!("Cache filled while waiting: {}", key);
            return Ok(Some(cached));
        }

        let Some(value) = fetch().await? else {
            return Ok(None);
        };
        self.put_json(key, source, params, &value)?;
        Ok(Some(value))
    }
}
