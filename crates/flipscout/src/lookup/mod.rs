//! External lookup clients.
//!
//! Each source sits behind a capability trait so the pipeline holds
//! `Arc<dyn ...>` handles and never cares whether a provider is configured:
//! an unconfigured provider is wired as [`DisabledSource`].
//!
//! Every real client goes through [`CacheLayer::get_or_fetch`]: a miss holds
//! the key while it throttles through its own [`RateLimiter`] and fetches, so
//! concurrent callers on one key make one request. The normalized record is
//! cached rather than the provider payload. Transport and HTTP failures are
//! returned to the caller and leave the cache untouched.

mod buy_side;
mod demand;
mod disabled;
mod error;
mod http;
mod rate_limit;
mod sell_side;
mod types;

use std::sync::Arc;

use async_trait::async_trait;

pub use buy_side::{parse_search, BuySideClient};
pub use demand::{parse_history, parse_product, DemandClient, MAX_HISTORY_POINTS};
pub use disabled::DisabledSource;
pub use error::{LookupError, Result};
pub use http::create_http_client;
pub use rate_limit::RateLimiter;
pub use sell_side::{
    parse_catalog, parse_fees, parse_offers, parse_restrictions, SellSideClient,
    SellSideCredentials,
};
pub use types::{
    CatalogRecord, DemandRecord, FeeBreakdown, HistoryPoint, Listing, ListingRestriction,
    OfferSummary,
};

use crate::cache::CacheLayer;
use crate::config::Config;
use crate::secrets::resolve_provider_secret;

/// Cheap stage-one source: demand signals and catalog basics.
#[async_trait]
pub trait DemandSource: Send + Sync {
    /// `Ok(None)` means the provider knows nothing about the identifier.
    async fn fetch(&self, identifier: &str) -> Result<Option<DemandRecord>>;
}

/// Paid stage-two source for payout economics.
#[async_trait]
pub trait SellSideSource: Send + Sync {
    async fn offers(&self, identifier: &str) -> Result<Option<OfferSummary>>;

    async fn fees(&self, identifier: &str, price: i64) -> Result<Option<FeeBreakdown>>;

    async fn catalog(&self, identifier: &str) -> Result<Option<CatalogRecord>>;

    async fn restriction(&self, identifier: &str) -> Result<Option<ListingRestriction>>;
}

/// Buy-side keyword search.
#[async_trait]
pub trait BuySideSearch: Send + Sync {
    async fn search(&self, term: &str) -> Result<Vec<Listing>>;
}

/// The three long-lived source handles the pipeline is built with.
#[derive(Clone)]
pub struct LookupSources {
    pub demand: Arc<dyn DemandSource>,
    pub sell_side: Arc<dyn SellSideSource>,
    pub buy_side: Arc<dyn BuySideSearch>,
}

impl LookupSources {
    /// All three sources disabled.
    pub fn disabled() -> Self {
        Self {
            demand: Arc::new(DisabledSource),
            sell_side: Arc::new(DisabledSource),
            buy_side: Arc::new(DisabledSource),
        }
    }

    /// Builds one client per provider. A provider whose credentials resolve
    /// to nothing is wired as disabled with a warning.
    pub fn from_config(config: &Config, cache: CacheLayer) -> Result<Self> {
        let mut sources = Self::disabled();

        match resolve_provider_secret(&config.demand.api_key)? {
            Some(api_key) => {
                sources.demand = Arc::new(DemandClient::new(
                    &config.demand,
                    api_key,
                    &config.http,
                    config.rate_limits.demand,
                    cache.clone(),
                )?);
            }
            None => log::warn!("Demand provider credentials not configured; demand lookups disabled"),
        }

        let sell_side = &config.sell_side;
        let credentials = (
            resolve_provider_secret(&sell_side.client_id)?,
            resolve_provider_secret(&sell_side.client_secret)?,
            resolve_provider_secret(&sell_side.refresh_token)?,
        );
        match credentials {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => {
                sources.sell_side = Arc::new(SellSideClient::new(
                    sell_side,
                    SellSideCredentials {
                        client_id,
                        client_secret,
                        refresh_token,
                    },
                    &config.http,
                    config.rate_limits.sell_side,
                    cache.clone(),
                )?);
            }
            _ => log::warn!(
                "Sell-side credentials incomplete; payout lookups disabled"
            ),
        }

        match resolve_provider_secret(&config.buy_side.application_id)? {
            Some(application_id) => {
                sources.buy_side = Arc::new(BuySideClient::new(
                    &config.buy_side,
                    application_id,
                    &config.http,
                    config.rate_limits.buy_side,
                    cache,
                )?);
            }
            None => log::warn!("Buy-side application id not configured; sourcing search disabled"),
        }

        Ok(sources)
    }
}
