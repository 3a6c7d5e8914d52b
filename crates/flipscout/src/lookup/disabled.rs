//! Stand-in for a provider without credentials.

use async_trait::async_trait;

use super::error::Result;
use super::types::{CatalogRecord, DemandRecord, FeeBreakdown, Listing, ListingRestriction, OfferSummary};
use super::{BuySideSearch, DemandSource, SellSideSource};

/// Answers every lookup with "no data", so callers never branch on whether a
/// provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSource;

#[async_trait]
impl DemandSource for DisabledSource {
    async fn fetch(&self, _identifier: &str) -> Result<Option<DemandRecord>> {
        Ok(None)
    }
}

#[async_trait]
impl SellSideSource for DisabledSource {
    async fn offers(&self, _identifier: &str) -> Result<Option<OfferSummary>> {
        Ok(None)
    }

    async fn fees(&self, _identifier: &str, _price: i64) -> Result<Option<FeeBreakdown>> {
        Ok(None)
    }

    async fn catalog(&self, _identifier: &str) -> Result<Option<CatalogRecord>> {
        Ok(None)
    }

    async fn restriction(&self, _identifier: &str) -> Result<Option<ListingRestriction>> {
        Ok(None)
    }
}

#[async_trait]
impl BuySideSearch for DisabledSource {
    async fn search(&self, _term: &str) -> Result<Vec<Listing>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_returns_nothing() {
        let source = DisabledSource;
        assert!(DemandSource::fetch(&source, "B000000001").await.unwrap().is_none());
        assert!(source.offers("B000000001").await.unwrap().is_none());
        assert!(source.fees("B000000001", 1000).await.unwrap().is_none());
        assert!(source.restriction("B000000001").await.unwrap().is_none());
        assert!(source.search("4901234567894").await.unwrap().is_empty());
    }
}
