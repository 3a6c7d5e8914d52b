//! Scripted lookup sources. Every fake records the calls it receives so tests
//! can assert which stages ran.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use flipscout::lookup::{
    BuySideSearch, CatalogRecord, DemandRecord, DemandSource, FeeBreakdown, HistoryPoint, Listing,
    ListingRestriction, LookupError, OfferSummary, SellSideSource,
};

fn transport_error(provider: &'static str, message: &str) -> LookupError {
    LookupError::Http {
        provider,
        message: message.to_string(),
    }
}

/// A demand record that passes screening with default thresholds.
pub fn demand_record(catalog_code: Option<&str>, model_number: Option<&str>) -> DemandRecord {
    DemandRecord {
        title: Some("Widget Pro".to_string()),
        brand: Some("Acme".to_string()),
        category: Some("Home".to_string()),
        catalog_code: catalog_code.map(str::to_string),
        model_number: model_number.map(str::to_string),
        rank_current: Some(1000),
        rank_avg_30: Some(1200),
        rank_avg_90: Some(1500),
        sales_30: Some(50),
        sales_90: Some(140),
        sales_180: Some(260),
        seller_count: Some(4),
        fulfilled_seller_count: Some(2),
        price_history: vec![
            HistoryPoint {
                date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
                value: 3600,
            },
            HistoryPoint {
                date: NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(),
                value: 3500,
            },
        ],
        rank_history: vec![HistoryPoint {
            date: NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(),
            value: 980,
        }],
    }
}

pub fn listing(name: &str, price: i64, shipping_included: bool) -> Listing {
    Listing {
        name: name.to_string(),
        shop_name: Some("Example Shop".to_string()),
        shop_code: Some("example-shop".to_string()),
        price,
        shipping_included,
        url: Some(format!("https://shop.example/{}", name.replace(' ', "-"))),
        code: Some(format!("example-shop:{}", price)),
    }
}

#[derive(Default)]
pub struct FakeDemand {
    records: Mutex<HashMap<String, DemandRecord>>,
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeDemand {
    pub fn set(&self, identifier: &str, record: DemandRecord) {
        self.failures.lock().unwrap().remove(identifier);
        self.records
            .lock()
            .unwrap()
            .insert(identifier.to_string(), record);
    }

    pub fn fail(&self, identifier: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(identifier.to_string(), message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DemandSource for FakeDemand {
    async fn fetch(&self, identifier: &str) -> Result<Option<DemandRecord>, LookupError> {
        self.calls.lock().unwrap().push(identifier.to_string());
        if let Some(message) = self.failures.lock().unwrap().get(identifier) {
            return Err(transport_error("demand", message));
        }
        Ok(self.records.lock().unwrap().get(identifier).cloned())
    }
}

/// Which sell-side call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellSideStep {
    Offers,
    Fees,
    Catalog,
    Restriction,
}

impl SellSideStep {
    fn name(&self) -> &'static str {
        match self {
            Self::Offers => "offers",
            Self::Fees => "fees",
            Self::Catalog => "catalog",
            Self::Restriction => "restriction",
        }
    }
}

#[derive(Default)]
pub struct FakeSellSide {
    offers: Mutex<HashMap<String, OfferSummary>>,
    fees: Mutex<HashMap<String, FeeBreakdown>>,
    catalog: Mutex<HashMap<String, CatalogRecord>>,
    restrictions: Mutex<HashMap<String, ListingRestriction>>,
    failing: Mutex<Option<SellSideStep>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeSellSide {
    /// Offers at `price` with fees totalling `fee_total`, unrestricted.
    pub fn set_economics(&self, identifier: &str, price: i64, fee_total: i64) {
        self.offers.lock().unwrap().insert(
            identifier.to_string(),
            OfferSummary {
                lowest_price: Some(price),
                seller_count: Some(6),
                fulfilled_seller_count: Some(3),
            },
        );
        self.fees.lock().unwrap().insert(
            identifier.to_string(),
            FeeBreakdown {
                referral: Some(fee_total / 2),
                fulfillment: Some(fee_total - fee_total / 2),
                other: Some(0),
                total: Some(fee_total),
            },
        );
        self.set_restriction(identifier, ListingRestriction::Unrestricted);
    }

    pub fn set_catalog(&self, identifier: &str, record: CatalogRecord) {
        self.catalog
            .lock()
            .unwrap()
            .insert(identifier.to_string(), record);
    }

    pub fn set_restriction(&self, identifier: &str, restriction: ListingRestriction) {
        self.restrictions
            .lock()
            .unwrap()
            .insert(identifier.to_string(), restriction);
    }

    pub fn fail_on(&self, step: Option<SellSideStep>) {
        *self.failing.lock().unwrap() = step;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, step: SellSideStep) -> Result<(), LookupError> {
        self.calls.lock().unwrap().push(step.name());
        if *self.failing.lock().unwrap() == Some(step) {
            return Err(LookupError::Status {
                provider: "sell-side",
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SellSideSource for FakeSellSide {
    async fn offers(&self, identifier: &str) -> Result<Option<OfferSummary>, LookupError> {
        self.record(SellSideStep::Offers)?;
        Ok(self.offers.lock().unwrap().get(identifier).cloned())
    }

    async fn fees(&self, identifier: &str, _price: i64) -> Result<Option<FeeBreakdown>, LookupError> {
        self.record(SellSideStep::Fees)?;
        Ok(self.fees.lock().unwrap().get(identifier).cloned())
    }

    async fn catalog(&self, identifier: &str) -> Result<Option<CatalogRecord>, LookupError> {
        self.record(SellSideStep::Catalog)?;
        Ok(self.catalog.lock().unwrap().get(identifier).cloned())
    }

    async fn restriction(&self, identifier: &str) -> Result<Option<ListingRestriction>, LookupError> {
        self.record(SellSideStep::Restriction)?;
        Ok(self.restrictions.lock().unwrap().get(identifier).copied())
    }
}

#[derive(Default)]
pub struct FakeBuySide {
    results: Mutex<HashMap<String, Vec<Listing>>>,
    failing: Mutex<bool>,
    searched: Mutex<Vec<String>>,
}

impl FakeBuySide {
    pub fn set(&self, term: &str, listings: Vec<Listing>) {
        self.results
            .lock()
            .unwrap()
            .insert(term.to_string(), listings);
    }

    pub fn fail(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn searched(&self) -> Vec<String> {
        self.searched.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuySideSearch for FakeBuySide {
    async fn search(&self, term: &str) -> Result<Vec<Listing>, LookupError> {
        self.searched.lock().unwrap().push(term.to_string());
        if *self.failing.lock().unwrap() {
            return Err(transport_error("buy-side", "operation timed out"));
        }
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(term)
            .cloned()
            .unwrap_or_default())
    }
}
