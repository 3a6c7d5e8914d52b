//! Buy-side candidate matching and cost ranking.
//!
//! Matching tries the catalog code first and the model text second; the
//! surviving listings are costed (price, shipping status, point-back) and
//! ranked by net cost with a stable sort so provider order breaks ties.

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::lookup::{BuySideSearch, Listing, LookupError};
use crate::model::{MatchType, ShippingStatus};

/// Catalog codes shorter than this are not searched.
pub const MIN_CATALOG_CODE_LEN: usize = 8;

/// Normalized model text shorter than this is too ambiguous to search.
pub const MIN_MODEL_LEN: usize = 3;

/// At most this many ranked candidates are kept per item.
pub const MAX_PERSISTED: usize = 20;

static RE_MODEL_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-_]").unwrap());

/// One costed buy-side option for an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcingCandidate {
    pub match_type: MatchType,
    /// The search term that produced this listing.
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
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub match_type: MatchType,
    /// Ranked cheapest first; only the first is flagged chosen.
    pub candidates: Vec<SourcingCandidate>,
}

impl MatchOutcome {
    pub fn none() -> Self {
        Self {
            match_type: MatchType::None,
            candidates: Vec::new(),
        }
    }

    pub fn chosen(&self) -> Option<&SourcingCandidate> {
        self.candidates.first()
    }
}

/// Uppercases and strips whitespace, hyphens and underscores.
pub fn normalize_model(text: &str) -> String {
    RE_MODEL_SEPARATORS
        .replace_all(&text.to_uppercase(), "")
        .into_owned()
}

/// Finds and ranks sourcing options for one item.
///
/// An empty result is `MatchType::None`, a verdict rather than an error.
/// Search failures are returned to the caller.
pub async fn find_candidates(
    search: &dyn BuySideSearch,
    catalog_code: Option<&str>,
    model_number: Option<&str>,
    point_rate: Decimal,
) -> Result<MatchOutcome, LookupError> {
    if let Some(code) = catalog_code.map(str::trim) {
        if code.chars().count() >= MIN_CATALOG_CODE_LEN {
            let listings = search.search(code).await?;
            if !listings.is_empty() {
                return Ok(MatchOutcome {
                    match_type: MatchType::ExactCode,
                    candidates: rank_listings(listings, MatchType::ExactCode, code, point_rate),
                });
            }
        }
    }

    if let Some(model) = model_number.map(str::trim) {
        let normalized = normalize_model(model);
        if normalized.chars().count() >= MIN_MODEL_LEN {
            let listings: Vec<Listing> = search
                .search(model)
                .await?
                .into_iter()
                .filter(|listing| normalize_model(&listing.name).contains(&normalized))
                .collect();
            if !listings.is_empty() {
                return Ok(MatchOutcome {
                    match_type: MatchType::TextMatch,
                    candidates: rank_listings(listings, MatchType::TextMatch, model, point_rate),
                });
            }
        }
    }

    Ok(MatchOutcome::none())
}

/// Costs each listing, ranks by net cost (stable), flags the cheapest and
/// caps the result.
///
/// A listing without shipping-inclusive pricing keeps `gross = price`. The
/// real shipping cost is unknown here, so it is flagged instead of guessed.
pub fn rank_listings(
    listings: Vec<Listing>,
    match_type: MatchType,
    match_value: &str,
    point_rate: Decimal,
) -> Vec<SourcingCandidate> {
    let mut candidates: Vec<SourcingCandidate> = listings
        .into_iter()
        .map(|listing| {
            let (shipping, shipping_status) = if listing.shipping_included {
                (Some(0), ShippingStatus::Free)
            } else {
                (None, ShippingStatus::Unknown)
            };
            let gross_cost = listing.price;
            let point_amount = point_amount(gross_cost, point_rate);
            SourcingCandidate {
                match_type,
                match_value: Some(match_value.to_string()),
                listing_code: listing.code,
                item_name: Some(listing.name),
                item_url: listing.url,
                shop_code: listing.shop_code,
                shop_name: listing.shop_name,
                price: listing.price,
                shipping,
                shipping_status,
                gross_cost,
                point_rate,
                point_amount,
                net_cost: gross_cost - point_amount,
                is_chosen: false,
            }
        })
        .collect();

    candidates.sort_by_key(|c| c.net_cost);
    candidates.truncate(MAX_PERSISTED);
    if let Some(first) = candidates.first_mut() {
        first.is_chosen = true;
    }
    candidates
}

/// `floor(gross × rate)` in whole yen. A product outside the `i64` range
/// earns no points, so the net cost is never understated.
pub fn point_amount(gross_cost: i64, point_rate: Decimal) -> i64 {
    let amount = Decimal::from(gross_cost)
        .checked_mul(point_rate)
        .and_then(|product| product.floor().to_i64());
    match amount {
        Some(amount) => amount,
        None => {
            log::warn!(
                "Point amount for cost {} at rate {} is out of range, using 0",
                gross_cost,
                point_rate
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn listing(name: &str, price: i64, free_shipping: bool) -> Listing {
        Listing {
            name: name.to_string(),
            shop_name: Some("Shop".to_string()),
            shop_code: Some("shop".to_string()),
            price,
            shipping_included: free_shipping,
            url: None,
            code: Some(format!("shop:{}", name)),
        }
    }

    /// Returns canned results per term and records every term searched.
    #[derive(Default)]
    struct ScriptedSearch {
        results: HashMap<String, Vec<Listing>>,
        searched: Mutex<Vec<String>>,
    }

    impl ScriptedSearch {
        fn with(mut self, term: &str, listings: Vec<Listing>) -> Self {
            self.results.insert(term.to_string(), listings);
            self
        }

        fn searched(&self) -> Vec<String> {
            self.searched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BuySideSearch for ScriptedSearch {
        async fn search(&self, term: &str) -> Result<Vec<Listing>, LookupError> {
            self.searched.lock().unwrap().push(term.to_string());
            Ok(self.results.get(term).cloned().unwrap_or_default())
        }
    }

    fn rate(text: &str) -> Decimal {
        text.parse().unwrap()
    }

    #[test]
    fn test_normalize_model() {
        assert_eq!(normalize_model(" wp-100_b x "), "WP100BX");
        assert_eq!(normalize_model("--"), "");
    }

    #[test]
    fn test_stable_tie_break() {
        let ranked = rank_listings(
            vec![
                listing("a", 500, true),
                listing("b", 300, true),
                listing("c", 300, true),
            ],
            MatchType::ExactCode,
            "4901234567894",
            Decimal::ZERO,
        );

        assert_eq!(ranked[0].item_name.as_deref(), Some("b"));
        assert!(ranked[0].is_chosen);
        assert_eq!(ranked[1].item_name.as_deref(), Some("c"));
        assert!(!ranked[1].is_chosen);
        assert_eq!(ranked[2].net_cost, 500);
    }

    #[test]
    fn test_costing_and_unknown_shipping() {
        let ranked = rank_listings(
            vec![listing("free", 2000, true), listing("extra", 1990, false)],
            MatchType::TextMatch,
            "WP-100",
            rate("0.08"),
        );

        let extra = &ranked[0];
        assert_eq!(extra.item_name.as_deref(), Some("extra"));
        assert_eq!(extra.shipping_status, ShippingStatus::Unknown);
        assert_eq!(extra.shipping, None);
        assert_eq!(extra.gross_cost, 1990);
        assert_eq!(extra.point_amount, 159);
        assert_eq!(extra.net_cost, 1831);

        let free = &ranked[1];
        assert_eq!(free.shipping_status, ShippingStatus::Free);
        assert_eq!(free.point_amount, 160);
        assert_eq!(free.net_cost, 1840);
    }

    #[test]
    fn test_point_amount_out_of_range_is_zero() {
        assert_eq!(point_amount(2000, rate("0.04")), 80);
        assert_eq!(point_amount(i64::MAX, Decimal::TWO), 0);
        assert_eq!(point_amount(i64::MAX, Decimal::MAX), 0);
    }

    #[test]
    fn test_cap_at_max_persisted() {
        let listings = (0..30).map(|i| listing(&i.to_string(), 1000 + i, true)).collect();
        let ranked = rank_listings(listings, MatchType::ExactCode, "x", Decimal::ZERO);
        assert_eq!(ranked.len(), MAX_PERSISTED);
        assert_eq!(ranked.iter().filter(|c| c.is_chosen).count(), 1);
    }

    #[tokio::test]
    async fn test_exact_code_wins_without_text_search() {
        let search = ScriptedSearch::default()
            .with("4901234567894", vec![listing("Widget", 1500, true)])
            .with("WP-100", vec![listing("Widget WP-100", 1000, true)]);

        let outcome = find_candidates(&search, Some("4901234567894"), Some("WP-100"), Decimal::ZERO)
            .await
            .unwrap();

        assert_eq!(outcome.match_type, MatchType::ExactCode);
        assert_eq!(outcome.chosen().map(|c| c.price), Some(1500));
        assert_eq!(search.searched(), vec!["4901234567894"]);
    }

    #[tokio::test]
    async fn test_short_code_skipped_and_text_filtered() {
        let search = ScriptedSearch::default().with(
            "WP-100",
            vec![
                listing("Widget WP 100 black", 1800, true),
                listing("Widget case for WP-200", 300, true),
                listing("wp_100 refill", 900, false),
            ],
        );

        let outcome = find_candidates(&search, Some("1234567"), Some("WP-100"), Decimal::ZERO)
            .await
            .unwrap();

        assert_eq!(outcome.match_type, MatchType::TextMatch);
        let names: Vec<&str> = outcome
            .candidates
            .iter()
            .filter_map(|c| c.item_name.as_deref())
            .collect();
        assert_eq!(names, vec!["wp_100 refill", "Widget WP 100 black"]);
        assert_eq!(search.searched(), vec!["WP-100"]);
    }

    #[tokio::test]
    async fn test_empty_code_results_fall_through_to_model() {
        let search =
            ScriptedSearch::default().with("AB-12", vec![listing("Thing AB12", 700, true)]);

        let outcome = find_candidates(&search, Some("4901234567894"), Some("AB-12"), Decimal::ZERO)
            .await
            .unwrap();

        assert_eq!(outcome.match_type, MatchType::TextMatch);
        assert_eq!(search.searched(), vec!["4901234567894", "AB-12"]);
    }

    #[tokio::test]
    async fn test_nothing_to_search_is_none() {
        let search = ScriptedSearch::default();
        let outcome = find_candidates(&search, None, Some("a-b"), Decimal::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::none());
        assert!(search.searched().is_empty());
    }
}
