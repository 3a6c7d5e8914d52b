//! Stage snapshots an item moves through: demand, enriched, evaluated.
//!
//! Each stage consumes the previous snapshot and produces a new one; nothing
//! is patched in place after a stage has finished.

use crate::calculator::{self, Evaluation, ProfitFigures, ProfitInputs, Reason, Thresholds};
use crate::db::item_repo::ItemOutcome;
use crate::db::timeseries_repo::TimeseriesPoint;
use crate::lookup::{
    CatalogRecord, DemandRecord, FeeBreakdown, HistoryPoint, ListingRestriction, OfferSummary,
};
use crate::matcher::{MatchOutcome, SourcingCandidate};
use crate::model::{Classification, MatchType, Metric, RestrictionStatus};

/// Stage 1 result.
#[derive(Debug, Clone)]
pub struct DemandSnapshot {
    pub identifier: String,
    pub record: DemandRecord,
}

impl DemandSnapshot {
    pub fn new(identifier: impl Into<String>, record: DemandRecord) -> Self {
        Self {
            identifier: identifier.into(),
            record,
        }
    }

    /// Price and rank history as archival points.
    pub fn history_points(&self) -> Vec<TimeseriesPoint> {
        fn points(metric: Metric, history: &[HistoryPoint]) -> impl Iterator<Item = TimeseriesPoint> + '_ {
            history.iter().map(move |p| TimeseriesPoint {
                metric,
                recorded_date: p.date,
                value: p.value,
            })
        }

        points(Metric::Price, &self.record.price_history)
            .chain(points(Metric::Rank, &self.record.rank_history))
            .collect()
    }

    pub fn identity(&self) -> CatalogIdentity {
        CatalogIdentity {
            catalog_code: self.record.catalog_code.clone(),
            model_number: self.record.model_number.clone(),
            title: self.record.title.clone(),
            brand: self.record.brand.clone(),
        }
    }

    /// Outcome for an item stopped at the screening gate: demand fields only,
    /// classified FAIL.
    pub fn screened_outcome(&self, reasons: &[Reason]) -> ItemOutcome {
        let identity = self.identity();
        let mut outcome = self.demand_fields(&identity);
        outcome.seller_count = self.record.seller_count;
        outcome.fulfilled_seller_count = self.record.fulfilled_seller_count;
        outcome.classification = Some(Classification::Fail);
        outcome.reasons = reasons
            .iter()
            .map(|r| format!("screening: {}", r))
            .collect();
        outcome
    }

    fn demand_fields(&self, identity: &CatalogIdentity) -> ItemOutcome {
        let r = &self.record;
        ItemOutcome {
            title: identity.title.clone(),
            brand: identity.brand.clone(),
            category: r.category.clone(),
            catalog_code: identity.catalog_code.clone(),
            model_number: identity.model_number.clone(),
            rank_current: r.rank_current,
            rank_avg_30: r.rank_avg_30,
            rank_avg_90: r.rank_avg_90,
            sales_30: r.sales_30,
            sales_90: r.sales_90,
            sales_180: r.sales_180,
            ..Default::default()
        }
    }
}

/// The catalog fields matching searches with, after sell-side backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogIdentity {
    pub catalog_code: Option<String>,
    pub model_number: Option<String>,
    pub title: Option<String>,
    pub brand: Option<String>,
}

impl CatalogIdentity {
    /// Whether the sell-side catalog lookup is worth its call.
    pub fn needs_catalog(&self) -> bool {
        self.catalog_code.is_none() || self.model_number.is_none()
    }

    /// Fills only the fields still missing.
    pub fn filled_from(self, catalog: Option<&CatalogRecord>) -> Self {
        let Some(catalog) = catalog else {
            return self;
        };
        Self {
            catalog_code: self.catalog_code.or_else(|| catalog.catalog_code.clone()),
            model_number: self.model_number.or_else(|| catalog.model_number.clone()),
            title: self.title.or_else(|| catalog.title.clone()),
            brand: self.brand.or_else(|| catalog.brand.clone()),
        }
    }
}

/// Whatever the sell-side lookups returned before the first failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SellSideData {
    pub offers: Option<OfferSummary>,
    pub fees: Option<FeeBreakdown>,
    pub catalog: Option<CatalogRecord>,
    pub restriction: Option<ListingRestriction>,
}

impl SellSideData {
    pub fn lowest_price(&self) -> Option<i64> {
        self.offers.as_ref().and_then(|o| o.lowest_price)
    }

    pub fn fee_total(&self) -> Option<i64> {
        self.fees.as_ref().and_then(|f| f.total)
    }

    /// `(listing_restricted, status)`. A failed check is stored as unknown;
    /// a source that never answered leaves both empty.
    pub fn restriction_fields(&self) -> (Option<bool>, Option<RestrictionStatus>) {
        match self.restriction {
            Some(ListingRestriction::Restricted) => (Some(true), Some(RestrictionStatus::Auto)),
            Some(ListingRestriction::Unrestricted) => (Some(false), Some(RestrictionStatus::Auto)),
            Some(ListingRestriction::Unknown) => (None, Some(RestrictionStatus::Unknown)),
            None => (None, None),
        }
    }
}

/// Stage 2 result.
#[derive(Debug, Clone)]
pub struct EnrichedSnapshot {
    pub demand: DemandSnapshot,
    pub identity: CatalogIdentity,
    pub sell_side: SellSideData,
    /// `None` when the buy-side search failed.
    pub matched: Option<MatchOutcome>,
}

impl EnrichedSnapshot {
    pub fn match_type(&self) -> MatchType {
        self.matched
            .as_ref()
            .map_or(MatchType::Unknown, |m| m.match_type)
    }

    pub fn chosen(&self) -> Option<&SourcingCandidate> {
        self.matched.as_ref().and_then(MatchOutcome::chosen)
    }

    pub fn candidates(&self) -> &[SourcingCandidate] {
        self.matched.as_ref().map_or(&[], |m| m.candidates.as_slice())
    }

    pub fn profit_inputs(&self) -> ProfitInputs {
        let chosen = self.chosen();
        let sell_price = self.sell_side.lowest_price();
        let fee_total = self.sell_side.fee_total();
        ProfitInputs {
            sell_price,
            fee_total,
            payout: sell_price.zip(fee_total).map(|(price, fees)| price - fees),
            buy_cost_net: chosen.map(|c| c.net_cost),
            buy_price: chosen.map(|c| c.price),
            buy_shipping: chosen.and_then(|c| c.shipping),
            buy_point_amount: chosen.map(|c| c.point_amount),
            rank_current: self.demand.record.rank_current,
            sales_30: self.demand.record.sales_30,
            match_type: Some(self.match_type()),
            shipping_status: chosen.map(|c| c.shipping_status),
        }
    }

    pub fn evaluate(self, thresholds: &Thresholds) -> EvaluatedSnapshot {
        let (figures, evaluation) = calculator::evaluate_item(&self.profit_inputs(), thresholds);
        EvaluatedSnapshot {
            enriched: self,
            figures,
            evaluation,
        }
    }
}

/// Stage 3 result, ready to persist.
#[derive(Debug, Clone)]
pub struct EvaluatedSnapshot {
    pub enriched: EnrichedSnapshot,
    pub figures: ProfitFigures,
    pub evaluation: Evaluation,
}

impl EvaluatedSnapshot {
    pub fn outcome(&self) -> ItemOutcome {
        let enriched = &self.enriched;
        let demand = &enriched.demand.record;
        let sell_side = &enriched.sell_side;
        let offers = sell_side.offers.as_ref();
        let fees = sell_side.fees.as_ref();
        let chosen = enriched.chosen();
        let (listing_restricted, listing_restriction_status) = sell_side.restriction_fields();

        ItemOutcome {
            seller_count: offers
                .and_then(|o| o.seller_count)
                .or(demand.seller_count),
            fulfilled_seller_count: offers
                .and_then(|o| o.fulfilled_seller_count)
                .or(demand.fulfilled_seller_count),
            sell_price: sell_side.lowest_price(),
            fee_referral: fees.and_then(|f| f.referral),
            fee_fulfillment: fees.and_then(|f| f.fulfillment),
            fee_other: fees.and_then(|f| f.other),
            fee_total: sell_side.fee_total(),
            payout: self.figures.payout,
            listing_restricted,
            listing_restriction_status,
            match_type: Some(enriched.match_type()),
            buy_item_name: chosen.and_then(|c| c.item_name.clone()),
            buy_shop_name: chosen.and_then(|c| c.shop_name.clone()),
            buy_item_url: chosen.and_then(|c| c.item_url.clone()),
            buy_price: chosen.map(|c| c.price),
            buy_shipping: chosen.and_then(|c| c.shipping),
            buy_shipping_status: chosen.map(|c| c.shipping_status),
            buy_point_amount: chosen.map(|c| c.point_amount),
            buy_cost_gross: chosen.map(|c| c.gross_cost),
            buy_cost_net: chosen.map(|c| c.net_cost),
            profit_amount: self.figures.profit_amount,
            profit_rate: self.figures.profit_rate,
            classification: Some(self.evaluation.classification),
            reasons: self.evaluation.reason_texts(),
            ..enriched.demand.demand_fields(&enriched.identity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::Listing;
    use crate::matcher;
    use crate::model::ShippingStatus;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn thresholds() -> Thresholds {
        Thresholds {
            profit_amount: 1000,
            profit_rate: Decimal::new(15, 2),
            rank: 50_000,
            sales_30: 10,
        }
    }

    fn demand() -> DemandSnapshot {
        DemandSnapshot::new(
            "B000000001",
            DemandRecord {
                title: Some("Widget".to_string()),
                catalog_code: Some("4901234567894".to_string()),
                rank_current: Some(1000),
                sales_30: Some(50),
                seller_count: Some(3),
                price_history: vec![HistoryPoint {
                    date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
                    value: 3500,
                }],
                rank_history: vec![HistoryPoint {
                    date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
                    value: 900,
                }],
                ..Default::default()
            },
        )
    }

    fn matched(price: i64) -> MatchOutcome {
        let listing = Listing {
            name: "Widget".to_string(),
            shop_name: Some("Shop".to_string()),
            shop_code: Some("shop".to_string()),
            price,
            shipping_included: true,
            url: Some("https://shop.example/widget".to_string()),
            code: Some("shop:1".to_string()),
        };
        MatchOutcome {
            match_type: MatchType::ExactCode,
            candidates: matcher::rank_listings(
                vec![listing],
                MatchType::ExactCode,
                "4901234567894",
                Decimal::ZERO,
            ),
        }
    }

    #[test]
    fn test_history_points_cover_both_metrics() {
        let points = demand().history_points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].metric, Metric::Price);
        assert_eq!(points[1].metric, Metric::Rank);
        assert_eq!(points[1].value, 900);
    }

    #[test]
    fn test_identity_fills_only_missing_fields() {
        let identity = CatalogIdentity {
            catalog_code: Some("4901234567894".to_string()),
            model_number: None,
            title: Some("Widget".to_string()),
            brand: None,
        };
        assert!(identity.needs_catalog());

        let catalog = CatalogRecord {
            catalog_code: Some("0000000000000".to_string()),
            model_number: Some("WP-100".to_string()),
            title: Some("Other".to_string()),
            brand: Some("Acme".to_string()),
        };
        let filled = identity.filled_from(Some(&catalog));
        assert_eq!(filled.catalog_code.as_deref(), Some("4901234567894"));
        assert_eq!(filled.model_number.as_deref(), Some("WP-100"));
        assert_eq!(filled.title.as_deref(), Some("Widget"));
        assert_eq!(filled.brand.as_deref(), Some("Acme"));
        assert!(!filled.needs_catalog());
    }

    #[test]
    fn test_restriction_mapping() {
        let mut data = SellSideData::default();
        assert_eq!(data.restriction_fields(), (None, None));
        data.restriction = Some(ListingRestriction::Restricted);
        assert_eq!(data.restriction_fields(), (Some(true), Some(RestrictionStatus::Auto)));
        data.restriction = Some(ListingRestriction::Unrestricted);
        assert_eq!(data.restriction_fields(), (Some(false), Some(RestrictionStatus::Auto)));
        data.restriction = Some(ListingRestriction::Unknown);
        assert_eq!(data.restriction_fields(), (None, Some(RestrictionStatus::Unknown)));
    }

    #[test]
    fn test_screened_outcome_prefixes_reasons() {
        let reasons = vec![Reason::RankAboveCeiling {
            rank: 100_000,
            ceiling: 50_000,
        }];
        let outcome = demand().screened_outcome(&reasons);
        assert_eq!(outcome.classification, Some(Classification::Fail));
        assert_eq!(outcome.reasons, vec!["screening: rank 100000 above ceiling 50000"]);
        assert_eq!(outcome.seller_count, Some(3));
        assert!(outcome.sell_price.is_none());
        assert!(outcome.match_type.is_none());
    }

    #[test]
    fn test_evaluated_outcome_passes() {
        let enriched = EnrichedSnapshot {
            identity: demand().identity(),
            demand: demand(),
            sell_side: SellSideData {
                offers: Some(OfferSummary {
                    lowest_price: Some(3500),
                    seller_count: Some(5),
                    fulfilled_seller_count: Some(2),
                }),
                fees: Some(FeeBreakdown {
                    referral: Some(350),
                    fulfillment: Some(150),
                    other: Some(0),
                    total: Some(500),
                }),
                catalog: None,
                restriction: Some(ListingRestriction::Unrestricted),
            },
            matched: Some(matched(2000)),
        };

        let evaluated = enriched.evaluate(&thresholds());
        let outcome = evaluated.outcome();

        assert_eq!(outcome.payout, Some(3000));
        assert_eq!(outcome.buy_cost_net, Some(2000));
        assert_eq!(outcome.profit_amount, Some(1000));
        assert_eq!(outcome.profit_rate, Some(Decimal::new(3333, 4)));
        assert_eq!(outcome.classification, Some(Classification::Pass));
        assert!(outcome.reasons.is_empty());
        assert_eq!(outcome.seller_count, Some(5));
        assert_eq!(outcome.buy_shipping_status, Some(ShippingStatus::Free));
        assert_eq!(outcome.listing_restricted, Some(false));
        assert_eq!(outcome.title.as_deref(), Some("Widget"));
    }

    #[test]
    fn test_failed_match_reviews() {
        let enriched = EnrichedSnapshot {
            identity: demand().identity(),
            demand: demand(),
            sell_side: SellSideData::default(),
            matched: None,
        };
        assert_eq!(enriched.match_type(), MatchType::Unknown);
        assert!(enriched.candidates().is_empty());

        let outcome = enriched.evaluate(&thresholds()).outcome();
        assert_eq!(outcome.classification, Some(Classification::Review));
        assert_eq!(outcome.match_type, Some(MatchType::Unknown));
    }
}
