//! Profit computation and PASS / FAIL / REVIEW classification.
//!
//! Everything here is pure: the pipeline calls it after the lookups, and the
//! service calls it again to re-evaluate stored items.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::db::item_repo::ItemRow;
use crate::model::{Classification, MatchType, ShippingStatus};

/// Decimal places kept on the profit rate.
pub const PROFIT_RATE_SCALE: u32 = 4;

/// Per-job classification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    /// Minimum profit in yen.
    pub profit_amount: i64,
    /// Minimum profit over payout.
    pub profit_rate: Decimal,
    /// Maximum (worst) acceptable sales rank.
    pub rank: i64,
    /// Minimum 30-day sales estimate.
    pub sales_30: i64,
}

/// The item fields the calculator reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfitInputs {
    pub sell_price: Option<i64>,
    pub fee_total: Option<i64>,
    /// Payout computed earlier, used when price or fees are missing.
    pub payout: Option<i64>,
    pub buy_cost_net: Option<i64>,
    pub buy_price: Option<i64>,
    pub buy_shipping: Option<i64>,
    pub buy_point_amount: Option<i64>,
    pub rank_current: Option<i64>,
    pub sales_30: Option<i64>,
    pub match_type: Option<MatchType>,
    pub shipping_status: Option<ShippingStatus>,
}

impl From<&ItemRow> for ProfitInputs {
    fn from(item: &ItemRow) -> Self {
        Self {
            sell_price: item.sell_price,
            fee_total: item.fee_total,
            payout: item.payout,
            buy_cost_net: item.buy_cost_net,
            buy_price: item.buy_price,
            buy_shipping: item.buy_shipping,
            buy_point_amount: item.buy_point_amount,
            rank_current: item.rank_current,
            sales_30: item.sales_30,
            match_type: item.match_type,
            shipping_status: item.buy_shipping_status,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfitFigures {
    pub payout: Option<i64>,
    pub profit_amount: Option<i64>,
    pub profit_rate: Option<Decimal>,
}

/// Why an item did not PASS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    ProfitBelowFloor { amount: i64, floor: i64 },
    RateBelowFloor { rate: Decimal, floor: Decimal },
    RankAboveCeiling { rank: i64, ceiling: i64 },
    SalesBelowFloor { sales: i64, floor: i64 },
    NoBuySideMatch,
    ProfitUnknown,
    RateUnknown,
    RankUnknown,
    SalesUnknown,
    MatchIncomplete,
    ShippingUnknown,
}

impl Reason {
    /// Hard reasons force FAIL; the rest only force REVIEW.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            Self::ProfitBelowFloor { .. }
                | Self::RateBelowFloor { .. }
                | Self::RankAboveCeiling { .. }
                | Self::SalesBelowFloor { .. }
                | Self::NoBuySideMatch
        )
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProfitBelowFloor { amount, floor } => {
                write!(f, "profit {} yen below floor {} yen", amount, floor)
            }
            Self::RateBelowFloor { rate, floor } => write!(
                f,
                "profit rate {:.1}% below floor {:.1}%",
                rate * Decimal::ONE_HUNDRED,
                floor * Decimal::ONE_HUNDRED
            ),
            Self::RankAboveCeiling { rank, ceiling } => {
                write!(f, "rank {} above ceiling {}", rank, ceiling)
            }
            Self::SalesBelowFloor { sales, floor } => {
                write!(f, "30-day sales {} below floor {}", sales, floor)
            }
            Self::NoBuySideMatch => f.write_str("no matching buy-side listing"),
            Self::ProfitUnknown => f.write_str("profit amount could not be computed"),
            Self::RateUnknown => f.write_str("profit rate could not be computed"),
            Self::RankUnknown => f.write_str("sales rank unknown"),
            Self::SalesUnknown => f.write_str("30-day sales unknown"),
            Self::MatchIncomplete => f.write_str("buy-side matching did not complete"),
            Self::ShippingUnknown => f.write_str("buy-side shipping cost unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub classification: Classification,
    /// Empty exactly when the classification is PASS.
    pub reasons: Vec<Reason>,
}

impl Evaluation {
    pub fn reason_texts(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }
}

/// Payout, profit amount and profit rate.
///
/// Payout is price minus total fees when both are known, else the
/// pre-supplied payout. Net cost is the chosen candidate's net cost, else
/// `price + shipping (0 if unknown) - points`. The rate uses payout as the
/// denominator and is only defined for a positive payout.
pub fn compute_profit(inputs: &ProfitInputs) -> ProfitFigures {
    let payout = match (inputs.sell_price, inputs.fee_total) {
        (Some(price), Some(fees)) => Some(price - fees),
        _ => inputs.payout,
    };

    let net_cost = inputs.buy_cost_net.or_else(|| {
        inputs.buy_price.map(|price| {
            price + inputs.buy_shipping.unwrap_or(0) - inputs.buy_point_amount.unwrap_or(0)
        })
    });

    let profit_amount = match (payout, net_cost) {
        (Some(payout), Some(cost)) => Some(payout - cost),
        _ => None,
    };

    let profit_rate = match (profit_amount, payout) {
        (Some(amount), Some(payout)) if payout > 0 => Some(
            (Decimal::from(amount) / Decimal::from(payout))
                .round_dp_with_strategy(PROFIT_RATE_SCALE, RoundingStrategy::MidpointAwayFromZero),
        ),
        _ => None,
    };

    ProfitFigures {
        payout,
        profit_amount,
        profit_rate,
    }
}

/// Classifies an item from its figures. Every triggered hard reason is
/// listed; soft reasons only surface when nothing hard triggered.
pub fn evaluate(inputs: &ProfitInputs, figures: &ProfitFigures, thresholds: &Thresholds) -> Evaluation {
    let mut reasons = Vec::new();

    match figures.profit_amount {
        Some(amount) if amount < thresholds.profit_amount => reasons.push(Reason::ProfitBelowFloor {
            amount,
            floor: thresholds.profit_amount,
        }),
        Some(_) => {}
        None => reasons.push(Reason::ProfitUnknown),
    }

    match figures.profit_rate {
        Some(rate) if rate < thresholds.profit_rate => reasons.push(Reason::RateBelowFloor {
            rate,
            floor: thresholds.profit_rate,
        }),
        Some(_) => {}
        None => reasons.push(Reason::RateUnknown),
    }

    match inputs.rank_current {
        Some(rank) if rank > thresholds.rank => reasons.push(Reason::RankAboveCeiling {
            rank,
            ceiling: thresholds.rank,
        }),
        Some(_) => {}
        None => reasons.push(Reason::RankUnknown),
    }

    match inputs.sales_30 {
        Some(sales) if sales < thresholds.sales_30 => reasons.push(Reason::SalesBelowFloor {
            sales,
            floor: thresholds.sales_30,
        }),
        Some(_) => {}
        None => reasons.push(Reason::SalesUnknown),
    }

    match inputs.match_type.unwrap_or(MatchType::Unknown) {
        MatchType::None => reasons.push(Reason::NoBuySideMatch),
        MatchType::Unknown => reasons.push(Reason::MatchIncomplete),
        MatchType::ExactCode | MatchType::TextMatch => {}
    }

    if inputs.shipping_status == Some(ShippingStatus::Unknown) {
        reasons.push(Reason::ShippingUnknown);
    }

    let (hard, soft): (Vec<Reason>, Vec<Reason>) = reasons.into_iter().partition(Reason::is_hard);
    if !hard.is_empty() {
        Evaluation {
            classification: Classification::Fail,
            reasons: hard,
        }
    } else if !soft.is_empty() {
        Evaluation {
            classification: Classification::Review,
            reasons: soft,
        }
    } else {
        Evaluation {
            classification: Classification::Pass,
            reasons: Vec::new(),
        }
    }
}

/// Computes figures and classifies in one step.
pub fn evaluate_item(inputs: &ProfitInputs, thresholds: &Thresholds) -> (ProfitFigures, Evaluation) {
    let figures = compute_profit(inputs);
    let evaluation = evaluate(inputs, &figures, thresholds);
    (figures, evaluation)
}

/// The demand-only screening gate. Unknown rank or sales never block.
pub fn screen(rank: Option<i64>, sales_30: Option<i64>, thresholds: &Thresholds) -> Vec<Reason> {
    let mut reasons = Vec::new();
    if let Some(rank) = rank.filter(|r| *r > thresholds.rank) {
        reasons.push(Reason::RankAboveCeiling {
            rank,
            ceiling: thresholds.rank,
        });
    }
    if let Some(sales) = sales_30.filter(|s| *s < thresholds.sales_30) {
        reasons.push(Reason::SalesBelowFloor {
            sales,
            floor: thresholds.sales_30,
        });
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Thresholds {
        Thresholds {
            profit_amount: 1000,
            profit_rate: Decimal::new(15, 2),
            rank: 50_000,
            sales_30: 10,
        }
    }

    fn passing_inputs() -> ProfitInputs {
        ProfitInputs {
            payout: Some(3000),
            buy_cost_net: Some(2000),
            rank_current: Some(1000),
            sales_30: Some(50),
            match_type: Some(MatchType::ExactCode),
            shipping_status: Some(ShippingStatus::Free),
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_pass() {
        let (figures, evaluation) = evaluate_item(&passing_inputs(), &thresholds());
        assert_eq!(figures.profit_amount, Some(1000));
        assert_eq!(figures.profit_rate, Some(Decimal::new(3333, 4)));
        assert_eq!(evaluation.classification, Classification::Pass);
        assert!(evaluation.reasons.is_empty());
    }

    #[test]
    fn test_rate_rounds_half_up() {
        let figures = compute_profit(&ProfitInputs {
            payout: Some(3),
            buy_cost_net: Some(2),
            ..Default::default()
        });
        assert_eq!(figures.profit_rate, Some(Decimal::new(3333, 4)));

        // 3 / 32 = 0.09375 sits exactly on the midpoint
        let figures = compute_profit(&ProfitInputs {
            payout: Some(32),
            buy_cost_net: Some(29),
            ..Default::default()
        });
        assert_eq!(figures.profit_rate, Some(Decimal::new(938, 4)));
    }

    #[test]
    fn test_payout_prefers_price_minus_fees() {
        let figures = compute_profit(&ProfitInputs {
            sell_price: Some(5000),
            fee_total: Some(1200),
            payout: Some(1),
            buy_cost_net: Some(2800),
            ..Default::default()
        });
        assert_eq!(figures.payout, Some(3800));
        assert_eq!(figures.profit_amount, Some(1000));
    }

    #[test]
    fn test_net_cost_fallback_treats_unknown_shipping_as_zero() {
        let figures = compute_profit(&ProfitInputs {
            payout: Some(3000),
            buy_price: Some(2000),
            buy_shipping: None,
            buy_point_amount: Some(160),
            ..Default::default()
        });
        assert_eq!(figures.profit_amount, Some(1160));
    }

    #[test]
    fn test_zero_payout_has_amount_but_no_rate() {
        let figures = compute_profit(&ProfitInputs {
            payout: Some(0),
            buy_cost_net: Some(500),
            ..Default::default()
        });
        assert_eq!(figures.profit_amount, Some(-500));
        assert_eq!(figures.profit_rate, None);
    }

    #[test]
    fn test_all_hard_reasons_listed() {
        let inputs = ProfitInputs {
            payout: Some(1000),
            buy_cost_net: Some(900),
            rank_current: Some(60_000),
            sales_30: Some(3),
            match_type: Some(MatchType::ExactCode),
            ..Default::default()
        };
        let (_, evaluation) = evaluate_item(&inputs, &thresholds());
        assert_eq!(evaluation.classification, Classification::Fail);
        assert_eq!(evaluation.reasons.len(), 4);
        assert!(evaluation.reasons.iter().all(Reason::is_hard));
    }

    #[test]
    fn test_fail_beats_review() {
        let inputs = ProfitInputs {
            rank_current: Some(90_000),
            match_type: Some(MatchType::Unknown),
            ..Default::default()
        };
        let (_, evaluation) = evaluate_item(&inputs, &thresholds());
        assert_eq!(evaluation.classification, Classification::Fail);
        assert_eq!(
            evaluation.reasons,
            vec![Reason::RankAboveCeiling {
                rank: 90_000,
                ceiling: 50_000
            }]
        );
    }

    #[test]
    fn test_no_match_always_fails() {
        let mut inputs = passing_inputs();
        inputs.match_type = Some(MatchType::None);
        let (_, evaluation) = evaluate_item(&inputs, &thresholds());
        assert_eq!(evaluation.classification, Classification::Fail);
        assert_eq!(evaluation.reasons, vec![Reason::NoBuySideMatch]);
    }

    #[test]
    fn test_missing_data_reviews() {
        let mut inputs = passing_inputs();
        inputs.payout = None;
        inputs.sales_30 = None;
        inputs.shipping_status = Some(ShippingStatus::Unknown);
        let (_, evaluation) = evaluate_item(&inputs, &thresholds());
        assert_eq!(evaluation.classification, Classification::Review);
        assert_eq!(
            evaluation.reasons,
            vec![
                Reason::ProfitUnknown,
                Reason::RateUnknown,
                Reason::SalesUnknown,
                Reason::ShippingUnknown
            ]
        );
    }

    #[test]
    fn test_missing_match_type_counts_as_incomplete() {
        let mut inputs = passing_inputs();
        inputs.match_type = None;
        let (_, evaluation) = evaluate_item(&inputs, &thresholds());
        assert_eq!(evaluation.classification, Classification::Review);
        assert_eq!(evaluation.reasons, vec![Reason::MatchIncomplete]);
    }

    #[test]
    fn test_reason_text() {
        let reason = Reason::RateBelowFloor {
            rate: Decimal::new(1234, 4),
            floor: Decimal::new(15, 2),
        };
        assert_eq!(reason.to_string(), "profit rate 12.3% below floor 15.0%");
    }

    #[test]
    fn test_screen() {
        let t = thresholds();
        assert_eq!(
            screen(Some(100_000), Some(50), &t),
            vec![Reason::RankAboveCeiling {
                rank: 100_000,
                ceiling: 50_000
            }]
        );
        assert!(screen(None, None, &t).is_empty());
        assert!(screen(Some(50_000), Some(10), &t).is_empty());
        assert_eq!(screen(Some(10), Some(2), &t).len(), 1);
    }
}
