//! Sell-side marketplace client (Selling Partner REST endpoints).
//!
//! Four lookups share one rate limiter and one access token:
//! competitive offers, a fee estimate at a given price, catalog attributes and
//! the listing-restriction check. Access tokens come from a refresh-token
//! grant and are reused until shortly before they expire.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::error::{LookupError, Result};
use super::http::{create_http_client, read_json, transport_error};
use super::rate_limit::RateLimiter;
use super::types::{CatalogRecord, FeeBreakdown, ListingRestriction, OfferSummary};
use super::SellSideSource;
use crate::cache::{catalog_key, fees_key, offers_key, restrictions_key, CacheLayer, CacheSource};
use crate::config::{HttpConfig, SellSideProviderConfig};
use crate::sanitize::sanitize_error_body;

const PROVIDER: &str = "sell-side";

/// Tokens are refreshed this long before their stated expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Resolved credentials for the refresh-token grant.
pub struct SellSideCredentials {
    pub client_id: SecretString,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

struct AccessToken {
    value: SecretString,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub struct SellSideClient {
    client: Client,
    endpoint: String,
    token_url: String,
    marketplace_id: String,
    seller_id: String,
    credentials: SellSideCredentials,
    token: Mutex<Option<AccessToken>>,
    limiter: RateLimiter,
    cache: CacheLayer,
}

impl SellSideClient {
    pub fn new(
        config: &SellSideProviderConfig,
        credentials: SellSideCredentials,
        http: &HttpConfig,
        rate: f64,
        cache: CacheLayer,
    ) -> Result<Self> {
        Ok(Self {
            client: create_http_client(http)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            marketplace_id: config.marketplace_id.clone(),
            seller_id: config.seller_id.clone(),
            credentials,
            token: Mutex::new(None),
            limiter: RateLimiter::new(PROVIDER, rate),
            cache,
        })
    }

    /// Returns a valid access token, exchanging the refresh token when the
    /// cached one is missing or about to expire.
    async fn access_token(&self) -> Result<SecretString> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_MARGIN < current.expires_at {
                return Ok(current.value.clone());
            }
        }

        log::info!("Refreshing sell-side access token");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.credentials.refresh_token.expose_secret()),
            ("client_id", self.credentials.client_id.expose_secret()),
            ("client_secret", self.credentials.client_secret.expose_secret()),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::Auth {
                provider: PROVIDER,
                message: format!(
                    "token refresh failed ({}): {}",
                    status,
                    sanitize_error_body(&body)
                ),
            });
        }

        let refreshed: TokenResponse = response.json().await.map_err(|e| LookupError::Auth {
            provider: PROVIDER,
            message: format!("unreadable token response: {}", e.without_url()),
        })?;

        let value = SecretString::from(refreshed.access_token);
        *token = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(refreshed.expires_in),
        });
        Ok(value)
    }

    /// Throttles, authenticates and sends a request, returning the JSON body.
    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let token = self.access_token().await?;
        self.limiter.acquire().await;
        let response = request
            .header("x-amz-access-token", token.expose_secret())
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;
        read_json(PROVIDER, response).await
    }

    async fn request_offers(&self, identifier: &str) -> Result<OfferSummary> {
        let url = format!(
            "{}/products/pricing/v0/items/{}/offers",
            self.endpoint, identifier
        );
        let body = self
            .send(self.client.get(&url).query(&[
                ("MarketplaceId", self.marketplace_id.as_str()),
                ("ItemCondition", "New"),
            ]))
            .await?;
        Ok(parse_offers(body.get("payload").unwrap_or(&Value::Null)))
    }

    async fn request_fees(&self, identifier: &str, price: i64) -> Result<Option<FeeBreakdown>> {
        let url = format!(
            "{}/products/fees/v0/items/{}/feesEstimate",
            self.endpoint, identifier
        );
        let request_body = json!({
            "FeesEstimateRequest": {
                "MarketplaceId": self.marketplace_id,
                "IsAmazonFulfilled": true,
                "PriceToEstimateFees": {
                    "ListingPrice": { "CurrencyCode": "JPY", "Amount": price }
                },
                "Identifier": identifier,
            }
        });
        let body = self
            .send(self.client.post(&url).json(&request_body))
            .await?;

        let fees = parse_fees(body.get("payload").unwrap_or(&Value::Null));
        if fees.is_none() {
            log::warn!("No fee estimate returned for {} at {}", identifier, price);
        }
        Ok(fees)
    }

    async fn request_catalog(&self, identifier: &str) -> Result<CatalogRecord> {
        let url = format!("{}/catalog/2022-04-01/items/{}", self.endpoint, identifier);
        let body = self
            .send(self.client.get(&url).query(&[
                ("marketplaceIds", self.marketplace_id.as_str()),
                ("includedData", "summaries,attributes,identifiers"),
            ]))
            .await?;
        Ok(parse_catalog(&body))
    }

    async fn request_restriction(&self, identifier: &str) -> Result<ListingRestriction> {
        let url = format!("{}/listings/2021-08-01/restrictions", self.endpoint);
        let body = self
            .send(self.client.get(&url).query(&[
                ("asin", identifier),
                ("sellerId", self.seller_id.as_str()),
                ("marketplaceIds", self.marketplace_id.as_str()),
                ("conditionType", "new_new"),
            ]))
            .await?;
        Ok(parse_restrictions(&body))
    }
}

#[async_trait]
impl SellSideSource for SellSideClient {
    async fn offers(&self, identifier: &str) -> Result<Option<OfferSummary>> {
        let key = offers_key(identifier);
        let params = json!({ "identifier": identifier });
        self.cache
            .get_or_fetch(&key, CacheSource::SellSideOffers, &params, move || async move {
                self.request_offers(identifier).await.map(Some)
            })
            .await
    }

    async fn fees(&self, identifier: &str, price: i64) -> Result<Option<FeeBreakdown>> {
        let key = fees_key(identifier, price);
        let params = json!({ "identifier": identifier, "price": price });
        self.cache
            .get_or_fetch(&key, CacheSource::SellSideFees, &params, move || {
                self.request_fees(identifier, price)
            })
            .await
    }

    async fn catalog(&self, identifier: &str) -> Result<Option<CatalogRecord>> {
        let key = catalog_key(identifier);
        let params = json!({ "identifier": identifier });
        self.cache
            .get_or_fetch(&key, CacheSource::SellSideCatalog, &params, move || async move {
                self.request_catalog(identifier).await.map(Some)
            })
            .await
    }

    /// A failed check is reported as `Unknown` and not cached.
    async fn restriction(&self, identifier: &str) -> Result<Option<ListingRestriction>> {
        let key = restrictions_key(identifier);
        let params = json!({ "identifier": identifier });
        let fetched = self
            .cache
            .get_or_fetch(&key, CacheSource::SellSideRestrictions, &params, move || async move {
                self.request_restriction(identifier).await.map(Some)
            })
            .await;

        match fetched {
            Err(LookupError::Cache(e)) => Err(LookupError::Cache(e)),
            Err(e) => {
                log::warn!("Restriction check failed for {}: {}", identifier, e);
                Ok(Some(ListingRestriction::Unknown))
            }
            ok => ok,
        }
    }
}

/// Parses the offers payload.
///
/// The lowest price is the fulfilled-new landed price from the summary, or
/// the first fulfilled offer's listing price plus shipping.
pub fn parse_offers(payload: &Value) -> OfferSummary {
    let mut summary = OfferSummary::default();

    if let Some(offer_summary) = payload.get("Summary") {
        summary.seller_count = positive_int(offer_summary.get("TotalOfferCount"));

        let lowest_prices = offer_summary
            .get("LowestPrices")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for lowest in lowest_prices {
            let is_new = lowest.get("condition").and_then(Value::as_str) == Some("New");
            let fulfilled =
                lowest.get("fulfillmentChannel").and_then(Value::as_str) == Some("Amazon");
            if is_new && fulfilled {
                if let Some(price) = amount(lowest.pointer("/LandedPrice/Amount")) {
                    summary.lowest_price = Some(price);
                }
            }
        }
    }

    let offers = payload
        .get("Offers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut fulfilled_count = 0;
    for offer in offers {
        if !offer
            .get("IsFulfilledByAmazon")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            continue;
        }
        fulfilled_count += 1;
        if summary.lowest_price.is_none() {
            let listing = offer.pointer("/ListingPrice/Amount").and_then(number);
            let shipping = offer
                .pointer("/Shipping/Amount")
                .and_then(number)
                .unwrap_or(0.0);
            if let Some(listing) = listing.filter(|p| *p != 0.0) {
                summary.lowest_price = Some((listing + shipping) as i64);
            }
        }
    }
    if fulfilled_count > 0 {
        summary.fulfilled_seller_count = Some(fulfilled_count);
    }

    summary
}

/// Parses a fee estimate. Returns `None` when the payload carries no estimate.
pub fn parse_fees(payload: &Value) -> Option<FeeBreakdown> {
    let estimate = payload
        .pointer("/FeesEstimateResult/FeesEstimate")
        .filter(|e| e.is_object())?;

    let mut referral = 0;
    let mut fulfillment = 0;
    let mut other = 0;
    let details = estimate
        .get("FeeDetailList")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for fee in details {
        let fee_type = fee.get("FeeType").and_then(Value::as_str).unwrap_or("");
        let value = amount(fee.pointer("/FinalFee/Amount")).unwrap_or(0);
        if fee_type.contains("ReferralFee") {
            referral += value;
        } else if fee_type.contains("FBA") || fee_type.contains("Fulfillment") {
            fulfillment += value;
        } else {
            other += value;
        }
    }

    Some(FeeBreakdown {
        referral: Some(referral),
        fulfillment: Some(fulfillment),
        other: Some(other),
        total: amount(estimate.pointer("/TotalFeesEstimate/Amount")),
    })
}

pub fn parse_catalog(item: &Value) -> CatalogRecord {
    let mut record = CatalogRecord::default();

    let summaries = item
        .get("summaries")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for summary in summaries {
        if record.title.is_none() {
            record.title = non_empty(summary.get("itemName"));
        }
        if record.brand.is_none() {
            record.brand = non_empty(summary.get("brand"));
        }
    }

    let attribute = |name: &str| non_empty(item.pointer(&format!("/attributes/{}/0/value", name)));
    record.model_number = attribute("model_number").or_else(|| attribute("part_number"));

    let groups = item
        .get("identifiers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for group in groups {
        let identifiers = group
            .get("identifiers")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for identifier in identifiers {
            if identifier.get("identifierType").and_then(Value::as_str) == Some("EAN") {
                record.catalog_code = non_empty(identifier.get("identifier"));
            }
        }
    }

    record
}

pub fn parse_restrictions(body: &Value) -> ListingRestriction {
    let restricted = body
        .get("restrictions")
        .and_then(Value::as_array)
        .is_some_and(|r| !r.is_empty());
    if restricted {
        ListingRestriction::Restricted
    } else {
        ListingRestriction::Unrestricted
    }
}

/// Amounts arrive as numbers or numeric strings; fractions are truncated.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A non-zero amount in whole yen.
fn amount(value: Option<&Value>) -> Option<i64> {
    value.and_then(number).filter(|v| *v != 0.0).map(|v| v as i64)
}

fn positive_int(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_i64).filter(|v| *v > 0)
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
