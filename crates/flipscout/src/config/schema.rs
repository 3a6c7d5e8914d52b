use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub demand: DemandProviderConfig,
    #[serde(default)]
    pub sell_side: SellSideProviderConfig,
    #[serde(default)]
    pub buy_side: BuySideProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            http: HttpConfig::default(),
            rate_limits: RateLimitConfig::default(),
            defaults: DefaultsConfig::default(),
            pipeline: PipelineSettings::default(),
            logging: LoggingConfig::default(),
            demand: DemandProviderConfig::default(),
            sell_side: SellSideProviderConfig::default(),
            buy_side: BuySideProviderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `~/.flipscout/data/flipscout.db` when unset.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

/// Upper bound for `cache.ttl_seconds` (ten years).
pub const MAX_CACHE_TTL_SECONDS: u64 = 315_360_000;

fn default_ttl_seconds() -> u64 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
        }
    }
}

/// Requests per second for each external source. Zero disables throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_demand_rate")]
    pub demand: f64,
    #[serde(default = "default_marketplace_rate")]
    pub sell_side: f64,
    #[serde(default = "default_marketplace_rate")]
    pub buy_side: f64,
}

fn default_demand_rate() -> f64 {
    0.5
}

fn default_marketplace_rate() -> f64 {
    1.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            demand: default_demand_rate(),
            sell_side: default_marketplace_rate(),
            buy_side: default_marketplace_rate(),
        }
    }
}

/// Job settings applied when a submission does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_point_rate_normal")]
    pub point_rate_normal: Decimal,
    #[serde(default = "default_point_rate_bonus")]
    pub point_rate_bonus: Decimal,
    #[serde(default = "default_threshold_profit_amount")]
    pub threshold_profit_amount: i64,
    #[serde(default = "default_threshold_profit_rate")]
    pub threshold_profit_rate: Decimal,
    #[serde(default = "default_threshold_rank")]
    pub threshold_rank: i64,
    #[serde(default = "default_threshold_sales_30")]
    pub threshold_sales_30: i64,
}

fn default_point_rate_normal() -> Decimal {
    Decimal::new(1, 2)
}

fn default_point_rate_bonus() -> Decimal {
    Decimal::new(7, 2)
}

fn default_threshold_profit_amount() -> i64 {
    1000
}

fn default_threshold_profit_rate() -> Decimal {
    Decimal::new(15, 2)
}

fn default_threshold_rank() -> i64 {
    50_000
}

fn default_threshold_sales_30() -> i64 {
    10
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            point_rate_normal: default_point_rate_normal(),
            point_rate_bonus: default_point_rate_bonus(),
            threshold_profit_amount: default_threshold_profit_amount(),
            threshold_profit_rate: default_threshold_profit_rate(),
            threshold_rank: default_threshold_rank(),
            threshold_sales_30: default_threshold_sales_30(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_claim_limit")]
    pub claim_limit: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_fail_reason_max_chars")]
    pub fail_reason_max_chars: usize,
}

fn default_claim_limit() -> usize {
    1000
}

fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn default_fail_reason_max_chars() -> usize {
    500
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            claim_limit: default_claim_limit(),
            worker_count: default_worker_count(),
            fail_reason_max_chars: default_fail_reason_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Where a credential comes from. Resolution order is value, file, env var.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretSource {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub env_var: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandProviderConfig {
    #[serde(default = "default_demand_api_key")]
    pub api_key: SecretSource,
    #[serde(default = "default_demand_base_url")]
    pub base_url: String,
    #[serde(default = "default_demand_domain")]
    pub domain: u32,
    #[serde(default = "default_demand_stats_days")]
    pub stats_days: u32,
}

fn default_demand_api_key() -> SecretSource {
    SecretSource {
        env_var: Some("KEEPA_API_KEY".to_string()),
        ..Default::default()
    }
}

fn default_demand_base_url() -> String {
    "https://api.keepa.com".to_string()
}

fn default_demand_domain() -> u32 {
    5
}

fn default_demand_stats_days() -> u32 {
    180
}

impl Default for DemandProviderConfig {
    fn default() -> Self {
        Self {
            api_key: default_demand_api_key(),
            base_url: default_demand_base_url(),
            domain: default_demand_domain(),
            stats_days: default_demand_stats_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellSideProviderConfig {
    #[serde(default = "default_sell_side_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_marketplace_id")]
    pub marketplace_id: String,
    #[serde(default)]
    pub seller_id: String,
    #[serde(default = "default_client_id")]
    pub client_id: SecretSource,
    #[serde(default = "default_client_secret")]
    pub client_secret: SecretSource,
    #[serde(default = "default_refresh_token")]
    pub refresh_token: SecretSource,
}

fn default_sell_side_endpoint() -> String {
    "https://sellingpartnerapi-fe.amazon.com".to_string()
}

fn default_token_url() -> String {
    "https://api.amazon.com/auth/o2/token".to_string()
}

fn default_marketplace_id() -> String {
    "A1VC38T7YXB528".to_string()
}

fn default_client_id() -> SecretSource {
    SecretSource {
        env_var: Some("SP_API_CLIENT_ID".to_string()),
        ..Default::default()
    }
}

fn default_client_secret() -> SecretSource {
    SecretSource {
        env_var: Some("SP_API_CLIENT_SECRET".to_string()),
        ..Default::default()
    }
}

fn default_refresh_token() -> SecretSource {
    SecretSource {
        env_var: Some("SP_API_REFRESH_TOKEN".to_string()),
        ..Default::default()
    }
}

impl Default for SellSideProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_sell_side_endpoint(),
            token_url: default_token_url(),
            marketplace_id: default_marketplace_id(),
            seller_id: String::new(),
            client_id: default_client_id(),
            client_secret: default_client_secret(),
            refresh_token: default_refresh_token(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuySideProviderConfig {
    #[serde(default = "default_application_id")]
    pub application_id: SecretSource,
    #[serde(default = "default_buy_side_base_url")]
    pub base_url: String,
    #[serde(default = "default_hits")]
    pub hits: u32,
}

fn default_application_id() -> SecretSource {
    SecretSource {
        env_var: Some("RAKUTEN_APP_ID".to_string()),
        ..Default::default()
    }
}

fn default_buy_side_base_url() -> String {
    "https://app.rakuten.co.jp/services/api/IchibaItem/Search/20220601".to_string()
}

fn default_hits() -> u32 {
    30
}

impl Default for BuySideProviderConfig {
    fn default() -> Self {
        Self {
            application_id: default_application_id(),
            base_url: default_buy_side_base_url(),
            hits: default_hits(),
        }
    }
}
