use std::path::Path;

use rust_decimal::Decimal;

use crate::config::schema::{Config, MAX_CACHE_TTL_SECONDS};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.cache.ttl_seconds == 0 || config.cache.ttl_seconds > MAX_CACHE_TTL_SECONDS {
        return Err(ConfigError::Validation {
            message: format!(
                "cache.ttl_seconds must be between 1 and {}",
                MAX_CACHE_TTL_SECONDS
            ),
        });
    }

    for (name, rate) in [
        ("demand", config.rate_limits.demand),
        ("sell_side", config.rate_limits.sell_side),
        ("buy_side", config.rate_limits.buy_side),
    ] {
        if !rate.is_finite() || rate < 0.0 {
            return Err(ConfigError::Validation {
                message: format!("rate_limits.{} must be a non-negative number", name),
            });
        }
    }

    let defaults = &config.defaults;
    let combined = defaults.point_rate_normal + defaults.point_rate_bonus;
    if defaults.point_rate_normal < Decimal::ZERO
        || defaults.point_rate_bonus < Decimal::ZERO
        || combined > Decimal::ONE
    {
        return Err(ConfigError::Validation {
            message: format!(
                "Point rates must be non-negative and sum to at most 1 (got {})",
                combined
            ),
        });
    }
    if defaults.threshold_profit_rate < Decimal::ZERO
        || defaults.threshold_profit_rate > Decimal::ONE
    {
        return Err(ConfigError::Validation {
            message: "defaults.threshold_profit_rate must be within [0, 1]".to_string(),
        });
    }
    if defaults.threshold_rank < 1 {
        return Err(ConfigError::Validation {
            message: "defaults.threshold_rank must be at least 1".to_string(),
        });
    }

    if config.buy_side.hits == 0 || config.buy_side.hits > 30 {
        return Err(ConfigError::Validation {
            message: "buy_side.hits must be between 1 and 30".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();

        assert_eq!(config.cache.ttl_seconds, 86_400);
        assert_eq!(config.http.timeout_seconds, 30);
        assert_eq!(config.rate_limits.demand, 0.5);
        assert_eq!(config.rate_limits.sell_side, 1.0);
        assert_eq!(config.pipeline.claim_limit, 1000);
        assert_eq!(config.pipeline.fail_reason_max_chars, 500);
        assert_eq!(config.defaults.threshold_rank, 50_000);
        assert_eq!(config.defaults.point_rate_normal, Decimal::new(1, 2));
        assert_eq!(config.defaults.point_rate_bonus, Decimal::new(7, 2));
        assert_eq!(config.sell_side.marketplace_id, "A1VC38T7YXB528");
        assert_eq!(
            config.demand.api_key.env_var.as_deref(),
            Some("KEEPA_API_KEY")
        );
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database": { "path": "/var/lib/flipscout/research.db" },
            "cache": { "ttl_seconds": 3600 },
            "rate_limits": { "demand": 0.25, "sell_side": 2, "buy_side": 0 },
            "defaults": {
                "point_rate_normal": 0.01,
                "point_rate_bonus": 0.1,
                "threshold_profit_amount": 500,
                "threshold_profit_rate": 0.2,
                "threshold_rank": 80000,
                "threshold_sales_30": 5
            },
            "logging": { "level": "debug", "format": "json" },
            "buy_side": { "application_id": { "value": "app-123" }, "hits": 10 }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(
            config.database.path.as_deref(),
            Some("/var/lib/flipscout/research.db")
        );
        assert_eq!(config.cache.ttl_seconds, 3600);
        assert_eq!(config.rate_limits.buy_side, 0.0);
        assert_eq!(config.defaults.point_rate_bonus, Decimal::new(1, 1));
        assert_eq!(config.defaults.threshold_profit_rate, Decimal::new(2, 1));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.buy_side.hits, 10);
        assert_eq!(
            config.buy_side.application_id.value.as_deref(),
            Some("app-123")
        );
    }

    #[test]
    fn test_unknown_field_rejected_by_schema() {
        let result = load_config_from_str(r#"{ "version": "1.0", "workers": 3 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_cache_ttl_rejected() {
        let result = load_config_from_str(
            r#"{ "version": "1.0", "cache": { "ttl_seconds": 10000000000000 } }"#,
        );
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));

        let mut config = Config::default();
        config.cache.ttl_seconds = MAX_CACHE_TTL_SECONDS + 1;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("cache.ttl_seconds"));

        config.cache.ttl_seconds = MAX_CACHE_TTL_SECONDS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_negative_rate_limit_rejected() {
        let result =
            load_config_from_str(r#"{ "version": "1.0", "rate_limits": { "demand": -1 } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_point_rates_summing_above_one_rejected() {
        let result = load_config_from_str(
            r#"{ "version": "1.0", "defaults": { "point_rate_normal": 0.6, "point_rate_bonus": 0.5 } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let result = load_config_from_str("{ not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/flipscout.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flipscout.json");
        std::fs::write(&path, r#"{ "version": "1.0", "cache": { "ttl_seconds": 60 } }"#)
            .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.cache.ttl_seconds, 60);
    }
}
