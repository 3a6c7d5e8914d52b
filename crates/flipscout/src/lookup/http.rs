//! Shared HTTP plumbing for the provider clients.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use super::error::{LookupError, Result};
use crate::config::HttpConfig;
use crate::sanitize::{redact_url, sanitize_error_body};

/// Creates an HTTP client with the configured connect and request timeouts.
pub fn create_http_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .timeout(Duration::from_secs(config.timeout_seconds))
        .user_agent(concat!("flipscout/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LookupError::Client(e.to_string()))
}

/// Maps a transport error. reqwest includes the URL in its message, so it is
/// rebuilt without the query string.
pub(crate) fn transport_error(provider: &'static str, err: reqwest::Error) -> LookupError {
    let redacted = err.url().map(|url| redact_url(url.as_str()));
    let message = match redacted {
        Some(url) => format!("{} ({})", err.without_url(), url),
        None => err.to_string(),
    };
    LookupError::Http { provider, message }
}

/// Checks the status and decodes the JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: &'static str,
    response: Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LookupError::Status {
            provider,
            status: status.as_u16(),
            body: sanitize_error_body(&body),
        });
    }

    response.json::<T>().await.map_err(|e| LookupError::Decode {
        provider,
        message: e.without_url().to_string(),
    })
}
