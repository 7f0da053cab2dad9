//! Shared JSON-over-HTTP call with retry and backoff.
//!
//! Used by the OpenAI and Ollama embedding and completion providers.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;
use tracing::warn;

use crate::error::{QaError, Result};

/// Build a client whose requests time out after `timeout_secs`.
pub(crate) fn client(timeout_secs: u64, service: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| QaError::external(service, format!("failed to build HTTP client: {}", e)))
}

/// POST `body` to `url` and return the parsed JSON response.
///
/// Every failure is reported as [`QaError::ExternalService`] tagged with `service`.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    service: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            warn!(service, attempt, delay_secs = delay.as_secs(), "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        QaError::external(service, format!("invalid JSON response: {}", e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(QaError::external(
                        service,
                        format!("API error {}: {}", status, body_text),
                    ));
                    continue;
                }

                return Err(QaError::external(
                    service,
                    format!("API error {}: {}", status, body_text),
                ));
            }
            Err(e) => {
                last_err = Some(QaError::external(
                    service,
                    format!("request to {} failed: {}", url, e),
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| QaError::external(service, "request failed after retries")))
}
