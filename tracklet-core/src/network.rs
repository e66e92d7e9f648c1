//! HTTP delivery of event batches
//!
//! One request shape for everything: `POST {endpoint}` with platform, app
//! id, bundle sequence id, upload timestamp and a short content hash as
//! query parameters, and the JSON array payload as the body. Success is
//! HTTP 200 exactly; anything else — timeout, transport error, other
//! status — counts as a failed attempt and is retried sequentially.

use std::time::Duration;

use reqwest::header::{HeaderValue, CONNECTION, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::context::Context;
use crate::event::PLATFORM;

/// Per-attempt timeout for immediate single-event sends.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-attempt timeout for batch sends. Batches are bigger, so they get
/// more time and fewer retries.
pub const BATCH_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Attempt budget for immediate sends.
pub const REQUEST_RETRY_TIMES: u32 = 3;

/// Attempt budget for batch sends; retrying a large batch is costly.
pub const BATCH_REQUEST_RETRY_TIMES: u32 = 1;

/// Bodies at or above this size opt out of the keep-alive transport hint;
/// oversized keep-alive requests are unreliable during teardown.
pub const KEEP_ALIVE_SIZE_LIMIT: usize = 64 * 1024;

/// Short content hash sent alongside the payload for endpoint-side
/// dedup/integrity: first 4 bytes of SHA-256, hex encoded.
pub fn hash_code(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

/// Sends batches to the collection endpoint.
pub struct DeliveryClient {
    http: reqwest::Client,
}

impl Default for DeliveryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryClient {
    pub fn new() -> Self {
        // Timeouts are per attempt, so they are set on each request rather
        // than on the client.
        DeliveryClient {
            http: reqwest::Client::new(),
        }
    }

    /// Deliver one batch payload (a JSON array of events).
    ///
    /// Returns `true` on the first attempt answered with HTTP 200,
    /// `false` once `retry_times` attempts are exhausted. Never panics or
    /// returns an error: delivery failure is a boolean plus log lines.
    pub async fn send(
        &self,
        events_json: &str,
        context: &Context,
        bundle_sequence_id: u64,
        retry_times: u32,
        timeout: Duration,
    ) -> bool {
        let hash = hash_code(events_json);
        let upload_timestamp = chrono::Utc::now().timestamp_millis();
        let sequence_id = bundle_sequence_id.to_string();
        let timestamp = upload_timestamp.to_string();
        let query = [
            ("platform", PLATFORM),
            ("appId", context.config.app_id.as_str()),
            ("event_bundle_sequence_id", sequence_id.as_str()),
            ("upload_timestamp", timestamp.as_str()),
            ("hashCode", hash.as_str()),
        ];

        let keep_alive = events_json.len() < KEEP_ALIVE_SIZE_LIMIT;
        let cookie = context.config.auth_cookie.clone().unwrap_or_default();
        let user_agent = context.device.user_agent.clone();

        let mut attempts = 0;
        while attempts < retry_times {
            attempts += 1;
            let request = self
                .http
                .post(&context.config.endpoint)
                .query(&query)
                .header(CONTENT_TYPE, "application/json; charset=utf-8")
                .header(
                    COOKIE,
                    HeaderValue::from_str(&cookie)
                        .unwrap_or_else(|_| HeaderValue::from_static("")),
                )
                .header(
                    USER_AGENT,
                    HeaderValue::from_str(&user_agent)
                        .unwrap_or_else(|_| HeaderValue::from_static("")),
                )
                .header(
                    CONNECTION,
                    if keep_alive { "keep-alive" } else { "close" },
                )
                .timeout(timeout)
                .body(events_json.to_string());

            match request.send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    debug!(bundle_sequence_id, attempts, "batch delivered");
                    return true;
                }
                Ok(response) => {
                    error!(
                        status = %response.status(),
                        attempt = attempts,
                        "request failed with status code"
                    );
                }
                Err(e) => {
                    error!(error = %e, attempt = attempts, "error during request");
                }
            }
        }
        error!(retry_times, "request failed after all retries");
        false
    }
}
