//! Retry plumbing for provider requests.

use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{QuarryError, Result};

/// Retry schedule: exponential backoff from 1s with up to 25% jitter.
const RETRY_BASE_DELAY_SECS: u64 = 1;
const MAX_RETRIES: usize = 3;
const RETRY_JITTER_DIVISOR: u128 = 4;

fn is_retriable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retriable_send_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn backoff_delay(attempt: usize) -> Duration {
    let multiplier = 1u64.checked_shl(attempt as u32).unwrap_or(u64::MAX);
    let base = Duration::from_secs(RETRY_BASE_DELAY_SECS.saturating_mul(multiplier));
    let max_jitter_ms = base.as_millis() / RETRY_JITTER_DIVISOR;
    if max_jitter_ms == 0 {
        return base;
    }
    let max_jitter_ms = std::cmp::min(max_jitter_ms, u128::from(u64::MAX)) as u64;
    let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
    base + Duration::from_millis(jitter)
}

/// Send a request, retrying transient failures.
///
/// Non-success responses are returned to the caller for error
/// rendering once the retry budget is spent.
pub(super) async fn send_with_retry(
    mut make_request: impl FnMut() -> reqwest::RequestBuilder,
) -> Result<reqwest::Response> {
    for attempt in 0..=MAX_RETRIES {
        match make_request().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || !is_retriable_status(status) || attempt == MAX_RETRIES {
                    return Ok(response);
                }
                let delay = backoff_delay(attempt);
                debug!(
                    "Provider returned {}; retrying in {:?} (attempt {}/{})",
                    status,
                    delay,
                    attempt + 1,
                    MAX_RETRIES + 1
                );
                let _ = response.bytes().await;
                sleep(delay).await;
            }
            Err(err) => {
                if !is_retriable_send_error(&err) || attempt == MAX_RETRIES {
                    return Err(QuarryError::provider(format!(
                        "request failed after {} attempt(s): {}",
                        attempt + 1,
                        err
                    )));
                }
                let delay = backoff_delay(attempt);
                debug!(
                    "Provider request error: {}; retrying in {:?} (attempt {}/{})",
                    err,
                    delay,
                    attempt + 1,
                    MAX_RETRIES + 1
                );
                sleep(delay).await;
            }
        }
    }
    unreachable!("send_with_retry returns within the retry budget")
}
