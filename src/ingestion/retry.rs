use rand::Rng;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// Failure modes of an upstream REST call, split so the retry policy can
/// discriminate transient from permanent errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}")]
    Status {
        status: StatusCode,
        /// Server retry hint in seconds, from a 429 response.
        retry_after: Option<u64>,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Transport errors, 5xx, and 429 recover with a retry; other 4xx are
    /// permanent and propagate to the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Transport(_) => true,
        }
    }
}

pub const MAX_ATTEMPTS: u32 = 5;
const MAX_BACKOFF_SECS: u64 = 10;

/// Exponential backoff (base 2, capped) plus up to 1 s of uniform jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = (1u64 << attempt.min(6)).min(MAX_BACKOFF_SECS);
    Duration::from_secs(base) + Duration::from_millis(rand::thread_rng().gen_range(0..1000))
}

/// Run `op` with up to [`MAX_ATTEMPTS`] tries, sleeping between retryable
/// failures. A 429 carrying a retry hint sleeps for exactly that long.
pub async fn with_retries<T, F, Fut>(label: &str, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS || !err.is_retryable() {
                    return Err(err);
                }
                let delay = match &err {
                    ApiError::Status {
                        retry_after: Some(secs),
                        ..
                    } => Duration::from_secs(*secs),
                    _ => backoff_delay(attempt),
                };
                warn!(
                    "{} attempt {}/{} failed ({}), retrying in {:?}",
                    label, attempt, MAX_ATTEMPTS, err, delay
                );
                sleep(delay).await;
            }
        }
    }
}
