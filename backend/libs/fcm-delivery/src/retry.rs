/// Bounded retry with a fixed backoff for transport-level failures
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Run `f` until `should_retry` rejects the outcome or attempts run out.
///
/// The last outcome is returned as-is, so a caller still sees the final
/// 5xx response or transport error after exhausting the budget.
pub async fn retry_when<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut f: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&Result<T, E>) -> bool,
{
    let mut attempt = 1;

    loop {
        let outcome = f().await;

        if attempt >= config.max_attempts || !should_retry(&outcome) {
            return outcome;
        }

        warn!(
            "Transient failure, retry attempt {}/{} in {:?}",
            attempt,
            config.max_attempts - 1,
            config.backoff
        );

        tokio::time::sleep(config.backoff).await;
        attempt += 1;
    }
}

/// Connection failures and 5xx responses are worth another try; timeouts are not
pub fn is_transient(outcome: &Result<reqwest::Response, reqwest::Error>) -> bool {
    match outcome {
        Ok(response) => response.status().is_server_error(),
        Err(e) => e.is_connect(),
    }
}

/// Send a request built by `build`, retrying transient failures
pub async fn send_with_retry<F>(
    config: &RetryConfig,
    build: F,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    retry_when(config, || build().send(), is_transient).await
}
