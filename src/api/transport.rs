//! Retry of transient network failures.

use std::time::Duration;

/// How many times and how fast to retry a request that never got a response.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (zero based): base, 2x, 4x, ...
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1 << attempt.min(16))
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}

/// Sends the request built by `build`, rebuilding and resending it with
/// exponential backoff while the transport fails before any response.
///
/// HTTP statuses are never retried here.
///
/// # Errors
///
/// Returns the last transport error once retries are exhausted, or any
/// non-transient error immediately.
pub async fn send_with_retry<F>(policy: RetryPolicy, build: F) -> reqwest::Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;
    loop {
        match build().send().await {
            Ok(response) => return Ok(response),
            Err(e) if is_transient(&e) && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                log::warn!(
                    "Request failed ({e}), retrying in {delay:?}... (attempt {}/{})",
                    attempt + 1,
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn unreachable_host_is_retried_then_fails() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{port}/");
        let client = reqwest::Client::new();
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };

        let result = send_with_retry(policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            client.get(&url)
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn http_error_status_is_not_retried() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.path("/flaky");
                then.status(503);
            })
            .await;
        let client = reqwest::Client::new();

        let response = send_with_retry(RetryPolicy::default(), || client.get(server.url("/flaky")))
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 503);
        assert_eq!(mock.hits_async().await, 1);
    }
}
