//! Bounded, fixed-delay retry around an injected transport.

use std::{collections::BTreeSet, time::Duration};

use serde::{de, Deserialize, Deserializer};
use tracing::debug;

use crate::http::{HttpRequest, HttpResponse};
use crate::transport::HttpTransport;

/// When and how often a request is retried.
///
/// Deserializable with every field optional; `retry_delay` is given in
/// seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_tries: u32,
    /// Statuses that trigger another attempt.
    pub retry_statuses: BTreeSet<u16>,
    #[serde(deserialize_with = "duration_from_secs")]
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 5,
            retry_statuses: BTreeSet::from([502, 503, 504, 599]),
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn with_retry_statuses<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.retry_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
}

/// Send `request` until it succeeds or the policy is exhausted.
///
/// An attempt is retried when the transport returned no response or the
/// status is in `retry_statuses`. The result of the final attempt is returned
/// as-is, so `None` means the last attempt got no response at all. Remote
/// failures never become errors here.
pub async fn fetch_with_retries(
    transport: &dyn HttpTransport,
    request: &HttpRequest,
    policy: &RetryPolicy,
) -> Option<HttpResponse> {
    let max_tries = policy.max_tries.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let response = match transport.send(request).await {
            Ok(response) if policy.retry_statuses.contains(&response.status) => {
                debug!(
                    url = %request.url,
                    status = response.status,
                    attempt,
                    max_tries,
                    "retryable status"
                );
                Some(response)
            }
            Ok(response) => return Some(response),
            Err(err) => {
                debug!(url = %request.url, error = %err, attempt, max_tries, "no response");
                None
            }
        };

        if attempt >= max_tries {
            return response;
        }
        tokio::time::sleep(policy.retry_delay).await;
    }
}
