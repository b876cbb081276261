//! HTTP client for upstream calls with rate limiting and error classification
//!
//! Every response status is mapped onto the sync error taxonomy here so the
//! retry policy and the executor never look at raw HTTP codes.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{Quota, RateLimiter, clock::DefaultClock, state::{InMemoryState, direct::NotKeyed}};
use reqwest::{Client, StatusCode, header::{HeaderMap, HeaderValue, USER_AGENT}};
use serde::de::DeserializeOwned;

use crate::domain::errors::{SyncError, SyncResult};
use crate::infrastructure::config::UpstreamConfig;

/// Rate-limited JSON client shared by the upstream adapters
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpClient {
    pub fn new(config: &UpstreamConfig) -> SyncResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| SyncError::InvalidInput(format!("invalid user agent: {e}")))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| SyncError::InvalidInput(format!("failed to build HTTP client: {e}")))?;

        let per_second = NonZeroU32::new(config.max_requests_per_second).ok_or_else(|| {
            SyncError::InvalidInput("upstream.max_requests_per_second must be > 0".to_string())
        })?;
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        Ok(Self { client, rate_limiter })
    }

    /// GET `url` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> SyncResult<T> {
        self.rate_limiter.until_ready().await;
        tracing::debug!("Fetching URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::transient(url, format!("body read timed out: {e}"))
            } else {
                SyncError::Decode {
                    key: url.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }
}

pub fn classify_status(url: &str, status: StatusCode) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::AuthRequired {
            message: format!("{url} answered {status}"),
        },
        StatusCode::NOT_FOUND | StatusCode::GONE => SyncError::NotFound {
            target: url.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            SyncError::transient(url, format!("status {status}"))
        }
        status if status.is_server_error() => SyncError::transient(url, format!("status {status}")),
        status => SyncError::NotFound {
            target: format!("{url} (status {status})"),
        },
    }
}

fn classify_transport_error(url: &str, error: &reqwest::Error) -> SyncError {
    if error.is_builder() {
        SyncError::InvalidInput(format!("bad request for {url}: {error}"))
    } else {
        SyncError::transient(url, error.to_string())
    }
}
