//! HTTP client for the group directory API.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use tracing::{debug, info, instrument, warn};

use super::{ApiSurface, DirectoryRequest, DirectoryTransport, Verb};
use crate::config::DirectoryConfig;
use crate::errors::DirectoryError;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Upper bound for a single retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

const REST_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Asynchronous directory API client with client-side rate limiting and
/// retry on transient failures.
pub struct DirectoryClient {
    http: reqwest::Client,
    api_url: String,
    rest_url: String,
    token: String,
    max_attempts: u32,
    retry_base: Duration,
    limiter: Option<DirectLimiter>,
}

impl DirectoryClient {
    pub fn new(config: &DirectoryConfig, token: impl Into<String>) -> Result<Self, DirectoryError> {
        let api_url = config.api_url.trim_end_matches('/').to_string();
        let rest_url = config.rest_url.trim_end_matches('/').to_string();

        let user_agent = format!(
            "{}/membersync/{}",
            config.user_agent_prefix,
            env!("CARGO_PKG_VERSION")
        );
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("membersync")),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        let limiter = build_quota(config.burst_size, config.period()).map(RateLimiter::direct);
        info!(
            api_url = %api_url,
            rest_url = %rest_url,
            burst_size = config.burst_size,
            period_ms = config.period_ms,
            "created DirectoryClient"
        );

        Ok(Self {
            http,
            api_url,
            rest_url,
            token: token.into(),
            max_attempts: config.max_attempts.max(1),
            retry_base: config.retry_base(),
            limiter,
        })
    }

    fn url_for(&self, request: &DirectoryRequest) -> String {
        let base = match request.api {
            ApiSurface::V1 => &self.api_url,
            ApiSurface::Rest => &self.rest_url,
        };
        format!("{}/{}", base, request.path.trim_start_matches('/'))
    }

    /// Send a request, retrying transient failures with exponential backoff.
    #[instrument(skip(self, request), fields(verb = %request.verb, path = %request.path))]
    pub async fn send(
        &self,
        request: &DirectoryRequest,
    ) -> Result<serde_json::Value, DirectoryError> {
        let mut attempt = 1;
        loop {
            match self.send_once(request).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = backoff_delay(self.retry_base, attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "directory request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(DirectoryError::ApiError { status: 429, .. }) => {
                    return Err(DirectoryError::RateLimited { attempts: attempt });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        request: &DirectoryRequest,
    ) -> Result<serde_json::Value, DirectoryError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = self.url_for(request);
        let mut req = self
            .http
            .request(method_for(request.verb), &url)
            .header(AUTHORIZATION, format!("token {}", self.token));
        if let Some(body) = &request.body {
            // `json` keeps an explicit content type.
            if request.api == ApiSurface::Rest {
                req = req.header(CONTENT_TYPE, REST_CONTENT_TYPE);
            }
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &text));
        }

        debug!(status = status.as_u16(), bytes = text.len(), "directory response");
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| DirectoryError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl DirectoryTransport for DirectoryClient {
    async fn request(
        &self,
        request: &DirectoryRequest,
    ) -> Result<serde_json::Value, DirectoryError> {
        self.send(request).await
    }
}

fn method_for(verb: Verb) -> Method {
    match verb {
        Verb::Get => Method::GET,
        Verb::Post => Method::POST,
        Verb::Put => Method::PUT,
        Verb::Delete => Method::DELETE,
    }
}

/// `burst_size` requests per `period`, replenished evenly across the window.
fn build_quota(burst_size: u32, period: Duration) -> Option<Quota> {
    let burst = NonZeroU32::new(burst_size)?;
    Quota::with_period(period / burst_size).map(|q| q.allow_burst(burst))
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

fn classify_failure(status: u16, body: &str) -> DirectoryError {
    let message = extract_message(body).unwrap_or_else(|| format!("HTTP {}", status));
    if status == 401 || status == 403 {
        return DirectoryError::AuthenticationFailed(format!("HTTP {}: {}", status, message));
    }
    DirectoryError::ApiError { status, message }
}

/// Pull a readable message out of a v1 (`message`) or REST
/// (`errors[0].detail`) error body.
fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(json) => json
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| {
                json.get("errors")
                    .and_then(|e| e.get(0))
                    .and_then(|e| e.get("detail"))
                    .and_then(|d| d.as_str())
            })
            .map(String::from),
        Err(_) => Some(trimmed.chars().take(200).collect()),
    }
}
