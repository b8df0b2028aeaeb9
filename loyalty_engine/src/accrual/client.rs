use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use log::*;
use reqwest::{header::RETRY_AFTER, StatusCode};

use crate::{
    accrual::{AccrualError, AccrualResult, PollOutcome},
    db_types::OrderNumber,
};

/// Used when a 429 reply carries no usable `Retry-After` header
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// A single polling attempt against the accrual service.
///
/// [`AccrualClient`] is the HTTP implementation. The retry policy and the worker pool only depend on this trait, so
/// they can be driven by scripted fakes.
pub trait AccrualFetcher: Clone + Send + Sync + 'static {
    fn fetch(&self, base_url: &str, order_number: &OrderNumber) -> impl Future<Output = PollOutcome> + Send;
}

#[derive(Debug, Clone)]
pub struct AccrualClient {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl AccrualClient {
    pub fn new() -> Result<Self, AccrualError> {
        Self::with_timeouts(REQUEST_TIMEOUT, CLIENT_TIMEOUT)
    }

    pub fn with_timeouts(request_timeout: Duration, client_timeout: Duration) -> Result<Self, AccrualError> {
        let client = reqwest::Client::builder()
            .timeout(client_timeout)
            .build()
            .map_err(|e| AccrualError::Transport(format!("Could not build the HTTP client. {e}")))?;
        Ok(Self { client, request_timeout })
    }
}

impl AccrualFetcher for AccrualClient {
    async fn fetch(&self, base_url: &str, order_number: &OrderNumber) -> PollOutcome {
        let url = format!("{}/api/orders/{}", base_url.trim_end_matches('/'), order_number.as_str());
        trace!("📡️ GET {url}");
        let response = match self.client.get(&url).timeout(self.request_timeout).send().await {
            Ok(r) => r,
            Err(e) => return PollOutcome::Transient(AccrualError::Transport(e.to_string())),
        };
        match response.status() {
            StatusCode::OK => match response.bytes().await {
                Ok(body) => match serde_json::from_slice::<AccrualResult>(&body) {
                    Ok(result) => PollOutcome::Success(result),
                    Err(e) => PollOutcome::Malformed(e.to_string()),
                },
                Err(e) => PollOutcome::Transient(AccrualError::Transport(e.to_string())),
            },
            StatusCode::NO_CONTENT => PollOutcome::NotRegistered,
            StatusCode::TOO_MANY_REQUESTS => {
                let delay = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .map(parse_retry_after)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                PollOutcome::RateLimited(delay)
            },
            status => {
                let body = response.text().await.unwrap_or_default();
                PollOutcome::Transient(AccrualError::UnexpectedStatus { status: status.as_u16(), body })
            },
        }
    }
}

/// Parses a `Retry-After` header value, relative to the current time. See [`parse_retry_after_at`].
pub fn parse_retry_after(value: &str) -> Duration {
    parse_retry_after_at(value, Utc::now())
}

/// `Retry-After` is either a number of seconds, or an HTTP date. Dates in the past give a zero delay. Anything
/// unparseable gives [`DEFAULT_RETRY_AFTER`].
pub fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Duration {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Duration::from_secs(secs);
    }
    match DateTime::parse_from_rfc2822(value) {
        Ok(at) => (at.with_timezone(&Utc) - now).to_std().unwrap_or(Duration::ZERO),
        Err(e) => {
            debug!("📡️ Ignoring unparseable Retry-After value '{value}': {e}");
            DEFAULT_RETRY_AFTER
        },
    }
}
