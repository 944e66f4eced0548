use std::time::Duration;

use log::{debug, warn};
use reqwest::header::ACCEPT;
use serde_json::Value;
use thiserror::Error;

use crate::hazemon::parse::parse_series;
use crate::hazemon::url::{build_range_url, RangeQuery};
use crate::reading::Reading;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Hazemon did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Hazemon request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Hazemon answered with HTTP {0}")]
    Status(u16),
}

/// A Hazemon answer. Non-2xx statuses are data here, not errors.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub ok: bool,
    /// `Value::Null` when the body is not JSON
    pub body: Value,
}

/// Readings returned for a range, with every URL that was requested.
#[derive(Debug, Clone, Default)]
pub struct SeriesFetch {
    pub readings: Vec<Reading>,
    pub urls: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct HazemonClient {
    http: reqwest::Client,
}

impl Default for HazemonClient {
    fn default() -> Self {
        HazemonClient::new()
    }
}

impl HazemonClient {
    pub fn new() -> Self {
        // Per-request deadlines are shorter, this only bounds a stuck connection
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        HazemonClient { http }
    }

    /// One GET with a hard deadline. The in-flight request is dropped when
    /// the deadline passes.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<UpstreamResponse, UpstreamError> {
        debug!("GET {} (timeout {:?})", url, timeout);

        let request = async {
            let response = self
                .http
                .get(url)
                .header(ACCEPT, "application/json")
                .send()
                .await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        };

        let (status, bytes) = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| UpstreamError::Timeout(timeout))??;

        let body = serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            debug!("Hazemon body from {} is not JSON: {}", url, err);
            Value::Null
        });

        Ok(UpstreamResponse {
            status: status.as_u16(),
            ok: status.is_success(),
            body,
        })
    }

    /// Readings within `range`, retrying once with the bounds swapped when
    /// Hazemon answers successfully but without a single PM2.5 value.
    /// Failures are never retried.
    pub async fn fetch_series(
        &self,
        base: &str,
        range: RangeQuery,
        timeout: Duration,
    ) -> Result<SeriesFetch, UpstreamError> {
        let mut fetched = SeriesFetch::default();

        for order in [range.order, range.order.swapped()] {
            let url = build_range_url(base, &range.with_order(order));
            let response = self.fetch(&url, timeout).await?;
            fetched.urls.push(url);

            if !response.ok {
                warn!("Hazemon range request answered HTTP {}", response.status);
                return Err(UpstreamError::Status(response.status));
            }

            fetched.readings = parse_series(&response.body, Some(range.after))
                .into_iter()
                .filter(|r| r.timestamp <= range.before)
                .collect();

            if fetched.readings.iter().any(|r| r.pm25.is_some()) {
                return Ok(fetched);
            }
            debug!("No usable points with {} order", order);
        }

        Ok(fetched)
    }
}
