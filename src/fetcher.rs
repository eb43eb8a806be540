//! Historian API client
//!
//! Fetches one tag's value series over a lookback window via
//! `GET {base_url}/v1/trend/history?tag=..&start=..&end=..` with the API
//! key in a `token` header. The historian expects query instants rendered
//! in a fixed UTC offset (`%Y-%m-%dT%H:%M:%S±HH:MM`); reqwest URL-encodes
//! them on the way out.
//!
//! A failed fetch makes the tag unavailable for the current cycle. There
//! is no retry inside a call; the next scheduler cycle is the retry.

use crate::config::Config;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Per-request timeout so a hung historian call cannot stall the scheduler
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One historian reading. `value` stays `None` for null/non-numeric
/// entries in the response; the aligner fills the gap later.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("historian returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("tag {0:?} missing from response")]
    TagMissing(String),
}

/// Source of sensor time series, as a seam so the scheduler can be
/// exercised against canned data in tests.
#[async_trait]
pub trait SensorSource {
    /// Fetch a time-ordered series for one tag over the trailing
    /// `lookback_minutes` window.
    async fn fetch_series(
        &self,
        tag: &str,
        lookback_minutes: i64,
    ) -> Result<Vec<SensorSample>, FetchError>;
}

/// HTTP client for the historian's trend-history endpoint
pub struct HistorianClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    offset: FixedOffset,
}

impl HistorianClient {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            offset: config.fixed_offset,
        })
    }

}

/// Render an instant the way the historian expects it:
/// local-to-the-offset wall time plus the offset suffix.
fn format_instant(instant: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = instant.with_timezone(&offset);
    format!("{}{}", local.format("%Y-%m-%dT%H:%M:%S"), offset)
}

#[async_trait]
impl SensorSource for HistorianClient {
    async fn fetch_series(
        &self,
        tag: &str,
        lookback_minutes: i64,
    ) -> Result<Vec<SensorSample>, FetchError> {
        let end = Utc::now();
        let start = end - chrono::Duration::minutes(lookback_minutes);

        let url = format!("{}/v1/trend/history", self.base_url);
        let formatted_start = format_instant(start, self.offset);
        let formatted_end = format_instant(end, self.offset);
        log::info!(
            "Fetching tag {:?} from {} to {}",
            tag,
            formatted_start,
            formatted_end
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("tag", tag),
                ("start", formatted_start.as_str()),
                ("end", formatted_end.as_str()),
            ])
            .header("accept", "application/json")
            .header("token", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Fetch for tag {:?} failed with status {}", tag, status);
            return Err(FetchError::Status(status));
        }

        let body: HashMap<String, HashMap<String, Value>> = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedBody(e.to_string()))?;

        let series = body
            .get(tag)
            .ok_or_else(|| FetchError::TagMissing(tag.to_string()))?;

        let samples = parse_series(series, self.offset);
        log::debug!("Retrieved {} samples for tag {:?}", samples.len(), tag);
        Ok(samples)
    }
}

/// Parse the historian's timestamp-string -> value map into a sorted
/// sample series. Unparseable timestamps are dropped with a warning;
/// null or non-numeric values survive as `value: None`.
pub fn parse_series(
    raw: &HashMap<String, Value>,
    offset: FixedOffset,
) -> Vec<SensorSample> {
    let mut samples: Vec<SensorSample> = raw
        .iter()
        .filter_map(|(ts, value)| match parse_timestamp(ts, offset) {
            Some(timestamp) => Some(SensorSample {
                timestamp,
                value: value.as_f64(),
            }),
            None => {
                log::warn!("Dropping sample with unparseable timestamp {:?}", ts);
                None
            }
        })
        .collect();

    samples.sort_by_key(|s| s.timestamp);
    samples
}

/// Accept RFC 3339 timestamps as-is; interpret offset-less timestamps in
/// the historian's fixed offset. Everything normalizes to UTC.
fn parse_timestamp(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return offset
                .from_local_datetime(&naive)
                .single()
                .map(|ts| ts.with_timezone(&Utc));
        }
    }

    None
}
