//! Integration tests for the polling cycle
//!
//! Drives `monitor::run_cycle` end to end against a canned sensor source,
//! a tempdir-backed store, a disabled publisher and a log-only notifier,
//! verifying the per-pair skip/complete semantics and that skipped pairs
//! leave their persisted buffers untouched.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use loopwatch::config::{Config, TagPair};
use loopwatch::fetcher::{FetchError, SensorSample, SensorSource};
use loopwatch::monitor::{self, PairOutcome, SkipReason};
use loopwatch::notifier::Notifier;
use loopwatch::publisher::Publisher;
use loopwatch::store::RollingBufferStore;
use std::collections::HashMap;
use tempfile::TempDir;

/// Canned sensor source: per-tag series, with selected tags failing
struct MockSource {
    series: HashMap<String, Vec<SensorSample>>,
    failing: Vec<String>,
}

impl MockSource {
    fn new() -> Self {
        Self {
            series: HashMap::new(),
            failing: Vec::new(),
        }
    }

    fn with_series(mut self, tag: &str, samples: Vec<SensorSample>) -> Self {
        self.series.insert(tag.to_string(), samples);
        self
    }

    fn with_failure(mut self, tag: &str) -> Self {
        self.failing.push(tag.to_string());
        self
    }
}

#[async_trait]
impl SensorSource for MockSource {
    async fn fetch_series(
        &self,
        tag: &str,
        _lookback_minutes: i64,
    ) -> Result<Vec<SensorSample>, FetchError> {
        if self.failing.iter().any(|t| t == tag) {
            return Err(FetchError::Status(
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }
        self.series
            .get(tag)
            .cloned()
            .ok_or_else(|| FetchError::TagMissing(tag.to_string()))
    }
}

fn recent(offset_secs: i64) -> DateTime<Utc> {
    Utc::now() - Duration::seconds(offset_secs)
}

fn sample(age_secs: i64, value: f64) -> SensorSample {
    SensorSample {
        timestamp: recent(age_secs),
        value: Some(value),
    }
}

fn test_config(pairs: Vec<TagPair>, output_dir: &str, k: f64) -> Config {
    Config {
        tag_pairs: pairs,
        base_url: "http://historian.invalid/api".to_string(),
        api_key: String::new(),
        fixed_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
        buffer_hours: 4,
        anomaly_std_multiplier: k,
        fetch_interval_secs: 300,
        output_dir: output_dir.to_string(),
        mqtt_broker: "127.0.0.1".to_string(),
        mqtt_port: 1883,
        mqtt_topic: "anomalies".to_string(),
        alert_webhook_url: None,
    }
}

#[tokio::test]
async fn test_full_cycle_persists_and_reports() {
    let dir = TempDir::new().unwrap();
    let pair = TagPair::new("SP1", "PV1");
    let config = test_config(vec![pair.clone()], dir.path().to_str().unwrap(), 3.0);

    let source = MockSource::new()
        .with_series("SP1", vec![sample(180, 20.0), sample(120, 20.0), sample(60, 20.0)])
        .with_series("PV1", vec![sample(175, 20.1), sample(115, 19.9), sample(55, 20.0)]);

    let store = RollingBufferStore::new(dir.path(), config.buffer_hours);
    let report = monitor::run_cycle(
        &config,
        &source,
        &store,
        &Publisher::disabled("anomalies"),
        &Notifier::log_only(),
    )
    .await;

    assert_eq!(report.completed(), 1);
    assert_eq!(
        report.outcomes[0].1,
        PairOutcome::Completed {
            rows_persisted: 3,
            anomalous: false
        }
    );

    let persisted = store.load(&pair);
    assert_eq!(persisted.len(), 3);
    assert!(persisted.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    for row in &persisted {
        assert!((row.error - (row.setpoint - row.actual)).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_failed_fetch_skips_pair_and_preserves_buffer() {
    let dir = TempDir::new().unwrap();
    let pair = TagPair::new("SP1", "PV1");
    let config = test_config(vec![pair.clone()], dir.path().to_str().unwrap(), 3.0);
    let store = RollingBufferStore::new(dir.path(), config.buffer_hours);

    // First cycle succeeds and seeds the buffer
    let source = MockSource::new()
        .with_series("SP1", vec![sample(120, 20.0), sample(60, 20.0)])
        .with_series("PV1", vec![sample(115, 19.9), sample(55, 20.1)]);
    monitor::run_cycle(
        &config,
        &source,
        &store,
        &Publisher::disabled("anomalies"),
        &Notifier::log_only(),
    )
    .await;
    let before = store.load(&pair);
    assert_eq!(before.len(), 2);

    // Second cycle: PV1 returns HTTP 500 -> pair skipped, buffer unchanged
    let source = MockSource::new()
        .with_series("SP1", vec![sample(30, 20.0)])
        .with_failure("PV1");
    let report = monitor::run_cycle(
        &config,
        &source,
        &store,
        &Publisher::disabled("anomalies"),
        &Notifier::log_only(),
    )
    .await;

    assert_eq!(
        report.outcomes[0].1,
        PairOutcome::Skipped(SkipReason::FetchFailed {
            tag: "PV1".to_string()
        })
    );
    assert_eq!(store.load(&pair), before);
}

#[tokio::test]
async fn test_empty_series_is_a_skip_not_an_error() {
    let dir = TempDir::new().unwrap();
    let pair = TagPair::new("SP1", "PV1");
    let config = test_config(vec![pair.clone()], dir.path().to_str().unwrap(), 3.0);
    let store = RollingBufferStore::new(dir.path(), config.buffer_hours);

    let source = MockSource::new()
        .with_series("SP1", vec![sample(60, 20.0)])
        .with_series("PV1", vec![]);

    let report = monitor::run_cycle(
        &config,
        &source,
        &store,
        &Publisher::disabled("anomalies"),
        &Notifier::log_only(),
    )
    .await;

    assert_eq!(
        report.outcomes[0].1,
        PairOutcome::Skipped(SkipReason::EmptyAlignment)
    );
    assert!(store.load(&pair).is_empty());
}

#[tokio::test]
async fn test_one_pair_failure_does_not_abort_others() {
    let dir = TempDir::new().unwrap();
    let good = TagPair::new("SP2", "PV2");
    let config = test_config(
        vec![TagPair::new("SP1", "PV1"), good.clone()],
        dir.path().to_str().unwrap(),
        3.0,
    );
    let store = RollingBufferStore::new(dir.path(), config.buffer_hours);

    let source = MockSource::new()
        .with_failure("SP1")
        .with_series("SP2", vec![sample(120, 21.0), sample(60, 21.0)])
        .with_series("PV2", vec![sample(118, 20.8), sample(58, 21.1)]);

    let report = monitor::run_cycle(
        &config,
        &source,
        &store,
        &Publisher::disabled("anomalies"),
        &Notifier::log_only(),
    )
    .await;

    assert_eq!(report.outcomes.len(), 2);
    assert!(matches!(report.outcomes[0].1, PairOutcome::Skipped(_)));
    assert!(matches!(report.outcomes[1].1, PairOutcome::Completed { .. }));
    assert_eq!(store.load(&good).len(), 2);
}

#[tokio::test]
async fn test_repeated_cycle_with_same_data_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let pair = TagPair::new("SP1", "PV1");
    let config = test_config(vec![pair.clone()], dir.path().to_str().unwrap(), 3.0);
    let store = RollingBufferStore::new(dir.path(), config.buffer_hours);

    let source = MockSource::new()
        .with_series("SP1", vec![sample(120, 20.0), sample(60, 20.0)])
        .with_series("PV1", vec![sample(115, 19.9), sample(55, 20.1)]);

    for _ in 0..2 {
        monitor::run_cycle(
            &config,
            &source,
            &store,
            &Publisher::disabled("anomalies"),
            &Notifier::log_only(),
        )
        .await;
    }

    assert_eq!(store.load(&pair).len(), 2);
}

#[tokio::test]
async fn test_anomalous_batch_is_reported() {
    let dir = TempDir::new().unwrap();
    let pair = TagPair::new("SP1", "PV1");
    // k = 1 so the excursion clears the threshold
    let config = test_config(vec![pair.clone()], dir.path().to_str().unwrap(), 1.0);
    let store = RollingBufferStore::new(dir.path(), config.buffer_hours);

    let source = MockSource::new()
        .with_series(
            "SP1",
            vec![sample(180, 20.0), sample(120, 20.0), sample(60, 20.0)],
        )
        .with_series(
            "PV1",
            vec![sample(178, 20.1), sample(118, 19.9), sample(58, 25.0)],
        );

    let report = monitor::run_cycle(
        &config,
        &source,
        &store,
        &Publisher::disabled("anomalies"),
        &Notifier::log_only(),
    )
    .await;

    assert_eq!(report.anomalous_pairs(), vec![&pair]);
    let latest = store.latest(&pair).unwrap();
    assert!(latest.anomaly);
}
