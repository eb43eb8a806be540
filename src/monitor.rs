//! Polling scheduler: fetch -> align -> detect -> persist -> publish
//!
//! One cycle walks the configured tag pairs strictly in order and runs
//! each pair's pipeline to completion before the next pair starts. Any
//! stage that yields no usable data skips the pair for the cycle and
//! leaves its persisted buffer untouched; no pair's failure can abort
//! another pair or the loop. The drive-forever wrapper just repeats
//! cycles with a trailing sleep, so cycle logic stays testable without
//! real time passing.

use crate::aligner::{self, DEFAULT_TOLERANCE_SECS};
use crate::config::{Config, TagPair};
use crate::detector;
use crate::fetcher::SensorSource;
use crate::notifier::Notifier;
use crate::publisher::Publisher;
use crate::store::RollingBufferStore;
use chrono::Utc;
use std::time::Duration;

/// Why a pair produced no output this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// One side of the pair could not be fetched
    FetchFailed { tag: String },
    /// Join produced no rows (empty or non-overlapping series)
    EmptyAlignment,
    /// The merged buffer could not be written
    PersistFailed,
}

/// Outcome of one pair's pipeline within a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    Completed {
        rows_persisted: usize,
        anomalous: bool,
    },
    Skipped(SkipReason),
}

/// Summary of one full scheduler cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<(TagPair, PairOutcome)>,
}

impl CycleReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PairOutcome::Completed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.completed()
    }

    pub fn anomalous_pairs(&self) -> Vec<&TagPair> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PairOutcome::Completed { anomalous: true, .. }))
            .map(|(pair, _)| pair)
            .collect()
    }
}

/// Run one polling cycle over every configured tag pair.
pub async fn run_cycle(
    config: &Config,
    source: &dyn SensorSource,
    store: &RollingBufferStore,
    publisher: &Publisher,
    notifier: &Notifier,
) -> CycleReport {
    let mut report = CycleReport::default();

    if config.tag_pairs.is_empty() {
        log::warn!("No tag pairs configured, nothing to do this cycle");
        return report;
    }

    for pair in &config.tag_pairs {
        let outcome = run_pair(config, source, store, publisher, notifier, pair).await;
        report.outcomes.push((pair.clone(), outcome));
    }

    log::info!(
        "Cycle complete: {} pairs processed, {} skipped, {} anomalous",
        report.completed(),
        report.skipped(),
        report.anomalous_pairs().len()
    );
    report
}

/// One pair's fetch -> align -> detect -> persist -> publish sequence.
async fn run_pair(
    config: &Config,
    source: &dyn SensorSource,
    store: &RollingBufferStore,
    publisher: &Publisher,
    notifier: &Notifier,
    pair: &TagPair,
) -> PairOutcome {
    let lookback = config.lookback_minutes();

    let setpoint_series = match source.fetch_series(&pair.setpoint, lookback).await {
        Ok(series) => series,
        Err(e) => {
            log::warn!(
                "Skipping pair {} this cycle: fetch of {:?} failed: {}",
                pair.file_stem(),
                pair.setpoint,
                e
            );
            return PairOutcome::Skipped(SkipReason::FetchFailed {
                tag: pair.setpoint.clone(),
            });
        }
    };

    let actual_series = match source.fetch_series(&pair.actual, lookback).await {
        Ok(series) => series,
        Err(e) => {
            log::warn!(
                "Skipping pair {} this cycle: fetch of {:?} failed: {}",
                pair.file_stem(),
                pair.actual,
                e
            );
            return PairOutcome::Skipped(SkipReason::FetchFailed {
                tag: pair.actual.clone(),
            });
        }
    };

    log::info!(
        "{} -> {} samples | {} -> {} samples",
        pair.setpoint,
        setpoint_series.len(),
        pair.actual,
        actual_series.len()
    );

    let aligned = aligner::align(&setpoint_series, &actual_series, DEFAULT_TOLERANCE_SECS);
    if aligned.is_empty() {
        log::warn!(
            "Skipping pair {} this cycle: no aligned rows",
            pair.file_stem()
        );
        return PairOutcome::Skipped(SkipReason::EmptyAlignment);
    }

    let detection = detector::detect(&aligned, config.anomaly_std_multiplier);

    let persisted = match store.update(pair, &detection.rows, Utc::now()) {
        Ok(rows) => rows,
        Err(e) => {
            // Cycle data is lost but the process keeps running
            log::error!(
                "Failed to persist buffer for pair {}: {}",
                pair.file_stem(),
                e
            );
            return PairOutcome::Skipped(SkipReason::PersistFailed);
        }
    };

    if let Some(latest) = persisted.last() {
        publisher.publish_latest(pair, latest).await;

        if detection.any_anomalous {
            notifier.alert(pair, latest).await;
        }
    }

    PairOutcome::Completed {
        rows_persisted: persisted.len(),
        anomalous: detection.any_anomalous,
    }
}

/// Drive cycles forever with a trailing sleep. No catch-up logic: a slow
/// cycle just delays the next one.
pub async fn run_forever(
    config: Config,
    source: &dyn SensorSource,
    store: RollingBufferStore,
    publisher: Publisher,
    notifier: Notifier,
) {
    let interval = Duration::from_secs(config.fetch_interval_secs);

    loop {
        log::info!("Fetching and processing data...");
        run_cycle(&config, source, &store, &publisher, &notifier).await;

        log::debug!("Sleeping {}s until next cycle", interval.as_secs());
        tokio::time::sleep(interval).await;
    }
}
