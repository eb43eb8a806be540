//! Mean/stddev anomaly detection over the error signal
//!
//! Stateless: the caller hands in one aligned batch and a threshold
//! multiplier, and gets back the same rows augmented with `error` and
//! `anomaly` plus a batch-level flag. The scheduler passes the freshly
//! fetched batch, whose lookback matches the retention window.

use crate::aligner::AlignedPoint;
use chrono::{DateTime, Utc};

/// One fully-computed observation for a tag pair: what gets persisted
/// and published.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRow {
    pub timestamp: DateTime<Utc>,
    pub setpoint: f64,
    pub actual: f64,
    /// setpoint - actual
    pub error: f64,
    pub anomaly: bool,
}

/// Result of running detection over one batch
#[derive(Debug, Clone)]
pub struct Detection {
    pub rows: Vec<AlignedRow>,
    /// True when any row in this batch was flagged
    pub any_anomalous: bool,
}

/// Flag rows whose error deviates from the batch mean by more than
/// `k` sample standard deviations.
///
/// Fewer than 2 rows means the standard deviation is undefined; such
/// batches are never anomalous.
pub fn detect(points: &[AlignedPoint], k: f64) -> Detection {
    let errors: Vec<f64> = points.iter().map(|p| p.setpoint - p.actual).collect();

    let (mean, stddev) = mean_stddev(&errors);
    let threshold = k * stddev;

    log::debug!(
        "Error stats over {} rows: mean={:.4} stddev={:.4} threshold={:.4}",
        errors.len(),
        mean,
        stddev,
        threshold
    );

    let rows: Vec<AlignedRow> = points
        .iter()
        .zip(&errors)
        .map(|(p, &error)| AlignedRow {
            timestamp: p.timestamp,
            setpoint: p.setpoint,
            actual: p.actual,
            error,
            anomaly: errors.len() >= 2 && (error - mean).abs() > threshold,
        })
        .collect();

    let any_anomalous = rows.iter().any(|r| r.anomaly);
    if any_anomalous {
        log::info!(
            "Anomalies detected: {} of {} rows",
            rows.iter().filter(|r| r.anomaly).count(),
            rows.len()
        );
    }

    Detection { rows, any_anomalous }
}

/// Mean and sample standard deviation (ddof = 1). Returns stddev 0.0 for
/// fewer than 2 values.
fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;

    if values.len() < 2 {
        return (mean, 0.0);
    }

    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}
