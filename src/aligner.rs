//! Time alignment of independently-sampled series
//!
//! The setpoint and actual tags are sampled by the historian on their own
//! clocks, so their timestamps rarely coincide. Alignment does a
//! nearest-match join bounded by a tolerance: a setpoint sample pairs
//! with the closest actual sample within the tolerance, unmatched samples
//! are dropped. Remaining gaps in either value column are then filled
//! (interior by linear interpolation, edges by backward- then
//! forward-fill) so no nulls reach the detector.

use crate::fetcher::SensorSample;
use chrono::{DateTime, Utc};

/// Default join tolerance between a setpoint and actual sample
pub const DEFAULT_TOLERANCE_SECS: i64 = 60;

/// One timestamp-synchronized observation, pre-detection
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPoint {
    pub timestamp: DateTime<Utc>,
    pub setpoint: f64,
    pub actual: f64,
}

/// Join two sample series into a timestamp-aligned sequence.
///
/// Returns an empty vector when either input is empty or when a value
/// column has no recoverable (non-null) sample at all; the caller treats
/// that as "skip this pair for the cycle", not as an error.
pub fn align(
    setpoint_series: &[SensorSample],
    actual_series: &[SensorSample],
    tolerance_secs: i64,
) -> Vec<AlignedPoint> {
    if setpoint_series.is_empty() || actual_series.is_empty() {
        return Vec::new();
    }

    // Nearest-match join keyed on the setpoint timestamps. Both inputs
    // arrive sorted from the fetcher.
    let mut joined: Vec<(DateTime<Utc>, Option<f64>, Option<f64>)> = Vec::new();
    for sp in setpoint_series {
        if let Some(actual) = nearest_within(actual_series, sp.timestamp, tolerance_secs) {
            joined.push((sp.timestamp, sp.value, actual.value));
        }
    }

    if joined.is_empty() {
        return Vec::new();
    }

    // Dedupe by timestamp, keep last
    joined.sort_by_key(|(ts, _, _)| *ts);
    joined.dedup_by(|next, prev| {
        if next.0 == prev.0 {
            *prev = next.clone();
            true
        } else {
            false
        }
    });

    let setpoints = fill_gaps(joined.iter().map(|(_, sp, _)| *sp).collect());
    let actuals = fill_gaps(joined.iter().map(|(_, _, pv)| *pv).collect());

    let (setpoints, actuals) = match (setpoints, actuals) {
        (Some(sp), Some(pv)) => (sp, pv),
        _ => {
            log::warn!("Alignment produced a value column with no recoverable samples");
            return Vec::new();
        }
    };

    joined
        .iter()
        .zip(setpoints.into_iter().zip(actuals))
        .map(|((ts, _, _), (setpoint, actual))| AlignedPoint {
            timestamp: *ts,
            setpoint,
            actual,
        })
        .collect()
}

/// Binary search for the sample nearest to `target`, if within tolerance.
fn nearest_within(
    sorted: &[SensorSample],
    target: DateTime<Utc>,
    tolerance_secs: i64,
) -> Option<&SensorSample> {
    let idx = sorted.partition_point(|s| s.timestamp < target);

    let candidates = [idx.checked_sub(1), Some(idx)]
        .into_iter()
        .flatten()
        .filter_map(|i| sorted.get(i));

    candidates
        .min_by_key(|s| (s.timestamp - target).num_seconds().abs())
        .filter(|s| (s.timestamp - target).num_seconds().abs() <= tolerance_secs)
}

/// Fill `None` holes in a column: interior holes by linear interpolation
/// between the nearest known neighbors, leading holes by backward-fill,
/// trailing holes by forward-fill. `None` result means the column had no
/// known value at all.
fn fill_gaps(column: Vec<Option<f64>>) -> Option<Vec<f64>> {
    let known: Vec<(usize, f64)> = column
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();

    if known.is_empty() {
        return None;
    }

    let mut filled = Vec::with_capacity(column.len());
    for i in 0..column.len() {
        if let Some(v) = column[i] {
            filled.push(v);
            continue;
        }

        let before = known.iter().rev().find(|(k, _)| *k < i);
        let after = known.iter().find(|(k, _)| *k > i);

        let v = match (before, after) {
            // Interior hole: linear interpolation over positions
            (Some(&(i0, v0)), Some(&(i1, v1))) => {
                v0 + (v1 - v0) * (i - i0) as f64 / (i1 - i0) as f64
            }
            // Leading hole: backward-fill
            (None, Some(&(_, v1))) => v1,
            // Trailing hole: forward-fill
            (Some(&(_, v0)), None) => v0,
            (None, None) => unreachable!("known is non-empty"),
        };
        filled.push(v);
    }

    Some(filled)
}
