//! Durable rolling buffer, one CSV file per tag pair
//!
//! The store owns all persisted state. Each update merges the new batch
//! into whatever is already on disk, dedupes by timestamp keeping the
//! newest computation, drops rows past the retention cutoff, sorts, and
//! rewrites the file via temp-file-then-rename so a reader never sees a
//! half-written buffer.
//!
//! Load is deliberately forgiving: a missing file is a first run, a
//! corrupt file degrades to empty state with a warning, and individual
//! unparseable rows are skipped. The next few cycles repopulate the
//! window either way.

use crate::config::TagPair;
use crate::detector::AlignedRow;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Per-pair persisted rolling history with time-based retention
pub struct RollingBufferStore {
    dir: PathBuf,
    retention: Duration,
}

impl RollingBufferStore {
    pub fn new(dir: impl Into<PathBuf>, retention_hours: i64) -> Self {
        Self {
            dir: dir.into(),
            retention: Duration::hours(retention_hours),
        }
    }

    /// Path of a pair's buffer file
    pub fn path_for(&self, pair: &TagPair) -> PathBuf {
        self.dir.join(format!("{}.csv", pair.file_stem()))
    }

    /// Load the previously persisted rows for a pair.
    ///
    /// Missing file (first run) and corrupt file both degrade to an
    /// empty history; only the latter warns.
    pub fn load(&self, pair: &TagPair) -> Vec<AlignedRow> {
        let path = self.path_for(pair);
        if !path.exists() {
            log::info!("No existing buffer file for pair {}: {}", pair.file_stem(), path.display());
            return Vec::new();
        }

        match read_rows(&path) {
            Ok(rows) => {
                log::debug!("Loaded {} rows from {}", rows.len(), path.display());
                rows
            }
            Err(e) => {
                log::warn!(
                    "Buffer file {} unreadable ({}), starting from empty state",
                    path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Merge `new_rows` into the persisted history: dedupe by timestamp
    /// keeping the most recently computed value, evict rows older than
    /// `now - retention`, sort ascending, persist atomically.
    ///
    /// Returns the rows as persisted. Idempotent for a repeated batch.
    pub fn update(
        &self,
        pair: &TagPair,
        new_rows: &[AlignedRow],
        now: DateTime<Utc>,
    ) -> Result<Vec<AlignedRow>, StoreError> {
        let cutoff = now - self.retention;

        // BTreeMap gives dedup-by-timestamp (later insert wins) plus
        // ascending order in one pass.
        let mut merged: BTreeMap<DateTime<Utc>, AlignedRow> = BTreeMap::new();
        for row in self.load(pair).into_iter().chain(new_rows.iter().cloned()) {
            if row.timestamp >= cutoff {
                merged.insert(row.timestamp, row);
            }
        }

        let rows: Vec<AlignedRow> = merged.into_values().collect();
        self.persist(pair, &rows)?;
        log::info!(
            "Buffer for pair {} now holds {} rows",
            pair.file_stem(),
            rows.len()
        );
        Ok(rows)
    }

    /// Most recent persisted row for a pair, if any
    pub fn latest(&self, pair: &TagPair) -> Option<AlignedRow> {
        self.load(pair).into_iter().last()
    }

    fn persist(&self, pair: &TagPair, rows: &[AlignedRow]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(pair);
        let tmp = path.with_extension("csv.tmp");

        write_rows(&tmp, pair, rows)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// CSV column headers for one pair, also used as MQTT payload keys
pub fn column_names(pair: &TagPair) -> [String; 5] {
    [
        "Timestamp".to_string(),
        format!("SetPoint_{}", pair.setpoint),
        format!("Actual_{}", pair.actual),
        format!("Error_{}", pair.setpoint),
        format!("Anomaly_{}", pair.setpoint),
    ]
}

fn write_rows(path: &Path, pair: &TagPair, rows: &[AlignedRow]) -> Result<(), StoreError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&column_names(pair))?;

    for row in rows {
        writer.write_record(&[
            row.timestamp.to_rfc3339(),
            row.setpoint.to_string(),
            row.actual.to_string(),
            row.error.to_string(),
            row.anomaly.to_string(),
        ])?;
    }

    writer.flush().map_err(StoreError::Io)?;
    Ok(())
}

fn read_rows(path: &Path) -> Result<Vec<AlignedRow>, StoreError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = record?;
        match parse_record(&record) {
            Some(row) => rows.push(row),
            None => log::warn!(
                "Skipping unparseable buffer row in {}: {:?}",
                path.display(),
                record
            ),
        }
    }

    rows.sort_by_key(|r| r.timestamp);
    Ok(rows)
}

fn parse_record(record: &csv::StringRecord) -> Option<AlignedRow> {
    let timestamp = DateTime::parse_from_rfc3339(record.get(0)?)
        .ok()?
        .with_timezone(&Utc);

    Some(AlignedRow {
        timestamp,
        setpoint: record.get(1)?.parse().ok()?,
        actual: record.get(2)?.parse().ok()?,
        error: record.get(3)?.parse().ok()?,
        anomaly: record.get(4)?.parse().ok()?,
    })
}
