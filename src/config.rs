//! Configuration loaded from environment variables
//!
//! Everything has a usable default so the monitor can start in a bare
//! environment; malformed values degrade to the default with a warning
//! instead of aborting. The only genuinely startup-critical input is
//! `TAG_PAIRS`, and even an empty list just makes every cycle a no-op.

use chrono::FixedOffset;
use std::env;

/// One monitored control loop: a setpoint tag and the actual (process
/// value) tag it should track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagPair {
    pub setpoint: String,
    pub actual: String,
}

impl TagPair {
    pub fn new(setpoint: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            setpoint: setpoint.into(),
            actual: actual.into(),
        }
    }

    /// Stable per-pair file stem, safe for the filesystem.
    pub fn file_stem(&self) -> String {
        let sanitize = |s: &str| {
            s.chars()
                .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect::<String>()
        };
        format!("{}_{}", sanitize(&self.setpoint), sanitize(&self.actual))
    }
}

/// Result of parsing the `TAG_PAIRS` environment string.
///
/// `rejected` keeps the 1-based entry index and the offending text so
/// callers (and startup logs) can report exactly what was skipped.
#[derive(Debug, Default)]
pub struct TagPairParse {
    pub pairs: Vec<TagPair>,
    pub rejected: Vec<(usize, String)>,
}

/// Parse a comma-separated `setpoint:actual` list.
///
/// Malformed entries are skipped individually; parsing never fails as a
/// whole. An empty or whitespace-only input yields no pairs.
pub fn parse_tag_pairs(raw: &str) -> TagPairParse {
    let mut parsed = TagPairParse::default();

    if raw.trim().is_empty() {
        log::warn!("TAG_PAIRS is empty or missing");
        return parsed;
    }

    for (idx, entry) in raw.split(',').enumerate() {
        let mut sides = entry.splitn(2, ':');
        let setpoint = sides.next().unwrap_or("").trim();
        let actual = sides.next().unwrap_or("").trim();

        if setpoint.is_empty() || actual.is_empty() || actual.contains(':') {
            log::error!("Skipping malformed tag pair #{}: {:?}", idx + 1, entry);
            parsed.rejected.push((idx + 1, entry.to_string()));
            continue;
        }

        parsed.pairs.push(TagPair::new(setpoint, actual));
    }

    log::info!("Parsed {} tag pairs:", parsed.pairs.len());
    for pair in &parsed.pairs {
        log::info!("   SetPoint: {}, Actual: {}", pair.setpoint, pair.actual);
    }

    parsed
}

/// Runtime configuration for the monitor
#[derive(Debug, Clone)]
pub struct Config {
    /// Monitored control loops, from `TAG_PAIRS`
    pub tag_pairs: Vec<TagPair>,

    /// Historian API root
    pub base_url: String,

    /// Historian `token` header value
    pub api_key: String,

    /// UTC offset appended to historian query timestamps
    pub fixed_offset: FixedOffset,

    /// Rolling buffer retention in hours (also the fetch lookback)
    pub buffer_hours: i64,

    /// Anomaly threshold multiplier `k`
    pub anomaly_std_multiplier: f64,

    /// Seconds between scheduler cycles
    pub fetch_interval_secs: u64,

    /// Directory holding one rolling-buffer CSV per tag pair
    pub output_dir: String,

    /// MQTT connection target
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,

    /// Optional alert webhook; unset means log-only alerts
    pub alert_webhook_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `TAG_PAIRS` (default: empty)
    /// - `BASE_URL` (default: https://webport.it.pitea.se/api)
    /// - `API_KEY` (default: empty)
    /// - `FIXED_OFFSET` (default: +02:00)
    /// - `BUFFER_HOURS` (default: 4)
    /// - `ANOMALY_STD_MULTIPLIER` (default: 3)
    /// - `FETCH_INTERVAL` (default: 300 seconds)
    /// - `OUTPUT_DIR` (default: data)
    /// - `MQTT_BROKER` / `MQTT_PORT` / `MQTT_TOPIC` (default: 127.0.0.1 / 1883 / anomalies)
    /// - `ALERT_WEBHOOK_URL` (default: unset, alerts go to the log)
    pub fn from_env() -> Self {
        let tag_pairs = parse_tag_pairs(&env::var("TAG_PAIRS").unwrap_or_default()).pairs;

        Self {
            tag_pairs,

            base_url: env::var("BASE_URL")
                .unwrap_or_else(|_| "https://webport.it.pitea.se/api".to_string()),

            api_key: env::var("API_KEY").unwrap_or_default(),

            fixed_offset: parse_fixed_offset(
                &env::var("FIXED_OFFSET").unwrap_or_else(|_| "+02:00".to_string()),
            ),

            buffer_hours: env_parse("BUFFER_HOURS", 4),
            anomaly_std_multiplier: env_parse("ANOMALY_STD_MULTIPLIER", 3.0),
            fetch_interval_secs: env_parse("FETCH_INTERVAL", 300),

            output_dir: env::var("OUTPUT_DIR").unwrap_or_else(|_| "data".to_string()),

            mqtt_broker: env::var("MQTT_BROKER").unwrap_or_else(|_| "127.0.0.1".to_string()),
            mqtt_port: env_parse("MQTT_PORT", 1883),
            mqtt_topic: env::var("MQTT_TOPIC").unwrap_or_else(|_| "anomalies".to_string()),

            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Fetch lookback for each cycle, in minutes (matches retention)
    pub fn lookback_minutes(&self) -> i64 {
        self.buffer_hours * 60
    }
}

fn env_parse<T: std::str::FromStr + std::fmt::Display + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Err(_) => default,
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!(
                "{} has unparseable value {:?}, using default {}",
                name,
                raw,
                default
            );
            default
        }),
    }
}

/// Parse `±HH:MM` into a chrono offset, falling back to +02:00.
fn parse_fixed_offset(raw: &str) -> FixedOffset {
    raw.parse::<FixedOffset>().unwrap_or_else(|_| {
        log::warn!(
            "FIXED_OFFSET {:?} is not a valid ±HH:MM offset, using +02:00",
            raw
        );
        FixedOffset::east_opt(2 * 3600).unwrap()
    })
}
