//! Monitor Runtime
//!
//! Orchestrates the control-loop monitor:
//! - Loads configuration from the environment (.env supported)
//! - Builds the historian client, rolling buffer store, MQTT publisher
//!   and alert notifier as owned instances
//! - Drives the poll -> align -> detect -> persist -> publish loop
//!
//! Usage:
//!   cargo run --release --bin monitor_runtime
//!
//! Environment variables:
//!   TAG_PAIRS               - comma-separated setpoint:actual pairs
//!   BASE_URL / API_KEY      - historian API root and token
//!   FIXED_OFFSET            - UTC offset for historian queries (default: +02:00)
//!   BUFFER_HOURS            - rolling buffer retention (default: 4)
//!   ANOMALY_STD_MULTIPLIER  - threshold multiplier k (default: 3)
//!   FETCH_INTERVAL          - seconds between cycles (default: 300)
//!   OUTPUT_DIR              - per-pair buffer directory (default: data)
//!   MQTT_BROKER / MQTT_PORT / MQTT_TOPIC - bus target (default: 127.0.0.1/1883/anomalies)
//!   ALERT_WEBHOOK_URL       - optional alert webhook (default: log-only)

use dotenv::dotenv;
use log::info;
use loopwatch::config::Config;
use loopwatch::fetcher::HistorianClient;
use loopwatch::monitor;
use loopwatch::notifier::Notifier;
use loopwatch::publisher::Publisher;
use loopwatch::store::RollingBufferStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Starting control-loop monitor");

    let config = Config::from_env();

    info!("📊 Configuration:");
    info!("   ├─ Historian: {}", config.base_url);
    info!("   ├─ Tag pairs: {}", config.tag_pairs.len());
    info!("   ├─ Retention: {}h", config.buffer_hours);
    info!("   ├─ Threshold multiplier: {}", config.anomaly_std_multiplier);
    info!("   ├─ Cycle interval: {}s", config.fetch_interval_secs);
    info!("   ├─ Buffer directory: {}", config.output_dir);
    info!(
        "   └─ Alerts: {}",
        if config.alert_webhook_url.is_some() {
            "webhook"
        } else {
            "log-only"
        }
    );

    if config.tag_pairs.is_empty() {
        log::warn!("⚠️  TAG_PAIRS is empty; the monitor will idle until it is set");
    }

    let historian = HistorianClient::new(&config)?;
    let store = RollingBufferStore::new(&config.output_dir, config.buffer_hours);
    let publisher = Publisher::connect(&config);
    let notifier = Notifier::new(config.alert_webhook_url.clone())?;

    info!("✅ Pipeline configured, starting polling loop");

    tokio::select! {
        _ = monitor::run_forever(config, &historian, store, publisher, notifier) => {}
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down"),
                Err(e) => log::error!("❌ Failed to listen for CTRL+C: {}", e),
            }
        }
    }

    info!("✅ Monitor stopped");
    Ok(())
}
