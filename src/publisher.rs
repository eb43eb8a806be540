//! Best-effort MQTT sink for the latest computed row
//!
//! The client is constructed once at startup and handed to the scheduler;
//! there is no ambient global. rumqttc's event loop runs in a spawned
//! task (the transport's own background work), while the pipeline only
//! ever makes fire-and-forget publish calls. A missing broker or a full
//! outgoing queue logs and moves on - publishing must never block or
//! crash a cycle.

use crate::config::{Config, TagPair};
use crate::detector::AlignedRow;
use crate::store::column_names;
use rumqttc::{AsyncClient, Event, MqttOptions, QoS};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("bus not connected")]
    Unavailable,

    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Fire-and-forget publisher for the latest aligned+flagged row
pub struct Publisher {
    client: Option<AsyncClient>,
    topic: String,
}

impl Publisher {
    /// Connect to the configured broker and spawn the connection event
    /// loop. The returned publisher is usable immediately; rumqttc
    /// (re)connects in the background.
    pub fn connect(config: &Config) -> Self {
        let mut options = MqttOptions::new(
            "loopwatch-monitor",
            config.mqtt_broker.clone(),
            config.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(30));

        log::info!(
            "MQTT broker: {}:{} topic: {}",
            config.mqtt_broker,
            config.mqtt_port,
            config.mqtt_topic
        );

        let (client, mut event_loop) = AsyncClient::new(options, 10);

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                        log::info!("MQTT connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {} (retrying)", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Self {
            client: Some(client),
            topic: config.mqtt_topic.clone(),
        }
    }

    /// A publisher with no bus attached; every publish is a logged no-op.
    pub fn disabled(topic: impl Into<String>) -> Self {
        Self {
            client: None,
            topic: topic.into(),
        }
    }

    /// Serialize one row as a JSON object keyed by the pair's column
    /// names and hand it to the bus. Best-effort: all failure modes log
    /// at warn and return.
    pub async fn publish_latest(&self, pair: &TagPair, row: &AlignedRow) {
        match self.enqueue(pair, row) {
            Ok(()) => log::debug!("Published latest row for pair {}", pair.file_stem()),
            Err(e) => log::warn!(
                "Publish skipped for pair {}: {}",
                pair.file_stem(),
                e
            ),
        }
    }

    /// Hand the payload to rumqttc's outgoing queue without waiting for
    /// queue space. With the broker down the queue fills up; once full,
    /// rows are dropped (logged) instead of parking the scheduler.
    fn enqueue(&self, pair: &TagPair, row: &AlignedRow) -> Result<(), PublishError> {
        let client = self.client.as_ref().ok_or(PublishError::Unavailable)?;
        let payload = row_payload(pair, row).to_string();

        client.try_publish(&self.topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

/// JSON payload equivalent to one rolling-buffer row, same keys as the
/// CSV columns.
pub fn row_payload(pair: &TagPair, row: &AlignedRow) -> serde_json::Value {
    let [ts_col, sp_col, pv_col, err_col, anom_col] = column_names(pair);

    serde_json::json!({
        ts_col: row.timestamp.to_rfc3339(),
        sp_col: row.setpoint,
        pv_col: row.actual,
        err_col: row.error,
        anom_col: row.anomaly,
    })
}
