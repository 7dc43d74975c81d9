use std::process;
use std::time::Duration;

use chrono::{DateTime, Utc};

use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};

use serde::Serialize;

use serde_json::Value;

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::{Instant, timeout};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info};

use crate::error::Result;
use crate::provision::BrokerSettings;
use crate::schema;

// Capacity of the channels between the client, the poller, and the
// validator.
const CHANNEL_CAPACITY: usize = 10;

// Keep alive time for the broker connection.
const KEEP_ALIVE_TIME: Duration = Duration::from_secs(5);

// Root of the periodic telemetry topic tree.
const TELEMETRY_ROOT: &str = "tele";

// Leaf carrying the sensor readings.
const SENSOR_LEAF: &str = "SENSOR";

/// Device topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic(String);

impl Topic {
    /// Creates a new [`Topic`].
    #[must_use]
    #[inline]
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// Returns the [`Topic`] as string slice.
    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the subscription filter for the device's sensor telemetry.
    #[must_use]
    pub fn subscription(&self) -> String {
        format!("{TELEMETRY_ROOT}/{}/{SENSOR_LEAF}", self.0)
    }
}

/// Verdict on a single telemetry message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationRecord {
    /// When the message arrived.
    #[serde(rename = "ts")]
    pub received_at: DateTime<Utc>,
    /// Whether the payload conforms to the sensor schema.
    pub valid: bool,
    /// Problems found, empty when the payload conforms.
    pub errors: Vec<String>,
    /// Decoded payload, absent when the message was not JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ValidationRecord {
    /// Validates a raw telemetry message received at `received_at`.
    #[must_use]
    pub fn from_message(received_at: DateTime<Utc>, raw: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(raw) {
            Ok(payload) => {
                let errors = schema::validate(&payload);
                Self {
                    received_at,
                    valid: errors.is_empty(),
                    errors,
                    payload: Some(payload),
                }
            }
            Err(e) => Self {
                received_at,
                valid: false,
                errors: vec![format!("Invalid JSON: {e}")],
                payload: None,
            },
        }
    }
}

/// Listens for a device's sensor telemetry and validates every message that
/// arrives within the window.
///
/// Verdicts come back in arrival order. A connection lost mid-window ends
/// the listen early with the verdicts gathered up to that point.
///
/// # Errors
///
/// The subscription to the telemetry topic could not be requested.
pub async fn listen(
    broker: &BrokerSettings,
    topic: &Topic,
    window: Duration,
) -> Result<Vec<ValidationRecord>> {
    let client_id = format!("collaudo-{}", process::id());

    let mut options = MqttOptions::new(client_id, &broker.host, broker.port);
    options.set_keep_alive(KEEP_ALIVE_TIME);
    if let Some(username) = &broker.username {
        options.set_credentials(username, broker.password.clone().unwrap_or_default());
    }

    let (client, eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);

    let filter = topic.subscription();
    client
        .subscribe(filter.as_str(), QoS::AtMostOnce)
        .await
        .map_err(|e| {
            error!("Unable to subscribe to `{filter}`");
            e
        })?;

    info!("Listening on `{filter}` for {:.1}s", window.as_secs_f64());

    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
    let token = CancellationToken::new();
    let poller = tokio::spawn(forward_publishes(eventloop, sender, token.clone()));

    let records = drain(receiver, window).await;

    token.cancel();
    let _ = client.disconnect().await;
    if let Err(e) = poller.await {
        error!("Telemetry poller failed: {e}");
    }

    info!("Window closed with {} message(s)", records.len());

    Ok(records)
}

// Forwards telemetry publishes to the validator, stamped with their arrival
// time, until it is cancelled or the connection fails.
async fn forward_publishes(
    mut eventloop: EventLoop,
    sender: Sender<(DateTime<Utc>, Vec<u8>)>,
    cancellation_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancellation_token.cancelled() => break,
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if sender.send((Utc::now(), publish.payload.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Ok(event) => debug!("Ignored event {event:?}"),
                    Err(e) => {
                        error!("Connection to the broker lost: {e}");
                        break;
                    }
                }
            }
        }
    }

    drop(sender);
    drop(eventloop);
}

// Validates messages as they arrive until the window closes or the poller
// goes away.
async fn drain(
    mut receiver: Receiver<(DateTime<Utc>, Vec<u8>)>,
    window: Duration,
) -> Vec<ValidationRecord> {
    let deadline = Instant::now() + window;
    let mut records = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match timeout(remaining, receiver.recv()).await {
            Ok(Some((received_at, raw))) => {
                let record = ValidationRecord::from_message(received_at, &raw);
                if record.valid {
                    info!("Message {} valid", records.len() + 1);
                } else {
                    info!(
                        "Message {} invalid: {}",
                        records.len() + 1,
                        record.errors.join("; ")
                    );
                }
                records.push(record);
            }
            // Poller gone: nothing more will arrive.
            Ok(None) => break,
            // Window elapsed.
            Err(_) => break,
        }
    }

    records
}
