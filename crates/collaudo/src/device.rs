use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use tokio::time::Instant;

use tracing::{debug, info, warn};

use crate::command::CommandClient;

// Status section carrying the network identity.
const NETWORK_SECTION: &str = "StatusNET";

// Status section carrying the device state, topic included.
const DEVICE_SECTION: &str = "Status";

// Poll cadence while waiting for a device to come back online.
const ONLINE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A device that answered an identity probe.
///
/// Instances are produced by [`Device::probe`] and never modified
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    /// Address the device answered on.
    pub ip: Ipv4Addr,
    /// Hostname reported by the device, or the address rendered as text
    /// when the device does not report one.
    pub hostname: String,
    /// Telemetry topic reported by the device, when configured.
    pub topic: Option<String>,
}

impl Device {
    /// Probes an address for a compatible device and extracts its identity.
    ///
    /// A device is compatible when its status response is a JSON object
    /// carrying both the `StatusNET` and `Status` sections. An empty
    /// hostname falls back to the address text and an empty topic counts
    /// as absent.
    ///
    /// Unreachable or incompatible candidates are the expected common case
    /// during a scan, so every failure yields `None` and a debug-level log
    /// rather than an error.
    pub async fn probe(client: &CommandClient, ip: Ipv4Addr) -> Option<Self> {
        let status = match client.status(ip).await {
            Ok(status) => status,
            Err(e) => {
                debug!("Probe of {ip} failed: {e}");
                return None;
            }
        };

        let network = status.get(NETWORK_SECTION)?;
        let state = status.get(DEVICE_SECTION)?;

        let hostname = network
            .get("Hostname")
            .and_then(Value::as_str)
            .filter(|hostname| !hostname.is_empty())
            .map_or_else(|| ip.to_string(), str::to_owned);

        let topic = state
            .get("Topic")
            .and_then(Value::as_str)
            .filter(|topic| !topic.is_empty())
            .map(str::to_owned);

        Some(Self {
            ip,
            hostname,
            topic,
        })
    }
}

/// Polls an address until the device answers a probe again or the timeout
/// elapses.
///
/// Probes run at a fixed one-second cadence. Returns whether the device
/// came back within the deadline; a missed deadline is left to the caller
/// to judge.
pub async fn wait_for_online(client: &CommandClient, ip: Ipv4Addr, timeout: Duration) -> bool {
    info!(
        "Waiting up to {}s for {ip} to come back online",
        timeout.as_secs()
    );

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if Device::probe(client, ip).await.is_some() {
            info!("Device {ip} is back online");
            return true;
        }
        tokio::time::sleep(ONLINE_POLL_INTERVAL).await;
    }

    warn!("Device {ip} did not respond within {}s", timeout.as_secs());
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::{Value, json};

    use crate::command::CommandClient;
    use crate::tests::{FakeDevice, status_payload};

    use super::{Device, wait_for_online};

    async fn probe_with_status(payload: Value) -> (FakeDevice, Option<Device>) {
        let device = FakeDevice::spawn(move |received| {
            (received.command == "Status 0").then(|| payload.clone())
        })
        .await;

        let client = CommandClient::new(None).port(device.port());
        let probed = Device::probe(&client, device.ip()).await;

        (device, probed)
    }

    #[tokio::test]
    async fn probe_confirms_full_identity() {
        let (device, probed) =
            probe_with_status(status_payload(Some("tasmota-bench"), Some("bench"))).await;

        assert_eq!(
            probed,
            Some(Device {
                ip: device.ip(),
                hostname: "tasmota-bench".to_owned(),
                topic: Some("bench".to_owned()),
            })
        );
    }

    #[tokio::test]
    async fn probe_falls_back_to_address_text() {
        let (device, probed) = probe_with_status(status_payload(None, None)).await;

        let probed = probed.unwrap();
        assert_eq!(probed.hostname, device.ip().to_string());
        assert_eq!(probed.topic, None);
    }

    #[tokio::test]
    async fn probe_treats_empty_identity_values_as_absent() {
        let payload = json!({
            "Status": { "Topic": "" },
            "StatusNET": { "Hostname": "" },
        });
        let (device, probed) = probe_with_status(payload).await;

        let probed = probed.unwrap();
        assert_eq!(probed.hostname, device.ip().to_string());
        assert_eq!(probed.topic, None);
    }

    #[tokio::test]
    async fn probe_requires_both_identity_sections() {
        let (_device, probed) =
            probe_with_status(json!({ "StatusNET": { "Hostname": "half" } })).await;
        assert_eq!(probed, None);

        let (_device, probed) = probe_with_status(json!({ "Status": { "Topic": "half" } })).await;
        assert_eq!(probed, None);
    }

    #[tokio::test]
    async fn probe_rejects_error_responses() {
        let device = FakeDevice::spawn(|_| None).await;

        let client = CommandClient::new(None).port(device.port());
        assert_eq!(Device::probe(&client, device.ip()).await, None);
    }

    #[tokio::test]
    async fn probe_rejects_non_json_responses() {
        let device = FakeDevice::spawn_plain("<html>router admin page</html>").await;

        let client = CommandClient::new(None).port(device.port());
        assert_eq!(Device::probe(&client, device.ip()).await, None);
    }

    #[tokio::test]
    async fn probe_gives_up_on_a_silent_candidate() {
        let device = FakeDevice::spawn_silent().await;

        let client = CommandClient::new(None).port(device.port());
        // Runs into the probe timeout.
        assert_eq!(Device::probe(&client, device.ip()).await, None);
    }

    #[tokio::test]
    async fn wait_returns_at_the_first_successful_probe() {
        let device = FakeDevice::spawn(|_| Some(status_payload(None, None))).await;

        let client = CommandClient::new(None).port(device.port());
        assert!(wait_for_online(&client, device.ip(), Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn wait_succeeds_once_the_device_answers_again() {
        static PROBES: AtomicUsize = AtomicUsize::new(0);

        let device = FakeDevice::spawn(|_| {
            // Fail the first two probes, then answer as a healthy device.
            (PROBES.fetch_add(1, Ordering::SeqCst) >= 2)
                .then(|| status_payload(Some("rebooted"), None))
        })
        .await;

        let client = CommandClient::new(None).port(device.port());
        assert!(wait_for_online(&client, device.ip(), Duration::from_secs(30)).await);
        assert!(PROBES.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn wait_gives_up_at_the_deadline() {
        let device = FakeDevice::spawn(|_| None).await;

        let client = CommandClient::new(None).port(device.port());
        assert!(!wait_for_online(&client, device.ip(), Duration::from_millis(300)).await);
    }

    #[tokio::test]
    async fn wait_with_zero_timeout_returns_immediately() {
        let device = FakeDevice::spawn(|_| None).await;

        let client = CommandClient::new(None).port(device.port());
        assert!(!wait_for_online(&client, device.ip(), Duration::ZERO).await);
    }
}
