use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent};

use tokio::time::{Instant, timeout};

use tracing::info;

use crate::command::CommandClient;
use crate::device::Device;
use crate::error::Result;

// Service type the devices advertise their WebUI under.
const SERVICE_TYPE: &str = "_http._tcp.local.";

// Default scan window.
const SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// A bounded multicast scan for candidate devices.
///
/// The scan browses an mDNS service type for its whole window, collects the
/// distinct IPv4 addresses it hears, and then probes every candidate in
/// ascending address order. Only candidates that answer the identity probe
/// become [`Device`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    service_type: String,
    timeout: Duration,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery {
    /// Creates a [`Discovery`] with the default service type and scan
    /// window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_owned(),
            timeout: SCAN_TIMEOUT,
        }
    }

    /// Sets the service type to browse.
    #[must_use]
    pub fn service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    /// Sets the scan window.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scans the network and returns the devices that answered a probe, in
    /// ascending address order.
    ///
    /// The scan always runs its full window; finding no devices is an empty
    /// result, not an error.
    ///
    /// # Errors
    ///
    /// The mDNS daemon could not be created or the browse request failed.
    pub async fn discover(&self, client: &CommandClient) -> Result<Vec<Device>> {
        info!("Scanning mDNS for {:.1}s", self.timeout.as_secs_f64());

        let daemon = ServiceDaemon::new()?;
        let browse = daemon.browse(&self.service_type)?;

        let deadline = Instant::now() + self.timeout;
        let mut candidates = BTreeSet::new();

        // Devices keep announcing themselves throughout the window, so the
        // scan never returns early.
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match timeout(remaining, browse.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    for address in info.get_addresses_v4() {
                        candidates.insert(*address);
                    }
                }
                Ok(Ok(_)) => {}
                // The daemon dropped the channel; nothing more will arrive.
                Ok(Err(_)) => break,
                // Window elapsed.
                Err(_) => break,
            }
        }

        let _ = daemon.stop_browse(&self.service_type);
        let _ = daemon.shutdown();

        info!(
            "Scan finished with {} candidate address(es)",
            candidates.len()
        );

        Ok(probe_candidates(client, candidates).await)
    }
}

// Probes candidates in their ascending address order, so the result is
// deterministic for a given candidate set.
async fn probe_candidates(client: &CommandClient, candidates: BTreeSet<Ipv4Addr>) -> Vec<Device> {
    let mut devices = Vec::new();
    for ip in candidates {
        if let Some(device) = Device::probe(client, ip).await {
            info!("Confirmed device `{}` at {ip}", device.hostname);
            devices.push(device);
        }
    }
    devices
}
