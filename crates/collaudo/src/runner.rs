use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info};

use crate::command::{CommandClient, Credentials};
use crate::device::{self, Device};
use crate::discovery::Discovery;
use crate::error::{Error, ErrorKind, Result};
use crate::provision::{self, ProvisionSettings};
use crate::report::Report;
use crate::telemetry::{self, Topic};

/// Settings for a whole commissioning run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Device to probe directly, skipping the scan.
    pub target: Option<Ipv4Addr>,
    /// WebUI credentials.
    pub credentials: Option<Credentials>,
    /// mDNS scan window.
    pub scan_timeout: Duration,
    /// Configuration to apply.
    pub provision: ProvisionSettings,
    /// How long to wait for the device to come back online after the
    /// configuration restarts it.
    pub reboot_timeout: Duration,
    /// Telemetry listen window.
    pub listen_window: Duration,
    /// Where the report lands.
    pub output: PathBuf,
}

/// Runs the whole commissioning pipeline and returns the written report.
///
/// The pipeline acquires a device, resolves its telemetry topic, applies
/// the configuration, waits out the restart, listens for telemetry, and
/// writes the report. A configuration or telemetry failure degrades the
/// report instead of ending the run.
///
/// # Errors
///
/// No device answered, no telemetry topic could be resolved, the scan
/// could not start, or the report could not be written.
pub async fn run(settings: &RunSettings) -> Result<Report> {
    let client = CommandClient::new(settings.credentials.clone());

    run_with_client(&client, settings).await
}

async fn run_with_client(client: &CommandClient, settings: &RunSettings) -> Result<Report> {
    let devices: Vec<Device> = match settings.target {
        Some(ip) => {
            info!("Probing {ip} directly");
            Device::probe(client, ip).await.into_iter().collect()
        }
        None => {
            Discovery::new()
                .timeout(settings.scan_timeout)
                .discover(client)
                .await?
        }
    };

    let Some(device) = devices.first().cloned() else {
        return Err(Error::new(
            ErrorKind::NoDevices,
            "No device answered the identity probe",
        ));
    };

    // Resolved before any command goes out, so a run that cannot be
    // validated changes nothing on the device.
    let topic = resolve_topic(settings.provision.topic.as_deref(), device.topic.as_deref())?;

    info!(
        "Commissioning `{}` at {} on topic `{}`",
        device.hostname,
        device.ip,
        topic.as_str()
    );

    // The device is configured with the same topic the validation
    // subscribes to.
    let mut provision = settings.provision.clone();
    provision.topic = Some(topic.as_str().to_owned());

    let configuration = match provision::configure(client, device.ip, &provision).await {
        Ok(log) => log,
        // The report still shows how far the sequence got.
        Err(e) => {
            error!("{e}");
            e.into_log()
        }
    };

    // Network and broker changes restart the device. A device that stays
    // silent still gets its listen window; the report shows the outcome.
    let _ = device::wait_for_online(client, device.ip, settings.reboot_timeout).await;

    let validation = match telemetry::listen(
        &settings.provision.broker,
        &topic,
        settings.listen_window,
    )
    .await
    {
        Ok(records) => records,
        Err(e) => {
            error!("{e}");
            Vec::new()
        }
    };

    let report = Report::build(devices, configuration, validation);
    report.write(&settings.output)?;

    Ok(report)
}

// The explicit topic wins over the one the device reports. Empty strings
// count as absent, which matches how devices report an unset topic.
fn resolve_topic(explicit: Option<&str>, reported: Option<&str>) -> Result<Topic> {
    explicit
        .filter(|topic| !topic.is_empty())
        .or_else(|| reported.filter(|topic| !topic.is_empty()))
        .map(|topic| Topic::new(topic.to_owned()))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::Topic,
                "No topic was given and the device does not report one",
            )
        })
}
