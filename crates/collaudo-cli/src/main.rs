//! Command line interface for the `collaudo` commissioning pipeline.
//!
//! Discovers or targets a device, provisions it, validates its telemetry,
//! and writes the run report. The process exit code carries the verdict:
//! `0` when the run passes, `1` when it fails, `2` when it aborts before
//! producing a report.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use collaudo::command::Credentials;
use collaudo::provision::{self, BrokerSettings, ProvisionSettings};
use collaudo::runner::{self, RunSettings};

use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "collaudo")]
#[command(about = "Provisions a Tasmota-class device and validates its telemetry")]
#[command(version)]
struct Args {
    /// Device address, skipping the mDNS scan
    #[arg(long)]
    device_ip: Option<Ipv4Addr>,

    /// WebUI user of a password-protected device
    #[arg(long)]
    web_user: Option<String>,

    /// WebUI password of a password-protected device
    #[arg(long)]
    web_pass: Option<String>,

    /// Wi-Fi access point name
    #[arg(long)]
    ssid: String,

    /// Wi-Fi access point password
    #[arg(long)]
    wifi_pass: String,

    /// MQTT broker host
    #[arg(long)]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,

    /// MQTT broker username
    #[arg(long)]
    mqtt_user: Option<String>,

    /// MQTT broker password
    #[arg(long)]
    mqtt_pass: Option<String>,

    /// Device topic, auto-detected when omitted
    #[arg(long)]
    mqtt_topic: Option<String>,

    /// Telemetry period in seconds
    #[arg(long, default_value_t = provision::DEFAULT_TELEPERIOD)]
    teleperiod: u16,

    /// Telemetry listen window in seconds
    #[arg(long, default_value_t = 30.0, value_parser = seconds)]
    duration: f64,

    /// How long to wait for the device to restart, in seconds
    #[arg(long, default_value_t = 30)]
    reboot_timeout: u64,

    /// mDNS scan window in seconds
    #[arg(long, default_value_t = 5.0, value_parser = seconds)]
    mdns_timeout: f64,

    /// Report file path
    #[arg(long, default_value = "report.json")]
    output: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    // The query parameters only make sense as a pair.
    fn credentials(&self) -> Option<Credentials> {
        match (&self.web_user, &self.web_pass) {
            (Some(user), Some(password)) => {
                Some(Credentials::new(user.clone(), password.clone()))
            }
            _ => None,
        }
    }

    fn into_settings(self) -> RunSettings {
        let credentials = self.credentials();

        // An empty flag value counts as unset.
        RunSettings {
            target: self.device_ip,
            credentials,
            scan_timeout: Duration::from_secs_f64(self.mdns_timeout.max(0.0)),
            provision: ProvisionSettings {
                ssid: self.ssid,
                wifi_password: self.wifi_pass,
                broker: BrokerSettings {
                    host: self.mqtt_host,
                    port: self.mqtt_port,
                    username: self.mqtt_user.filter(|user| !user.is_empty()),
                    password: self.mqtt_pass.filter(|password| !password.is_empty()),
                },
                topic: self.mqtt_topic.filter(|topic| !topic.is_empty()),
                teleperiod: self.teleperiod,
            },
            reboot_timeout: Duration::from_secs(self.reboot_timeout),
            listen_window: Duration::from_secs_f64(self.duration.max(0.0)),
            output: self.output,
        }
    }
}

// `Duration::from_secs_f64` panics on what it cannot represent, so
// oversized windows are refused at the flag boundary. Negatives still
// clamp to zero in `into_settings`.
fn seconds(value: &str) -> Result<f64, String> {
    let seconds: f64 = value.parse().map_err(|e| format!("{e}"))?;

    match Duration::try_from_secs_f64(seconds.max(0.0)) {
        Ok(_) => Ok(seconds),
        Err(e) => Err(e.to_string()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Unable to initialise logging");
        return ExitCode::from(2);
    }

    info!("collaudo v{}", env!("CARGO_PKG_VERSION"));

    match runner::run(&args.into_settings()).await {
        Ok(report) => {
            let summary = report.summary;
            let verdict = if summary.pass { "PASS" } else { "FAIL" };
            println!(
                "{verdict} ({}/{} valid)",
                summary.valid, summary.messages_received
            );

            if summary.pass {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}
