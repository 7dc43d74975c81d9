use std::fmt;
use std::net::Ipv4Addr;

use indexmap::IndexMap;

use serde::Serialize;

use serde_json::Value;

use tracing::info;

use crate::command::CommandClient;
use crate::error::Error;

// Wi-Fi access point name.
const SSID_COMMAND: &str = "SSID1";
// Wi-Fi access point password.
const WIFI_PASSWORD_COMMAND: &str = "Password1";
// Broker address.
const MQTT_HOST_COMMAND: &str = "MqttHost";
// Broker port.
const MQTT_PORT_COMMAND: &str = "MqttPort";
// Broker username.
const MQTT_USER_COMMAND: &str = "MqttUser";
// Broker password.
const MQTT_PASSWORD_COMMAND: &str = "MqttPassword";
// Device topic.
const TOPIC_COMMAND: &str = "Topic";
// Telemetry period in seconds.
const TELEPERIOD_COMMAND: &str = "TelePeriod";

// Commands whose responses echo a secret back.
const SENSITIVE_COMMANDS: [&str; 2] = [WIFI_PASSWORD_COMMAND, MQTT_PASSWORD_COMMAND];

// Replacement for secrets in the command log.
const REDACTED: &str = "***";

/// Default telemetry period in seconds.
pub const DEFAULT_TELEPERIOD: u16 = 10;

/// Broker coordinates and credentials a device is pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Username.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

/// Everything a device needs to join the network and start publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSettings {
    /// Wi-Fi access point name.
    pub ssid: String,
    /// Wi-Fi access point password.
    pub wifi_password: String,
    /// Broker the device publishes to.
    pub broker: BrokerSettings,
    /// Device topic override. When absent, the device keeps the topic it
    /// already has.
    pub topic: Option<String>,
    /// Telemetry period in seconds.
    pub teleperiod: u16,
}

/// Ordered record of the configuration commands applied to a device and the
/// responses they produced.
///
/// Iteration follows execution order. Responses to commands carrying a
/// secret are replaced with `***` before the log leaves this module.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CommandLog(IndexMap<String, Value>);

impl CommandLog {
    /// Creates an empty [`CommandLog`].
    #[must_use]
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Returns the response recorded for a command.
    #[must_use]
    pub fn get(&self, command: &str) -> Option<&Value> {
        self.0.get(command)
    }

    /// Number of commands applied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no command was applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Commands applied, in execution order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    fn record(&mut self, command: &str, response: Value) {
        self.0.insert(command.to_owned(), response);
    }

    fn redact(&mut self) {
        for command in SENSITIVE_COMMANDS {
            if let Some(response) = self.0.get_mut(command) {
                *response = Value::String(REDACTED.to_owned());
            }
        }
    }
}

/// A configuration sequence failure.
///
/// Carries the commands that were applied before the failure, so a report
/// can still show how far the sequence got.
#[derive(Debug)]
pub struct ProvisionError {
    command: &'static str,
    source: Error,
    log: CommandLog,
}

impl ProvisionError {
    /// Command that failed.
    #[must_use]
    pub const fn command(&self) -> &'static str {
        self.command
    }

    /// Commands applied before the failure, already redacted.
    #[must_use]
    pub const fn log(&self) -> &CommandLog {
        &self.log
    }

    /// Consumes the error, returning the partial log.
    #[must_use]
    pub fn into_log(self) -> CommandLog {
        self.log
    }
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuring `{}` failed: {}", self.command, self.source)
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

type StepResult = std::result::Result<(), (&'static str, Error)>;

/// Applies the configuration sequence to the device at `ip`.
///
/// Commands run one at a time, always in the same order: `SSID1`,
/// `Password1`, `MqttHost`, `MqttPort`, then `MqttUser`, `MqttPassword`,
/// and `Topic` when their settings are present, and finally `TelePeriod`.
/// Every command is idempotent on the device, so a sequence interrupted by
/// a failure can simply be run again.
///
/// # Errors
///
/// A command was refused or could not be delivered. The error names the
/// failed command and carries the log of the commands applied before it.
pub async fn configure(
    client: &CommandClient,
    ip: Ipv4Addr,
    settings: &ProvisionSettings,
) -> Result<CommandLog, ProvisionError> {
    info!("Configuring device at {ip}");

    let mut log = CommandLog::new();
    let outcome = run_sequence(client, ip, settings, &mut log).await;

    // Device responses echo the configured value back, secrets included.
    // Scrub them whether or not the sequence completed.
    log.redact();

    match outcome {
        Ok(()) => Ok(log),
        Err((command, source)) => Err(ProvisionError {
            command,
            source,
            log,
        }),
    }
}

async fn run_sequence(
    client: &CommandClient,
    ip: Ipv4Addr,
    settings: &ProvisionSettings,
    log: &mut CommandLog,
) -> StepResult {
    step(client, ip, SSID_COMMAND, &settings.ssid, log).await?;
    step(client, ip, WIFI_PASSWORD_COMMAND, &settings.wifi_password, log).await?;
    step(client, ip, MQTT_HOST_COMMAND, &settings.broker.host, log).await?;
    step(
        client,
        ip,
        MQTT_PORT_COMMAND,
        &settings.broker.port.to_string(),
        log,
    )
    .await?;

    if let Some(username) = &settings.broker.username {
        step(client, ip, MQTT_USER_COMMAND, username, log).await?;
    }

    if let Some(password) = &settings.broker.password {
        step(client, ip, MQTT_PASSWORD_COMMAND, password, log).await?;
    }

    if let Some(topic) = &settings.topic {
        step(client, ip, TOPIC_COMMAND, topic, log).await?;
    }

    step(
        client,
        ip,
        TELEPERIOD_COMMAND,
        &settings.teleperiod.to_string(),
        log,
    )
    .await
}

// Commands go out one by one instead of through a `Backlog`, which would
// split on any `;` inside a credential.
async fn step(
    client: &CommandClient,
    ip: Ipv4Addr,
    command: &'static str,
    value: &str,
    log: &mut CommandLog,
) -> StepResult {
    // Values may be secrets, so only the command name is logged.
    info!("Sending `{command}`");

    let response = client
        .send(ip, &format!("{command} {value}"))
        .await
        .map_err(|e| (command, e))?;
    log.record(command, response);

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::{Value, json};

    use crate::command::CommandClient;
    use crate::tests::{FakeDevice, ReceivedCommand};

    use super::{BrokerSettings, DEFAULT_TELEPERIOD, ProvisionSettings, configure};

    fn settings() -> ProvisionSettings {
        ProvisionSettings {
            ssid: "bench-wifi".to_owned(),
            wifi_password: "hunter2".to_owned(),
            broker: BrokerSettings {
                host: "192.168.4.10".to_owned(),
                port: 1883,
                username: Some("collaudo".to_owned()),
                password: Some("mqtt-secret".to_owned()),
            },
            topic: Some("bench-1".to_owned()),
            teleperiod: DEFAULT_TELEPERIOD,
        }
    }

    fn echo(received: &ReceivedCommand) -> Value {
        let (name, value) = received
            .command
            .split_once(' ')
            .unwrap_or((received.command.as_str(), ""));
        json!({ name: value })
    }

    // Spawns a device that accepts everything and records each command.
    async fn recording_device() -> (FakeDevice, Arc<Mutex<Vec<String>>>) {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&commands);
        let device = FakeDevice::spawn(move |received| {
            seen.lock().unwrap().push(received.command.clone());
            Some(echo(received))
        })
        .await;

        (device, commands)
    }

    #[tokio::test]
    async fn applies_the_full_sequence_in_order() {
        let (device, commands) = recording_device().await;
        let client = CommandClient::new(None).port(device.port());

        let log = configure(&client, device.ip(), &settings()).await.unwrap();

        assert_eq!(
            *commands.lock().unwrap(),
            vec![
                "SSID1 bench-wifi",
                "Password1 hunter2",
                "MqttHost 192.168.4.10",
                "MqttPort 1883",
                "MqttUser collaudo",
                "MqttPassword mqtt-secret",
                "Topic bench-1",
                "TelePeriod 10",
            ]
        );
        assert_eq!(
            log.commands().collect::<Vec<_>>(),
            vec![
                "SSID1",
                "Password1",
                "MqttHost",
                "MqttPort",
                "MqttUser",
                "MqttPassword",
                "Topic",
                "TelePeriod",
            ]
        );
        assert_eq!(
            log.get("MqttHost"),
            Some(&json!({"MqttHost": "192.168.4.10"}))
        );
    }

    #[tokio::test]
    async fn skips_settings_that_are_absent() {
        let (device, commands) = recording_device().await;
        let client = CommandClient::new(None).port(device.port());

        let mut sparse = settings();
        sparse.broker.username = None;
        sparse.broker.password = None;
        sparse.topic = None;

        let log = configure(&client, device.ip(), &sparse).await.unwrap();

        assert_eq!(
            *commands.lock().unwrap(),
            vec![
                "SSID1 bench-wifi",
                "Password1 hunter2",
                "MqttHost 192.168.4.10",
                "MqttPort 1883",
                "TelePeriod 10",
            ]
        );
        assert_eq!(log.len(), 5);
    }

    #[tokio::test]
    async fn redacts_secrets_in_the_log() {
        let (device, _commands) = recording_device().await;
        let client = CommandClient::new(None).port(device.port());

        let log = configure(&client, device.ip(), &settings()).await.unwrap();

        assert_eq!(log.get("Password1"), Some(&json!("***")));
        assert_eq!(log.get("MqttPassword"), Some(&json!("***")));
        // Non-secret responses stay intact.
        assert_eq!(log.get("SSID1"), Some(&json!({"SSID1": "bench-wifi"})));

        // No password literal anywhere, not even inside echoed responses.
        let serialized = serde_json::to_string(&log).unwrap();
        assert!(!serialized.contains("hunter2"));
        assert!(!serialized.contains("mqtt-secret"));
    }

    #[tokio::test]
    async fn failure_names_the_command_and_keeps_the_partial_log() {
        let device = FakeDevice::spawn(|received| {
            (!received.command.starts_with("MqttHost")).then(|| echo(received))
        })
        .await;
        let client = CommandClient::new(None).port(device.port());

        let error = configure(&client, device.ip(), &settings())
            .await
            .unwrap_err();

        assert_eq!(error.command(), "MqttHost");

        let log = error.into_log();
        assert_eq!(log.commands().collect::<Vec<_>>(), vec!["SSID1", "Password1"]);
        // Redaction also covers a log cut short by a failure.
        assert_eq!(log.get("Password1"), Some(&json!("***")));
        assert!(!serde_json::to_string(&log).unwrap().contains("hunter2"));
    }

    #[tokio::test]
    async fn values_with_reserved_characters_survive_the_query_encoding() {
        let (device, commands) = recording_device().await;
        let client = CommandClient::new(None).port(device.port());

        let mut spiky = settings();
        spiky.ssid = "caffè bar".to_owned();
        spiky.wifi_password = "p+w;d 50%&x".to_owned();

        configure(&client, device.ip(), &spiky).await.unwrap();

        let seen = commands.lock().unwrap();
        assert_eq!(seen[0], "SSID1 caffè bar");
        // A raw `&` would split the command into a bogus extra parameter.
        assert_eq!(seen[1], "Password1 p+w;d 50%&x");
    }
}
