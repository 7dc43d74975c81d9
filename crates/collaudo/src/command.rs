use std::net::Ipv4Addr;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;

// Path of the command endpoint exposed by the device firmware.
const COMMAND_PATH: &str = "/cm";

// Stock firmware serves the WebUI on this port.
const DEFAULT_PORT: u16 = 80;

// An identity probe answers immediately or not at all.
const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

// Configuration commands may persist settings before replying.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(6);

/// WebUI credentials of a password-protected device.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    /// Account name.
    pub user: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates [`Credentials`].
    #[must_use]
    pub const fn new(user: String, password: String) -> Self {
        Self { user, password }
    }
}

/// A client for the HTTP command endpoint of a Tasmota-class device.
///
/// Every interaction is a `GET` against `/cm` with the command text in the
/// `cmnd` query parameter. Credentials, when configured, travel as `user` and
/// `password` query parameters on each request. Values are URL-encoded by the
/// transport, so embedded spaces and delimiters reach the device intact.
#[derive(Debug, Clone)]
pub struct CommandClient {
    http: reqwest::Client,
    credentials: Option<Credentials>,
    port: u16,
}

impl CommandClient {
    /// Creates a [`CommandClient`] with optional WebUI [`Credentials`].
    #[must_use]
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            port: DEFAULT_PORT,
        }
    }

    /// Sets a non-standard WebUI port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Issues the `Status 0` identity query with the short probe timeout.
    ///
    /// # Errors
    ///
    /// Transport failures, timeouts, non-success statuses, and bodies that
    /// do not parse as JSON.
    pub async fn status(&self, ip: Ipv4Addr) -> Result<Value> {
        self.get(ip, "Status 0", STATUS_TIMEOUT).await
    }

    /// Issues a single configuration command with the longer command timeout.
    ///
    /// # Errors
    ///
    /// Transport failures, timeouts, non-success statuses, and bodies that
    /// do not parse as JSON.
    pub async fn send(&self, ip: Ipv4Addr, command: &str) -> Result<Value> {
        self.get(ip, command, COMMAND_TIMEOUT).await
    }

    async fn get(&self, ip: Ipv4Addr, command: &str, timeout: Duration) -> Result<Value> {
        let url = format!("http://{ip}:{}{COMMAND_PATH}", self.port);

        let mut query = vec![("cmnd", command)];
        if let Some(credentials) = &self.credentials {
            query.push(("user", credentials.user.as_str()));
            query.push(("password", credentials.password.as_str()));
        }

        let response = self
            .http
            .get(url)
            .query(&query)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}
