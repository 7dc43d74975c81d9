use std::borrow::Cow;
use std::fmt;

/// All error categories raised while commissioning a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The mDNS daemon could not be created or browsed.
    Discovery,
    /// A device command failed or returned an unusable response.
    Command,
    /// The telemetry broker refused the connection or the subscription.
    Broker,
    /// No responsive device was found to commission.
    NoDevices,
    /// No telemetry topic was given and the device does not report one.
    Topic,
    /// The report could not be serialized or written out.
    Report,
}

impl ErrorKind {
    const fn description(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Command => "command",
            Self::Broker => "broker",
            Self::NoDevices => "no devices",
            Self::Topic => "topic",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A commissioning error.
///
/// Carries the [`ErrorKind`] category and a description of the failure.
#[derive(Debug, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    info: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from its [`ErrorKind`] and a description.
    #[must_use]
    #[inline]
    pub fn new(kind: ErrorKind, info: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            info: info.into(),
        }
    }

    /// Returns the [`ErrorKind`] associated with this error.
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.info)
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // The request URL carries the command value and any WebUI
        // credentials in its query string, so it stays out of the error
        // text.
        Self::new(ErrorKind::Command, e.without_url().to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Report, format!("Serialization failed: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Report, format!("Write failed: {e}"))
    }
}

impl From<mdns_sd::Error> for Error {
    fn from(e: mdns_sd::Error) -> Self {
        Self::new(ErrorKind::Discovery, e.to_string())
    }
}

impl From<rumqttc::v5::ClientError> for Error {
    fn from(e: rumqttc::v5::ClientError) -> Self {
        Self::new(ErrorKind::Broker, e.to_string())
    }
}

/// A specialized `Result` for commissioning operations.
pub type Result<T> = std::result::Result<T, Error>;
