use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use serde::Serialize;

use tracing::info;

use crate::device::Device;
use crate::error::Result;
use crate::provision::CommandLog;
use crate::telemetry::ValidationRecord;

/// Aggregate counters and the final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Devices that answered the identity probe.
    pub devices_found: usize,
    /// Telemetry messages received within the window.
    pub messages_received: usize,
    /// Messages that conform to the sensor schema.
    pub valid: usize,
    /// Messages that do not.
    pub invalid: usize,
    /// Whether the run passed.
    pub pass: bool,
}

/// Outcome of a whole pipeline run.
///
/// Two runs over the same devices, configuration, and verdicts serialize
/// identically except for [`generated_at`](Self::generated_at).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// When the report was produced.
    pub generated_at: DateTime<Utc>,
    /// Aggregate counters and the final verdict.
    pub summary: Summary,
    /// Devices that answered the identity probe.
    pub devices: Vec<Device>,
    /// Configuration commands applied, in execution order and redacted.
    pub configuration: CommandLog,
    /// Verdict on every telemetry message, in arrival order.
    pub validation: Vec<ValidationRecord>,
}

impl Report {
    /// Builds a [`Report`] out of a run's outcomes.
    ///
    /// The run passes when at least one telemetry message arrived and every
    /// message conformed to the sensor schema.
    #[must_use]
    pub fn build(
        devices: Vec<Device>,
        configuration: CommandLog,
        validation: Vec<ValidationRecord>,
    ) -> Self {
        let messages_received = validation.len();
        let valid = validation.iter().filter(|record| record.valid).count();
        let invalid = messages_received - valid;

        let summary = Summary {
            devices_found: devices.len(),
            messages_received,
            valid,
            invalid,
            pass: messages_received > 0 && valid == messages_received,
        };

        Self {
            generated_at: Utc::now(),
            summary,
            devices,
            configuration,
            validation,
        }
    }

    /// Serializes the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// The report could not be serialized.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the report to `path` as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// The report could not be serialized or the file could not be written.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut json = self.to_json()?;
        json.push('\n');
        fs::write(path, json)?;

        info!("Report written to {}", path.display());

        Ok(())
    }
}
