//! The `collaudo` library crate provides the building blocks for taking a
//! factory-fresh Tasmota-class device and verifying, end to end, that it is
//! ready to leave the bench.
//!
//! A device qualifies for the pipeline when it exposes the Tasmota HTTP
//! command endpoint and, once configured, publishes periodic sensor
//! telemetry over `MQTT`.
//!
//! Core functionalities of this crate include:
//!
//! - Discovering candidate devices within the network through `mDNS` and
//!   confirming their identity with an `HTTP` probe
//! - Applying an idempotent configuration sequence over the device's
//!   command endpoint, with secrets redacted from every recorded response
//! - Waiting out the restart the configuration triggers
//! - Subscribing to the device's telemetry topic for a bounded window and
//!   validating every message against the expected sensor schema
//! - Producing a deterministic `JSON` report with a single pass or fail
//!   verdict
//!
//! All network-facing APIs are asynchronous and expect a `tokio` runtime;
//! the pipeline itself runs as a single sequential task, spawning helpers
//! only where a broker connection has to be polled concurrently.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// A client for the HTTP command endpoint of a device.
pub mod command;
/// Device identity data along with probing and reboot tracking.
pub mod device;
/// A bounded mDNS scan for candidate devices.
pub mod discovery;
/// Error management.
pub mod error;
/// The configuration sequence applied to a device.
pub mod provision;
/// The final run report and its verdict.
pub mod report;
/// Whole-pipeline orchestration.
pub mod runner;
/// The telemetry payload schema.
pub mod schema;
/// A bounded broker subscription that validates telemetry messages.
pub mod telemetry;
