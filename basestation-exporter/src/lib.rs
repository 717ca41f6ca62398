//! Prometheus exporter for base station telemetry.
//!
//! The base station connects over plain TCP and sends one JSON document per
//! connection. The latest reading is kept in a shared store and exposed as
//! gauges on an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Base station   │────>│ Telemetry store │────>│   HTTP Server   │
//! │  (TCP + JSON)   │     │ (latest record) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Wire format
//!
//! ```json
//! {"id":"AA", "timestamp":"1700000000", "uptime":"3600", "uplink":"12.5",
//!  "downlink":"40", "limit_connection":"0", "main_power":"1", "battery":"73.5"}
//! ```
//!
//! All fields are optional strings. Each field is exported as
//! `{namespace}_base_station_{field}` after [`coerce`](coerce::coerce).
//!
//! # Usage
//!
//! ```bash
//! basestation-exporter [tcp-address] [http-listen-address] [metrics-path]
//! ```
//!
//! See [`config::ExporterConfig`] for the optional JSON5 configuration file.

pub mod coerce;
pub mod config;
pub mod exporter;
pub mod http;
pub mod ingest;
pub mod telemetry;

pub use config::ExporterConfig;
pub use exporter::{Exporter, SharedExporter};
pub use http::HttpServer;
pub use ingest::IngestServer;
pub use telemetry::{SharedStore, TelemetryRecord, TelemetryStore, TelemetryUpdate};
