//! Metrics exporter that turns the latest telemetry record into Prometheus samples.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use tracing::trace;

use crate::coerce::coerce;
use crate::telemetry::{SharedStore, TelemetryField};

/// Subsystem of the per-field telemetry gauges.
pub const TELEMETRY_SUBSYSTEM: &str = "base_station";

/// Subsystem of the exporter health metrics.
pub const EXPORTER_SUBSYSTEM: &str = "exporter";

/// Prometheus metric types emitted by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Static description of a metric family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDesc {
    /// The full Prometheus metric name.
    pub name: String,
    /// HELP text.
    pub help: String,
    /// The metric type.
    pub metric_type: MetricType,
}

impl MetricDesc {
    pub fn new(name: impl Into<String>, help: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            metric_type,
        }
    }
}

/// A single unlabelled sample produced by a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub desc: MetricDesc,
    pub value: f64,
}

/// Join the non-empty name parts with `_`.
pub fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// Exporter for base station telemetry.
///
/// Only the health metrics are described up front. The telemetry gauges are
/// produced during collection.
pub struct Exporter {
    namespace: String,
    store: SharedStore,
    up: Gauge,
    scrapes_total: Counter,
    up_desc: MetricDesc,
    scrapes_desc: MetricDesc,
}

/// Create a shareable exporter handle.
pub type SharedExporter = Arc<Exporter>;

impl Exporter {
    /// Create a new exporter reading from `store`.
    pub fn new(namespace: impl Into<String>, store: SharedStore) -> Self {
        let namespace = namespace.into();

        let up_desc = MetricDesc::new(
            build_fq_name(&namespace, EXPORTER_SUBSYSTEM, "up"),
            "whether exporter is up",
            MetricType::Gauge,
        );
        let scrapes_desc = MetricDesc::new(
            build_fq_name(&namespace, EXPORTER_SUBSYSTEM, "scrapes_total"),
            "Total number of scrapes",
            MetricType::Counter,
        );

        Self {
            namespace,
            store,
            up: Gauge::default(),
            scrapes_total: Counter::default(),
            up_desc,
            scrapes_desc,
        }
    }

    /// Metric namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Descriptors of the statically declared metrics.
    pub fn describe(&self) -> Vec<MetricDesc> {
        vec![self.up_desc.clone(), self.scrapes_desc.clone()]
    }

    /// Run one scrape.
    ///
    /// Marks the exporter up, counts the scrape, then emits one gauge per
    /// telemetry field followed by the health samples.
    pub fn collect(&self) -> Vec<Sample> {
        self.up.set(1);
        self.scrapes_total.inc();

        let record = self.store.read();
        let mut samples = Vec::with_capacity(TelemetryField::ALL.len() + 2);

        for field in TelemetryField::ALL {
            let value = coerce(record.get(field));
            samples.push(Sample {
                desc: MetricDesc::new(
                    build_fq_name(&self.namespace, TELEMETRY_SUBSYSTEM, field.as_str()),
                    field.help(),
                    MetricType::Gauge,
                ),
                value,
            });
        }

        samples.push(Sample {
            desc: self.up_desc.clone(),
            value: self.up.get() as f64,
        });
        samples.push(Sample {
            desc: self.scrapes_desc.clone(),
            value: self.scrapes_total.get() as f64,
        });

        trace!(samples = samples.len(), "Collected samples");
        samples
    }

    /// Number of scrapes served so far.
    pub fn scrapes(&self) -> u64 {
        self.scrapes_total.get()
    }

    /// Scrape and render in Prometheus exposition format.
    pub fn render(&self) -> String {
        encode_text(&self.collect())
    }
}

/// Encode samples in the Prometheus text exposition format (0.0.4).
///
/// Families are written in name order, each with HELP and TYPE comments.
pub fn encode_text(samples: &[Sample]) -> String {
    let mut by_name: BTreeMap<&str, Vec<&Sample>> = BTreeMap::new();
    for sample in samples {
        by_name
            .entry(sample.desc.name.as_str())
            .or_default()
            .push(sample);
    }

    let mut output = Vec::with_capacity(samples.len() * 100);

    for (name, family) in by_name {
        let desc = &family[0].desc;

        writeln!(output, "# HELP {} {}", name, escape_help(&desc.help)).ok();
        writeln!(output, "# TYPE {} {}", name, desc.metric_type.as_str()).ok();

        for sample in family {
            writeln!(output, "{} {}", name, format_value(sample.value)).ok();
        }
    }

    String::from_utf8(output).unwrap_or_default()
}

/// Escape special characters in HELP text.
fn escape_help(help: &str) -> String {
    let mut result = String::with_capacity(help.len());
    for c in help.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
