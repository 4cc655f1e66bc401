//! Metrics for the hardware signer link.
//!
//! This crate declares every metric the link emits as a structured [`Metric`]
//! constant and re-exports the `metrics` crate so emitters and exporters agree on
//! a single version.
//!
//! # Example
//!
//! ```rust,ignore
//! use nanos_metrics::{metric_defs, describe_metrics, ExchangeLabels};
//!
//! // Register descriptions once a recorder is installed
//! describe_metrics();
//!
//! metrics::counter!(metric_defs::TRANSPORT_FRAMES_WRITTEN.name).increment(1);
//!
//! let labels = ExchangeLabels::new("sign_hash", "ok");
//! metrics::counter!(metric_defs::EXCHANGE_COMPLETED.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use nanos_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const RETRIES: Metric = Metric::counter("nanos.exchange.retries")
///     .with_description("Exchanges retried after a timeout")
///     .with_unit(Unit::Count)
///     .with_labels(&["command"]);
///
/// assert_eq!(RETRIES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "nanos.transport.frames_written").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement, if any.
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a counter metric.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Creates a gauge metric.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Creates a histogram metric.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Sets the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the link.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Transport Metrics
    // ========================================================================

    /// Frames written to the OUT endpoint.
    pub const TRANSPORT_FRAMES_WRITTEN: Metric = Metric::counter("nanos.transport.frames_written")
        .with_description("Frames written to the device")
        .with_unit(Unit::Count);

    /// Non-empty reads from the IN endpoint.
    pub const TRANSPORT_FRAMES_READ: Metric = Metric::counter("nanos.transport.frames_read")
        .with_description("Frames read from the device")
        .with_unit(Unit::Count);

    /// Bytes written to the OUT endpoint.
    pub const TRANSPORT_BYTES_WRITTEN: Metric = Metric::counter("nanos.transport.bytes_written")
        .with_description("Bytes written to the device")
        .with_unit(Unit::Bytes);

    /// Bytes read from the IN endpoint.
    pub const TRANSPORT_BYTES_READ: Metric = Metric::counter("nanos.transport.bytes_read")
        .with_description("Bytes read from the device")
        .with_unit(Unit::Bytes);

    /// Reads that expired without data.
    pub const TRANSPORT_READ_TIMEOUTS: Metric = Metric::counter("nanos.transport.read_timeouts")
        .with_description("Bulk reads that returned no data before the transfer timeout")
        .with_unit(Unit::Count);

    // ========================================================================
    // Exchange Metrics
    // ========================================================================

    /// Completed exchanges by command and final status.
    ///
    /// Labels: command, status
    pub const EXCHANGE_COMPLETED: Metric = Metric::counter("nanos.exchange.completed")
        .with_description("Command/response exchanges completed")
        .with_unit(Unit::Count)
        .with_labels(&["command", "status"]);

    /// Wall time of an exchange from write to final frame.
    ///
    /// Labels: command
    pub const EXCHANGE_DURATION: Metric = Metric::histogram("nanos.exchange.duration")
        .with_description("Exchange duration in seconds")
        .with_unit(Unit::Seconds)
        .with_labels(&["command"]);

    // ========================================================================
    // Lifecycle Metrics
    // ========================================================================

    /// Session state transitions.
    ///
    /// Labels: state
    pub const LIFECYCLE_TRANSITIONS: Metric = Metric::counter("nanos.lifecycle.transitions")
        .with_description("Device session state transitions")
        .with_unit(Unit::Count)
        .with_labels(&["state"]);

    /// Every metric, for bulk registration.
    pub const ALL: &[&Metric] = &[
        &TRANSPORT_FRAMES_WRITTEN,
        &TRANSPORT_FRAMES_READ,
        &TRANSPORT_BYTES_WRITTEN,
        &TRANSPORT_BYTES_READ,
        &TRANSPORT_READ_TIMEOUTS,
        &EXCHANGE_COMPLETED,
        &EXCHANGE_DURATION,
        &LIFECYCLE_TRANSITIONS,
    ];
}

/// Labels attached to exchange metrics.
///
/// ```rust
/// use nanos_metrics::ExchangeLabels;
///
/// let labels = ExchangeLabels::new("get_version", "ok");
/// assert!(labels.to_labels().contains(&("status", "ok".to_string())));
/// ```
#[derive(Debug, Clone)]
pub struct ExchangeLabels {
    /// Command name.
    pub command: String,
    /// Final status name.
    pub status: String,
}

impl ExchangeLabels {
    /// Creates labels for one exchange.
    pub fn new(command: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            status: status.into(),
        }
    }

    /// Converts to the `metrics` crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("command", self.command.clone()), ("status", self.status.clone())]
    }
}

/// Registers descriptions for every metric in [`metric_defs::ALL`].
///
/// Call once at startup, after a recorder has been installed.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Installs a Prometheus recorder serving `/metrics` on `addr` and describes all metrics.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_exporter(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}
