//! Metrics helpers and per-cache telemetry bookkeeping.
//!
//! [`CacheMetrics`] is always available and backs [`CacheStatus`](crate::CacheStatus). With the
//! `metrics` feature the same events are also emitted through the `metrics` facade, and the
//! `prometheus` feature adds a ready-made exporter.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
#[cfg(feature = "metrics")] use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")] use smallvec::SmallVec;
// self
use crate::_prelude::*;

#[cfg(feature = "metrics")]
type LabelSet = SmallVec<[Label; 2]>;

#[cfg(feature = "metrics")]
const METRIC_REFRESH_TOTAL: &str = "roster_auth_refresh_total";
#[cfg(feature = "metrics")]
const METRIC_REFRESH_DURATION: &str = "roster_auth_refresh_duration_seconds";
#[cfg(feature = "metrics")]
const METRIC_REFRESH_ERRORS: &str = "roster_auth_refresh_errors_total";
#[cfg(feature = "metrics")]
const METRIC_AUTHORIZED_ENTRIES: &str = "roster_auth_authorized_entries";
#[cfg(feature = "metrics")]
const METRIC_DECISIONS_TOTAL: &str = "roster_auth_decisions_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Which rule settled an authorization query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionSource {
	/// Matched the static subnet allowlist.
	Subnet,
	/// Found in the roster snapshot.
	Roster,
	/// Not authorized.
	Denied,
}
impl DecisionSource {
	/// Label value used for this source.
	pub fn as_str(self) -> &'static str {
		match self {
			DecisionSource::Subnet => "subnet",
			DecisionSource::Roster => "roster",
			DecisionSource::Denied => "denied",
		}
	}
}

/// Thread-safe metrics accumulator for one cache instance.
#[derive(Debug, Default)]
pub struct CacheMetrics {
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	consecutive_failures: AtomicU64,
	last_refresh_micros: AtomicU64,
	subnet_grants: AtomicU64,
	roster_grants: AtomicU64,
	denials: AtomicU64,
}
impl CacheMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a successful refresh and its latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.consecutive_failures.store(0, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record a failed refresh.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
		self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
	}

	/// Record the outcome of an authorization query.
	pub fn record_decision(&self, source: DecisionSource) {
		let counter = match source {
			DecisionSource::Subnet => &self.subnet_grants,
			DecisionSource::Roster => &self.roster_grants,
			DecisionSource::Denied => &self.denials,
		};

		counter.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> CacheMetricsSnapshot {
		CacheMetricsSnapshot {
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
			subnet_grants: self.subnet_grants.load(Ordering::Relaxed),
			roster_grants: self.roster_grants.load(Ordering::Relaxed),
			denials: self.denials.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of per-cache telemetry counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
	/// Count of refresh cycles that published a snapshot.
	pub refresh_successes: u64,
	/// Count of refresh cycles that failed.
	pub refresh_errors: u64,
	/// Failures since the last successful refresh.
	pub consecutive_failures: u64,
	/// Microsecond latency of the most recent successful refresh.
	pub last_refresh_micros: Option<u64>,
	/// Queries granted by the subnet allowlist.
	pub subnet_grants: u64,
	/// Queries granted by the roster snapshot.
	pub roster_grants: u64,
	/// Queries denied.
	pub denials: u64,
}
impl CacheMetricsSnapshot {
	/// Total authorization queries observed.
	pub fn total_decisions(&self) -> u64 {
		self.subnet_grants + self.roster_grants + self.denials
	}

	/// Ratio of granted queries over all queries.
	pub fn grant_rate(&self) -> f64 {
		match self.total_decisions() {
			0 => 0.0,
			total => (self.subnet_grants + self.roster_grants) as f64 / total as f64,
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a successful refresh along with its latency and resulting snapshot size.
pub fn record_refresh_success(duration: Duration, authorized: usize) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(METRIC_REFRESH_TOTAL, status_labels("success").iter()).increment(1);
		metrics::histogram!(METRIC_REFRESH_DURATION).record(duration.as_secs_f64());
		metrics::gauge!(METRIC_AUTHORIZED_ENTRIES).set(authorized as f64);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = (duration, authorized);
}

/// Record a failed refresh.
pub fn record_refresh_error() {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(METRIC_REFRESH_TOTAL, status_labels("error").iter()).increment(1);
		metrics::counter!(METRIC_REFRESH_ERRORS).increment(1);
	}
}

/// Record the outcome of an authorization query.
pub fn record_decision(source: DecisionSource) {
	#[cfg(feature = "metrics")]
	{
		let mut labels = LabelSet::new();

		labels.push(Label::new("source", source.as_str()));

		metrics::counter!(METRIC_DECISIONS_TOTAL, labels.iter()).increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = source;
}

#[cfg(feature = "metrics")]
fn status_labels(status: &'static str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("status", status));

	labels
}
