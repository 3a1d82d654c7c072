//! Status projection consumed by health and diagnostics endpoints.

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, cache::snapshot::Snapshot, metrics::CacheMetricsSnapshot};

/// Coarse refresh health.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
	/// No refresh has succeeded yet.
	Empty,
	/// The most recent refresh succeeded.
	Ready,
	/// The most recent refresh failed; the last good snapshot is still served.
	Stale,
}

/// Point-in-time view of the cache.
#[derive(Clone, Debug, Serialize)]
pub struct CacheStatus {
	/// Refresh health.
	pub state: RefreshState,
	/// Addresses in the current snapshot.
	pub authorized_users_count: usize,
	/// Seconds since the last successful refresh (or since construction).
	pub cache_age_seconds: f64,
	/// Configured refresh interval in seconds.
	pub cache_ttl_seconds: u64,
	/// Wall-clock time of the last successful refresh.
	pub last_refresh: Option<DateTime<Utc>>,
	/// Failed cycles since the last successful refresh.
	pub consecutive_failures: u64,
	/// Message of the most recent failure, cleared on success.
	pub last_error: Option<String>,
	/// Counter samples backing the status.
	pub metrics: Vec<StatusMetric>,
}
impl CacheStatus {
	pub(crate) fn from_components(
		snapshot: &Snapshot,
		cache_age: Duration,
		cache_ttl: Duration,
		metrics: CacheMetricsSnapshot,
		last_error: Option<String>,
	) -> Self {
		let state = match (snapshot.refreshed_at(), metrics.consecutive_failures) {
			(None, _) => RefreshState::Empty,
			(Some(_), 0) => RefreshState::Ready,
			(Some(_), _) => RefreshState::Stale,
		};
		let mut status_metrics = vec![
			StatusMetric::new("roster_auth_refresh_total", metrics.refresh_successes as f64)
				.with_label("status", "success"),
			StatusMetric::new("roster_auth_refresh_total", metrics.refresh_errors as f64)
				.with_label("status", "error"),
			StatusMetric::new("roster_auth_decisions_total", metrics.subnet_grants as f64)
				.with_label("source", "subnet"),
			StatusMetric::new("roster_auth_decisions_total", metrics.roster_grants as f64)
				.with_label("source", "roster"),
			StatusMetric::new("roster_auth_decisions_total", metrics.denials as f64)
				.with_label("source", "denied"),
		];

		if let Some(last_micros) = metrics.last_refresh_micros {
			status_metrics
				.push(StatusMetric::new("roster_auth_last_refresh_micros", last_micros as f64));
		}

		Self {
			state,
			authorized_users_count: snapshot.len(),
			cache_age_seconds: cache_age.as_secs_f64(),
			cache_ttl_seconds: cache_ttl.as_secs(),
			last_refresh: snapshot.refreshed_at_wallclock(),
			consecutive_failures: metrics.consecutive_failures,
			last_error,
			metrics: status_metrics,
		}
	}

	/// Whether the snapshot is older than `intervals` refresh periods.
	pub fn is_older_than(&self, intervals: u32) -> bool {
		self.cache_age_seconds > self.cache_ttl_seconds.saturating_mul(u64::from(intervals)) as f64
	}
}

/// Metric sample used in status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusMetric {
	/// Metric name following the monitoring schema.
	pub name: String,
	/// Numeric value captured for the metric.
	pub value: f64,
	/// Additional labels enriching the metric sample.
	#[serde(default)]
	pub labels: HashMap<String, String>,
}
impl StatusMetric {
	fn new(name: impl Into<String>, value: f64) -> Self {
		Self { name: name.into(), value, labels: HashMap::new() }
	}

	fn with_label(mut self, key: &str, value: &str) -> Self {
		self.labels.insert(key.into(), value.into());

		self
	}
}
