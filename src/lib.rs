//! IP authorization cache for forward-auth gateways.
//!
//! Requests are granted when the client address falls inside a static subnet allowlist or belongs
//! to a client currently connected to a voice server while holding one of the required server
//! groups. Roster membership is fetched over a persistent ServerQuery session and published as an
//! immutable snapshot, so authorization checks never block on the network.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod metrics;
pub mod provider;
pub mod subnet;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::{
		manager::AuthorizationCache,
		snapshot::{
			Authorization, AuthorizedEntry, DEFAULT_DISPLAY_NAME, RefreshSummary, Snapshot,
		},
		status::{CacheStatus, RefreshState, StatusMetric},
	},
	config::{AuthorizationConfig, AuthorizationConfigBuilder, GroupSet, ServerQueryConfig},
	error::{Error, Result},
	metrics::{CacheMetrics, CacheMetricsSnapshot, DecisionSource},
	provider::{GroupId, RosterEntity, RosterProvider, ServerQueryProvider, ServerQuerySession},
	subnet::SubnetList,
};
