//! Roster source abstraction consumed by the authorization cache.
//!
//! A provider opens a session to the remote voice server, lists connected clients with their
//! network address, and resolves each client's group memberships. The cache owns the session
//! exclusively and decides when to reconnect based on [`Error::is_session_fatal`].

pub mod server_query;
pub mod wire;

// std
use std::{
	fmt::{Display, Formatter, Result as FmtResult},
	str::FromStr,
};
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

pub use server_query::{ServerQueryProvider, ServerQuerySession};

/// Canonical group identifier.
///
/// Configuration supplies integers while the remote source reports strings; both are funnelled
/// through this type so comparison never depends on representation. Numeric input is stored in
/// plain decimal form (`"06"`, `" 6"` and `6` are equal); anything else is kept trimmed verbatim.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct GroupId(Arc<str>);
impl GroupId {
	/// Normalise a raw identifier.
	pub fn new(raw: impl AsRef<str>) -> Self {
		let trimmed = raw.as_ref().trim();

		match trimmed.parse::<u64>() {
			Ok(id) => Self::from(id),
			Err(_) => Self(Arc::from(trimmed)),
		}
	}

	/// Canonical string form.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for GroupId {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(&self.0)
	}
}
impl From<u64> for GroupId {
	fn from(value: u64) -> Self {
		Self(Arc::from(value.to_string()))
	}
}
impl From<u32> for GroupId {
	fn from(value: u32) -> Self {
		Self::from(u64::from(value))
	}
}
impl From<&str> for GroupId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
impl From<String> for GroupId {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}
impl From<GroupId> for String {
	fn from(value: GroupId) -> Self {
		value.0.to_string()
	}
}
impl FromStr for GroupId {
	type Err = std::convert::Infallible;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self::new(s))
	}
}

/// One connected client as reported by the roster source.
///
/// Every field is optional because the remote data is not guaranteed to be complete; the cache
/// skips records without an address or entity key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RosterEntity {
	/// Network address the client is connected from.
	pub address: Option<String>,
	/// Human-readable nickname.
	pub display_name: Option<String>,
	/// Stable identity key used for group lookups.
	pub entity_key: Option<String>,
	/// Per-connection identifier, retained for diagnostics.
	pub session_id: Option<String>,
}

/// Capability set the cache needs from the remote roster source.
///
/// Implementations may block on network I/O; the cache bounds every call with its configured
/// per-call timeout and never calls a provider from the read path.
#[async_trait::async_trait]
pub trait RosterProvider: Send + Sync + 'static {
	/// Open session state owned by the cache between refreshes.
	type Session: Send + 'static;

	/// Open and authenticate a session. Failures should be [`Error::Connection`].
	async fn connect(&self) -> Result<Self::Session>;

	/// Close a session. Errors are logged by the caller and never propagated.
	async fn disconnect(&self, session: Self::Session) -> Result<()>;

	/// List currently connected clients.
	async fn list_entities(&self, session: &mut Self::Session) -> Result<Vec<RosterEntity>>;

	/// Resolve the groups held by one client.
	async fn list_groups(&self, session: &mut Self::Session, entity_key: &str)
	-> Result<Vec<GroupId>>;
}
