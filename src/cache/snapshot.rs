//! Immutable authorization snapshots and the builder that assembles them from roster data.

// std
use std::{collections::HashMap, net::IpAddr};
// crates.io
use serde::Serialize;
// self
use crate::{
	_prelude::*,
	config::GroupSet,
	provider::{GroupId, RosterEntity},
};

/// Display name reported when no roster identity is available.
pub const DEFAULT_DISPLAY_NAME: &str = "localuser";

/// One authorized identity as of the refresh that produced its snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthorizedEntry {
	/// Nickname reported by the roster source, if any.
	pub display_name: Option<String>,
	/// Groups held at fetch time, in the order the source reported them.
	pub group_ids: Vec<GroupId>,
	/// Stable identity key from the roster source.
	pub provider_entity_id: String,
	/// Connection identifier from the roster source.
	pub provider_session_id: Option<String>,
}
impl AuthorizedEntry {
	/// Nickname, or [`DEFAULT_DISPLAY_NAME`] when absent or blank.
	pub fn display_name(&self) -> &str {
		self.display_name.as_deref().filter(|name| !name.trim().is_empty()).unwrap_or(DEFAULT_DISPLAY_NAME)
	}
}

/// Result of an authorization query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authorization {
	/// Neither the allowlist nor the snapshot grants access.
	Denied,
	/// Granted by the static subnet allowlist.
	Subnet,
	/// Granted by live roster membership.
	Roster(AuthorizedEntry),
}
impl Authorization {
	/// Whether access is granted.
	pub fn is_granted(&self) -> bool {
		!matches!(self, Authorization::Denied)
	}

	/// Roster identity backing the grant, if any.
	pub fn entry(&self) -> Option<&AuthorizedEntry> {
		match self {
			Authorization::Roster(entry) => Some(entry),
			_ => None,
		}
	}

	/// Name to attribute the request to; subnet grants use [`DEFAULT_DISPLAY_NAME`].
	pub fn display_name(&self) -> Option<&str> {
		match self {
			Authorization::Denied => None,
			Authorization::Subnet => Some(DEFAULT_DISPLAY_NAME),
			Authorization::Roster(entry) => Some(entry.display_name()),
		}
	}
}

/// Point-in-time mapping from client address to identity.
///
/// Never mutated after publication; each refresh publishes a new one.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
	entries: HashMap<IpAddr, AuthorizedEntry>,
	refreshed_at: Option<Instant>,
	refreshed_at_wallclock: Option<DateTime<Utc>>,
}
impl Snapshot {
	/// Snapshot in effect before the first successful refresh.
	pub fn empty() -> Self {
		Self::default()
	}

	/// Look up the identity for an address.
	pub fn get(&self, ip: IpAddr) -> Option<&AuthorizedEntry> {
		self.entries.get(&ip.to_canonical())
	}

	/// Whether the address has an identity in this snapshot.
	pub fn contains(&self, ip: IpAddr) -> bool {
		self.entries.contains_key(&ip.to_canonical())
	}

	/// Number of authorized addresses.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether no addresses are authorized.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Authorized addresses in ascending order.
	pub fn ips(&self) -> Vec<IpAddr> {
		let mut ips: Vec<IpAddr> = self.entries.keys().copied().collect();

		ips.sort_unstable();

		ips
	}

	/// Iterate over every entry.
	pub fn iter(&self) -> impl Iterator<Item = (&IpAddr, &AuthorizedEntry)> {
		self.entries.iter()
	}

	/// Monotonic instant of the refresh that produced this snapshot.
	pub fn refreshed_at(&self) -> Option<Instant> {
		self.refreshed_at
	}

	/// Wall-clock time of the refresh that produced this snapshot.
	pub fn refreshed_at_wallclock(&self) -> Option<DateTime<Utc>> {
		self.refreshed_at_wallclock
	}
}

/// Counters describing one completed refresh cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshSummary {
	/// Connected clients reported by the roster source.
	pub entities_seen: usize,
	/// Clients skipped for a missing key or unusable address.
	pub entities_skipped: usize,
	/// Clients whose group lookup failed and were treated as holding no groups.
	pub group_lookup_failures: usize,
	/// Addresses in the published snapshot.
	pub authorized: usize,
	/// Wall time spent in the cycle.
	pub elapsed: Duration,
}

/// An entity that passed the identity and address checks and needs a group lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
	/// Identity key for the group lookup.
	pub key: String,
	/// Canonical client address.
	pub ip: IpAddr,
}

/// Accumulates authorized entries for the next snapshot.
#[derive(Debug)]
pub struct SnapshotBuilder<'a> {
	required: &'a GroupSet,
	entries: HashMap<IpAddr, AuthorizedEntry>,
	summary: RefreshSummary,
}
impl<'a> SnapshotBuilder<'a> {
	/// Start an empty snapshot for the given required group set.
	pub fn new(required: &'a GroupSet) -> Self {
		Self { required, entries: HashMap::new(), summary: RefreshSummary::default() }
	}

	/// Check that the entity has an identity key and a usable address.
	pub fn admit(&mut self, entity: &RosterEntity) -> Option<Candidate> {
		self.summary.entities_seen += 1;

		let name = entity.display_name.as_deref().unwrap_or(DEFAULT_DISPLAY_NAME);
		let Some(key) = non_blank(entity.entity_key.as_deref()) else {
			tracing::warn!(name, "roster client missing identity key, skipping");

			self.summary.entities_skipped += 1;

			return None;
		};
		let Some(address) = non_blank(entity.address.as_deref()) else {
			tracing::warn!(name, key, "roster client missing address, skipping");

			self.summary.entities_skipped += 1;

			return None;
		};
		let ip = match address.parse::<IpAddr>() {
			Ok(ip) => ip.to_canonical(),
			Err(err) => {
				tracing::warn!(name, key, address, error = %err, "roster client has invalid address, skipping");

				self.summary.entities_skipped += 1;

				return None;
			},
		};

		Some(Candidate { key: key.to_owned(), ip })
	}

	/// Note that a group lookup failed for one candidate.
	pub fn record_lookup_failure(&mut self) {
		self.summary.group_lookup_failures += 1;
	}

	/// Add the candidate when its groups intersect the required set; returns whether it was added.
	pub fn insert(&mut self, entity: &RosterEntity, candidate: Candidate, groups: Vec<GroupId>) -> bool {
		let name = entity.display_name.as_deref().unwrap_or(DEFAULT_DISPLAY_NAME);

		if !groups.iter().any(|group| self.required.contains(group)) {
			tracing::debug!(name, ip = %candidate.ip, ?groups, "roster client lacks required groups");

			return false;
		}

		tracing::debug!(name, ip = %candidate.ip, "authorized roster client");

		let entry = AuthorizedEntry {
			display_name: entity.display_name.clone(),
			group_ids: groups,
			provider_entity_id: candidate.key,
			provider_session_id: entity.session_id.clone(),
		};

		if let Some(previous) = self.entries.insert(candidate.ip, entry) {
			tracing::debug!(
				ip = %candidate.ip,
				replaced = previous.display_name(),
				"multiple authorized clients share an address; keeping the last one"
			);
		}

		true
	}

	/// Seal the snapshot, stamping it with the refresh time.
	pub fn finish(self, refreshed_at: Instant, wallclock: DateTime<Utc>) -> (Snapshot, RefreshSummary) {
		let mut summary = self.summary;

		summary.authorized = self.entries.len();

		let snapshot = Snapshot {
			entries: self.entries,
			refreshed_at: Some(refreshed_at),
			refreshed_at_wallclock: Some(wallclock),
		};

		(snapshot, summary)
	}
}

fn non_blank(value: Option<&str>) -> Option<&str> {
	value.map(str::trim).filter(|value| !value.is_empty())
}
