//! Static CIDR allowlist evaluation.
//!
//! Addresses inside any configured range are authorized without consulting the roster snapshot.
//! Ranges are parsed leniently: host bits in the prefix are tolerated, a bare address becomes a
//! single-host range, and malformed entries are dropped with a warning while the rest still apply.

// std
use std::{
	collections::HashSet,
	fmt::{Display, Formatter, Result as FmtResult},
	net::IpAddr,
	str::FromStr,
};
// crates.io
use ipnet::IpNet;
use serde::de::Deserializer;
// self
use crate::config::CommaList;

/// Ordered set of CIDR ranges; IPv4 and IPv6 may be mixed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubnetList {
	ranges: Vec<IpNet>,
}
impl SubnetList {
	/// An allowlist that never matches.
	pub fn empty() -> Self {
		Self::default()
	}

	/// Parse a comma-separated list of ranges; an empty or blank string yields an empty list.
	pub fn parse(raw: &str) -> Self {
		Self::from_entries(raw.split(','))
	}

	/// Build the list from individual entries, skipping blanks, duplicates, and malformed ranges.
	pub fn from_entries<I, S>(entries: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut seen = HashSet::new();
		let mut ranges = Vec::new();

		for entry in entries {
			let entry = entry.as_ref().trim();

			if entry.is_empty() {
				continue;
			}

			match parse_range(entry) {
				Some(range) =>
					if seen.insert(range) {
						ranges.push(range);
					},
				None => {
					tracing::warn!(entry, "ignoring invalid subnet in allowlist");
				},
			}
		}

		Self { ranges }
	}

	/// Configured ranges in their canonical (network address) form.
	pub fn ranges(&self) -> &[IpNet] {
		&self.ranges
	}

	/// Number of valid ranges.
	pub fn len(&self) -> usize {
		self.ranges.len()
	}

	/// Whether no valid ranges are configured.
	pub fn is_empty(&self) -> bool {
		self.ranges.is_empty()
	}

	/// Whether the address falls inside any configured range.
	pub fn contains(&self, ip: IpAddr) -> bool {
		let ip = ip.to_canonical();

		self.ranges.iter().any(|range| range.contains(&ip))
	}

	/// Textual variant of [`SubnetList::contains`]; unparseable input never matches.
	pub fn matches(&self, ip: &str) -> bool {
		if self.ranges.is_empty() {
			return false;
		}

		match IpAddr::from_str(ip.trim()) {
			Ok(addr) => {
				let matched = self.contains(addr);

				if matched {
					tracing::debug!(ip, "address matched subnet allowlist");
				}

				matched
			},
			Err(err) => {
				tracing::warn!(ip, error = %err, "invalid address passed to subnet check");

				false
			},
		}
	}
}
impl Display for SubnetList {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		for (i, range) in self.ranges.iter().enumerate() {
			if i > 0 {
				f.write_str(",")?;
			}

			write!(f, "{range}")?;
		}

		Ok(())
	}
}
impl FromStr for SubnetList {
	type Err = std::convert::Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self::parse(s))
	}
}

/// `serde` helper accepting either a comma-separated string or a list of ranges.
pub fn deserialize_subnets<'de, D>(deserializer: D) -> std::result::Result<SubnetList, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = <CommaList as serde::Deserialize>::deserialize(deserializer)?;

	Ok(SubnetList::from_entries(raw.into_entries()))
}

fn parse_range(entry: &str) -> Option<IpNet> {
	if let Ok(range) = IpNet::from_str(entry) {
		return Some(range.trunc());
	}

	IpAddr::from_str(entry).ok().map(|addr| IpNet::from(addr.to_canonical()))
}
