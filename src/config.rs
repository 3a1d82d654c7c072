//! Typed configuration, defaults, and validation.
//!
//! Values arrive either through `serde` (strings or lists for the comma-separated fields),
//! through the process environment, or through [`AuthorizationConfigBuilder`].

// std
use std::{
	collections::BTreeSet,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use serde::{Deserialize, de::Deserializer};
// self
use crate::{
	_prelude::*,
	provider::GroupId,
	subnet::{self, SubnetList},
};

/// Default ServerQuery host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default ServerQuery port.
pub const DEFAULT_PORT: u16 = 10011;
/// Default ServerQuery login name.
pub const DEFAULT_USERNAME: &str = "serveradmin";
/// Default virtual server identifier.
pub const DEFAULT_SERVER_ID: u32 = 1;
/// Default groups granting access.
pub const DEFAULT_REQUIRED_GROUPS: &str = "6,9";
/// Default refresh interval.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
/// Default per-call budget for roster requests.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
/// Default grace period for in-flight work during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Normalised set of group identifiers that grant access.
pub type GroupSet = BTreeSet<GroupId>;

/// Connection settings for the remote roster source.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ServerQueryConfig {
	/// Hostname or address of the query interface.
	#[serde(default = "default_host")]
	pub host: String,
	/// Query interface port.
	#[serde(default = "default_port")]
	pub port: u16,
	/// Query login name.
	#[serde(default = "default_username")]
	pub username: String,
	/// Query login password.
	#[serde(default)]
	pub password: String,
	/// Virtual server (realm) to select after login.
	#[serde(default = "default_server_id")]
	pub server_id: u32,
}
impl ServerQueryConfig {
	/// `host:port` label used in logs and errors.
	pub fn endpoint(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}
impl Default for ServerQueryConfig {
	fn default() -> Self {
		Self {
			host: DEFAULT_HOST.into(),
			port: DEFAULT_PORT,
			username: DEFAULT_USERNAME.into(),
			password: String::new(),
			server_id: DEFAULT_SERVER_ID,
		}
	}
}
impl Debug for ServerQueryConfig {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("ServerQueryConfig")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.field("server_id", &self.server_id)
			.finish()
	}
}

/// Complete configuration for an [`AuthorizationCache`](crate::AuthorizationCache).
#[derive(Clone, Debug, Deserialize)]
pub struct AuthorizationConfig {
	/// Remote roster source connection settings.
	#[serde(default)]
	pub server: ServerQueryConfig,
	/// Groups whose members are authorized.
	#[serde(default = "default_required_groups", deserialize_with = "deserialize_group_ids")]
	pub required_groups: GroupSet,
	/// Interval between scheduled refreshes.
	#[serde(default = "default_cache_ttl", deserialize_with = "deserialize_secs")]
	pub cache_ttl: Duration,
	/// Static CIDR allowlist.
	#[serde(default, deserialize_with = "subnet::deserialize_subnets")]
	pub authorized_subnets: SubnetList,
	/// Upper bound of the random delay added to each scheduled refresh.
	#[serde(default, deserialize_with = "deserialize_secs")]
	pub refresh_jitter: Duration,
	/// Budget for each individual roster call.
	#[serde(default = "default_call_timeout", deserialize_with = "deserialize_secs")]
	pub call_timeout: Duration,
	/// How long `stop` waits for an in-flight refresh before aborting it.
	#[serde(default = "default_shutdown_grace", deserialize_with = "deserialize_secs")]
	pub shutdown_grace: Duration,
}
impl AuthorizationConfig {
	/// Create a [`AuthorizationConfigBuilder`] seeded with defaults.
	pub fn builder() -> AuthorizationConfigBuilder {
		AuthorizationConfigBuilder::default()
	}

	/// Load configuration from the process environment.
	pub fn from_env() -> Result<Self> {
		Self::from_env_vars(std::env::vars())
	}

	/// Load configuration from key/value pairs using the environment variable names.
	///
	/// Keys are matched case-insensitively; unknown keys are ignored and missing keys keep
	/// their defaults.
	pub fn from_env_vars<I, K, V>(vars: I) -> Result<Self>
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: AsRef<str>,
	{
		let mut config = Self::default();

		for (key, value) in vars {
			let value = value.as_ref();

			match key.as_ref().to_ascii_uppercase().as_str() {
				"TS_HOST" => config.server.host = value.trim().to_owned(),
				"TS_PORT" => config.server.port = parse_number("server.port", value)?,
				"TS_USER" => config.server.username = value.to_owned(),
				"TS_PASSWORD" => config.server.password = value.to_owned(),
				"TS_SERVER_ID" => config.server.server_id = parse_number("server.server_id", value)?,
				"REQUIRED_SERVER_GROUPS" => config.required_groups = parse_group_ids(value),
				"CACHE_TTL" =>
					config.cache_ttl = Duration::from_secs(parse_number("cache_ttl", value)?),
				"AUTHORIZED_SUBNETS" => config.authorized_subnets = SubnetList::parse(value),
				_ => {},
			}
		}

		config.validate()?;

		Ok(config)
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.server.host.trim().is_empty() {
			return Err(Error::Validation {
				field: "server.host",
				reason: "Must not be empty.".into(),
			});
		}
		if self.server.port == 0 {
			return Err(Error::Validation {
				field: "server.port",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.required_groups.is_empty() {
			return Err(Error::Validation {
				field: "required_groups",
				reason: "Must contain at least one group id.".into(),
			});
		}
		if self.cache_ttl.is_zero() {
			return Err(Error::Validation {
				field: "cache_ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.call_timeout.is_zero() {
			return Err(Error::Validation {
				field: "call_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}
impl Default for AuthorizationConfig {
	fn default() -> Self {
		Self {
			server: ServerQueryConfig::default(),
			required_groups: default_required_groups(),
			cache_ttl: DEFAULT_CACHE_TTL,
			authorized_subnets: SubnetList::empty(),
			refresh_jitter: Duration::ZERO,
			call_timeout: DEFAULT_CALL_TIMEOUT,
			shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
		}
	}
}

/// Builder for [`AuthorizationConfig`].
#[derive(Debug, Default)]
pub struct AuthorizationConfigBuilder {
	config: AuthorizationConfig,
}
impl AuthorizationConfigBuilder {
	/// Set the roster source host and port.
	pub fn server(mut self, host: impl Into<String>, port: u16) -> Self {
		self.config.server.host = host.into();
		self.config.server.port = port;

		self
	}

	/// Set the query login credentials.
	pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
		self.config.server.username = username.into();
		self.config.server.password = password.into();

		self
	}

	/// Select the virtual server after login.
	pub fn server_id(mut self, server_id: u32) -> Self {
		self.config.server.server_id = server_id;

		self
	}

	/// Replace the required group set.
	pub fn required_groups<I, G>(mut self, groups: I) -> Self
	where
		I: IntoIterator<Item = G>,
		G: Into<GroupId>,
	{
		self.config.required_groups = groups.into_iter().map(Into::into).collect();

		self
	}

	/// Override the refresh interval.
	pub fn cache_ttl(mut self, value: Duration) -> Self {
		self.config.cache_ttl = value;

		self
	}

	/// Replace the static CIDR allowlist.
	pub fn authorized_subnets(mut self, subnets: SubnetList) -> Self {
		self.config.authorized_subnets = subnets;

		self
	}

	/// Add random jitter of up to `value` to each scheduled refresh.
	pub fn refresh_jitter(mut self, value: Duration) -> Self {
		self.config.refresh_jitter = value;

		self
	}

	/// Override the per-call budget for roster requests.
	pub fn call_timeout(mut self, value: Duration) -> Self {
		self.config.call_timeout = value;

		self
	}

	/// Override the shutdown grace period.
	pub fn shutdown_grace(mut self, value: Duration) -> Self {
		self.config.shutdown_grace = value;

		self
	}

	/// Validate and finalise the configuration.
	pub fn build(self) -> Result<AuthorizationConfig> {
		self.config.validate()?;

		Ok(self.config)
	}
}

/// A configuration value given either as a comma-separated string or as a list.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum CommaList {
	/// `"a, b, c"`
	Joined(String),
	/// `["a", "b", "c"]` or `[6, 9]`
	Items(Vec<CommaItem>),
}
impl CommaList {
	/// Split into trimmed, non-empty entries.
	pub fn into_entries(self) -> Vec<String> {
		match self {
			CommaList::Joined(raw) => split_entries(&raw),
			CommaList::Items(items) => items
				.into_iter()
				.map(|item| match item {
					CommaItem::Number(n) => n.to_string(),
					CommaItem::Text(s) => s.trim().to_owned(),
				})
				.filter(|s| !s.is_empty())
				.collect(),
		}
	}
}

/// One element of a [`CommaList::Items`] list.
#[allow(missing_docs)]
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum CommaItem {
	Number(u64),
	Text(String),
}

/// Parse a comma-separated list of numeric group ids, dropping malformed entries.
pub fn parse_group_ids(raw: &str) -> GroupSet {
	group_set_from_entries(split_entries(raw))
}

/// `serde` helper for [`AuthorizationConfig::required_groups`].
pub fn deserialize_group_ids<'de, D>(deserializer: D) -> std::result::Result<GroupSet, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = CommaList::deserialize(deserializer)?;

	Ok(group_set_from_entries(raw.into_entries()))
}

fn group_set_from_entries(entries: Vec<String>) -> GroupSet {
	let mut groups = GroupSet::new();

	for entry in entries {
		match entry.parse::<u64>() {
			Ok(id) => {
				groups.insert(GroupId::from(id));
			},
			Err(err) => {
				tracing::warn!(entry, error = %err, "ignoring invalid group id in configuration");
			},
		}
	}

	groups
}

fn split_entries(raw: &str) -> Vec<String> {
	raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
}

fn parse_number<T>(field: &'static str, value: &str) -> Result<T>
where
	T: std::str::FromStr,
	T::Err: std::fmt::Display,
{
	value.trim().parse::<T>().map_err(|err| Error::Validation {
		field,
		reason: format!("Invalid number '{value}': {err}."),
	})
}

fn deserialize_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(Duration::from_secs(u64::deserialize(deserializer)?))
}

fn default_host() -> String {
	DEFAULT_HOST.into()
}

fn default_port() -> u16 {
	DEFAULT_PORT
}

fn default_username() -> String {
	DEFAULT_USERNAME.into()
}

fn default_server_id() -> u32 {
	DEFAULT_SERVER_ID
}

fn default_required_groups() -> GroupSet {
	parse_group_ids(DEFAULT_REQUIRED_GROUPS)
}

fn default_cache_ttl() -> Duration {
	DEFAULT_CACHE_TTL
}

fn default_call_timeout() -> Duration {
	DEFAULT_CALL_TIMEOUT
}

fn default_shutdown_grace() -> Duration {
	DEFAULT_SHUTDOWN_GRACE
}
