//! Scripted in-memory roster provider shared by the integration suites.

// std
use std::{
	collections::HashMap,
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use roster_auth::{
	AuthorizationCache, AuthorizationConfig, Error, GroupId, Result, RosterEntity, RosterProvider,
	SubnetList,
};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Provider whose roster, failures, and latency are controlled by the test.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
	script: Arc<Script>,
}
impl ScriptedProvider {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_entities(&self, entities: Vec<RosterEntity>) {
		*self.script.entities.lock().unwrap() = entities;
	}

	pub fn set_groups(&self, key: &str, groups: &[&str]) {
		self.script
			.groups
			.lock()
			.unwrap()
			.insert(key.to_owned(), Ok(groups.iter().map(GroupId::new).collect()));
	}

	pub fn fail_groups(&self, key: &str, error: Error) {
		self.script.groups.lock().unwrap().insert(key.to_owned(), Err(error));
	}

	pub fn fail_connect(&self, fail: bool) {
		self.script.fail_connect.store(fail, Ordering::SeqCst);
	}

	/// Make every `list_entities` call fail with `error` until cleared with `None`.
	pub fn fail_listing(&self, error: Option<Error>) {
		*self.script.listing_error.lock().unwrap() = error;
	}

	pub fn set_listing_delay(&self, delay: Duration) {
		*self.script.listing_delay.lock().unwrap() = delay;
	}

	pub fn connects(&self) -> usize {
		self.script.connects.load(Ordering::SeqCst)
	}

	pub fn disconnects(&self) -> usize {
		self.script.disconnects.load(Ordering::SeqCst)
	}

	pub fn listings(&self) -> usize {
		self.script.listings.load(Ordering::SeqCst)
	}

	pub fn max_concurrent_listings(&self) -> usize {
		self.script.max_in_flight.load(Ordering::SeqCst)
	}
}
#[async_trait::async_trait]
impl RosterProvider for ScriptedProvider {
	type Session = usize;

	async fn connect(&self) -> Result<usize> {
		let id = self.script.connects.fetch_add(1, Ordering::SeqCst) + 1;

		if self.script.fail_connect.load(Ordering::SeqCst) {
			return Err(Error::Connection {
				endpoint: "scripted:10011".into(),
				reason: "connection refused".into(),
			});
		}

		Ok(id)
	}

	async fn disconnect(&self, _: usize) -> Result<()> {
		self.script.disconnects.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}

	async fn list_entities(&self, _: &mut usize) -> Result<Vec<RosterEntity>> {
		self.script.listings.fetch_add(1, Ordering::SeqCst);

		let in_flight = self.script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

		self.script.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

		let delay = *self.script.listing_delay.lock().unwrap();

		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		self.script.in_flight.fetch_sub(1, Ordering::SeqCst);

		if let Some(error) = self.script.listing_error.lock().unwrap().clone() {
			return Err(error);
		}

		Ok(self.script.entities.lock().unwrap().clone())
	}

	async fn list_groups(&self, _: &mut usize, entity_key: &str) -> Result<Vec<GroupId>> {
		self.script.groups.lock().unwrap().get(entity_key).cloned().unwrap_or_else(|| Ok(Vec::new()))
	}
}

#[derive(Default)]
struct Script {
	entities: Mutex<Vec<RosterEntity>>,
	groups: Mutex<HashMap<String, Result<Vec<GroupId>>>>,
	fail_connect: AtomicBool,
	listing_error: Mutex<Option<Error>>,
	listing_delay: Mutex<Duration>,
	connects: AtomicUsize,
	disconnects: AtomicUsize,
	listings: AtomicUsize,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}

pub fn entity(address: Option<&str>, key: &str, name: &str) -> RosterEntity {
	RosterEntity {
		address: address.map(str::to_owned),
		display_name: Some(name.to_owned()),
		entity_key: Some(key.to_owned()),
		session_id: Some(format!("s{key}")),
	}
}

/// Roster with Alice (groups 6 and 2), Bob (group 3), and Carol (group 9, no address).
pub fn sample_provider() -> ScriptedProvider {
	let provider = ScriptedProvider::new();

	provider.set_entities(vec![
		entity(Some("10.0.0.5"), "11", "Alice"),
		entity(Some("10.0.0.6"), "12", "Bob"),
		entity(None, "13", "Carol"),
	]);
	provider.set_groups("11", &["6", "2"]);
	provider.set_groups("12", &["3"]);
	provider.set_groups("13", &["9"]);

	provider
}

pub fn config(subnets: &str, ttl: Duration) -> AuthorizationConfig {
	AuthorizationConfig::builder()
		.required_groups([6_u64, 9])
		.authorized_subnets(SubnetList::parse(subnets))
		.cache_ttl(ttl)
		.call_timeout(Duration::from_millis(500))
		.shutdown_grace(Duration::from_millis(500))
		.build()
		.expect("valid config")
}

pub fn cache(provider: &ScriptedProvider, subnets: &str) -> AuthorizationCache<ScriptedProvider> {
	let _ = tracing_subscriber::fmt::try_init();

	AuthorizationCache::new(config(subnets, Duration::from_secs(30)), provider.clone())
		.expect("valid cache")
}

/// Counts `WARN` events seen while installed.
#[derive(Clone, Default)]
pub struct WarningCounter {
	count: Arc<AtomicUsize>,
}
impl WarningCounter {
	pub fn count(&self) -> usize {
		self.count.load(Ordering::SeqCst)
	}
}
impl<S> Layer<S> for WarningCounter
where
	S: Subscriber,
{
	fn on_event(&self, event: &Event<'_>, _: Context<'_, S>) {
		if *event.metadata().level() == Level::WARN {
			self.count.fetch_add(1, Ordering::SeqCst);
		}
	}
}
