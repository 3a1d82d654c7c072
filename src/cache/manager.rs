//! Cache manager owning the authorization snapshot and its refresh lifecycle.

// std
use std::{
	future::Future,
	net::IpAddr,
	sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
// crates.io
use arc_swap::{ArcSwap, ArcSwapOption};
use rand::Rng;
use tokio::{
	sync::{Mutex, MutexGuard},
	task::JoinHandle,
	time,
};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	cache::{
		snapshot::{Authorization, AuthorizedEntry, RefreshSummary, Snapshot, SnapshotBuilder},
		status::CacheStatus,
	},
	config::AuthorizationConfig,
	metrics::{self, CacheMetrics, DecisionSource},
	provider::RosterProvider,
};

/// Answers "is this address authorized?" from an in-memory snapshot refreshed in the background.
///
/// The handle is cheap to clone; all clones share the same snapshot, session, and scheduler.
/// Reads never wait on a refresh: the snapshot is swapped atomically when a cycle succeeds, and
/// a failed cycle leaves the previous snapshot in place.
pub struct AuthorizationCache<P>
where
	P: RosterProvider,
{
	inner: Arc<Inner<P>>,
}
impl<P> AuthorizationCache<P>
where
	P: RosterProvider,
{
	/// Build a cache; nothing is fetched until [`AuthorizationCache::start`] or
	/// [`AuthorizationCache::refresh_now`].
	pub fn new(config: AuthorizationConfig, provider: P) -> Result<Self> {
		config.validate()?;

		Ok(Self {
			inner: Arc::new(Inner {
				config,
				provider,
				snapshot: ArcSwap::from_pointee(Snapshot::empty()),
				refresh: Mutex::new(RefreshSlot { session: None, last_outcome: None }),
				completed_cycles: AtomicU64::new(0),
				created_at: Instant::now(),
				shutdown: CancellationToken::new(),
				scheduler: Mutex::new(None),
				started: AtomicBool::new(false),
				last_error: ArcSwapOption::empty(),
				metrics: CacheMetrics::new(),
			}),
		})
	}

	/// Configuration in effect.
	pub fn config(&self) -> &AuthorizationConfig {
		&self.inner.config
	}

	/// Access the per-cache metrics accumulator.
	pub fn metrics(&self) -> Arc<CacheMetrics> {
		self.inner.metrics.clone()
	}

	/// Perform an initial refresh, then schedule one every `cache_ttl`.
	///
	/// A failed initial refresh is logged and the cache comes up empty. Errors only when no Tokio
	/// runtime is available or the cache was already started.
	pub async fn start(&self) -> Result<()> {
		let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
			Error::Lifecycle(format!("Cannot schedule background refresh: {err}."))
		})?;

		if self.inner.started.swap(true, Ordering::AcqRel) {
			return Err(Error::Lifecycle("Authorization cache already started.".into()));
		}

		tracing::info!(
			cache_ttl = ?self.inner.config.cache_ttl,
			required_groups = ?self.inner.config.required_groups,
			subnets = %self.inner.config.authorized_subnets,
			"starting authorization cache"
		);

		if let Err(err) = self.refresh_now().await {
			tracing::warn!(error = %err, "initial refresh failed; starting with an empty snapshot");
		}

		let task = runtime.spawn(run_scheduler(self.inner.clone()));

		*self.inner.scheduler.lock().await = Some(task);

		tracing::info!("authorization cache started");

		Ok(())
	}

	/// Cancel the scheduler, wait (bounded) for in-flight work, and close the roster session.
	///
	/// Safe to call more than once and after a failed or skipped `start`.
	pub async fn stop(&self) {
		let inner = &self.inner;
		let grace = inner.config.shutdown_grace;

		tracing::info!("stopping authorization cache");

		inner.shutdown.cancel();

		let task = inner.scheduler.lock().await.take();

		if let Some(mut task) = task {
			match time::timeout(grace, &mut task).await {
				Ok(Ok(())) => {},
				Ok(Err(err)) => {
					tracing::warn!(error = %err, "refresh scheduler ended abnormally");
				},
				Err(_) => {
					tracing::warn!(?grace, "refresh scheduler did not stop in time; aborting");

					task.abort();
				},
			}
		}

		match time::timeout(grace, inner.refresh.lock()).await {
			Ok(mut slot) =>
				if let Some(session) = slot.session.take() {
					inner.close_session(session, grace).await;
				},
			Err(_) => {
				tracing::warn!(?grace, "refresh still running after grace period; leaving session");
			},
		}

		tracing::info!("authorization cache stopped");
	}

	/// Force a refresh and wait for it.
	///
	/// When a refresh is already running this waits for it and returns its outcome instead of
	/// starting a second one.
	#[tracing::instrument(skip(self))]
	pub async fn refresh_now(&self) -> Result<RefreshSummary> {
		let inner = &self.inner;

		if inner.shutdown.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let observed = inner.completed_cycles.load(Ordering::Acquire);
		let mut slot = tokio::select! {
			slot = inner.refresh.lock() => slot,
			_ = inner.shutdown.cancelled() => return Err(Error::Cancelled),
		};

		if inner.completed_cycles.load(Ordering::Acquire) != observed
			&& let Some(outcome) = slot.last_outcome.clone()
		{
			tracing::debug!("joined refresh that completed while waiting");

			return outcome;
		}

		inner.run_exclusive(&mut slot).await
	}

	/// Whether the address is authorized by the subnet allowlist or the current snapshot.
	pub fn is_authorized(&self, ip: &str) -> bool {
		self.authorization(ip).is_granted()
	}

	/// Full authorization decision for an address, including the roster identity if any.
	///
	/// Malformed input is logged and denied.
	pub fn authorization(&self, ip: &str) -> Authorization {
		let decision = match parse_ip(ip) {
			None => Authorization::Denied,
			Some(addr) if self.inner.config.authorized_subnets.contains(addr) => {
				tracing::debug!(ip, "authorized via subnet allowlist");

				Authorization::Subnet
			},
			Some(addr) => match self.inner.snapshot.load().get(addr) {
				Some(entry) => {
					tracing::debug!(ip, user = entry.display_name(), "authorized via roster");

					Authorization::Roster(entry.clone())
				},
				None => {
					tracing::debug!(ip, "not authorized");

					Authorization::Denied
				},
			},
		};
		let source = match decision {
			Authorization::Denied => DecisionSource::Denied,
			Authorization::Subnet => DecisionSource::Subnet,
			Authorization::Roster(_) => DecisionSource::Roster,
		};

		self.inner.metrics.record_decision(source);
		metrics::record_decision(source);

		decision
	}

	/// Roster identity for an address; subnet-only grants have none.
	pub fn get_user_info(&self, ip: &str) -> Option<AuthorizedEntry> {
		let addr = parse_ip(ip)?;

		self.inner.snapshot.load().get(addr).cloned()
	}

	/// Addresses in the current snapshot; subnet grants are not enumerated.
	pub fn all_authorized_ips(&self) -> Vec<IpAddr> {
		self.inner.snapshot.load().ips()
	}

	/// Number of addresses in the current snapshot.
	pub fn authorized_count(&self) -> usize {
		self.inner.snapshot.load().len()
	}

	/// Current snapshot.
	pub fn snapshot(&self) -> Arc<Snapshot> {
		self.inner.snapshot.load_full()
	}

	/// Time since the last successful refresh, or since construction if none succeeded yet.
	pub fn cache_age(&self) -> Duration {
		self.inner.cache_age(&self.inner.snapshot.load())
	}

	/// Status projection for health reporting.
	pub fn status(&self) -> CacheStatus {
		let inner = &self.inner;
		let snapshot = inner.snapshot.load_full();
		let last_error = inner.last_error.load_full().map(|message| message.as_ref().clone());

		CacheStatus::from_components(
			&snapshot,
			inner.cache_age(&snapshot),
			inner.config.cache_ttl,
			inner.metrics.snapshot(),
			last_error,
		)
	}
}
impl<P> Clone for AuthorizationCache<P>
where
	P: RosterProvider,
{
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}

struct Inner<P>
where
	P: RosterProvider,
{
	config: AuthorizationConfig,
	provider: P,
	snapshot: ArcSwap<Snapshot>,
	// Holding this lock is the refresh exclusion; the session lives behind it.
	refresh: Mutex<RefreshSlot<P::Session>>,
	completed_cycles: AtomicU64,
	created_at: Instant,
	shutdown: CancellationToken,
	scheduler: Mutex<Option<JoinHandle<()>>>,
	started: AtomicBool,
	last_error: ArcSwapOption<String>,
	metrics: Arc<CacheMetrics>,
}
impl<P> Inner<P>
where
	P: RosterProvider,
{
	fn cache_age(&self, snapshot: &Snapshot) -> Duration {
		let since = snapshot.refreshed_at().unwrap_or(self.created_at);

		Instant::now().saturating_duration_since(since)
	}

	/// Run one cycle while holding the refresh exclusion and record its outcome.
	async fn run_exclusive(&self, slot: &mut RefreshSlot<P::Session>) -> Result<RefreshSummary> {
		let outcome = tokio::select! {
			outcome = self.cycle(&mut slot.session) => outcome,
			_ = self.shutdown.cancelled() => Err(Error::Cancelled),
		};

		match &outcome {
			Ok(summary) => {
				self.metrics.record_refresh_success(summary.elapsed);
				metrics::record_refresh_success(summary.elapsed, summary.authorized);
				self.last_error.store(None);

				tracing::info!(
					authorized = summary.authorized,
					seen = summary.entities_seen,
					skipped = summary.entities_skipped,
					lookup_failures = summary.group_lookup_failures,
					elapsed = ?summary.elapsed,
					"updated authorized users"
				);
			},
			Err(Error::Cancelled) => {
				tracing::warn!("refresh abandoned during shutdown");
			},
			Err(err) => {
				self.metrics.record_refresh_error();
				metrics::record_refresh_error();
				self.last_error.store(Some(Arc::new(err.to_string())));

				tracing::error!(error = %err, "failed to update authorized users; keeping previous snapshot");
			},
		}

		slot.last_outcome = Some(outcome.clone());
		self.completed_cycles.fetch_add(1, Ordering::AcqRel);

		outcome
	}

	async fn cycle(&self, session_slot: &mut Option<P::Session>) -> Result<RefreshSummary> {
		let started = Instant::now();
		// The session stays out of the slot while commands are in flight. If this future is
		// dropped mid-reply the session goes with it and the next cycle reconnects.
		let mut session = match session_slot.take() {
			Some(session) => session,
			None => self.call("connect", self.provider.connect()).await?,
		};
		let (snapshot, mut summary) = match self.collect(&mut session).await {
			Ok(built) => built,
			Err(err) => {
				tracing::debug!("dropping roster session; next refresh reconnects");

				self.close_session(session, self.config.call_timeout).await;

				return Err(err);
			},
		};

		*session_slot = Some(session);
		summary.elapsed = started.elapsed();

		self.snapshot.store(Arc::new(snapshot));

		Ok(summary)
	}

	async fn collect(&self, session: &mut P::Session) -> Result<(Snapshot, RefreshSummary)> {
		let entities = self.call("list_entities", self.provider.list_entities(session)).await?;
		let mut builder = SnapshotBuilder::new(&self.config.required_groups);

		for entity in &entities {
			let Some(candidate) = builder.admit(entity) else {
				continue;
			};
			let groups =
				match self.call("list_groups", self.provider.list_groups(session, &candidate.key)).await
				{
					Ok(groups) => groups,
					Err(err) if err.is_session_fatal() => return Err(err),
					Err(err) => {
						tracing::warn!(
							entity = %candidate.key,
							error = %err,
							"group lookup failed; treating client as having no groups"
						);

						builder.record_lookup_failure();

						Vec::new()
					},
				};

			builder.insert(entity, candidate, groups);
		}

		Ok(builder.finish(Instant::now(), Utc::now()))
	}

	async fn call<T, F>(&self, operation: &'static str, future: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let after = self.config.call_timeout;

		time::timeout(after, future).await.map_err(|_| Error::Timeout { operation, after })?
	}

	async fn close_session(&self, session: P::Session, budget: Duration) {
		match time::timeout(budget, self.provider.disconnect(session)).await {
			Ok(Ok(())) => {},
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "error while disconnecting roster session");
			},
			Err(_) => {
				tracing::warn!(?budget, "roster disconnect timed out");
			},
		}
	}
}

struct RefreshSlot<S> {
	session: Option<S>,
	last_outcome: Option<Result<RefreshSummary>>,
}

async fn run_scheduler<P>(inner: Arc<Inner<P>>)
where
	P: RosterProvider,
{
	loop {
		let delay = inner.config.cache_ttl.saturating_add(random_jitter(inner.config.refresh_jitter));

		tokio::select! {
			_ = inner.shutdown.cancelled() => break,
			_ = time::sleep(delay) => {},
		}

		let slot: Option<MutexGuard<'_, RefreshSlot<P::Session>>> = inner.refresh.try_lock().ok();

		match slot {
			// Failures are logged and recorded inside; the loop keeps going.
			Some(mut slot) => {
				let _ = inner.run_exclusive(&mut slot).await;
			},
			None => {
				tracing::debug!("refresh already in progress; skipping scheduled tick");
			},
		}
	}

	tracing::debug!("refresh scheduler stopped");
}

fn parse_ip(ip: &str) -> Option<IpAddr> {
	match ip.trim().parse::<IpAddr>() {
		Ok(addr) => Some(addr.to_canonical()),
		Err(err) => {
			tracing::warn!(ip, error = %err, "invalid address in authorization query");

			None
		},
	}
}

fn random_jitter(max: Duration) -> Duration {
	if max.is_zero() {
		return Duration::ZERO;
	}

	let mut rng = rand::rng();
	let jitter = rng.random_range(0.0..=max.as_secs_f64());

	Duration::from_secs_f64(jitter)
}
