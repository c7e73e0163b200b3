//! # Snapshot Cache
//!
//! Stale-while-revalidate cache for whole index snapshots. Each key moves
//! through four states:
//!
//! ```text
//!            load ok                ttl elapsed
//!   Empty ───────────▶ Fresh ───────────────────▶ Stale
//!                        ▲                          │ first reader
//!                        │       refresh ok         ▼ spawns refresh
//!                        └──────────────────── Refreshing
//! ```
//!
//! - `Fresh` and `Refreshing` serve the cached snapshot without touching the
//!   provider.
//! - `Stale` serves the cached snapshot and spawns exactly one refresh.
//! - `Empty` has nothing to serve, so every caller awaits the same load.
//!
//! The per-key mutex only guards the state transition; loads run on spawned
//! tasks, so a caller that goes away never cancels a load other callers
//! depend on. A failed refresh keeps the previous snapshot. After a rate-limit
//! error no load is started for that key until the provider's reset time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::error::ProviderError;

type SharedLoad<V> = Shared<BoxFuture<'static, Result<Arc<V>, ProviderError>>>;

/// Observable state of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Nothing cached yet; a first load may be in flight.
    Empty,
    Fresh,
    /// Cached value is older than the TTL and no refresh is running.
    Stale,
    /// Cached value is being served while one refresh runs.
    Refreshing,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Empty => "empty",
            EntryState::Fresh => "fresh",
            EntryState::Stale => "stale",
            EntryState::Refreshing => "refreshing",
        }
    }
}

struct Snapshot<V> {
    value: Arc<V>,
    fetched_at: Instant,
}

struct Slot<V> {
    value: Option<Snapshot<V>>,
    in_flight: Option<SharedLoad<V>>,
    retry_not_before: Option<Instant>,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            value: None,
            in_flight: None,
            retry_not_before: None,
        }
    }
}

impl<V> Slot<V> {
    fn state(&self, now: Instant, ttl: Duration) -> EntryState {
        match (&self.value, self.in_flight.is_some()) {
            (None, _) => EntryState::Empty,
            (Some(_), true) => EntryState::Refreshing,
            (Some(snapshot), false) if now.duration_since(snapshot.fetched_at) < ttl => {
                EntryState::Fresh
            }
            (Some(_), false) => EntryState::Stale,
        }
    }

    fn cached(&self) -> Option<Arc<V>> {
        self.value.as_ref().map(|snapshot| Arc::clone(&snapshot.value))
    }

    fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        self.retry_not_before
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

/// Keyed stale-while-revalidate cache with single-flight loads.
pub struct SnapshotCache<V> {
    ttl: Duration,
    load_timeout: Duration,
    slots: RwLock<HashMap<String, Arc<Mutex<Slot<V>>>>>,
}

impl<V> SnapshotCache<V>
where
    V: Send + Sync + 'static,
{
    /// Creates a cache whose entries go stale after `ttl` and whose loads are
    /// abandoned after `load_timeout`.
    pub fn new(ttl: Duration, load_timeout: Duration) -> Self {
        Self {
            ttl,
            load_timeout,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Current state of `key`.
    pub fn state(&self, key: &str) -> EntryState {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        match slots.get(key) {
            Some(slot) => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .state(Instant::now(), self.ttl),
            None => EntryState::Empty,
        }
    }

    /// Returns the snapshot for `key`, loading it with `loader` when needed.
    ///
    /// `loader` is only invoked when this call is the one that starts a load;
    /// callers that join an in-flight load or get a cached value never run it.
    ///
    /// # Errors
    ///
    /// Fails only when nothing is cached: with the load's error, with
    /// [`ProviderError::Unavailable`] if the load timed out, or with
    /// [`ProviderError::RateLimited`] while backing off.
    pub async fn get_or_refresh<F, Fut>(&self, key: &str, loader: F) -> Result<Arc<V>, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ProviderError>> + Send + 'static,
    {
        let slot = self.slot(key);

        let pending = {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();

            match (guard.state(now, self.ttl), guard.cached()) {
                (EntryState::Fresh | EntryState::Refreshing, Some(value)) => return Ok(value),
                (EntryState::Stale, Some(value)) => {
                    match guard.backoff_remaining(now) {
                        Some(remaining) => {
                            debug!(key, retry_in_secs = remaining.as_secs(), "Serving stale snapshot while rate limited");
                        }
                        None => {
                            debug!(key, "Serving stale snapshot and refreshing in background");
                            let load = self.start_load(key, Arc::clone(&slot), &mut guard, loader);
                            tokio::spawn(load);
                        }
                    }
                    return Ok(value);
                }
                _ => match guard.in_flight.clone() {
                    Some(in_flight) => in_flight,
                    None => {
                        if let Some(retry_after) = guard.backoff_remaining(now) {
                            return Err(ProviderError::RateLimited { retry_after });
                        }
                        debug!(key, "Cache empty; loading snapshot");
                        let load = self.start_load(key, Arc::clone(&slot), &mut guard, loader);
                        tokio::spawn(load.clone());
                        load
                    }
                },
            }
        };

        pending.await
    }

    fn slot(&self, key: &str) -> Arc<Mutex<Slot<V>>> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    /// Builds the shared load future and records it as in flight.
    fn start_load<F, Fut>(
        &self,
        key: &str,
        slot: Arc<Mutex<Slot<V>>>,
        guard: &mut Slot<V>,
        loader: F,
    ) -> SharedLoad<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ProviderError>> + Send + 'static,
    {
        let timeout = self.load_timeout;
        let key = key.to_string();
        let load = loader();

        let future = async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, load).await {
                Ok(Ok(value)) => Ok(Arc::new(value)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ProviderError::Unavailable(format!(
                    "snapshot load timed out after {}s",
                    timeout.as_secs()
                ))),
            };

            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.in_flight = None;
            match &result {
                Ok(value) => {
                    slot.value = Some(Snapshot {
                        value: Arc::clone(value),
                        fetched_at: Instant::now(),
                    });
                    slot.retry_not_before = None;
                    info!(key = %key, elapsed_ms = started.elapsed().as_millis() as u64, "Snapshot refreshed");
                }
                Err(ProviderError::RateLimited { retry_after }) => {
                    slot.retry_not_before = Some(Instant::now() + *retry_after);
                    warn!(key = %key, retry_after_secs = retry_after.as_secs(), "Snapshot load rate limited; backing off");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, retryable = e.is_retryable(), stale_available = slot.value.is_some(), "Snapshot load failed");
                }
            }
            result
        }
        .boxed()
        .shared();

        guard.in_flight = Some(future.clone());
        future
    }
}
