//! Process-wide ranking cache.
//!
//! A single slot keyed by [`CACHE_KEY`], expiring after a TTL that is checked
//! when read. Concurrent misses share one load instead of each fetching the
//! donation feed: the first caller registers the load under the state lock
//! and every later caller subscribes to its result.
//!
//! Nothing is persisted; a restart starts with an empty cache.

use crate::metrics_defs::{CACHE_HIT, CACHE_JOINED, CACHE_LOAD_DURATION, CACHE_LOAD_FAILED, CACHE_MISS};
use crate::source::SourceError;
use crate::types::RankingSnapshot;
use parking_lot::Mutex;
use shared::{counter, histogram};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

pub const CACHE_KEY: &str = "donors";

/// Longest time an entry is kept. Longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(thiserror::Error, Debug, Clone)]
pub enum CacheError {
    #[error("could not load ranking: {0}")]
    Load(Arc<SourceError>),
    #[error("ranking load ended without a result")]
    Abandoned,
}

pub type LoadResult = Result<Arc<RankingSnapshot>, CacheError>;

struct CacheEntry {
    snapshot: Arc<RankingSnapshot>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct InFlight {
    id: u64,
    result: watch::Receiver<Option<LoadResult>>,
}

#[derive(Default)]
struct CacheState {
    entry: Option<CacheEntry>,
    in_flight: Option<InFlight>,
    next_flight_id: u64,
}

#[derive(Clone)]
pub struct SingleFlightCache {
    state: Arc<Mutex<CacheState>>,
    ttl: Duration,
}

impl SingleFlightCache {
    pub fn new(ttl: Duration) -> Self {
        SingleFlightCache {
            state: Arc::new(Mutex::new(CacheState::default())),
            ttl: ttl.min(MAX_TTL),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached snapshot, or waits for a load.
    ///
    /// With `force_refresh` the cached entry is ignored. `load` is only
    /// called when no load is already running; otherwise the caller joins the
    /// running one, even when refreshing. The load runs on its own task and
    /// finishes even if every caller stops waiting.
    pub async fn get<F, Fut>(&self, force_refresh: bool, load: F) -> LoadResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RankingSnapshot, SourceError>> + Send + 'static,
    {
        let mut result = {
            let mut state = self.state.lock();

            if !force_refresh
                && let Some(entry) = &state.entry
                && entry.is_fresh(Instant::now())
            {
                counter!(CACHE_HIT).increment(1);
                return Ok(entry.snapshot.clone());
            }

            let running = state
                .in_flight
                .as_ref()
                .map(|in_flight| (in_flight.id, in_flight.result.clone()));

            match running {
                Some((id, result)) => {
                    counter!(CACHE_JOINED).increment(1);
                    tracing::debug!(key = CACHE_KEY, flight = id, "joining in-flight load");
                    result
                }
                None => {
                    counter!(CACHE_MISS).increment(1);
                    let id = state.next_flight_id;
                    state.next_flight_id += 1;

                    let (tx, rx) = watch::channel(None);
                    state.in_flight = Some(InFlight {
                        id,
                        result: rx.clone(),
                    });
                    drop(state);

                    tracing::debug!(key = CACHE_KEY, flight = id, force_refresh, "starting load");
                    let flight = Flight {
                        state: self.state.clone(),
                        id,
                        ttl: self.ttl,
                        tx: Some(tx),
                    };
                    tokio::spawn(flight.run(load()));
                    rx
                }
            }
        };

        match result.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or(Err(CacheError::Abandoned)),
            Err(_) => Err(CacheError::Abandoned),
        }
    }

    /// Drops the cached entry. A load that is already running is left alone
    /// and will still store its result.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        if state.entry.take().is_some() {
            tracing::debug!(key = CACHE_KEY, "cache entry invalidated");
        }
    }

    /// Whether a snapshot can currently be served without a load.
    pub fn is_warm(&self) -> bool {
        let state = self.state.lock();
        state
            .entry
            .as_ref()
            .is_some_and(|entry| entry.is_fresh(Instant::now()))
    }
}

/// One running load. Clears the in-flight marker when it finishes, and also
/// when it is dropped without finishing (the load panicked), so that the next
/// caller starts over instead of waiting forever.
struct Flight {
    state: Arc<Mutex<CacheState>>,
    id: u64,
    ttl: Duration,
    tx: Option<watch::Sender<Option<LoadResult>>>,
}

impl Flight {
    async fn run<Fut>(mut self, load: Fut)
    where
        Fut: Future<Output = Result<RankingSnapshot, SourceError>>,
    {
        let started = Instant::now();
        let result = load
            .await
            .map(Arc::new)
            .map_err(|e| CacheError::Load(Arc::new(e)));
        histogram!(CACHE_LOAD_DURATION).record(started.elapsed().as_secs_f64());

        {
            let mut state = self.state.lock();
            self.clear_marker(&mut state);
            match &result {
                Ok(snapshot) => {
                    state.entry = Some(CacheEntry {
                        snapshot: snapshot.clone(),
                        expires_at: Instant::now() + self.ttl,
                    });
                }
                Err(e) => {
                    counter!(CACHE_LOAD_FAILED).increment(1);
                    tracing::error!(key = CACHE_KEY, flight = self.id, error = %e, "ranking load failed");
                }
            }
        }

        if let Some(tx) = self.tx.take() {
            // No receivers left means nobody is waiting; the entry is stored regardless.
            let _ = tx.send(Some(result));
        }
    }

    fn clear_marker(&self, state: &mut CacheState) {
        if state.in_flight.as_ref().is_some_and(|f| f.id == self.id) {
            state.in_flight = None;
        }
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if self.tx.is_some() {
            let mut state = self.state.lock();
            self.clear_marker(&mut state);
        }
    }
}
