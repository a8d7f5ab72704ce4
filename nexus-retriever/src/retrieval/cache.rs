//! Query cache with single-flight coalescing.
//!
//! Results are stored as JSON in a [`CacheBackend`] under
//! `retrieval:v1:<blake3 of the normalized request>`. Concurrent requests for
//! the same key share one computation: the first caller runs the pipeline and
//! the others wait for its result instead of starting their own.
//!
//! Entries expire by TTL only. Re-ingesting a document does not evict cached
//! results that mention it; [`QueryCache::clear`] drops everything.

use crate::error::RetrievalError;
use crate::retrieval::model::{RetrievalResult, RetrieveOptions};
use crate::storage::CacheBackend;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub const KEY_PREFIX: &str = "retrieval:v1:";

#[derive(Serialize)]
struct KeyMaterial<'a> {
    query: String,
    max_tokens: Option<usize>,
    strategy: Option<&'a str>,
    include_full_document: bool,
    content_types: Vec<&'a str>,
}

/// Cache key for a request. Queries differing only in case or whitespace and
/// content type lists differing only in order share a key.
pub fn cache_key(query: &str, options: &RetrieveOptions) -> String {
    let mut content_types: Vec<&str> = options.content_types.iter().map(|c| c.as_str()).collect();
    content_types.sort_unstable();
    content_types.dedup();

    let material = KeyMaterial {
        query: query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
        max_tokens: options.max_tokens,
        strategy: options.strategy.as_ref().map(|s| s.as_str()),
        include_full_document: options.include_full_document,
        content_types,
    };
    // Serializing a struct of strings and integers cannot fail.
    let encoded = serde_json::to_vec(&material).unwrap_or_default();
    format!("{KEY_PREFIX}{}", hex::encode(blake3::hash(&encoded).as_bytes()))
}

/// Counters of cache activity since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Requests that waited on another caller's computation
    pub coalesced: u64,
}

type Flight = Arc<OnceCell<RetrievalResult>>;
type InFlight = Mutex<HashMap<String, Flight>>;

/// One caller's membership in a flight. The last member to leave, whether it
/// finished or was cancelled, removes the flight from the map.
struct FlightGuard<'a> {
    in_flight: &'a InFlight,
    key: &'a str,
    cell: Flight,
}

impl<'a> FlightGuard<'a> {
    fn join(in_flight: &'a InFlight, key: &'a str) -> Self {
        let cell = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();
        Self {
            in_flight,
            key,
            cell,
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // Members only clone the cell under this lock: the map's handle plus
        // ours means nobody else is waiting.
        let last = in_flight
            .get(self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.cell))
            && Arc::strong_count(&self.cell) == 2;
        if last {
            in_flight.remove(self.key);
        }
    }
}

pub struct QueryCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    in_flight: InFlight,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl QueryCache {
    /// Wrap `backend`, failing when it cannot be reached.
    pub async fn connect(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Result<Self, RetrievalError> {
        if let Err(e) = backend.ping().await {
            let endpoint = backend.endpoint();
            return Err(RetrievalError::CacheUnavailable {
                host: endpoint.host,
                port: endpoint.port,
                status: format!("{e:#}"),
            });
        }
        Ok(Self {
            backend,
            ttl,
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        })
    }

    async fn lookup(&self, key: &str) -> Option<RetrievalResult> {
        let cached = match self.backend.get(key).await {
            Ok(cached) => cached?,
            Err(e) => {
                warn!("Cache read failed for {}: {:#}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&cached) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", key, e);
                None
            }
        }
    }

    async fn store(&self, key: &str, result: &RetrievalResult) {
        let encoded = match serde_json::to_string(result) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode result for caching: {}", e);
                return;
            }
        };
        if let Err(e) = self.backend.set(key, encoded, self.ttl).await {
            warn!("Cache write failed for {}: {:#}", key, e);
        }
    }

    /// Return the cached result for `key`, or compute, cache and return it.
    ///
    /// At most one `compute` runs per key at a time. When it fails, the
    /// error goes to the caller that ran it and waiting callers try again.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<RetrievalResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RetrievalResult>>,
    {
        if let Some(hit) = self.lookup(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {}", key);
            return Ok(hit);
        }

        let flight = FlightGuard::join(&self.in_flight, key);
        let computed = AtomicBool::new(false);
        let ran = &computed;
        let outcome = flight
            .cell
            .get_or_try_init(move || async move {
                ran.store(true, Ordering::Relaxed);
                // Another caller may have finished between our lookup and
                // registering the cell.
                if let Some(hit) = self.lookup(key).await {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(hit);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                let result = compute().await?;
                self.store(key, &result).await;
                Ok::<_, anyhow::Error>(result)
            })
            .await
            .cloned();

        if outcome.is_ok() && !computed.load(Ordering::Relaxed) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!("Coalesced with in-flight request for {}", key);
        }
        outcome
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }

    /// Drop every cached retrieval result. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        self.backend.clear(KEY_PREFIX).await
    }
}
