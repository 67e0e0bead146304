//! In-process cache for query results.
//!
//! Entries are keyed by a SHA-256 over the query text and its canonicalized
//! parameters, so `{a: 1, b: 2}` and `{b: 2, a: 1}` share a key. Each entry
//! carries its own TTL; an expired entry is never returned and is dropped
//! when it is next looked up or by the background sweep.
//!
//! Capacity is bounded. Inserting a new key into a full cache evicts the
//! entry with the oldest insertion time (FIFO by age; reads do not refresh
//! an entry).
//!
//! ```text
//! set(q, data) ──▶ [ key = sha256(q ‖ canonical(params)) ] ──▶ entries
//!                                                              │
//!     get(q) ◀── hit if age <= ttl ◀───────────────────────────┤
//!                                                              │
//!     sweeper (every sweep_interval) ── drops expired ─────────┘
//! ```
//!
//! Payloads are JSON values. A payload that carries `metadata.table` (or a
//! `metadata.tables` array for results read from several tables) can be
//! dropped with [`QueryCache::invalidate_by_table`] when one of them changes.

use regex::RegexBuilder;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::Result;

struct CacheEntry {
    query: String,
    data: Value,
    inserted_at: Instant,
    /// Tie-breaker for entries inserted within the same clock tick.
    seq: u64,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct QueryCache {
    state: Mutex<CacheState>,
    max_size: usize,
    default_ttl: Duration,
    sweep_interval: Duration,
}

/// Stable hex key for a query and its parameters.
pub fn cache_key(query: &str, params: Option<&Value>) -> String {
    let canonical = params.map(canonicalize).unwrap_or(Value::Null);
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuild `value` with object keys sorted at every level.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize(&map[k.as_str()]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn reads_table(payload: &Value, table: &str) -> bool {
    let Some(meta) = payload.get("metadata") else {
        return false;
    };
    if meta.get("table").and_then(Value::as_str) == Some(table) {
        return true;
    }
    meta.get("tables")
        .and_then(Value::as_array)
        .is_some_and(|tables| tables.iter().any(|t| t.as_str() == Some(table)))
}

impl QueryCache {
    pub fn new(max_size: usize, default_ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_size: max_size.max(1),
            default_ttl,
            sweep_interval,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, config.default_ttl(), config.sweep_interval())
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `data` for `(query, params)`, evicting the oldest entry when full.
    pub fn set(&self, query: &str, data: Value, ttl: Option<Duration>, params: Option<&Value>) {
        let key = cache_key(query, params);
        let mut state = self.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.inserted_at, e.seq))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                state.evictions += 1;
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            CacheEntry {
                query: query.to_string(),
                data,
                inserted_at: Instant::now(),
                seq,
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
    }

    /// Cached data for `(query, params)`, or `None` on a miss.
    ///
    /// An expired entry counts as a miss and is removed.
    pub fn get(&self, query: &str, params: Option<&Value>) -> Option<Value> {
        let key = cache_key(query, params);
        let now = Instant::now();
        let mut state = self.lock();

        match state.entries.get(&key).map(|e| e.is_expired(now)) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(true) => {
                state.entries.remove(&key);
                state.misses += 1;
                return None;
            }
            Some(false) => {}
        }

        state.hits += 1;
        state.entries.get(&key).map(|e| e.data.clone())
    }

    /// Return the cached value or compute, store, and return it.
    pub async fn get_or_insert_with<F, Fut, E>(
        &self,
        query: &str,
        params: Option<&Value>,
        ttl: Option<Duration>,
        compute: F,
    ) -> std::result::Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
    {
        if let Some(hit) = self.get(query, params) {
            return Ok(hit);
        }
        let value = compute().await?;
        self.set(query, value.clone(), ttl, params);
        Ok(value)
    }

    /// Remove entries; with a pattern, only those whose key or query text
    /// matches it (case-insensitive regex). Returns the number removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> Result<usize> {
        let mut state = self.lock();
        let before = state.entries.len();

        match pattern {
            None => state.entries.clear(),
            Some(p) => {
                let re = RegexBuilder::new(p).case_insensitive(true).build()?;
                state
                    .entries
                    .retain(|key, e| !(re.is_match(key) || re.is_match(&e.query)));
            }
        }

        Ok(before - state.entries.len())
    }

    /// Remove entries whose payload names `table` in `metadata.table` or
    /// `metadata.tables`.
    pub fn invalidate_by_table(&self, table: &str) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, e| !reads_table(&e.data, table));
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(table, removed, "invalidated cached results");
        }
        removed
    }

    /// Drop every entry older than its own TTL. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, e| !e.is_expired(now));
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    /// Spawn the periodic sweep on the current tokio runtime.
    ///
    /// The task runs until [`SweepHandle::stop`] is called or the handle
    /// is dropped.
    pub fn start_sweeper(self: &Arc<Self>) -> SweepHandle {
        let (tx, mut rx) = oneshot::channel::<()>();
        let cache = Arc::clone(self);
        let period = self.sweep_interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(removed, "cache sweep removed expired entries");
                        }
                    }
                    _ = &mut rx => break,
                }
            }
        });

        SweepHandle {
            shutdown: Some(tx),
            task,
        }
    }
}

/// Running background sweep; stop it for a clean shutdown.
pub struct SweepHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
