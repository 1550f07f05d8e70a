use crate::fingerprint::fingerprint;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pressroom_core::{EngineConfig, PressroomError, PressroomResult};
use pressroom_metrics::MetricsRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type SharedResult = Result<Value, Arc<PressroomError>>;

/// How a successful [`ResultCache::get_or_compute`] call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Served from a stored, unexpired entry.
    Hit,
    /// Served from a computation another caller had in flight.
    Coalesced,
    /// Computed by this caller and stored.
    Miss,
}

impl CacheOutcome {
    /// True for both stored and coalesced hits.
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit | CacheOutcome::Coalesced)
    }
}

/// One stored result.
#[derive(Debug, Clone)]
struct CacheEntry {
    step: String,
    value: Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    deadline: Instant,
    hit_count: u64,
    last_hit_at: Option<DateTime<Utc>>,
    last_access: u64,
}

impl CacheEntry {
    fn new(step: &str, value: Value, ttl: Duration, access: u64) -> Self {
        let created_at = Utc::now();
        Self {
            step: step.to_string(),
            value,
            created_at,
            expires_at: chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|d| created_at.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            deadline: far_deadline(ttl),
            hit_count: 0,
            last_hit_at: None,
            last_access: access,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

fn far_deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .unwrap_or_else(|| now + Duration::from_secs(u64::from(u32::MAX)))
}

enum Slot {
    Ready(CacheEntry),
    Pending {
        rx: watch::Receiver<Option<SharedResult>>,
        previous: Option<CacheEntry>,
    },
}

/// Read-only view of an entry, expired or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryInfo {
    /// Entry fingerprint.
    pub fingerprint: String,
    /// Step that produced the value.
    pub step: String,
    /// Stored value.
    pub value: Value,
    /// When the value was stored.
    pub created_at: DateTime<Utc>,
    /// When the value stops being served.
    pub expires_at: DateTime<Utc>,
    /// Number of hits served.
    pub hit_count: u64,
    /// Time of the last hit.
    pub last_hit_at: Option<DateTime<Utc>>,
    /// Whether the entry is past its expiry.
    pub expired: bool,
}

/// Counters and sizes for one cache instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Stored entries, including expired ones not yet evicted.
    pub entries: usize,
    /// Stored entries past their expiry.
    pub expired_entries: usize,
    /// Fingerprints currently being computed.
    pub in_flight: usize,
    /// Hits served from stored entries.
    pub hits: u64,
    /// Hits served by waiting on another caller's computation.
    pub coalesced_hits: u64,
    /// Computations started.
    pub misses: u64,
    /// Failed computations, counted once per caller that received the failure.
    pub errors: u64,
    /// Entries removed by the size bound.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served without computing, 0 when idle.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    coalesced_hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
    access: AtomicU64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    fingerprint: String,
    step: String,
    value: Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    hit_count: u64,
    last_hit_at: Option<DateTime<Utc>>,
}

/// Content-addressed memoization of step results.
///
/// At most one computation runs per fingerprint at a time; concurrent callers
/// with the same key wait for it and share its outcome. Failures are handed
/// to every waiter and never stored. The table lock is never held across an
/// `.await`.
pub struct ResultCache {
    slots: Mutex<HashMap<String, Slot>>,
    max_entries: usize,
    counters: Counters,
    metrics: Arc<MetricsRegistry>,
}

enum Lookup {
    Hit(Value),
    Wait(watch::Receiver<Option<SharedResult>>),
    Compute(watch::Sender<Option<SharedResult>>),
}

/// Releases a pending slot if the computing caller goes away without
/// completing (cancelled future or panic).
struct InFlight<'a> {
    cache: &'a ResultCache,
    fingerprint: String,
    step: String,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cache.restore_previous(&self.fingerprint);
        warn!(
            fingerprint = %self.fingerprint,
            step = %self.step,
            "Cache computation abandoned"
        );
    }
}

impl ResultCache {
    /// Create a cache holding at most `max_entries` stored results.
    pub fn new(max_entries: usize, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            counters: Counters::default(),
            metrics,
        }
    }

    /// Create a cache sized from the engine configuration.
    pub fn from_config(config: &EngineConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self::new(config.cache_max_entries, metrics)
    }

    /// Return the stored value for `key_parts`, or run `compute` and store
    /// its result for `ttl`.
    ///
    /// `step` tags the metrics. A failed computation yields
    /// [`PressroomError::CacheCompute`] wrapping the cause; it is not cached
    /// and any previous (expired) entry stays in place.
    pub async fn get_or_compute<F, Fut>(
        &self,
        step: &str,
        key_parts: &Value,
        ttl: Duration,
        compute: F,
    ) -> PressroomResult<(Value, CacheOutcome)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PressroomResult<Value>>,
    {
        let fp = fingerprint(key_parts);

        match self.lookup(&fp) {
            Lookup::Hit(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .increment("cache.hits", &[("step", step), ("source", "stored")]);
                debug!(step, fingerprint = %fp, "Cache hit");
                Ok((value, CacheOutcome::Hit))
            }
            Lookup::Wait(rx) => self.wait(step, fp, rx).await,
            Lookup::Compute(tx) => self.compute(step, fp, ttl, tx, compute).await,
        }
    }

    fn lookup(&self, fp: &str) -> Lookup {
        let now = Instant::now();
        let access = self.next_access();
        let mut slots = self.slots.lock();

        match slots.get_mut(fp) {
            Some(Slot::Ready(entry)) if !entry.is_expired(now) => {
                entry.hit_count += 1;
                entry.last_hit_at = Some(Utc::now());
                entry.last_access = access;
                return Lookup::Hit(entry.value.clone());
            }
            Some(Slot::Pending { rx, .. }) => return Lookup::Wait(rx.clone()),
            _ => {}
        }

        let previous = match slots.remove(fp) {
            Some(Slot::Ready(entry)) => Some(entry),
            _ => None,
        };
        let (tx, rx) = watch::channel(None);
        slots.insert(fp.to_string(), Slot::Pending { rx, previous });
        Lookup::Compute(tx)
    }

    async fn wait(
        &self,
        step: &str,
        fp: String,
        mut rx: watch::Receiver<Option<SharedResult>>,
    ) -> PressroomResult<(Value, CacheOutcome)> {
        debug!(step, fingerprint = %fp, "Waiting on in-flight computation");
        let shared = match rx.wait_for(Option::is_some).await {
            Ok(result) => result.clone(),
            Err(_) => None,
        };

        match shared {
            Some(Ok(value)) => {
                self.counters.coalesced_hits.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .increment("cache.hits", &[("step", step), ("source", "coalesced")]);
                Ok((value, CacheOutcome::Coalesced))
            }
            Some(Err(source)) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment("cache.errors", &[("step", step)]);
                Err(PressroomError::CacheCompute {
                    fingerprint: fp,
                    source,
                })
            }
            None => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment("cache.errors", &[("step", step)]);
                Err(PressroomError::Cache(format!(
                    "computation for {fp} was abandoned before completing"
                )))
            }
        }
    }

    async fn compute<F, Fut>(
        &self,
        step: &str,
        fp: String,
        ttl: Duration,
        tx: watch::Sender<Option<SharedResult>>,
        compute: F,
    ) -> PressroomResult<(Value, CacheOutcome)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PressroomResult<Value>>,
    {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.metrics.increment("cache.misses", &[("step", step)]);
        debug!(step, fingerprint = %fp, "Cache miss, computing");

        let mut guard = InFlight {
            cache: self,
            fingerprint: fp.clone(),
            step: step.to_string(),
            armed: true,
        };
        let result = compute().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                let entry = CacheEntry::new(step, value.clone(), ttl, self.next_access());
                {
                    let mut slots = self.slots.lock();
                    slots.insert(fp.clone(), Slot::Ready(entry));
                    self.evict_over_capacity(&mut slots);
                    self.metrics
                        .set_gauge("cache.entries", &[], Self::ready_count(&slots) as f64);
                }
                tx.send_replace(Some(Ok(value.clone())));
                Ok((value, CacheOutcome::Miss))
            }
            Err(err) => {
                self.restore_previous(&fp);
                let source = Arc::new(err);
                tx.send_replace(Some(Err(Arc::clone(&source))));
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment("cache.errors", &[("step", step)]);
                warn!(step, fingerprint = %fp, error = %source, "Cache computation failed");
                Err(PressroomError::CacheCompute {
                    fingerprint: fp,
                    source,
                })
            }
        }
    }

    /// Replace a pending slot with the entry it superseded, if any.
    fn restore_previous(&self, fp: &str) {
        let mut slots = self.slots.lock();
        if let Some(Slot::Pending { previous, .. }) = slots.remove(fp) {
            if let Some(entry) = previous {
                slots.insert(fp.to_string(), Slot::Ready(entry));
            }
        }
    }

    fn next_access(&self) -> u64 {
        self.counters.access.fetch_add(1, Ordering::Relaxed)
    }

    fn ready_count(slots: &HashMap<String, Slot>) -> usize {
        slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Evict expired entries (oldest expiry first), then least recently used.
    fn evict_over_capacity(&self, slots: &mut HashMap<String, Slot>) {
        let now = Instant::now();
        let mut ready = Self::ready_count(slots);

        while ready > self.max_entries {
            let expired = slots
                .iter()
                .filter_map(|(fp, slot)| match slot {
                    Slot::Ready(e) if e.is_expired(now) => Some((fp, e.deadline)),
                    _ => None,
                })
                .min_by_key(|(_, deadline)| *deadline)
                .map(|(fp, _)| fp.clone());

            let victim = expired.or_else(|| {
                slots
                    .iter()
                    .filter_map(|(fp, slot)| match slot {
                        Slot::Ready(e) => Some((fp, e.last_access)),
                        _ => None,
                    })
                    .min_by_key(|(_, access)| *access)
                    .map(|(fp, _)| fp.clone())
            });

            let Some(victim) = victim else { break };
            slots.remove(&victim);
            ready -= 1;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            self.metrics.increment("cache.evictions", &[]);
            debug!(fingerprint = %victim, "Cache entry evicted");
        }
    }

    /// Look at the entry for `key_parts` without serving it, expired or not.
    pub fn inspect(&self, key_parts: &Value) -> Option<CacheEntryInfo> {
        self.inspect_fingerprint(&fingerprint(key_parts))
    }

    /// Look at the entry stored under a fingerprint.
    pub fn inspect_fingerprint(&self, fp: &str) -> Option<CacheEntryInfo> {
        let now = Instant::now();
        let slots = self.slots.lock();
        let entry = match slots.get(fp)? {
            Slot::Ready(entry) => entry,
            Slot::Pending { previous, .. } => previous.as_ref()?,
        };
        Some(CacheEntryInfo {
            fingerprint: fp.to_string(),
            step: entry.step.clone(),
            value: entry.value.clone(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            hit_count: entry.hit_count,
            last_hit_at: entry.last_hit_at,
            expired: entry.is_expired(now),
        })
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready(entry) => !entry.is_expired(now),
            Slot::Pending { .. } => true,
        });
        let removed = before - slots.len();
        self.metrics
            .set_gauge("cache.entries", &[], Self::ready_count(&slots) as f64);
        if removed > 0 {
            info!(removed, "Purged expired cache entries");
        }
        removed
    }

    /// Drop every stored entry. In-flight computations are left alone.
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| matches!(slot, Slot::Pending { .. }));
        let removed = before - slots.len();
        self.metrics.set_gauge("cache.entries", &[], 0.0);
        info!(removed, "Cache cleared");
        removed
    }

    /// Current sizes and lifetime counters.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let slots = self.slots.lock();
        let mut stats = CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            coalesced_hits: self.counters.coalesced_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            ..CacheStats::default()
        };
        for slot in slots.values() {
            match slot {
                Slot::Ready(entry) => {
                    stats.entries += 1;
                    if entry.is_expired(now) {
                        stats.expired_entries += 1;
                    }
                }
                Slot::Pending { .. } => stats.in_flight += 1,
            }
        }
        stats
    }

    /// Write every unexpired entry to `path` as JSON.
    pub async fn save_snapshot(&self, path: &Path) -> PressroomResult<usize> {
        let entries: Vec<PersistedEntry> = {
            let now = Instant::now();
            let slots = self.slots.lock();
            slots
                .iter()
                .filter_map(|(fp, slot)| match slot {
                    Slot::Ready(e) if !e.is_expired(now) => Some(PersistedEntry {
                        fingerprint: fp.clone(),
                        step: e.step.clone(),
                        value: e.value.clone(),
                        created_at: e.created_at,
                        expires_at: e.expires_at,
                        hit_count: e.hit_count,
                        last_hit_at: e.last_hit_at,
                    }),
                    _ => None,
                })
                .collect()
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(path, json).await?;

        info!(path = %path.display(), entries = entries.len(), "Cache snapshot saved");
        Ok(entries.len())
    }

    /// Load entries written by [`ResultCache::save_snapshot`].
    ///
    /// Entries already past their expiry are dropped, and existing entries
    /// for the same fingerprint are kept. Returns how many were loaded.
    pub async fn load_snapshot(&self, path: &Path) -> PressroomResult<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        let persisted: Vec<PersistedEntry> = serde_json::from_str(&content)?;

        let wall_now = Utc::now();
        let now = Instant::now();
        let mut loaded = 0;
        let mut slots = self.slots.lock();
        for p in persisted {
            let Ok(remaining) = (p.expires_at - wall_now).to_std() else {
                continue;
            };
            if remaining.is_zero() || slots.contains_key(&p.fingerprint) {
                continue;
            }
            let entry = CacheEntry {
                step: p.step,
                value: p.value,
                created_at: p.created_at,
                expires_at: p.expires_at,
                deadline: now + remaining,
                hit_count: p.hit_count,
                last_hit_at: p.last_hit_at,
                last_access: self.next_access(),
            };
            slots.insert(p.fingerprint, Slot::Ready(entry));
            loaded += 1;
        }
        self.evict_over_capacity(&mut slots);
        self.metrics
            .set_gauge("cache.entries", &[], Self::ready_count(&slots) as f64);
        drop(slots);

        info!(path = %path.display(), loaded, "Cache snapshot loaded");
        Ok(loaded)
    }
}
