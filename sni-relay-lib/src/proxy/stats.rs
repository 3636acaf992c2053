//! Connection counters shared between the handlers and the sidecar.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use serde::Serialize;

/// How many source addresses a snapshot reports.
pub const TOP_SOURCES: usize = 5;

/// Process-wide connection counters. Handlers mutate through the narrow
/// record methods; the sidecar only ever sees deep-copy snapshots.
#[derive(Debug)]
pub struct StatsTracker {
    started: Instant,
    total: AtomicU64,
    active: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    domains: Mutex<AHashMap<String, u64>>,
    sources: Mutex<AHashMap<IpAddr, u64>>,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total: AtomicU64::new(0),
            active: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            domains: Mutex::new(AHashMap::new()),
            sources: Mutex::new(AHashMap::new()),
        }
    }

    /// Count an admitted connection. The returned guard holds the `active`
    /// increment and releases it exactly once when dropped, on any exit path.
    pub fn record_admission(self: Arc<Self>, sni: &str, source: IpAddr) -> ActiveGuard {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        {
            let mut domains = self.domains.lock().unwrap_or_else(PoisonError::into_inner);
            *domains.entry(sni.to_string()).or_insert(0) += 1;
        }
        {
            let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
            *sources.entry(source).or_insert(0) += 1;
        }
        ActiveGuard { stats: self }
    }

    pub fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Deep copy of all counters; the maps are cloned under their locks so
    /// the consumer never observes torn state.
    pub fn snapshot(&self) -> StatsSnapshot {
        let domains: BTreeMap<String, u64> = self
            .domains
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        let mut sources: Vec<(IpAddr, u64)> = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();
        sources.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sources.truncate(TOP_SOURCES);

        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            domains,
            top_sources: sources
                .into_iter()
                .map(|(ip, count)| SourceCount { ip: ip.to_string(), count })
                .collect(),
        }
    }
}

/// Releases one `active` increment when dropped. `checked_sub` keeps the
/// counter from wrapping if a guard ever outlives a tracker reset.
pub struct ActiveGuard {
    stats: Arc<StatsTracker>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.stats
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
            .ok();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub active: u64,
    pub successful: u64,
    pub failed: u64,
    pub domains: BTreeMap<String, u64>,
    pub top_sources: Vec<SourceCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceCount {
    pub ip: String,
    pub count: u64,
}
