//! Per-source fixed-window connection limiting.
//!
//! Simpler than a sliding window: each source gets a counter that resets
//! every window. Linearizable per key via a single mutex around the map,
//! which is sufficient at the expected connection rates.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Window length for counting and for the background sweep.
pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_end: Instant,
}

/// Fixed-window counter keyed by source address.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    entries: Mutex<AHashMap<IpAddr, WindowEntry>>,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self::with_window(limit, WINDOW)
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self { limit, window, entries: Mutex::new(AHashMap::new()) }
    }

    /// Returns true when the connection is admitted.
    ///
    /// A fresh or expired window starts at `count = 1`; within a live
    /// window the counter is bumped until `limit` is reached.
    pub fn check(&self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .entry(addr)
            .or_insert(WindowEntry { count: 0, window_end: now + self.window });
        if now > entry.window_end {
            *entry = WindowEntry { count: 1, window_end: now + self.window };
            return true;
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count = entry.count.saturating_add(1);
        true
    }

    /// Drop entries whose window has already closed.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.window_end >= now);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, tracked = entries.len(), "swept rate-limit windows");
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of sources currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Periodically evict stale windows so the map stays bounded by the set of
/// sources seen in the last interval.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        tick.tick().await;
        loop {
            tick.tick().await;
            limiter.sweep();
        }
    })
}
