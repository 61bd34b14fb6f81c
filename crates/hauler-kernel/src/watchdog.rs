//! [`FeedWatchdog`] – sensor feed freshness monitor.
//!
//! Each upstream feed the safety monitor depends on (the range scanner, the
//! pose fusion output) calls [`FeedWatchdog::heartbeat`] whenever it delivers
//! new data.  A feed is *stale* once its deadline has passed; stale feeds are
//! surfaced as sensor-gap alerts rather than read as "all clear".

use std::collections::HashMap;
use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHealth {
    /// A heartbeat arrived within the deadline.
    Fresh,
    /// The deadline has passed without a heartbeat.
    Stale,
}

struct FeedEntry {
    last_heartbeat: Instant,
    timeout: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// FeedWatchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks heartbeats from registered feeds and reports the stale ones.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hauler_kernel::watchdog::{FeedHealth, FeedWatchdog};
///
/// let mut wd = FeedWatchdog::new();
/// wd.register("scan", Duration::from_secs(1));
/// wd.heartbeat("scan");
///
/// assert_eq!(wd.health("scan"), FeedHealth::Fresh);
/// ```
#[derive(Default)]
pub struct FeedWatchdog {
    feeds: HashMap<String, FeedEntry>,
}

impl FeedWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `feed` with a maximum heartbeat interval.
    ///
    /// The deadline starts now; re-registering resets it.
    pub fn register(&mut self, feed: &str, timeout: Duration) {
        self.feeds.insert(
            feed.to_string(),
            FeedEntry {
                last_heartbeat: Instant::now(),
                timeout,
            },
        );
    }

    pub fn is_registered(&self, feed: &str) -> bool {
        self.feeds.contains_key(feed)
    }

    /// Record a heartbeat for `feed`. No-op for unregistered feeds.
    pub fn heartbeat(&mut self, feed: &str) {
        if let Some(entry) = self.feeds.get_mut(feed) {
            entry.last_heartbeat = Instant::now();
        }
    }

    /// Change the deadline of every registered feed.
    pub fn set_timeout(&mut self, timeout: Duration) {
        for entry in self.feeds.values_mut() {
            entry.timeout = timeout;
        }
    }

    /// Unknown feeds are reported [`FeedHealth::Stale`].
    pub fn health(&self, feed: &str) -> FeedHealth {
        match self.feeds.get(feed) {
            Some(entry) if entry.last_heartbeat.elapsed() <= entry.timeout => FeedHealth::Fresh,
            _ => FeedHealth::Stale,
        }
    }

    /// Names of all feeds past their deadline, sorted.
    pub fn stale_feeds(&self) -> Vec<String> {
        let mut stale: Vec<String> = self
            .feeds
            .iter()
            .filter(|(_, entry)| entry.last_heartbeat.elapsed() > entry.timeout)
            .map(|(name, _)| name.clone())
            .collect();
        stale.sort();
        stale
    }
}
