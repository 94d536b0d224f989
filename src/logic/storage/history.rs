//! Behavior History
//!
//! Per-threat occurrence counters and last-seen timestamps. Updated with
//! plain atomics: concurrent read-then-increment may lose an update, which
//! is acceptable for escalation counters.
//!
//! Counters are lifetime totals. `recent_total` windows them on the
//! last-seen timestamp, so a threat type that has been quiet for longer than
//! the window stops counting, while one seen inside it counts in full.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use crate::logic::threat::ThreatType;

#[derive(Debug, Default)]
pub struct BehaviorHistory {
    counts: [AtomicU64; 6],
    /// Unix millis, 0 = never
    last_seen: [AtomicI64; 6],
}

/// Point-in-time copy of one counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: ThreatType,
    pub count: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

impl BehaviorHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new count
    pub fn increment(&self, kind: ThreatType, at: DateTime<Utc>) -> u64 {
        let i = kind.index();
        self.last_seen[i].store(at.timestamp_millis(), Ordering::Relaxed);
        self.counts[i].fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    pub fn count(&self, kind: ThreatType) -> u64 {
        self.counts[kind.index()].load(Ordering::Relaxed)
    }

    /// Sum of all counters
    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .fold(0u64, |acc, c| acc.saturating_add(c.load(Ordering::Relaxed)))
    }

    /// Sum of the counters whose type was last seen at most `window` before `now`
    pub fn recent_total(&self, now: DateTime<Utc>, window: Duration) -> u64 {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp_millis().saturating_sub(window_ms);
        ThreatType::ALL
            .iter()
            .filter(|kind| {
                let seen = self.last_seen[kind.index()].load(Ordering::Relaxed);
                seen != 0 && seen >= cutoff
            })
            .fold(0u64, |acc, &kind| acc.saturating_add(self.count(kind)))
    }

    pub fn last_seen(&self, kind: ThreatType) -> Option<DateTime<Utc>> {
        match self.last_seen[kind.index()].load(Ordering::Relaxed) {
            0 => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        ThreatType::ALL
            .iter()
            .map(|&kind| HistoryEntry {
                kind,
                count: self.count(kind),
                last_seen: self.last_seen(kind),
            })
            .collect()
    }

    /// Load persisted values for one threat type
    pub fn restore(&self, kind: ThreatType, count: u64, last_seen_millis: i64) {
        let i = kind.index();
        self.counts[i].store(count, Ordering::Relaxed);
        self.last_seen[i].store(last_seen_millis, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for kind in ThreatType::ALL {
            self.restore(kind, 0, 0);
        }
    }
}
