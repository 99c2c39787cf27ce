//! In-memory delivery log.
//!
//! Volatile storage for the delivery log. All records are lost on restart.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use super::types::{ChannelTally, DeliveryRecord, RecordId, RecordQuery, StoreStats};
use super::DeliveryStore;

/// Bounded in-memory delivery log.
///
/// Thread-safe using RwLock. Oldest records are evicted once the
/// configured capacity is reached.
pub struct InMemoryStore {
    records: RwLock<VecDeque<DeliveryRecord>>,
    capacity: usize,
    delivered: AtomicU64,
    failed: AtomicU64,
    fallbacks: AtomicU64,
    evicted: AtomicU64,
    by_channel: RwLock<BTreeMap<String, ChannelTally>>,
}

impl InMemoryStore {
    /// Create a store holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            by_channel: RwLock::new(BTreeMap::new()),
        }
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }
}

impl DeliveryStore for InMemoryStore {
    fn record(&self, record: DeliveryRecord) -> RecordId {
        let id = record.id;
        if record.success {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if record.fallback {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        {
            let mut by_channel = self.by_channel.write().unwrap();
            let tally = by_channel
                .entry(record.channel.name().to_string())
                .or_default();
            if record.success {
                tally.delivered += 1;
            } else {
                tally.failed += 1;
            }
        }

        let mut records = self.records.write().unwrap();
        if records.len() >= self.capacity {
            records.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        records.push_back(record);

        debug!(record = %id, total = records.len(), "delivery recorded");
        id
    }

    fn recent(&self, limit: usize) -> Vec<DeliveryRecord> {
        let records = self.records.read().unwrap();
        records.iter().rev().take(limit).cloned().collect()
    }

    fn query(&self, query: &RecordQuery) -> Vec<DeliveryRecord> {
        let records = self.records.read().unwrap();
        let limit = query.limit.unwrap_or(usize::MAX);
        records
            .iter()
            .rev()
            .filter(|record| query.matches(record))
            .take(limit)
            .cloned()
            .collect()
    }

    fn get(&self, id: RecordId) -> Option<DeliveryRecord> {
        let records = self.records.read().unwrap();
        records.iter().find(|record| record.id == id).cloned()
    }

    fn prune(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        // An age beyond the representable range prunes nothing
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|record| record.recorded_at >= cutoff);
        let pruned = before - records.len();
        if pruned > 0 {
            debug!(pruned, remaining = records.len(), "pruned delivery records");
        }
        pruned
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            records: self.records.read().unwrap().len() as u64,
            capacity: self.capacity as u64,
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            by_channel: self.by_channel.read().unwrap().clone(),
        }
    }

    fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }
}
