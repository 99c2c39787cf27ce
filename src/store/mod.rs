//! Delivery log.
//!
//! Every tracked attempt ends up here, one record per attempt, so the
//! admin surface can answer "what happened to my sends" without a
//! database. The log is bounded; old records fall off the back.

mod memory;
pub mod types;

pub use memory::InMemoryStore;
pub use types::{ChannelTally, DeliveryRecord, RecordId, RecordQuery, StoreStats};

use std::sync::Arc;
use std::time::Duration;

/// Store for finished delivery attempts.
///
/// All implementations must be thread-safe (Send + Sync).
pub trait DeliveryStore: Send + Sync {
    /// Append a record. Returns its ID.
    fn record(&self, record: DeliveryRecord) -> RecordId;

    /// Latest records, most recent first.
    fn recent(&self, limit: usize) -> Vec<DeliveryRecord>;

    /// Records matching a filter, most recent first.
    fn query(&self, query: &RecordQuery) -> Vec<DeliveryRecord>;

    /// Look up one record by ID.
    fn get(&self, id: RecordId) -> Option<DeliveryRecord>;

    /// Drop records older than `max_age`. Returns how many were removed.
    fn prune(&self, max_age: Duration) -> usize;

    /// Store statistics.
    fn stats(&self) -> StoreStats;

    /// Number of records held.
    fn len(&self) -> usize;

    /// Whether the store holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle to the delivery log.
pub type SharedStore = Arc<dyn DeliveryStore>;
