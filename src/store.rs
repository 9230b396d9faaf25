// src/store.rs
use alloy::primitives::Address;
use thiserror::Error;

use crate::models::{EventId, FlowCreatedRecord, FlowDeletedRecord, FlowRecord, FlowUpdatedRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Keyed entity storage handed to every handler invocation.
///
/// Writes are upserts keyed by [`EventId`]; writing the same record twice
/// leaves the store unchanged.
pub trait EntityStore {
    fn set_flow_created(&mut self, record: &FlowCreatedRecord) -> Result<(), StoreError>;
    fn set_flow_updated(&mut self, record: &FlowUpdatedRecord) -> Result<(), StoreError>;
    fn set_flow_deleted(&mut self, record: &FlowDeletedRecord) -> Result<(), StoreError>;

    fn get(&self, id: EventId) -> Result<Option<FlowRecord>, StoreError>;

    /// Every record for `sender` across all kinds, in chain order.
    fn records_for_sender(&self, sender: Address) -> Result<Vec<FlowRecord>, StoreError>;
}

#[cfg(test)]
pub use memory::MemoryStore;

#[cfg(test)]
mod memory {
    use std::collections::BTreeMap;

    use super::*;

    /// In-memory store that also counts writes, for asserting on mutations.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        records: BTreeMap<EventId, FlowRecord>,
        pub writes: usize,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.records.len()
        }

        fn put(&mut self, record: FlowRecord) {
            self.writes += 1;
            self.records.insert(record.id(), record);
        }
    }

    impl EntityStore for MemoryStore {
        fn set_flow_created(&mut self, record: &FlowCreatedRecord) -> Result<(), StoreError> {
            self.put(FlowRecord::FlowCreated(record.clone()));
            Ok(())
        }

        fn set_flow_updated(&mut self, record: &FlowUpdatedRecord) -> Result<(), StoreError> {
            self.put(FlowRecord::FlowUpdated(record.clone()));
            Ok(())
        }

        fn set_flow_deleted(&mut self, record: &FlowDeletedRecord) -> Result<(), StoreError> {
            self.put(FlowRecord::FlowDeleted(record.clone()));
            Ok(())
        }

        fn get(&self, id: EventId) -> Result<Option<FlowRecord>, StoreError> {
            Ok(self.records.get(&id).cloned())
        }

        fn records_for_sender(&self, sender: Address) -> Result<Vec<FlowRecord>, StoreError> {
            Ok(self
                .records
                .values()
                .filter(|r| r.sender() == sender)
                .cloned()
                .collect())
        }
    }
}
