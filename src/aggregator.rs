use alloy::primitives::Address;
use serde::Serialize;
use tracing::debug;

use crate::models::{EventId, FlowRate, FlowRecord};
use crate::store::{EntityStore, StoreError};

/// Current view of one sender's stream, rebuilt from its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    pub sender: Address,
    pub active: bool,
    pub flow_rate: FlowRate,
    /// App-wide inflow reported by the last deletion, if any.
    pub remaining_inflow: Option<FlowRate>,
    pub last_event: Option<EventId>,
    pub events: usize,
}

impl StreamState {
    fn empty(sender: Address) -> Self {
        Self {
            sender,
            active: false,
            flow_rate: FlowRate::ZERO,
            remaining_inflow: None,
            last_event: None,
            events: 0,
        }
    }

    fn apply(&mut self, record: &FlowRecord) {
        match record {
            FlowRecord::FlowCreated(r) => {
                self.active = true;
                self.flow_rate = r.flow_rate;
            }
            FlowRecord::FlowUpdated(r) => {
                self.active = true;
                self.flow_rate = self.flow_rate.saturating_add(r.inflow_change);
            }
            FlowRecord::FlowDeleted(r) => {
                self.active = false;
                self.flow_rate = FlowRate::ZERO;
                self.remaining_inflow = Some(r.remaining_inflow);
            }
        }
        self.last_event = Some(record.id());
        self.events += 1;
    }
}

/// Fold records into a stream state. Records are sorted first so callers
/// may pass them in any order.
pub fn replay(sender: Address, records: &[FlowRecord]) -> StreamState {
    let mut ordered: Vec<&FlowRecord> = records.iter().filter(|r| r.sender() == sender).collect();
    ordered.sort_by_key(|r| r.id());

    let mut state = StreamState::empty(sender);
    for record in ordered {
        state.apply(record);
    }
    state
}

/// Rebuild a sender's stream state from the store. Never cached.
pub fn stream_state<S: EntityStore + ?Sized>(store: &S, sender: Address) -> Result<StreamState, StoreError> {
    let records = store.records_for_sender(sender)?;
    let state = replay(sender, &records);
    debug!("Replayed {} records for {} → rate {}", state.events, sender, state.flow_rate);
    Ok(state)
}
