// src/mapper.rs
//! Event-to-record mapping.
//!
//! Each handler derives the record id from the log's chain coordinates,
//! copies the event parameters verbatim and upserts the record. Handlers
//! do nothing else: no conversion, no validation, no outbound calls.
//! Replaying a log therefore rewrites an identical record.

use tracing::debug;

use crate::models::{
    EventId, EventPayload, FlowCreatedParams, FlowCreatedRecord, FlowDeletedParams,
    FlowDeletedRecord, FlowEvent, FlowRecord, FlowUpdatedParams, FlowUpdatedRecord,
};
use crate::store::{EntityStore, StoreError};

pub fn event_id(chain_id: u64, block_number: u64, log_index: u64) -> EventId {
    EventId::new(chain_id, block_number, log_index)
}

fn payload_id(payload: &EventPayload) -> EventId {
    event_id(payload.chain_id, payload.block.number, payload.log_index)
}

pub fn handle_flow_created<S: EntityStore + ?Sized>(
    payload: &EventPayload,
    params: &FlowCreatedParams,
    store: &mut S,
) -> Result<FlowCreatedRecord, StoreError> {
    let record = FlowCreatedRecord {
        id: payload_id(payload),
        sender: params.sender,
        flow_rate: params.flow_rate,
    };
    store.set_flow_created(&record)?;
    Ok(record)
}

pub fn handle_flow_updated<S: EntityStore + ?Sized>(
    payload: &EventPayload,
    params: &FlowUpdatedParams,
    store: &mut S,
) -> Result<FlowUpdatedRecord, StoreError> {
    let record = FlowUpdatedRecord {
        id: payload_id(payload),
        sender: params.sender,
        inflow_change: params.inflow_change,
    };
    store.set_flow_updated(&record)?;
    Ok(record)
}

pub fn handle_flow_deleted<S: EntityStore + ?Sized>(
    payload: &EventPayload,
    params: &FlowDeletedParams,
    store: &mut S,
) -> Result<FlowDeletedRecord, StoreError> {
    let record = FlowDeletedRecord {
        id: payload_id(payload),
        sender: params.sender,
        remaining_inflow: params.remaining_inflow,
    };
    store.set_flow_deleted(&record)?;
    Ok(record)
}

/// Route a payload to the handler for its kind.
pub fn process<S: EntityStore + ?Sized>(
    payload: &EventPayload,
    store: &mut S,
) -> Result<FlowRecord, StoreError> {
    let record = match &payload.event {
        FlowEvent::FlowCreated(p) => FlowRecord::FlowCreated(handle_flow_created(payload, p, store)?),
        FlowEvent::FlowUpdated(p) => FlowRecord::FlowUpdated(handle_flow_updated(payload, p, store)?),
        FlowEvent::FlowDeleted(p) => FlowRecord::FlowDeleted(handle_flow_deleted(payload, p, store)?),
    };
    debug!("{} {} from {}", payload.event.kind(), record.id(), record.sender());
    Ok(record)
}
