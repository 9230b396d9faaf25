// src/parser.rs
use std::str::FromStr;

use alloy::primitives::{aliases::I96, LogData, B256};
use alloy::sol_types::SolEvent;
use thiserror::Error;

use crate::abi::SBIncentivesApp::{FlowCreated, FlowDeleted, FlowUpdated};
use crate::models::{
    BlockRef, EventPayload, FlowCreatedParams, FlowDeletedParams, FlowEvent, FlowRate,
    FlowUpdatedParams,
};
use crate::rpc::{parse_hex_u64, Log};

/// A log that cannot be turned into a flow event. Always a producer/schema
/// mismatch, never retried.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingTopic,
    #[error("unknown event topic {0}")]
    UnknownTopic(B256),
    #[error("invalid hex in field {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },
    #[error("ABI decode of {kind} failed: {source}")]
    Abi {
        kind: &'static str,
        #[source]
        source: alloy::sol_types::Error,
    },
    #[error("{kind} carries a rate outside int96")]
    RateOutOfRange { kind: &'static str },
}

/// First topics the indexer subscribes to.
pub fn flow_topics() -> [B256; 3] {
    [
        FlowCreated::SIGNATURE_HASH,
        FlowUpdated::SIGNATURE_HASH,
        FlowDeleted::SIGNATURE_HASH,
    ]
}

fn parse_topic(topic: &str) -> Result<B256, DecodeError> {
    B256::from_str(topic).map_err(|e| DecodeError::InvalidHex {
        field: "topics",
        reason: e.to_string(),
    })
}

fn to_flow_rate(value: I96, kind: &'static str) -> Result<FlowRate, DecodeError> {
    i128::try_from(value)
        .ok()
        .and_then(|v| FlowRate::new(v).ok())
        .ok_or(DecodeError::RateOutOfRange { kind })
}

fn decode_params<E: SolEvent>(data: &LogData) -> Result<E, DecodeError> {
    E::decode_log_data(data).map_err(|source| DecodeError::Abi { kind: E::SIGNATURE, source })
}

/// Decode the typed parameters of a flow event from raw log data.
pub fn decode_event(data: &LogData) -> Result<FlowEvent, DecodeError> {
    let topic0 = *data.topics().first().ok_or(DecodeError::MissingTopic)?;

    let event = if topic0 == FlowCreated::SIGNATURE_HASH {
        let e: FlowCreated = decode_params(data)?;
        FlowEvent::FlowCreated(FlowCreatedParams {
            sender: e.sender,
            flow_rate: to_flow_rate(e.flowRate, "FlowCreated")?,
        })
    } else if topic0 == FlowUpdated::SIGNATURE_HASH {
        let e: FlowUpdated = decode_params(data)?;
        FlowEvent::FlowUpdated(FlowUpdatedParams {
            sender: e.sender,
            inflow_change: to_flow_rate(e.inflowChange, "FlowUpdated")?,
        })
    } else if topic0 == FlowDeleted::SIGNATURE_HASH {
        let e: FlowDeleted = decode_params(data)?;
        FlowEvent::FlowDeleted(FlowDeletedParams {
            sender: e.sender,
            remaining_inflow: to_flow_rate(e.remainingInflow, "FlowDeleted")?,
        })
    } else {
        return Err(DecodeError::UnknownTopic(topic0));
    };

    Ok(event)
}

/// Decode a JSON-RPC log into a payload tagged with its chain coordinates.
pub fn decode_log(chain_id: u64, log: &Log) -> Result<EventPayload, DecodeError> {
    let topics = log
        .topics
        .iter()
        .map(|t| parse_topic(t))
        .collect::<Result<Vec<_>, _>>()?;

    let data = hex::decode(log.data.trim_start_matches("0x")).map_err(|e| DecodeError::InvalidHex {
        field: "data",
        reason: e.to_string(),
    })?;

    let block_number = parse_hex_u64(&log.block_number_hex).map_err(|e| DecodeError::InvalidHex {
        field: "blockNumber",
        reason: e.to_string(),
    })?;

    let log_index = parse_hex_u64(&log.log_index_hex).map_err(|e| DecodeError::InvalidHex {
        field: "logIndex",
        reason: e.to_string(),
    })?;

    let event = decode_event(&LogData::new_unchecked(topics, data.into()))?;

    Ok(EventPayload {
        chain_id,
        block: BlockRef { number: block_number },
        log_index,
        event,
    })
}
