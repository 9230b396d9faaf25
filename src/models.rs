// src/models.rs
use std::{fmt, str::FromStr};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position of a log on chain. Rendered as `{chain}_{block}_{log}`.
///
/// Field order matters: the derived `Ord` sorts by chain, then block, then
/// log index, which is the only ordering the indexer relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EventId {
    pub chain_id: u64,
    pub block_number: u64,
    pub log_index: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid event id '{0}', expected <chain>_<block>_<log>")]
pub struct InvalidEventId(pub String);

impl EventId {
    pub fn new(chain_id: u64, block_number: u64, log_index: u64) -> Self {
        Self { chain_id, block_number, log_index }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.chain_id, self.block_number, self.log_index)
    }
}

impl FromStr for EventId {
    type Err = InvalidEventId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('_').map(str::parse::<u64>);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(chain_id)), Some(Ok(block_number)), Some(Ok(log_index)), None) => {
                Ok(Self::new(chain_id, block_number, log_index))
            }
            _ => Err(InvalidEventId(s.to_string())),
        }
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for EventId {
    type Error = InvalidEventId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Signed per-second rate in the token's smallest unit, bounded to `int96`.
///
/// Serialized as a decimal string so JSON consumers never lose precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FlowRate(i128);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowRateError {
    #[error("flow rate '{0}' is not an integer")]
    NotAnInteger(String),
    #[error("flow rate {0} does not fit in int96")]
    OutOfRange(i128),
}

impl FlowRate {
    pub const ZERO: FlowRate = FlowRate(0);
    pub const MAX: i128 = (1i128 << 95) - 1;
    pub const MIN: i128 = -(1i128 << 95);

    pub fn new(value: i128) -> Result<Self, FlowRateError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(FlowRateError::OutOfRange(value))
        }
    }

    pub fn get(self) -> i128 {
        self.0
    }

    /// Adds a delta, saturating at the int96 bounds.
    pub fn saturating_add(self, delta: FlowRate) -> FlowRate {
        FlowRate(self.0.saturating_add(delta.0).clamp(Self::MIN, Self::MAX))
    }
}

impl fmt::Display for FlowRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FlowRate {
    type Err = FlowRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i128>()
            .map_err(|_| FlowRateError::NotAnInteger(s.to_string()))?;
        Self::new(value)
    }
}

impl From<FlowRate> for String {
    fn from(rate: FlowRate) -> Self {
        rate.to_string()
    }
}

impl TryFrom<String> for FlowRate {
    type Error = FlowRateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ---------- inbound payload ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowCreatedParams {
    pub sender: Address,
    pub flow_rate: FlowRate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowUpdatedParams {
    pub sender: Address,
    pub inflow_change: FlowRate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDeletedParams {
    pub sender: Address,
    pub remaining_inflow: FlowRate,
}

/// Decoded incentives-app event, discriminated by an explicit `kind` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params")]
pub enum FlowEvent {
    FlowCreated(FlowCreatedParams),
    FlowUpdated(FlowUpdatedParams),
    FlowDeleted(FlowDeletedParams),
}

impl FlowEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowEvent::FlowCreated(_) => "FlowCreated",
            FlowEvent::FlowUpdated(_) => "FlowUpdated",
            FlowEvent::FlowDeleted(_) => "FlowDeleted",
        }
    }
}

/// One observed log together with its chain coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub chain_id: u64,
    pub block: BlockRef,
    pub log_index: u64,
    pub event: FlowEvent,
}

impl EventPayload {
    pub fn id(&self) -> EventId {
        EventId::new(self.chain_id, self.block.number, self.log_index)
    }
}

// ---------- persisted records ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowCreatedRecord {
    pub id: EventId,
    pub sender: Address,
    pub flow_rate: FlowRate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowUpdatedRecord {
    pub id: EventId,
    pub sender: Address,
    pub inflow_change: FlowRate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDeletedRecord {
    pub id: EventId,
    pub sender: Address,
    pub remaining_inflow: FlowRate,
}

/// Any of the three record kinds, as returned by lookups across tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FlowRecord {
    FlowCreated(FlowCreatedRecord),
    FlowUpdated(FlowUpdatedRecord),
    FlowDeleted(FlowDeletedRecord),
}

impl FlowRecord {
    pub fn id(&self) -> EventId {
        match self {
            FlowRecord::FlowCreated(r) => r.id,
            FlowRecord::FlowUpdated(r) => r.id,
            FlowRecord::FlowDeleted(r) => r.id,
        }
    }

    pub fn sender(&self) -> Address {
        match self {
            FlowRecord::FlowCreated(r) => r.sender,
            FlowRecord::FlowUpdated(r) => r.sender,
            FlowRecord::FlowDeleted(r) => r.sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn event_id_formats_and_parses() {
        let id = EventId::new(1, 100, 2);
        assert_eq!(id.to_string(), "1_100_2");
        assert_eq!("1_100_2".parse::<EventId>().unwrap(), id);
        assert!("1_100".parse::<EventId>().is_err());
        assert!("1_100_2_3".parse::<EventId>().is_err());
        assert!("a_b_c".parse::<EventId>().is_err());
    }

    #[test]
    fn event_ids_order_numerically_not_lexically() {
        let earlier = EventId::new(1, 99, 7);
        let later = EventId::new(1, 100, 0);
        assert!(earlier < later);
        assert!(earlier.to_string() > later.to_string());
    }

    #[test]
    fn distinct_coordinates_give_distinct_ids() {
        // "1_11_1" vs "11_1_1" style collisions are impossible with separators
        let triples = [(1, 11, 1), (11, 1, 1), (1, 1, 11), (1, 111, 0), (11, 11, 0)];
        let ids: std::collections::HashSet<String> = triples
            .iter()
            .map(|&(c, b, l)| EventId::new(c, b, l).to_string())
            .collect();
        assert_eq!(ids.len(), triples.len());
    }

    #[test]
    fn flow_rate_enforces_int96_bounds() {
        assert!(FlowRate::new(FlowRate::MAX).is_ok());
        assert!(FlowRate::new(FlowRate::MIN).is_ok());
        assert_eq!(
            FlowRate::new(FlowRate::MAX + 1),
            Err(FlowRateError::OutOfRange(FlowRate::MAX + 1))
        );
        assert_eq!("-42".parse::<FlowRate>().unwrap().get(), -42);
        assert!("1.5".parse::<FlowRate>().is_err());
    }

    #[test]
    fn payload_json_uses_kind_tag() {
        let json = r#"{
            "chainId": 1,
            "block": { "number": 100 },
            "logIndex": 2,
            "event": {
                "kind": "FlowCreated",
                "params": { "sender": "0x00000000000000000000000000000000000000aa", "flowRate": "500" }
            }
        }"#;
        let payload: EventPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.id().to_string(), "1_100_2");
        assert_eq!(
            payload.event,
            FlowEvent::FlowCreated(FlowCreatedParams {
                sender: address!("00000000000000000000000000000000000000aa"),
                flow_rate: FlowRate::new(500).unwrap(),
            })
        );
    }

    #[test]
    fn payload_missing_parameter_is_rejected() {
        let json = r#"{
            "chainId": 1,
            "block": { "number": 100 },
            "logIndex": 2,
            "event": { "kind": "FlowUpdated", "params": { "sender": "0x00000000000000000000000000000000000000aa" } }
        }"#;
        assert!(serde_json::from_str::<EventPayload>(json).is_err());
    }

    #[test]
    fn record_serializes_with_string_rate() {
        let record = FlowRecord::FlowDeleted(FlowDeletedRecord {
            id: EventId::new(10, 50, 0),
            sender: address!("00000000000000000000000000000000000000bb"),
            remaining_inflow: FlowRate::ZERO,
        });
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "FlowDeleted");
        assert_eq!(value["id"], "10_50_0");
        assert_eq!(value["remainingInflow"], "0");
    }
}
