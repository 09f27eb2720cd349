//! # voxrelay-core
//!
//! Types shared by every voxrelay crate:
//!
//! - Branded identifiers ([`SessionId`], [`CorrelationKey`], [`ConnectionId`])
//! - Wire protocol types for the ingestion endpoint, engine variables, and
//!   WebSocket frames
//! - Protocol constants agreed with the BPMN process (message name, task type,
//!   variable names)

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod protocol;

pub use ids::{ConnectionId, CorrelationKey, SessionId};
pub use protocol::{
    InboundEvent, IngestMetadata, IngestRequest, OutboundReply, PublishResult, RelayOutcome,
    ServerFrame,
};
