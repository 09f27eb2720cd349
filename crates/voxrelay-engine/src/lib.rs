//! # voxrelay-engine
//!
//! Client side of the workflow engine boundary.
//!
//! - [`client`]: the [`MessagePublisher`] and [`JobClient`] traits the relay
//!   depends on
//! - [`http`]: [`HttpEngineClient`], an implementation against the Camunda 8
//!   REST API (v2)
//! - [`auth`]: OAuth2 client-credentials bearer tokens
//! - [`router`]: explicit task-type → handler dispatch table
//! - [`worker`]: supervised job polling loop with cancellation
//! - [`connector`]: startup sequencing and the late-bound [`EngineSlot`]

#![deny(unsafe_code)]

pub mod auth;
pub mod client;
pub mod connector;
pub mod errors;
pub mod http;
pub mod router;
pub mod types;
pub mod worker;

pub use client::{JobClient, MessagePublisher};
pub use connector::{EngineConnector, EngineSlot};
pub use errors::{EngineError, JobError};
pub use http::HttpEngineClient;
pub use router::{JobHandler, TaskRouter};
pub use types::{ActivateJobsRequest, ActivatedJob, PublishMessage, PublishReceipt, Topology};
pub use worker::{JobWorker, WorkerConfig};
