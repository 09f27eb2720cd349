//! # voxrelay-server
//!
//! The relay core and its HTTP surface.
//!
//! - [`registry`]: live connections keyed by session id, with per-key locking
//! - [`publisher`]: ingested text → engine message with a fresh correlation key
//! - [`dispatcher`]: reply callback job → session connection
//! - [`websocket`]: per-connection read/write loops with heartbeat
//! - [`server`]: axum router, shared state, and the listener
//! - [`proxy`]: model/voice asset pass-through
//! - [`shutdown`]: cancellation and task draining

#![deny(unsafe_code)]

pub mod connection;
pub mod dispatcher;
pub mod health;
pub mod proxy;
pub mod publisher;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use connection::{FrameReceiver, OutboundFrame, SendError, SessionConnection};
pub use dispatcher::{normalize_session_id, OutboundDispatcher};
pub use proxy::{AssetProxy, ProxyError};
pub use publisher::InboundPublisher;
pub use registry::{DeliveryError, DeliveryOutcome, SessionRegistry};
pub use server::{build_router, listen, AppState};
pub use shutdown::ShutdownCoordinator;
pub use websocket::HeartbeatConfig;
