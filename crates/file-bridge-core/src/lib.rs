//! Core of the file bridge relay.
//!
//! This crate provides the transport-agnostic building blocks:
//! - `frame` - Wire framing, PUT payloads and response envelopes
//! - `SessionRegistry` - Token → live agent connection, gate and pending slot
//! - `Correlator` - Single-flight request/response pairing
//! - `ConnectionHandler` - Handshake / relay / cleanup state machine
//! - `AgentLink` - Trait for the write side of an agent connection

pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod frame;
pub mod link;
pub mod registry;
pub mod slot;

pub use config::BridgeConfig;
pub use connection::{ConnectionHandler, ConnectionState, FrameDisposition, HandshakeError};
pub use correlator::Correlator;
pub use error::BridgeError;
pub use frame::{EnvelopeHeader, Frame};
pub use link::{AgentLink, ConnectionId, LinkError};
pub use registry::{AgentHandle, SessionRegistry};
