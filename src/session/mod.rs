//! Connection lifecycle: negotiation handshake, streaming socket transport,
//! and the connection manager state machine.

pub mod manager;
pub mod negotiation;
pub mod socket;

use reqwest::StatusCode;
use thiserror::Error;

pub use negotiation::{negotiate, NegotiationBackend, ReqwestNegotiationBackend};
pub use socket::{SocketConnector, StreamingSocket, TungsteniteConnector};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("negotiation response missing connection token")]
    MissingToken,
    #[error("invalid negotiation endpoint: {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("websocket transport error: {0}")]
    Transport(String),
    #[error("invalid socket request: {0}")]
    BadRequest(String),
}

/// Internal lifecycle state. Exactly one is active at a time and only the
/// connection manager transitions it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Negotiating,
    Opening,
    Subscribing,
    Streaming,
    Closed,
    Reconnecting,
    Fallback,
}

/// Imperative controls accepted by the connection manager from the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reconnect,
    StartFallback,
    StopFallback,
    Shutdown,
}
