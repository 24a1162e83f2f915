//! # livesock
//!
//! A self-healing WebSocket client for long-lived market-data and user
//! channels.
//!
//! ## Features
//!
//! - **Protocol liveness**: RFC-6455 Ping/Pong with a pong deadline; dead
//!   connections are terminated and re-established
//! - **Doubling-backoff reconnect**: per-attempt [`Backoff`] schedule with
//!   a delay ceiling and an attempt cap
//! - **Subscription replay**: registered frames are re-sent after every
//!   successful open, so subscriptions survive reconnects
//! - **Observable state**: atomic connection state plus a client event
//!   channel

pub mod core;

pub use core::{
    client::{ClientEvent, FrameSink, WsClient},
    config::{Backoff, ClientConfig},
    state::{AtomicConnectionState, AtomicMetrics, ConnectionState, Metrics},
};

use thiserror::Error;

/// Errors surfaced by the client.
#[derive(Error, Debug)]
pub enum LivesockError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("connection dead: no pong within deadline")]
    DeadConnection,

    #[error("channel send failed: {0}")]
    ChannelSend(String),
}

/// Type alias for Result with LivesockError
pub type Result<T> = std::result::Result<T, LivesockError>;
