// Client engine for a persistent socket event-bus bridge.
//
// One long-lived connection multiplexes point-to-point sends, broadcast
// publishes and subscription management to named addresses, with optional
// per-message reply correlation and a keep-alive heartbeat. The transport
// itself is supplied from outside through `tether_transport::TransportPipe`;
// this crate owns everything above the frame boundary: lifecycle state,
// dispatch, correlation, and the timer.
//
// There is no reconnection logic here. A connection goes forward through
// connecting / open / closing / closed exactly once; recovery policy
// belongs to the application.

pub mod client;
pub mod config;

pub use client::{
    ConnectionListener, ConnectionState, ErrorHandler, EventBus, HandlerId, MessageHandler,
};
pub use config::{ClientConfig, DEFAULT_PIPE_DEPTH};
pub use tether_wire::{Envelope, EnvelopeCodec, Headers, JsonCodec, MessageKind};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An operation requiring the open state ran in some other state.
    /// Nothing was sent and nothing was mutated.
    #[error("connection not open (state: {0})")]
    NotOpen(ConnectionState),
    /// The transport reported a connection failure during open.
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("config error: {0}")]
    Config(String),
    /// The outbound envelope could not be serialized.
    #[error("failed to encode envelope")]
    Encode(tether_wire::Error),
    /// The bounded transport command queue is full.
    #[error("transport command queue full")]
    QueueFull,
    /// The transport pipe is gone; the connection is unusable.
    #[error("transport channel closed")]
    ChannelClosed,
}
