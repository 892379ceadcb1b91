//! Asynchronous client for the RTPProxy UDP control protocol
//!
//! This crate issues RTPProxy control commands over UDP, correlates each
//! eventual response back to the command that caused it via a cookie,
//! enforces timeouts when a server never answers, and notifies
//! caller-supplied listeners exactly once per command.

mod callback;
mod command;
mod config;
mod error;
mod pending;
mod session;
pub mod transport;

mod client;

pub use callback::{AppData, CallbackHandler, CommandListener, CommandOutcome, CommandReply};
pub use client::RtpProxyClient;
pub use command::{Command, CookieGenerator, Operation, FROM_TAG, TO_TAG};
pub use config::{ClientConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_COMMAND_TIMEOUT};
pub use error::{Error, Result};
pub use pending::{PendingEntry, PendingTable};
pub use session::{
    FirstAvailable, RoundRobin, SelectionPolicy, Server, ServerRegistry, Session,
};
pub use transport::{Transport, TransportEvent, UdpTransport};

/// Re-export of common types for easier use
pub mod prelude {
    pub use super::{
        ClientConfig, CommandListener, CommandOutcome, CommandReply, Error, Result,
        RtpProxyClient, Server, ServerRegistry, Session, Transport, TransportEvent,
        UdpTransport,
    };
}
