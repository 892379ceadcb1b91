use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the RTPProxy client
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing configuration, detected at load time.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server registry has no usable server.
    #[error("no RTPProxy server available")]
    NoServerAvailable,

    /// The local UDP port could not be bound.
    #[error("failed to bind UDP socket on {0}: {1}")]
    BindFailed(SocketAddr, io::Error),

    /// A datagram could not be sent to the given destination.
    #[error("failed to send datagram to {0}: {1}")]
    SendFailed(SocketAddr, io::Error),

    /// Outbound datagram exceeds the maximum UDP payload.
    #[error("datagram too large: {0} bytes, limit is {1}")]
    PacketTooLarge(usize, usize),

    /// The transport has been closed.
    #[error("transport is closed")]
    TransportClosed,

    /// A command was registered under a cookie that is still outstanding.
    /// Cookie allocation is collision-free, so this indicates a bug.
    #[error("duplicate command cookie: {0}")]
    DuplicateCookie(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NoServerAvailable;
        assert_eq!(err.to_string(), "no RTPProxy server available");

        let err = Error::DuplicateCookie("abc123".to_string());
        assert_eq!(err.to_string(), "duplicate command cookie: abc123");

        let err = Error::PacketTooLarge(70_000, 65_507);
        assert_eq!(err.to_string(), "datagram too large: 70000 bytes, limit is 65507");

        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.to_string().contains("I/O error"));
    }
}
