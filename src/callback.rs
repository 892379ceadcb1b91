//! Callback dispatch for command outcomes.
//!
//! Every command ends in exactly one listener invocation: a server reply,
//! a timeout, or a shutdown failure. The [`CallbackHandler`] is the
//! transport's receive sink; it matches inbound datagrams against the
//! pending table and fires the winning entry's listener.

use std::any::Any;
use std::net::SocketAddr;

use tracing::debug;

use crate::pending::PendingTable;

/// Opaque application data attached to a command; handed back to the
/// listener untouched when the outcome is known.
pub type AppData = Option<Box<dyn Any + Send + Sync>>;

/// Caller-supplied capability notified exactly once per command.
///
/// Invoked from whichever context resolves the command (dispatch task for
/// replies, timer task for timeouts); implementations must be safe to run
/// concurrently with unrelated callbacks and must not block the invoking
/// context on I/O.
pub trait CommandListener: Send + Sync {
    fn on_result(&self, app_data: AppData, outcome: CommandOutcome);
}

/// Final outcome of a command.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// The server answered within the timeout.
    Reply(CommandReply),
    /// No reply arrived within the configured timeout.
    Timeout,
    /// The client was shut down while the command was still outstanding.
    Shutdown,
}

/// A server reply, with the cookie already stripped.
#[derive(Debug, Clone)]
pub struct CommandReply {
    /// Reply body; grammar is server-defined and kept opaque here.
    pub payload: String,
    /// Address the reply came from.
    pub source: SocketAddr,
}

impl CommandReply {
    /// Whether the payload is an error indication per the protocol's
    /// `E<code>` convention.
    pub fn is_error(&self) -> bool {
        match self.payload.strip_prefix('E') {
            Some(rest) => rest.chars().all(|c| c.is_ascii_digit()),
            None => false,
        }
    }
}

/// Matches inbound datagrams to pending commands and fires their listeners.
pub struct CallbackHandler {
    table: PendingTable,
}

impl CallbackHandler {
    pub fn new(table: PendingTable) -> Self {
        CallbackHandler { table }
    }

    /// Handles one inbound `(cookie, payload)` pair.
    ///
    /// An unknown cookie means the command already completed (late or
    /// duplicate reply) or never existed; such datagrams are discarded
    /// without surfacing an error to anyone.
    pub fn on_response(&self, cookie: &str, payload: String, source: SocketAddr) {
        match self.table.resolve(cookie) {
            Some(entry) => {
                debug!("Command {} resolved by reply from {}", cookie, source);
                entry.complete(CommandOutcome::Reply(CommandReply { payload, source }));
            }
            None => {
                debug!("Discarding reply for unknown cookie {} from {}", cookie, source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(payload: &str) -> CommandReply {
        CommandReply {
            payload: payload.to_string(),
            source: "127.0.0.1:22222".parse().unwrap(),
        }
    }

    #[test]
    fn test_reply_error_classification() {
        assert!(reply("E1").is_error());
        assert!(reply("E25").is_error());
        assert!(reply("E").is_error());
        assert!(!reply("0").is_error());
        assert!(!reply("35000 192.168.0.10").is_error());
        assert!(!reply("Established").is_error());
    }

    #[tokio::test]
    async fn test_unknown_cookie_is_discarded() {
        let handler = CallbackHandler::new(PendingTable::new());
        // Must not panic or surface anything.
        handler.on_response("deadbeef", "0".to_string(), "127.0.0.1:22222".parse().unwrap());
    }
}
