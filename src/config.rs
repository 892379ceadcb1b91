//! Client configuration.
//!
//! Configuration is loaded and validated before the client is constructed;
//! a malformed server list fails the load rather than being retried.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default time to wait for a server reply before failing a command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// Default capacity of the transport event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Configuration for an [`RtpProxyClient`](crate::client::RtpProxyClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local address the UDP control socket binds to. Port 0 lets the OS pick.
    pub bind_addr: SocketAddr,

    /// How long a command may stay unanswered before its listener is failed
    /// with a timeout.
    pub command_timeout: Duration,

    /// Capacity of the channel carrying inbound datagrams from the receive
    /// loop to the response dispatcher.
    pub channel_capacity: usize,

    /// Configured RTPProxy servers, in preference order.
    pub servers: Vec<SocketAddr>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            servers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with default settings and no servers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a server list string.
    ///
    /// The string holds `host:port` entries separated by commas and/or
    /// whitespace, e.g. `"127.0.0.1:22222, 10.0.0.2:22222"`. An empty string
    /// yields an empty server list; selection will then fail with
    /// [`Error::NoServerAvailable`] at command time.
    pub fn load(server_list: &str) -> Result<Self> {
        let mut servers = Vec::new();
        for entry in server_list
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            let addr = entry.parse::<SocketAddr>().map_err(|e| {
                Error::Config(format!("invalid server address '{}': {}", entry, e))
            })?;
            servers.push(addr);
        }

        Ok(ClientConfig {
            servers,
            ..Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_single_server() {
        let config = ClientConfig::load("127.0.0.1:222").unwrap();
        assert_eq!(config.servers, vec!["127.0.0.1:222".parse().unwrap()]);
        assert_eq!(config.command_timeout, DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn test_load_multiple_servers() {
        let config = ClientConfig::load("127.0.0.1:22222, 10.0.0.2:22224").unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[1], "10.0.0.2:22224".parse().unwrap());
    }

    #[test]
    fn test_load_empty_list() {
        let config = ClientConfig::load("").unwrap();
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_load_rejects_garbage() {
        assert!(matches!(
            ClientConfig::load("not-an-address"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ClientConfig::load("127.0.0.1:222, 127.0.0.1"),
            Err(Error::Config(_))
        ));
    }
}
