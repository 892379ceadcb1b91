//! Server and session value objects, plus the server registry.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A configured RTPProxy server endpoint. Immutable after configuration
/// load; shared between the registry and any sessions bound to it.
#[derive(Debug, PartialEq, Eq)]
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    pub fn new(addr: SocketAddr) -> Self {
        Server { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rtpproxy@{}", self.addr)
    }
}

/// Application-visible binding of a call to a server and its leg tags.
///
/// Sessions are created and owned by the application; the client only reads
/// the server and call identifier to build commands against it.
#[derive(Debug, Clone)]
pub struct Session {
    session_id: String,
    server: Arc<Server>,
    from_tag: Option<String>,
    to_tag: Option<String>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, server: Arc<Server>) -> Self {
        Session {
            session_id: session_id.into(),
            server,
            from_tag: None,
            to_tag: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.from_tag.as_deref()
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.to_tag.as_deref()
    }

    pub fn set_tags(&mut self, from_tag: Option<String>, to_tag: Option<String>) {
        self.from_tag = from_tag;
        self.to_tag = to_tag;
    }
}

/// Picks a server from the configured list.
///
/// Implementations must be cheap and safe to call from concurrent contexts;
/// the registry's list never changes after construction.
pub trait SelectionPolicy: Send + Sync {
    fn select(&self, servers: &[Arc<Server>]) -> Option<Arc<Server>>;
}

/// Always returns the first configured server.
#[derive(Debug, Default)]
pub struct FirstAvailable;

impl SelectionPolicy for FirstAvailable {
    fn select(&self, servers: &[Arc<Server>]) -> Option<Arc<Server>> {
        servers.first().cloned()
    }
}

/// Cycles through the configured servers.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl SelectionPolicy for RoundRobin {
    fn select(&self, servers: &[Arc<Server>]) -> Option<Arc<Server>> {
        if servers.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % servers.len();
        servers.get(index).cloned()
    }
}

/// Holds the configured server list and the selection policy.
pub struct ServerRegistry {
    servers: Vec<Arc<Server>>,
    policy: Box<dyn SelectionPolicy>,
}

impl ServerRegistry {
    /// Creates a registry with the default first-available policy.
    pub fn new(addrs: &[SocketAddr]) -> Self {
        Self::with_policy(addrs, Box::new(FirstAvailable))
    }

    pub fn with_policy(addrs: &[SocketAddr], policy: Box<dyn SelectionPolicy>) -> Self {
        ServerRegistry {
            servers: addrs.iter().map(|a| Arc::new(Server::new(*a))).collect(),
            policy,
        }
    }

    /// Returns the next server to use, per the configured policy.
    pub fn select(&self) -> Result<Arc<Server>> {
        self.policy
            .select(&self.servers)
            .ok_or(Error::NoServerAvailable)
    }

    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("servers", &self.servers)
            .finish()
    }
}
