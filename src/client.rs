//! RTPProxy client facade.
//!
//! Commands are fire-and-be-notified: every call registers a pending entry
//! before anything touches the network, and the outcome comes back through
//! the caller's listener exactly once. The only synchronous failures are
//! configuration, server selection, and the local send itself.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::callback::{AppData, CallbackHandler, CommandListener, CommandOutcome};
use crate::command::{Command, CookieGenerator, FROM_TAG, TO_TAG};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::pending::PendingTable;
use crate::session::{ServerRegistry, Session};
use crate::transport::{Transport, TransportEvent, UdpTransport};

/// Asynchronous RTPProxy control client.
///
/// Construction binds the UDP control socket and spawns the response
/// dispatch loop; [`close`](RtpProxyClient::close) tears both down and
/// fails every still-outstanding command.
pub struct RtpProxyClient {
    transport: Arc<dyn Transport>,
    table: PendingTable,
    registry: Arc<ServerRegistry>,
    cookies: CookieGenerator,
    command_timeout: Duration,
    closed: AtomicBool,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl RtpProxyClient {
    /// Creates a client from a validated configuration.
    ///
    /// Fails with [`Error::BindFailed`](crate::Error::BindFailed) if the
    /// local UDP port cannot be bound.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let registry = Arc::new(ServerRegistry::new(&config.servers));
        Self::with_registry(config, registry).await
    }

    /// Like [`new`](RtpProxyClient::new), but with a caller-built registry,
    /// e.g. to plug in a different selection policy.
    pub async fn with_registry(
        config: ClientConfig,
        registry: Arc<ServerRegistry>,
    ) -> Result<Self> {
        let (transport, events_rx) =
            UdpTransport::bind(config.bind_addr, Some(config.channel_capacity)).await?;
        Ok(Self::with_transport(
            Arc::new(transport),
            events_rx,
            registry,
            config.command_timeout,
        ))
    }

    /// Assembles a client from already-built parts.
    ///
    /// This is the seam for substituting transports: tests hand in a fake
    /// [`Transport`] and drive the event channel themselves.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        registry: Arc<ServerRegistry>,
        command_timeout: Duration,
    ) -> Self {
        let table = PendingTable::new();
        let handler = CallbackHandler::new(table.clone());
        let dispatch_task = spawn_dispatch_loop(events, handler);

        RtpProxyClient {
            transport,
            table,
            registry,
            cookies: CookieGenerator::new(),
            command_timeout,
            closed: AtomicBool::new(false),
            dispatch_task: Mutex::new(Some(dispatch_task)),
        }
    }

    /// Asynchronously creates a new session filled only with the callee
    /// media address.
    ///
    /// The command carries the fixed callee-leg tag and no to-tag; the
    /// caller leg of the same call is added later with
    /// [`update_session`](RtpProxyClient::update_session).
    ///
    /// Fails synchronously only when no server is available or the local
    /// send fails; every protocol-level outcome arrives via `listener`.
    pub async fn create_session(
        &self,
        session_id: &str,
        app_data: AppData,
        listener: Arc<dyn CommandListener>,
    ) -> Result<()> {
        let server = self.registry.select()?;
        let command = Command::update(&self.cookies, session_id, FROM_TAG, None);
        self.dispatch_command(command, server.addr(), app_data, listener)
            .await
    }

    /// Asynchronously creates the caller media address of an existing
    /// session.
    ///
    /// The tag pairing is the reverse of
    /// [`create_session`](RtpProxyClient::create_session)'s, which is what
    /// makes the server link both legs into one proxied call. Targets the
    /// server already bound to the session.
    pub async fn update_session(
        &self,
        session: &Session,
        app_data: AppData,
        listener: Arc<dyn CommandListener>,
    ) -> Result<()> {
        let command = Command::update(&self.cookies, session.session_id(), TO_TAG, Some(FROM_TAG));
        self.dispatch_command(command, session.server().addr(), app_data, listener)
            .await
    }

    /// Asynchronously destroys the given session, releasing its resources
    /// on the RTPProxy server.
    pub async fn destroy_session(
        &self,
        session: &Session,
        app_data: AppData,
        listener: Arc<dyn CommandListener>,
    ) -> Result<()> {
        let command = Command::destroy(&self.cookies, session.session_id(), TO_TAG, Some(FROM_TAG));
        self.dispatch_command(command, session.server().addr(), app_data, listener)
            .await
    }

    // Register first, then send: a reply can only arrive once the datagram
    // is out, but the entry must already be there when it does. A send
    // failure withdraws the fresh entry so the caller hears about it
    // exactly once, through the synchronous error.
    async fn dispatch_command(
        &self,
        command: Command,
        destination: SocketAddr,
        app_data: AppData,
        listener: Arc<dyn CommandListener>,
    ) -> Result<()> {
        let cookie = command.cookie.clone();
        let message = command.wire_message();

        self.table
            .register(command, app_data, listener, self.command_timeout)?;

        if let Err(e) = self.transport.send(&cookie, &message, destination).await {
            let _ = self.table.resolve(&cookie);
            return Err(e);
        }

        debug!("Command {} sent to {}: {}", cookie, destination, message);
        Ok(())
    }

    /// Number of commands still awaiting a reply or timeout.
    pub fn outstanding(&self) -> usize {
        self.table.len()
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Shuts the client down: stops the receive and dispatch loops and
    /// fails every still-pending command with a shutdown outcome.
    ///
    /// Idempotent; entries resolved before the close are not re-notified.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let transport_result = self.transport.close().await;

        if let Some(task) = self.dispatch_task.lock().take() {
            task.abort();
        }

        self.table.fail_all(CommandOutcome::Shutdown);

        transport_result
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RtpProxyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpProxyClient")
            .field("transport", &self.transport)
            .field("outstanding", &self.table.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// Consumes transport events until the transport closes or the channel
// drains. Replies are matched against the pending table; unmatched ones
// are logged and dropped inside the handler.
fn spawn_dispatch_loop(
    mut events: mpsc::Receiver<TransportEvent>,
    handler: CallbackHandler,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Starting response dispatch loop");

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::DatagramReceived {
                    cookie,
                    payload,
                    source,
                } => {
                    handler.on_response(&cookie, payload, source);
                }
                TransportEvent::Error { error } => {
                    warn!("Transport error: {}", error);
                }
                TransportEvent::Closed => {
                    debug!("Transport closed, stopping dispatch loop");
                    break;
                }
            }
        }

        debug!("Response dispatch loop stopped");
    })
}
