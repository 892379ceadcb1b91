//! UDP transport for RTPProxy control datagrams.
//!
//! One socket carries all outstanding commands. A dedicated receive loop
//! splits each inbound datagram into `(cookie, payload)` and forwards it to
//! the response dispatcher through an event channel; malformed datagrams
//! are dropped without terminating the loop.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

// Maximum UDP payload size
const MAX_UDP_PACKET_SIZE: usize = 65_507;
// Buffer size for receiving packets
const UDP_BUFFER_SIZE: usize = 8192;
// Default event channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Events emitted by a transport's receive loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A well-formed control datagram arrived.
    DatagramReceived {
        /// Correlation cookie, the first space-separated field.
        cookie: String,
        /// Remainder of the datagram, opaque to the transport.
        payload: String,
        /// Address the datagram came from.
        source: SocketAddr,
    },

    /// A receive-side error occurred; the loop keeps running.
    Error { error: String },

    /// The transport was closed and the receive loop has stopped.
    Closed,
}

/// Transport capability consumed by the client.
///
/// `send` must not block waiting on the network beyond the datagram write
/// itself, and a synchronous send failure is surfaced as an error rather
/// than retried; timeout handling belongs to the pending table.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Local address of the underlying socket.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Frames `"<cookie> <message>"` into a single datagram and sends it.
    async fn send(&self, cookie: &str, message: &str, destination: SocketAddr) -> Result<()>;

    /// Closes the transport, stopping the receive loop deterministically.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// UDP transport for RTPProxy control messages
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: UdpSocket,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    receiver_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::BindFailed(addr, e))?;

        let local_addr = socket.local_addr()?;
        info!("RTPProxy control transport bound to {}", local_addr);

        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket,
                closed: AtomicBool::new(false),
                events_tx,
                receiver_task: Mutex::new(None),
            }),
        };

        transport.spawn_receive_loop();

        Ok((transport, events_rx))
    }

    // Spawns the task that receives datagrams from the UDP socket
    fn spawn_receive_loop(&self) {
        let transport = self.clone();
        let task = tokio::spawn(async move {
            let inner = &transport.inner;
            let mut buffer = vec![0u8; UDP_BUFFER_SIZE];

            while !inner.closed.load(Ordering::Relaxed) {
                let (len, src) = match inner.socket.recv_from(&mut buffer).await {
                    Ok((len, src)) => (len, src),
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }

                        warn!("Error receiving UDP datagram: {}", e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("Error receiving datagram: {}", e),
                            })
                            .await;
                        continue;
                    }
                };

                let packet = Bytes::copy_from_slice(&buffer[..len]);
                trace!("Received datagram from {}: {:?}", src, packet);

                // Frame is "<cookie> <payload>". Anything that does not
                // split is malformed and dropped; one corrupt datagram
                // must never take the loop down.
                let text = match std::str::from_utf8(&packet) {
                    Ok(text) => text.trim_end(),
                    Err(_) => {
                        debug!("Discarding non-UTF-8 datagram from {}", src);
                        continue;
                    }
                };

                let (cookie, payload) = match text.split_once(' ') {
                    Some(parts) => parts,
                    None => {
                        debug!("Discarding malformed datagram from {}: {:?}", src, text);
                        continue;
                    }
                };
                if cookie.is_empty() {
                    debug!("Discarding datagram with empty cookie from {}", src);
                    continue;
                }

                let event = TransportEvent::DatagramReceived {
                    cookie: cookie.to_string(),
                    payload: payload.trim().to_string(),
                    source: src,
                };

                if inner.events_tx.send(event).await.is_err() {
                    debug!("Event channel closed, stopping receive loop");
                    break;
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
        });

        *self.inner.receiver_task.lock() = Some(task);
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.socket.local_addr().map_err(Error::from)
    }

    async fn send(&self, cookie: &str, message: &str, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let datagram = format!("{} {}", cookie, message);
        let bytes = datagram.as_bytes();

        if bytes.len() > MAX_UDP_PACKET_SIZE {
            return Err(Error::PacketTooLarge(bytes.len(), MAX_UDP_PACKET_SIZE));
        }

        self.inner
            .socket
            .send_to(bytes, destination)
            .await
            .map_err(|e| Error::SendFailed(destination, e))?;

        trace!("Sent command to {}: {}", destination, datagram);

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        // Abort the receiver rather than waiting for a stray packet to wake
        // it; recv_from would otherwise keep the task parked indefinitely.
        if let Some(task) = self.inner.receiver_task.lock().take() {
            task.abort();
        }

        let _ = self.inner.events_tx.send(TransportEvent::Closed).await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(addr) = self.inner.socket.local_addr() {
            write!(f, "UdpTransport({})", addr)
        } else {
            write!(f, "UdpTransport(<error>)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    async fn recv_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_send_and_receive_datagram() {
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (sender, _sender_rx) = UdpTransport::bind(bind, None).await.unwrap();
        let (receiver, mut receiver_rx) = UdpTransport::bind(bind, None).await.unwrap();

        let dest = receiver.local_addr().unwrap();
        sender.send("c0ffee", "U call-x 0 0 fromtag 0", dest).await.unwrap();

        match recv_event(&mut receiver_rx).await {
            TransportEvent::DatagramReceived { cookie, payload, source } => {
                assert_eq!(cookie, "c0ffee");
                assert_eq!(payload, "U call-x 0 0 fromtag 0");
                assert_eq!(source, sender.local_addr().unwrap());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_datagram_does_not_kill_loop() {
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (receiver, mut receiver_rx) = UdpTransport::bind(bind, None).await.unwrap();
        let dest = receiver.local_addr().unwrap();

        let raw = UdpSocket::bind(bind).await.unwrap();
        // No space separator, then a non-UTF-8 blob; both must be dropped.
        raw.send_to(b"nocookiehere", dest).await.unwrap();
        raw.send_to(&[0xff, 0xfe, 0x20, 0xff], dest).await.unwrap();
        raw.send_to(b"abc 42", dest).await.unwrap();

        match recv_event(&mut receiver_rx).await {
            TransportEvent::DatagramReceived { cookie, payload, .. } => {
                assert_eq!(cookie, "abc");
                assert_eq!(payload, "42");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_stops_receive_loop() {
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (transport, mut events_rx) = UdpTransport::bind(bind, None).await.unwrap();

        transport.close().await.unwrap();
        assert!(transport.is_closed());

        match recv_event(&mut events_rx).await {
            TransportEvent::Closed => {}
            other => panic!("unexpected event: {:?}", other),
        }

        // Sending on a closed transport fails synchronously.
        let dest: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            transport.send("c1", "U x 0 0 fromtag 0", dest).await,
            Err(Error::TransportClosed)
        ));

        // Second close is a no-op.
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_datagram_rejected() {
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (transport, _rx) = UdpTransport::bind(bind, None).await.unwrap();
        let dest: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let huge = "x".repeat(MAX_UDP_PACKET_SIZE + 1);
        assert!(matches!(
            transport.send("c1", &huge, dest).await,
            Err(Error::PacketTooLarge(_, _))
        ));
    }
}
