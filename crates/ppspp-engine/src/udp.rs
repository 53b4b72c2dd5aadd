//! UDP transport.
//!
//! One socket per transport. A receive loop decodes inbound datagrams and
//! hands them to the engine; a send worker drains an unbounded queue so
//! `send_datagram` never blocks the caller. Both stop on `shutdown()` (or when
//! the transport is dropped).
//!
//! Peer identity is the socket address (`udp/<ip>:<port>`). UDP has no
//! connection setup: `connect` only resolves the peer's address, and the first
//! datagram from an address implicitly connects its sender.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::{broadcast, mpsc};

use ppspp_core::wire::MAX_DATAGRAM_SIZE;
use ppspp_core::{Datagram, PeerId};

use crate::transport::{Address, DatagramHandler, Transport, TransportError};

/// Bytes of a malformed datagram included in the warning.
const HEX_PREVIEW: usize = 32;

/// Identity of the peer bound at `addr`.
pub fn peer_id_for(addr: SocketAddr) -> PeerId {
    PeerId::new(format!("udp/{addr}"))
}

type Connections = Arc<DashMap<PeerId, SocketAddr>>;
type ReverseMap = Arc<DashMap<SocketAddr, PeerId>>;

pub struct UdpTransport {
    id: PeerId,
    local_addr: SocketAddr,
    book: DashMap<PeerId, Vec<Address>>,
    by_addr: ReverseMap,
    connected: Connections,
    handler: Arc<OnceLock<DatagramHandler>>,
    outbound: mpsc::UnboundedSender<(SocketAddr, Bytes)>,
    shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Bind and start the receive loop and send worker on the current runtime.
    /// Socket failures surface as [`TransportError::Io`].
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Arc<Self>, TransportError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let transport = Arc::new(Self {
            id: peer_id_for(local_addr),
            local_addr,
            book: DashMap::new(),
            by_addr: Arc::new(DashMap::new()),
            connected: Arc::new(DashMap::new()),
            handler: Arc::new(OnceLock::new()),
            outbound,
            shutdown_tx,
            closed: AtomicBool::new(false),
        });

        let recv = RecvLoop {
            socket: Arc::clone(&socket),
            handler: Arc::clone(&transport.handler),
            by_addr: Arc::clone(&transport.by_addr),
            connected: Arc::clone(&transport.connected),
            shutdown: transport.shutdown_tx.subscribe(),
        };
        let send = SendWorker {
            socket,
            outbound_rx,
            shutdown: transport.shutdown_tx.subscribe(),
        };
        tokio::spawn(recv.run());
        tokio::spawn(send.run());

        tracing::info!(addr = %local_addr, "UDP transport bound");
        Ok(transport)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop both background tasks. Later sends fail with `Closed`.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
    }

    fn resolve(&self, remote: &PeerId) -> Result<SocketAddr, TransportError> {
        let addrs = self
            .book
            .get(remote)
            .map(|a| a.value().clone())
            .ok_or_else(|| TransportError::NoAddress(remote.clone()))?;
        let first = addrs
            .first()
            .ok_or_else(|| TransportError::NoAddress(remote.clone()))?;
        addrs
            .iter()
            .find_map(|a| a.as_str().parse::<SocketAddr>().ok())
            .ok_or_else(|| TransportError::InvalidAddress(first.clone()))
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Transport for UdpTransport {
    fn identity(&self) -> PeerId {
        self.id.clone()
    }

    fn addresses(&self) -> Vec<Address> {
        vec![Address::new(self.local_addr.to_string())]
    }

    fn add_addresses(&self, remote: &PeerId, addrs: Vec<Address>) {
        let mut known = self.book.entry(remote.clone()).or_default();
        for addr in addrs {
            if !known.contains(&addr) {
                known.push(addr);
            }
        }
    }

    fn connect(&self, remote: &PeerId) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let addr = self.resolve(remote)?;
        self.by_addr.insert(addr, remote.clone());
        self.connected.insert(remote.clone(), addr);
        tracing::debug!(%remote, %addr, "UDP peer connected");
        Ok(())
    }

    fn disconnect(&self, remote: &PeerId) -> Result<(), TransportError> {
        if self.connected.remove(remote).is_some() {
            tracing::debug!(%remote, "UDP peer disconnected");
        }
        Ok(())
    }

    fn send_datagram(&self, datagram: &Datagram, remote: &PeerId) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let addr = self
            .connected
            .get(remote)
            .map(|a| *a.value())
            .ok_or_else(|| TransportError::NotConnected(remote.clone()))?;
        let bytes = datagram.to_bytes()?;
        self.outbound
            .send((addr, bytes))
            .map_err(|_| TransportError::Closed)
    }

    fn set_datagram_handler(&self, handler: DatagramHandler) {
        if self.handler.set(handler).is_err() {
            tracing::warn!(peer = %self.id, "datagram handler already set, ignoring");
        }
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

struct RecvLoop {
    socket: Arc<UdpSocket>,
    handler: Arc<OnceLock<DatagramHandler>>,
    by_addr: ReverseMap,
    connected: Connections,
    shutdown: broadcast::Receiver<()>,
}

impl RecvLoop {
    async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("UDP receive loop shutting down");
                    return;
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, src) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    self.on_datagram(&buf[..len], src);
                }
            }
        }
    }

    fn on_datagram(&self, data: &[u8], src: SocketAddr) {
        let datagram = match Datagram::from_bytes(data) {
            Ok(d) => d,
            Err(e) => {
                let preview = &data[..data.len().min(HEX_PREVIEW)];
                tracing::warn!(
                    %src,
                    len = data.len(),
                    bytes = %hex::encode(preview),
                    error = %e,
                    "dropping malformed datagram"
                );
                return;
            }
        };

        let remote = self
            .by_addr
            .entry(src)
            .or_insert_with(|| peer_id_for(src))
            .value()
            .clone();
        if !self.connected.contains_key(&remote) {
            tracing::debug!(%remote, %src, "inbound datagram, peer implicitly connected");
            self.connected.insert(remote.clone(), src);
        }

        match self.handler.get() {
            Some(handler) => handler(datagram, remote),
            None => tracing::trace!(%remote, "no handler registered, datagram discarded"),
        }
    }
}

struct SendWorker {
    socket: Arc<UdpSocket>,
    outbound_rx: mpsc::UnboundedReceiver<(SocketAddr, Bytes)>,
    shutdown: broadcast::Receiver<()>,
}

impl SendWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("UDP send worker shutting down");
                    return;
                }

                msg = self.outbound_rx.recv() => {
                    let Some((addr, bytes)) = msg else {
                        tracing::info!("outbound queue closed, send worker exiting");
                        return;
                    };
                    if let Err(e) = self.socket.send_to(&bytes, addr).await {
                        tracing::warn!(%addr, error = %e, "send_to failed");
                    }
                }
            }
        }
    }
}
