//! TLS message bus.
//!
//! One listening endpoint plus any number of dialed peers, all speaking
//! 4-byte length-prefixed frames over TLS. `send` fans a frame out to every
//! live connection without blocking the caller; received frames from all
//! connections funnel into a single stream. Peers that fail or fall behind
//! are dropped individually; the bus itself keeps running.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsStream;

use centime_shared::constants::MAX_FRAME_SIZE;

use crate::error::Result;
use crate::identity::TlsIdentity;

/// Outbound frames queued per connection before we consider the peer stuck
/// and start dropping frames for it.
const CONN_SEND_QUEUE: usize = 64;

/// How many inbound frames may queue before readers stall.
const INBOUND_QUEUE: usize = 256;

type ConnMap = Arc<Mutex<HashMap<u64, mpsc::Sender<Arc<[u8]>>>>>;

#[derive(Clone)]
pub struct Bus {
    acceptor: tokio_rustls::TlsAcceptor,
    connector: tokio_rustls::TlsConnector,
    conns: ConnMap,
    next_id: Arc<AtomicU64>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
}

impl Bus {
    /// Build a bus around the process TLS identity. The returned receiver
    /// is the single stream of frames from all connections.
    pub fn new(identity: &TlsIdentity) -> Result<(Self, mpsc::Receiver<Vec<u8>>)> {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        Ok((
            Self {
                acceptor: identity.acceptor()?,
                connector: identity.connector()?,
                conns: Arc::new(Mutex::new(HashMap::new())),
                next_id: Arc::new(AtomicU64::new(0)),
                inbound_tx,
            },
            inbound_rx,
        ))
    }

    /// Bind the listening endpoint and start accepting peers.
    pub async fn listen(&self, port: u16) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "bus listening");

        let bus = self.clone();
        tokio::spawn(async move {
            loop {
                let (tcp, remote) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let bus = bus.clone();
                tokio::spawn(async move {
                    match bus.acceptor.accept(tcp).await {
                        Ok(stream) => {
                            tracing::info!(peer = %remote, "peer connected");
                            bus.register(remote, TlsStream::Server(stream));
                        }
                        Err(e) => {
                            tracing::warn!(peer = %remote, error = %e, "TLS accept failed");
                        }
                    }
                });
            }
        });

        Ok(local_addr)
    }

    /// Dial a peer discovered through the rendezvous. Failures drop this
    /// address only; the DHT will re-emit it if the peer is still around.
    pub async fn dial(&self, addr: SocketAddr) -> Result<()> {
        let tcp = TcpStream::connect(addr).await?;
        // Nobody verifies the name; the peer's IP is as good as any.
        let server_name = rustls::pki_types::ServerName::from(addr.ip());
        let stream = self.connector.connect(server_name, tcp).await?;

        tracing::info!(peer = %addr, "connected to peer");
        self.register(addr, TlsStream::Client(stream));
        Ok(())
    }

    /// Broadcast one frame to every live connection. Never blocks; peers
    /// with a full send queue lose this frame (the periodic full sync
    /// heals replication gaps).
    pub fn send(&self, frame: &[u8]) {
        let frame: Arc<[u8]> = frame.into();
        let mut dead = Vec::new();
        {
            let conns = match self.conns.lock() {
                Ok(conns) => conns,
                Err(_) => return,
            };
            for (id, tx) in conns.iter() {
                match tx.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(conn = id, "peer send queue full, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }
        for id in dead {
            self.remove(id);
        }
    }

    /// Number of currently live connections.
    pub fn connection_count(&self) -> usize {
        self.conns.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn register(&self, remote: SocketAddr, stream: TlsStream<TcpStream>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Arc<[u8]>>(CONN_SEND_QUEUE);

        if let Ok(mut conns) = self.conns.lock() {
            conns.insert(id, outbound_tx);
        }

        let (mut read_half, mut write_half) = tokio::io::split(stream);

        // Reader: forward frames into the shared inbound stream.
        let inbound_tx = self.inbound_tx.clone();
        let bus = self.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(frame)) => {
                        if inbound_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!(peer = %remote, "peer closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(peer = %remote, error = %e, "read failed, dropping peer");
                        break;
                    }
                }
            }
            bus.remove(id);
        });

        // Writer: drain the per-connection queue.
        let bus = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut write_half, &frame).await {
                    tracing::warn!(peer = %remote, error = %e, "write failed, dropping peer");
                    break;
                }
            }
            bus.remove(id);
        });
    }

    fn remove(&self, id: u64) {
        if let Ok(mut conns) = self.conns.lock() {
            conns.remove(&id);
        }
    }
}

/// Read one length-prefixed frame. `Ok(None)` is a clean EOF at a frame
/// boundary.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} out of bounds"),
        ));
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(frame.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large to send")
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await
}
