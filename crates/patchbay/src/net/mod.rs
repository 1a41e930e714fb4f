//! TCP endpoint layer.
//!
//! Each connection is driven by two tasks: a writer task that owns the write
//! half and drains an unbounded outbound channel, and a reader task that
//! drains the frame codec and hands every decoded message to the dispatcher.
//! [`Connection::send`] therefore never blocks and is safe from any thread,
//! which is what lets the managers above this layer fan out while holding
//! their own state locks.
//!
//! When a connection dies (peer close, I/O error, or a framing error), the
//! reader task removes the wrapper from the server's connection map *before*
//! running the close hooks, so a hook never races a pending delete.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use patchbay_wire::{LvCodec, Message};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::StreamExt;
use tokio_util::codec::{Encoder, FramedRead};
use tracing::{debug, error, warn};

use crate::config::{ClientConfig, EndpointConfig};
use crate::dispatch::Dispatcher;
use crate::error::PatchbayError;

/// Stable identity of one live connection, unique within the process.
pub type ConnectionId = u64;

/// Hook invoked after a connection has fully closed.
pub type CloseHook = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

type ConnectionMap = Arc<Mutex<HashMap<ConnectionId, Arc<Connection>>>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

enum Outbound {
    Frame(Message),
    Shutdown,
}

/// Send handle for one TCP connection.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    connected: AtomicBool,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queues one message for transmission. Non-blocking; the writer task
    /// frames and writes it in queue order.
    pub fn send(&self, msg: Message) -> Result<(), PatchbayError> {
        if !self.is_connected() {
            return Err(PatchbayError::Disconnected);
        }
        self.outbound
            .send(Outbound::Frame(msg))
            .map_err(|_| PatchbayError::Disconnected)
    }

    /// Initiates shutdown: already-queued frames are flushed, then the write
    /// side closes. The reader observes the peer's close in due course.
    pub fn shutdown(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.outbound.send(Outbound::Shutdown);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn spawn_connection(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    close_hooks: Arc<Vec<CloseHook>>,
    registry: Option<ConnectionMap>,
    max_buffer: usize,
) -> Arc<Connection> {
    let peer = stream
        .peer_addr()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let conn = Arc::new(Connection {
        id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        peer,
        outbound: outbound_tx,
        connected: AtomicBool::new(true),
    });

    if let Some(registry) = &registry {
        registry
            .lock()
            .expect("connection map lock poisoned")
            .insert(conn.id(), conn.clone());
    }

    tokio::spawn(write_loop(write_half, outbound_rx));
    tokio::spawn(read_loop(
        read_half,
        conn.clone(),
        dispatcher,
        close_hooks,
        registry,
        max_buffer,
    ));
    conn
}

async fn write_loop(mut write: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    let mut codec = LvCodec::new();
    let mut buf = BytesMut::new();
    while let Some(op) = outbound.recv().await {
        match op {
            Outbound::Frame(msg) => {
                buf.clear();
                if let Err(err) = codec.encode(&msg, &mut buf) {
                    error!(%err, kind = msg.kind().as_str(), "dropping unencodable frame");
                    continue;
                }
                if write.write_all(&buf).await.is_err() {
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    let _ = write.shutdown().await;
}

async fn read_loop(
    read: OwnedReadHalf,
    conn: Arc<Connection>,
    dispatcher: Arc<Dispatcher>,
    close_hooks: Arc<Vec<CloseHook>>,
    registry: Option<ConnectionMap>,
    max_buffer: usize,
) {
    let mut frames = FramedRead::new(read, LvCodec::with_max_buffer(max_buffer));
    while let Some(next) = frames.next().await {
        match next {
            Ok(msg) => dispatcher.dispatch(&conn, msg),
            Err(err) => {
                warn!(conn = conn.id(), %err, "closing connection after frame error");
                break;
            }
        }
    }

    conn.shutdown();
    if let Some(registry) = registry {
        registry
            .lock()
            .expect("connection map lock poisoned")
            .remove(&conn.id());
    }
    debug!(conn = conn.id(), peer = %conn.peer_addr(), "connection closed");
    for hook in close_hooks.iter() {
        hook(&conn);
    }
}

/// Listening endpoint: accepts connections and drives them through a shared
/// dispatcher.
pub struct Endpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    close_hooks: Arc<Vec<CloseHook>>,
    connections: ConnectionMap,
    max_buffer: usize,
}

impl Endpoint {
    pub async fn bind(
        addr: &str,
        dispatcher: Arc<Dispatcher>,
        close_hooks: Vec<CloseHook>,
        config: &EndpointConfig,
    ) -> Result<Self, PatchbayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| PatchbayError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| PatchbayError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            local_addr,
            dispatcher,
            close_hooks: Arc::new(close_hooks),
            connections: Arc::new(Mutex::new(HashMap::new())),
            max_buffer: config.max_buffer,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .expect("connection map lock poisoned")
            .len()
    }

    /// Accept loop; runs until the listener fails.
    pub async fn serve(self) -> Result<(), PatchbayError> {
        loop {
            let (stream, peer) = self.listener.accept().await.map_err(PatchbayError::Accept)?;
            debug!(%peer, "accepted connection");
            spawn_connection(
                stream,
                self.dispatcher.clone(),
                self.close_hooks.clone(),
                Some(self.connections.clone()),
                self.max_buffer,
            );
        }
    }
}

/// Outbound TCP connection with the same reader/writer task plumbing as the
/// serving side.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    pub async fn connect(
        addr: &str,
        dispatcher: Arc<Dispatcher>,
        close_hooks: Vec<CloseHook>,
        config: &ClientConfig,
    ) -> Result<Self, PatchbayError> {
        let stream = match time::timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(PatchbayError::Connect {
                    addr: addr.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(PatchbayError::ConnectTimeout {
                    addr: addr.to_string(),
                    timeout: config.connect_timeout,
                })
            }
        };
        let conn = spawn_connection(
            stream,
            dispatcher,
            Arc::new(close_hooks),
            None,
            config.max_buffer,
        );
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn shutdown(&self) {
        self.conn.shutdown();
    }
}
