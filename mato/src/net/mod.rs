//! Inter-node transport (spec §6, C5): wire framing ([`wire`]), the
//! reconnecting outbound-connection thread ([`reconnector`]), and the
//! accept/read loop for inbound connections ([`receiver`]).
//!
//! Grounded in `original_source/mato/mato_net.c`: one TCP connection per
//! node pair (the lower-id node always dials the higher-id node, avoiding
//! the double-connect the original solves with the same `node_id >
//! this_node_id` rule in `reconnecting_thread`), a raw little-endian `i32`
//! handshake (the connecting side writes its own node id immediately after
//! `connect()`), and `select()`'s role replaced by giving every connection
//! its own framework-owned read task — the natural async-Rust equivalent
//! (Design Notes: "select() loop over raw fds -> per-connection tokio
//! task").

pub(crate) mod dispatch;
pub(crate) mod reconnector;
pub(crate) mod receiver;
pub(crate) mod wire;

use std::collections::HashMap;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use mato_common::{Error, Result};

use wire::Frame;

/// One outbound write queue per connected peer. A dedicated writer task
/// drains it and owns the `TcpStream`'s write half, so `send` never blocks
/// on I/O and callers never need to hold a lock across an `await`.
pub(crate) struct Connections {
    self_node: u32,
    writers: DashMap<u32, mpsc::UnboundedSender<Frame>>,
    /// Outstanding `GET_DATA` round trips keyed by the id we minted for
    /// them, resolved when the matching `MSG_DATA` frame arrives.
    pending_get_data: DashMap<u32, oneshot::Sender<Vec<u8>>>,
    next_get_data_id: std::sync::atomic::AtomicU32,
    /// Serializes connection attempts to the same peer racing between the
    /// reconnector and an inbound accept.
    connect_lock: AsyncMutex<()>,
}

impl Connections {
    pub fn new(self_node: u32) -> Self {
        Self {
            self_node,
            writers: DashMap::new(),
            pending_get_data: DashMap::new(),
            next_get_data_id: std::sync::atomic::AtomicU32::new(0),
            connect_lock: AsyncMutex::new(()),
        }
    }

    pub fn is_online(&self, node_id: u32) -> bool {
        self.writers.contains_key(&node_id)
    }

    pub fn register(&self, node_id: u32, tx: mpsc::UnboundedSender<Frame>) {
        self.writers.insert(node_id, tx);
    }

    pub fn remove(&self, node_id: u32) {
        self.writers.remove(&node_id);
    }

    pub fn send(&self, node_id: u32, frame: Frame) -> Result<()> {
        let tx = self
            .writers
            .get(&node_id)
            .ok_or(Error::NodeOffline(node_id))?;
        tx.send(frame).map_err(|_| Error::NodeOffline(node_id))
    }

    pub fn broadcast(&self, frame: Frame) {
        for entry in self.writers.iter() {
            let _ = entry.value().send(frame.clone());
        }
    }

    pub async fn connect_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.connect_lock.lock().await
    }

    pub fn new_get_data_id(&self) -> u32 {
        self.next_get_data_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    pub fn register_pending_get_data(&self, id: u32, tx: oneshot::Sender<Vec<u8>>) {
        self.pending_get_data.insert(id, tx);
    }

    pub fn resolve_get_data(&self, id: u32, data: Vec<u8>) {
        if let Some((_, tx)) = self.pending_get_data.remove(&id) {
            let _ = tx.send(data);
        }
    }

    pub fn self_node(&self) -> u32 {
        self.self_node
    }
}

/// Spawns a writer task owning a connection's write half, pulling encoded
/// frames off an mpsc queue. Returns the sender end to register with
/// [`Connections`].
pub(crate) fn spawn_writer(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
) -> mpsc::UnboundedSender<Frame> {
    use tokio::io::AsyncWriteExt;
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let bytes = frame.encode();
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });
    tx
}

/// Per-peer metadata needed to dial out: address and ordering relative to
/// `self_node`.
#[derive(Clone)]
pub(crate) struct PeerTable {
    pub self_node: u32,
    pub peers: HashMap<u32, std::net::SocketAddrV4>,
}

impl PeerTable {
    pub fn from_config(self_node: u32, config: &mato_config::NodesConfig) -> Self {
        let peers = config
            .entries
            .iter()
            .filter(|e| e.node_id != self_node)
            .map(|e| (e.node_id, std::net::SocketAddrV4::new(e.ip, e.port)))
            .collect();
        Self { self_node, peers }
    }

    /// Only dial peers with a higher id, matching
    /// `reconnecting_thread`'s `node_id = this_node_id + 1 .. nodes->len`
    /// loop — gives at most one connection per unordered pair.
    pub fn dial_targets(&self) -> impl Iterator<Item = (u32, std::net::SocketAddrV4)> + '_ {
        self.peers
            .iter()
            .filter(move |(id, _)| **id > self.self_node)
            .map(|(id, addr)| (*id, *addr))
    }
}

pub(crate) fn wrap_streams(
    stream: tokio::net::TcpStream,
) -> (
    tokio::net::tcp::OwnedReadHalf,
    tokio::net::tcp::OwnedWriteHalf,
) {
    stream.into_split()
}
