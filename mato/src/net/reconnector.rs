//! The outbound side of the transport: dial every configured peer with a
//! higher node id until it is connected, retrying once a second for
//! whichever aren't yet online.
//!
//! Grounded in `original_source/mato/mato_net.c`'s `reconnecting_thread`:
//! the `node_id = this_node_id + 1 .. nodes->len` loop (at most one
//! connection per unordered pair), the raw-`int32` handshake sent
//! immediately after `connect()`, and the one-second retry sleep.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::net::receiver::register_connection;
use crate::net::{Connections, PeerTable};
use crate::registry::Registry;
use crate::shutdown::{Shutdown, ThreadCountGuard};

pub(crate) fn spawn(
    peers: PeerTable,
    registry: Arc<std::sync::Mutex<Registry>>,
    connections: Arc<Connections>,
    shutdown: Arc<Shutdown>,
    post_tx: crate::redistribute::PostedSender,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let _guard = ThreadCountGuard::system(&shutdown);
        while shutdown.is_running() {
            for (node_id, addr) in peers.dial_targets() {
                if connections.is_online(node_id) {
                    continue;
                }
                let _lock = connections.connect_guard().await;
                if connections.is_online(node_id) {
                    continue;
                }
                match try_connect(peers.self_node, node_id, addr).await {
                    Ok(stream) => {
                        info!("connected to node {node_id}");
                        register_connection(
                            node_id,
                            stream,
                            registry.clone(),
                            connections.clone(),
                            shutdown.clone(),
                            post_tx.clone(),
                        );
                    }
                    Err(e) => {
                        warn!("could not connect to node {node_id} at {addr}: {e}");
                    }
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
}

async fn try_connect(
    self_node: u32,
    _node_id: u32,
    addr: std::net::SocketAddrV4,
) -> mato_common::Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_i32_le(self_node as i32).await?;
    Ok(stream)
}
