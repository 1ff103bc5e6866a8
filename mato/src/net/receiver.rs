//! Inbound side of the transport: the listening-socket accept loop and the
//! per-connection read task.
//!
//! Grounded in `original_source/mato/mato_net.c`'s
//! `handle_incomming_connections` (accept, then read the raw handshake
//! `int32`) and `communication_thread`'s `select()` loop, replaced one
//! task per connection instead of a single thread multiplexing every fd
//! with `select()` (Design Notes).

use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use crate::net::dispatch::Dispatcher;
use crate::net::wire::Frame;
use crate::net::{spawn_writer, wrap_streams, Connections};
use crate::registry::Registry;
use crate::shutdown::{Shutdown, ThreadCountGuard};

/// Binds `bind_addr` and accepts incoming peer connections until shutdown.
pub(crate) async fn spawn_acceptor(
    bind_addr: SocketAddr,
    registry: Arc<std::sync::Mutex<Registry>>,
    connections: Arc<Connections>,
    shutdown: Arc<Shutdown>,
    post_tx: crate::redistribute::PostedSender,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let listener = TcpListener::bind(bind_addr).await?;
    let mut run_rx = shutdown.subscribe();
    Ok(tokio::spawn(async move {
        let _guard = ThreadCountGuard::system(&shutdown);
        loop {
            tokio::select! {
                _ = run_rx.changed() => {
                    if !*run_rx.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let Ok((stream, peer_addr)) = accepted else { continue };
                    if let Err(e) = handshake_and_spawn(
                        stream,
                        registry.clone(),
                        connections.clone(),
                        shutdown.clone(),
                        post_tx.clone(),
                    )
                    .await
                    {
                        warn!("handshake with {peer_addr} failed: {e}");
                    }
                }
            }
        }
    }))
}

/// Reads the connecting peer's raw node-id handshake int32, registers the
/// connection, and spawns its read loop. Shared by both the accept path
/// here and `reconnector`'s outbound-connect path (the handshake byte
/// layout is identical in both directions; only who speaks first differs).
pub(crate) async fn handshake_and_spawn(
    mut stream: tokio::net::TcpStream,
    registry: Arc<std::sync::Mutex<Registry>>,
    connections: Arc<Connections>,
    shutdown: Arc<Shutdown>,
    post_tx: crate::redistribute::PostedSender,
) -> mato_common::Result<()> {
    let peer_node = stream.read_i32_le().await? as u32;
    info!("connection from node {peer_node}");
    register_connection(peer_node, stream, registry, connections, shutdown, post_tx);
    Ok(())
}

pub(crate) fn register_connection(
    peer_node: u32,
    stream: tokio::net::TcpStream,
    registry: Arc<std::sync::Mutex<Registry>>,
    connections: Arc<Connections>,
    shutdown: Arc<Shutdown>,
    post_tx: crate::redistribute::PostedSender,
) {
    let (read_half, write_half) = wrap_streams(stream);
    let writer_tx = spawn_writer(write_half);
    connections.register(peer_node, writer_tx);

    // Tell the new peer about every module we already host (spec §4.5:
    // M1 is replayed to a peer immediately after connecting, whichever
    // side dialed).
    replay_local_modules(&registry, &connections, peer_node);

    let dispatcher = Dispatcher {
        registry: registry.clone(),
        connections: connections.clone(),
        post_tx,
    };
    tokio::spawn(read_loop(peer_node, read_half, dispatcher, registry, connections, shutdown));
}

pub(crate) fn replay_local_modules(
    registry: &Arc<std::sync::Mutex<Registry>>,
    connections: &Arc<Connections>,
    peer_node: u32,
) {
    let modules = registry.lock().unwrap().local_modules();
    for (local_module_id, name, type_name, number_of_channels) in modules {
        let _ = connections.send(
            peer_node,
            Frame::NewModuleInstance {
                local_module_id,
                name,
                type_name,
                number_of_channels,
            },
        );
    }
}

async fn read_loop(
    peer_node: u32,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    dispatcher: Dispatcher,
    registry: Arc<std::sync::Mutex<Registry>>,
    connections: Arc<Connections>,
    shutdown: Arc<Shutdown>,
) {
    let _guard = ThreadCountGuard::system(&shutdown);
    loop {
        match Frame::decode_async(&mut read_half).await {
            Ok(frame) => dispatcher.handle(peer_node, frame),
            Err(_) => break,
        }
    }
    warn!("node {peer_node} has disconnected");
    connections.remove(peer_node);
    registry.lock().unwrap().disconnect_node(peer_node);
}
