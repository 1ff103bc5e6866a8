//! Two-node demo: each node hosts one "relay" module publishing on
//! channel 0. Node 0 subscribes to node 1's channel and vice versa; each
//! relay increments whatever count it receives and reposts it on its own
//! channel, so a single value keeps bouncing between the two nodes over
//! the network transport.
//!
//! Run two instances from separate terminals:
//!   RUST_LOG=info cargo run --example ring -- 0
//!   RUST_LOG=info cargo run --example ring -- 1

use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use mato::{Framework, ModuleType, SubscribeCallback, SubscriptionKind};
use mato_config::{NodeEntry, NodesConfig};

struct Relay;

impl ModuleType for Relay {
    fn number_of_channels(&self) -> u32 {
        1
    }

    fn create(&self, _global_id: u32) -> Box<dyn Any + Send + Sync> {
        Box::new(())
    }
}

fn ring_nodes() -> NodesConfig {
    NodesConfig {
        entries: vec![
            NodeEntry {
                node_id: 0,
                ip: Ipv4Addr::LOCALHOST,
                port: 17700,
                name: "ring0".to_owned(),
            },
            NodeEntry {
                node_id: 1,
                ip: Ipv4Addr::LOCALHOST,
                port: 17701,
                name: "ring1".to_owned(),
            },
        ],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let this_node: u32 = std::env::args()
        .nth(1)
        .expect("usage: ring <node_id 0|1>")
        .parse()?;
    let peer_node = 1 - this_node;

    mato::logs::init(
        std::path::Path::new("/tmp/mato-demo-logs"),
        &format!("ring_{this_node}"),
        true,
        log::LevelFilter::Info,
    )?;

    let framework = Framework::start(this_node, ring_nodes()).await?;
    framework.register_type("relay", Arc::new(Relay))?;
    let relay = framework.create_instance("relay", &format!("relay_{this_node}"))?;
    framework.start_all()?;

    // Give the reconnector a moment to establish the inter-node link
    // before subscribing to the peer's not-yet-announced module.
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Each node creates exactly one instance before this point, so it was
    // assigned local id 1 (local id 0 is reserved for the main program).
    let peer_gid = peer_node * mato::NODE_MULTIPLIER + 1;
    let framework_for_cb = framework.clone();
    framework.subscribe(
        relay,
        peer_gid,
        0,
        SubscriptionKind::Copy,
        SubscribeCallback::Data(Arc::new(move |_publisher, data| {
            let count = (&data[..]).read_u32::<LittleEndian>().unwrap_or(0);
            log::info!("node {this_node} relay got count={count}, forwarding {}", count + 1);
            let mut payload = Vec::with_capacity(4);
            let _ = payload.write_u32::<LittleEndian>(count + 1);
            framework_for_cb.post_data(relay, 0, payload);
        })),
    )?;

    if this_node == 0 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        log::info!("node 0 kicking off the ring");
        let mut payload = Vec::with_capacity(4);
        payload.write_u32::<LittleEndian>(0)?;
        framework.post_data(relay, 0, payload);
    }

    tokio::time::sleep(Duration::from_secs(10)).await;
    framework.shutdown().await;
    Ok(())
}
