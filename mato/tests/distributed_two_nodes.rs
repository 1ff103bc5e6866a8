//! Mirrors `original_source/mato/tests/05_distributed_AB`: module A lives
//! on node 0, module B lives on node 1, and B's subscription to A's
//! channel crosses the TCP transport in `mato::net`.

use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mato::{Framework, ModuleType, SubscribeCallback, SubscriptionKind};
use mato_config::{NodeEntry, NodesConfig};

struct A;

impl ModuleType for A {
    fn number_of_channels(&self) -> u32 {
        1
    }

    fn create(&self, _global_id: u32) -> Box<dyn Any + Send + Sync> {
        Box::new(())
    }
}

struct B;

impl ModuleType for B {
    fn number_of_channels(&self) -> u32 {
        0
    }

    fn create(&self, _global_id: u32) -> Box<dyn Any + Send + Sync> {
        Box::new(())
    }
}

fn two_node_cluster(port0: u16, port1: u16) -> NodesConfig {
    NodesConfig {
        entries: vec![
            NodeEntry {
                node_id: 0,
                ip: Ipv4Addr::LOCALHOST,
                port: port0,
                name: "node0".to_owned(),
            },
            NodeEntry {
                node_id: 1,
                ip: Ipv4Addr::LOCALHOST,
                port: port1,
                name: "node1".to_owned(),
            },
        ],
    }
}

#[test_log::test(tokio::test)]
async fn remote_subscriber_receives_posted_data_over_the_wire() {
    let nodes = two_node_cluster(18200, 18201);

    let node0 = Framework::start(0, nodes.clone()).await.unwrap();
    let node1 = Framework::start(1, nodes).await.unwrap();

    node0.register_type("A", Arc::new(A)).unwrap();
    node1.register_type("B", Arc::new(B)).unwrap();

    let a = node0.create_instance("A", "A1").unwrap();
    node0.start_all().unwrap();

    // Let the reconnector establish the node0<->node1 link and replay
    // node0's module directory before B subscribes to it. Both nodes are
    // already listening by this point, but node0's first dial attempt may
    // have started (and failed) before node1's listener was bound, so this
    // spans a full retry cycle of the 1-second reconnect loop.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let b = node1.create_instance("B", "B1").unwrap();
    node1.start_all().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let last_seen = Arc::new(AtomicI32::new(-1));
    let last_seen_cb = last_seen.clone();
    node1
        .subscribe(
            b,
            a,
            0,
            SubscriptionKind::Copy,
            SubscribeCallback::Data(Arc::new(move |_publisher, data| {
                last_seen_cb.store(i32::from_le_bytes(data.try_into().unwrap()), Ordering::SeqCst);
            })),
        )
        .unwrap();
    // Give the Subscribe (M3) frame time to reach node0.
    tokio::time::sleep(Duration::from_millis(100)).await;

    node0.post_data(a, 0, 42i32.to_le_bytes().to_vec());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(last_seen.load(Ordering::SeqCst), 42);

    // get_data also works remotely, independent of any subscription.
    assert_eq!(node1.get_data(a, 0).await.unwrap(), 42i32.to_le_bytes().to_vec());

    node0.shutdown().await;
    node1.shutdown().await;
}
