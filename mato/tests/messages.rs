//! Mirrors `original_source/mato/tests/06_messages`: a targeted
//! `send_message` reaches only its addressee, while `send_global_message`
//! reaches every other local instance.

use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mato::{Framework, ModuleType};
use mato_config::{NodeEntry, NodesConfig};

const MESSAGE_PRIME: i32 = 1;
const MESSAGE_DONE: i32 = 2;

struct Counter {
    prime_count: Arc<AtomicUsize>,
    done_count: Arc<AtomicUsize>,
}

impl ModuleType for Counter {
    fn number_of_channels(&self) -> u32 {
        0
    }

    fn create(&self, _global_id: u32) -> Box<dyn Any + Send + Sync> {
        Box::new(())
    }

    fn on_message(&self, _global_id: u32, _state: &(dyn Any + Send + Sync), _sender: u32, message_id: i32, _data: &[u8]) {
        match message_id {
            MESSAGE_PRIME => self.prime_count.fetch_add(1, Ordering::SeqCst),
            MESSAGE_DONE => self.done_count.fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };
    }
}

#[test_log::test(tokio::test)]
async fn targeted_message_reaches_only_its_addressee() {
    let nodes = NodesConfig {
        entries: vec![NodeEntry {
            node_id: 0,
            ip: Ipv4Addr::LOCALHOST,
            port: 18300,
            name: "solo".to_owned(),
        }],
    };
    let framework = Framework::start(0, nodes).await.unwrap();

    let prime_count = Arc::new(AtomicUsize::new(0));
    let done_count = Arc::new(AtomicUsize::new(0));
    framework
        .register_type(
            "counter",
            Arc::new(Counter {
                prime_count: prime_count.clone(),
                done_count: done_count.clone(),
            }),
        )
        .unwrap();

    let c1 = framework.create_instance("counter", "C1").unwrap();
    let c2 = framework.create_instance("counter", "C2").unwrap();
    framework.start_all().unwrap();

    framework.send_message(c1, c2, MESSAGE_PRIME, 7i32.to_le_bytes().to_vec()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(prime_count.load(Ordering::SeqCst), 1, "only C2 should have seen the targeted message");

    framework.send_global_message(c1, MESSAGE_DONE, vec![]);
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(done_count.load(Ordering::SeqCst), 1, "broadcast must skip the sender itself");

    framework.shutdown().await;
}
