//! Mirrors `original_source/mato/tests/04_A_B_with_borrowed_ptr`: a
//! `Borrowed`-kind subscriber must release every handle it receives, and
//! `buffer_usage` reflects the outstanding refcount in the meantime.

use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use mato::{Borrowed, Framework, ModuleType, SubscribeCallback, SubscriptionKind};
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

#[test_log::test(tokio::test)]
async fn borrowed_handle_must_be_released_to_drop_refcount() {
    let nodes = NodesConfig {
        entries: vec![NodeEntry {
            node_id: 0,
            ip: Ipv4Addr::LOCALHOST,
            port: 18120,
            name: "solo".to_owned(),
        }],
    };
    let framework = Framework::start(0, nodes).await.unwrap();
    framework.register_type("A", Arc::new(A)).unwrap();
    framework.register_type("B", Arc::new(B)).unwrap();

    let a = framework.create_instance("A", "A1").unwrap();
    let b = framework.create_instance("B", "B1").unwrap();
    framework.start_all().unwrap();

    let held: Arc<Mutex<Option<Borrowed>>> = Arc::new(Mutex::new(None));
    let held_cb = held.clone();
    framework
        .subscribe(
            b,
            a,
            0,
            SubscriptionKind::Borrowed,
            SubscribeCallback::Borrowed(Arc::new(move |_publisher, borrowed| {
                *held_cb.lock().unwrap() = Some(borrowed);
            })),
        )
        .unwrap();

    framework.post_data(a, 0, vec![1, 2, 3]);
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let (_count, refcount_while_held) = framework.buffer_usage(a, 0);
    assert!(refcount_while_held > 0, "the channel head is still referenced by the unreleased borrow");

    let borrowed = held.lock().unwrap().take().expect("callback delivered a borrow");
    assert_eq!(borrowed.as_slice(), &[1, 2, 3]);
    framework.release_data(borrowed).unwrap();

    framework.shutdown().await;
}
