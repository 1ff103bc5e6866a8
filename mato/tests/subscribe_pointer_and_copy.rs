//! Mirrors `original_source/mato/tests/02_modules_A_B` (pointer delivery)
//! and `03_A_B_with_copy` (copy delivery): module B subscribes to module
//! A's channel 0 and reacts to every posted value.

use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

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
        1
    }

    fn create(&self, _global_id: u32) -> Box<dyn Any + Send + Sync> {
        Box::new(())
    }
}

fn solo_node(port: u16) -> NodesConfig {
    NodesConfig {
        entries: vec![NodeEntry {
            node_id: 0,
            ip: Ipv4Addr::LOCALHOST,
            port,
            name: "solo".to_owned(),
        }],
    }
}

#[test_log::test(tokio::test)]
async fn pointer_subscription_sees_every_posted_value() {
    let framework = Framework::start(0, solo_node(18110)).await.unwrap();
    framework.register_type("A", Arc::new(A)).unwrap();
    framework.register_type("B", Arc::new(B)).unwrap();

    let a = framework.create_instance("A", "A1").unwrap();
    let b = framework.create_instance("B", "B1").unwrap();
    framework.start_all().unwrap();

    let last_seen = Arc::new(AtomicI32::new(-1));
    let last_seen_cb = last_seen.clone();
    let sub_id = framework
        .subscribe(
            b,
            a,
            0,
            SubscriptionKind::Pointer,
            SubscribeCallback::Data(Arc::new(move |_publisher, data| {
                last_seen_cb.store(i32::from_le_bytes(data.try_into().unwrap()), Ordering::SeqCst);
            })),
        )
        .unwrap();

    for i in 0..5i32 {
        framework.post_data(a, 0, i.to_le_bytes().to_vec());
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(last_seen.load(Ordering::SeqCst), 4);

    framework.unsubscribe(a, 0, sub_id).unwrap();
    framework.post_data(a, 0, 999i32.to_le_bytes().to_vec());
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(
        last_seen.load(Ordering::SeqCst),
        4,
        "unsubscribed callback must not fire again"
    );

    framework.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn copy_subscription_callback_cannot_observe_the_original_buffer() {
    let framework = Framework::start(0, solo_node(18111)).await.unwrap();
    framework.register_type("A", Arc::new(A)).unwrap();
    framework.register_type("B", Arc::new(B)).unwrap();

    let a = framework.create_instance("A", "A1").unwrap();
    let b = framework.create_instance("B", "B1").unwrap();
    framework.start_all().unwrap();

    let seen = Arc::new(Mutex::new(Vec::<u8>::new()));
    let seen_cb = seen.clone();
    framework
        .subscribe(
            b,
            a,
            0,
            SubscriptionKind::Copy,
            SubscribeCallback::Data(Arc::new(move |_publisher, mut data: &[u8]| {
                let mut owned = data.to_vec();
                owned.push(0xff); // mutate the copy; must not affect the framework's buffer
                data = &owned;
                *seen_cb.lock().unwrap() = data.to_vec();
            })),
        )
        .unwrap();

    framework.post_data(a, 0, vec![10, 20, 30]);
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(*seen.lock().unwrap(), vec![10, 20, 30, 0xff]);
    assert_eq!(framework.get_data(a, 0).await.unwrap(), vec![10, 20, 30]);

    framework.shutdown().await;
}
