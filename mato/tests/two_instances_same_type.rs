//! Mirrors `original_source/mato/tests/01_two_modules_A`: two instances of
//! the same registered type, each posting on its own channel, listed
//! through the module directory and reachable by a global message.

use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mato::{Framework, ModuleType};
use mato_config::{NodeEntry, NodesConfig};

struct A {
    hello_count: Arc<AtomicUsize>,
}

impl ModuleType for A {
    fn number_of_channels(&self) -> u32 {
        1
    }

    fn create(&self, global_id: u32) -> Box<dyn Any + Send + Sync> {
        Box::new(global_id)
    }

    fn on_message(&self, _global_id: u32, _state: &(dyn Any + Send + Sync), _sender: u32, message_id: i32, _data: &[u8]) {
        if message_id == 1 {
            self.hello_count.fetch_add(1, Ordering::SeqCst);
        }
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
async fn two_instances_are_listed_and_reachable() {
    let framework = Framework::start(0, solo_node(18100)).await.unwrap();
    let hello_count = Arc::new(AtomicUsize::new(0));
    framework
        .register_type("A", Arc::new(A { hello_count: hello_count.clone() }))
        .unwrap();

    let a1 = framework.create_instance("A", "A1").unwrap();
    let a2 = framework.create_instance("A", "A2").unwrap();
    framework.start_all().unwrap();

    assert_eq!(framework.number_of_modules(), 2);
    let mut all = framework.list_all_modules();
    all.sort();
    let mut expected = vec![a1, a2];
    expected.sort();
    assert_eq!(all, expected);
    assert_eq!(framework.list_modules_of_type("A").len(), 2);
    assert_eq!(framework.module_id("A1"), Some(a1));
    assert_eq!(framework.module_name(a2).as_deref(), Some("A2"));

    framework.post_data(a1, 0, vec![0, 0, 0, 0]);
    assert_eq!(
        framework.get_data(a1, 0).await.unwrap(),
        vec![0, 0, 0, 0]
    );

    framework.send_global_message(framework.main_program_module_id(), 1, b"greeting".to_vec());
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(hello_count.load(Ordering::SeqCst), 2);

    framework.delete_instance(a1).unwrap();
    framework.delete_instance(a2).unwrap();
    assert_eq!(framework.number_of_modules(), 0);

    framework.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn duplicate_name_is_rejected() {
    let framework = Framework::start(0, solo_node(18101)).await.unwrap();
    framework
        .register_type("A", Arc::new(A { hello_count: Arc::new(AtomicUsize::new(0)) }))
        .unwrap();
    framework.create_instance("A", "A1").unwrap();
    assert!(framework.create_instance("A", "A1").is_err());
    framework.shutdown().await;
}
