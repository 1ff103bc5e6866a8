//! Single-node demo: a "talker" module posts an incrementing counter on
//! its one channel, a "listener" module subscribes with `Pointer`
//! delivery and logs every value it sees. Mirrors the teacher's
//! `ros1_talker.rs` / `ros1_listener.rs` pair, but both modules run in
//! the same framework instance since a single mato node needs no peer
//! discovery to talk to itself.
//!
//! Run with `RUST_LOG=info cargo run --example talker_listener`.

use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};

use mato::{Framework, ModuleType, SubscribeCallback, SubscriptionKind};
use mato_config::{NodeEntry, NodesConfig};

struct Talker;

impl ModuleType for Talker {
    fn number_of_channels(&self) -> u32 {
        1
    }

    fn create(&self, _global_id: u32) -> Box<dyn Any + Send + Sync> {
        Box::new(AtomicU32::new(0))
    }
}

struct Listener;

impl ModuleType for Listener {
    fn number_of_channels(&self) -> u32 {
        0
    }

    fn create(&self, _global_id: u32) -> Box<dyn Any + Send + Sync> {
        Box::new(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    mato::logs::init(
        std::path::Path::new("/tmp/mato-demo-logs"),
        "talker_listener",
        true,
        log::LevelFilter::Info,
    )?;

    let nodes = NodesConfig {
        entries: vec![NodeEntry {
            node_id: 0,
            ip: Ipv4Addr::LOCALHOST,
            port: 17600,
            name: "solo".to_owned(),
        }],
    };
    let framework = Framework::start(0, nodes).await?;

    framework.register_type("talker", Arc::new(Talker))?;
    framework.register_type("listener", Arc::new(Listener))?;

    let talker = framework.create_instance("talker", "talker_0")?;
    let listener = framework.create_instance("listener", "listener_0")?;
    framework.start_all()?;

    framework.subscribe(
        listener,
        talker,
        0,
        SubscriptionKind::Pointer,
        SubscribeCallback::Data(Arc::new(|publisher, data| {
            let count = u32::from_le_bytes(data.try_into().unwrap_or([0; 4]));
            log::info!("listener_0 saw count={count} from module {publisher}");
        })),
    )?;

    for count in 0..10u32 {
        let mut payload = Vec::with_capacity(4);
        payload.write_u32::<LittleEndian>(count)?;
        framework.post_data(talker, 0, payload);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    framework.shutdown().await;
    Ok(())
}
