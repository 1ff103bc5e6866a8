//! Mirrors `original_source/mato/tests/07_logs_with_distributed_AB`:
//! logging stays usable while a distributed run is in progress, and each
//! run gets its own epoch-named file with a `last` symlink pointing at it.

use std::net::Ipv4Addr;

use mato_config::{NodeEntry, NodesConfig};

#[test_log::test(tokio::test)]
async fn log_file_and_last_symlink_are_created_for_a_run() {
    let dir = std::env::temp_dir().join(format!("mato_logs_distributed_test_{}", std::process::id()));
    mato::logs::init(&dir, "node0", false, log::LevelFilter::Info).unwrap();

    let nodes = NodesConfig {
        entries: vec![NodeEntry {
            node_id: 0,
            ip: Ipv4Addr::LOCALHOST,
            port: 18400,
            name: "node0".to_owned(),
        }],
    };
    let framework = mato::Framework::start(0, nodes).await.unwrap();
    log::info!("framework started for logging test");
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let last = dir.join("last");
    assert!(last.symlink_metadata().is_ok(), "expected a `last` symlink under {}", dir.display());
    let target = std::fs::read_link(&last).unwrap();
    assert!(target.exists());

    framework.shutdown().await;
    std::fs::remove_dir_all(&dir).ok();
}
