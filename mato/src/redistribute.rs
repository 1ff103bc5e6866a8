//! The redistribution loop: C4's only job is taking a just-posted payload
//! and fanning it out to every local and remote subscriber of the channel
//! it was posted on.
//!
//! Grounded directly in `original_source/mato/mato_core.c`'s
//! `mato_core_thread` — the two extra references taken before unlocking
//! ("last valid data from module channel" / "currently being sent out to
//! subscribers"), the snapshot of subscriber ids taken under the lock and
//! re-resolved one at a time so a subscriber that unsubscribes mid-fanout
//! from within its own callback is silently skipped rather than racing the
//! registry, and the final matching decrement once fan-out completes.
//! The raw `post_data_pipe` the original reads from is replaced by an
//! unbounded `tokio::sync::mpsc` channel (spec's Design Notes: "kernel pipe
//! atomic pointer writes -> channel/queue").

use std::sync::{Arc, Mutex};

use mato_common::Error;

use crate::buffer::DescriptorId;
use crate::registry::{LocalCallback, Registry};
use crate::shutdown::{Shutdown, ThreadCountGuard};

/// One posted payload handed from `post_data` to the redistribution loop.
pub(crate) struct Posted {
    pub publisher_gid: u32,
    pub channel: u32,
    pub descriptor: DescriptorId,
}

pub(crate) type PostedSender = tokio::sync::mpsc::UnboundedSender<Posted>;
pub(crate) type PostedReceiver = tokio::sync::mpsc::UnboundedReceiver<Posted>;

/// Records a freshly posted payload as the new head of `(publisher_gid,
/// channel)` and hands it to the redistribution loop. Used both by
/// `post_data` for a locally originated payload and, verbatim, by the net
/// layer for a payload that just arrived over `SUBSCRIBED_DATA` — the
/// latter "re-enters the same post_data path" rather than having a second
/// fan-out mechanism.
///
/// Mirrors `mato_core_thread` taking two references up front (one for
/// "last valid data", one for "currently being sent out") and decrementing
/// whatever was previously head by one, matching `decrement_references`.
pub(crate) fn post(
    registry: &Arc<Mutex<Registry>>,
    tx: &PostedSender,
    owner_node: u32,
    publisher_gid: u32,
    channel: u32,
    bytes: Arc<Vec<u8>>,
) {
    let descriptor = {
        let mut reg = registry.lock().unwrap();
        let id = reg.arena.insert(owner_node, publisher_gid, channel, bytes);
        reg.arena.add_ref(id, 2);
        let previous_head = reg
            .channels
            .entry((publisher_gid, channel))
            .or_default()
            .head
            .replace(id);
        if let Some(previous) = previous_head {
            reg.arena.add_ref(previous, -1);
        }
        id
    };
    // The receiving end only disappears once the framework itself is
    // torn down; a send failure here is not reachable in practice and
    // would mean the redistribution task already exited.
    let _ = tx.send(Posted {
        publisher_gid,
        channel,
        descriptor,
    });
}

/// Spawns the redistribution loop as a framework-owned system task. Runs
/// until `shutdown` flips the run flag and the channel is drained (mirrors
/// the original continuing to service `post_data_pipe` until it reads EOF).
pub(crate) fn spawn(
    registry: Arc<Mutex<Registry>>,
    shutdown: Arc<Shutdown>,
    mut rx: PostedReceiver,
    forward_to_remote: Arc<dyn Fn(u32, u32, u32, DescriptorId) + Send + Sync>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let _guard = ThreadCountGuard::system(&shutdown);
        while let Some(posted) = rx.recv().await {
            redistribute_one(&registry, posted, forward_to_remote.as_ref());
        }
    })
}

fn redistribute_one(
    registry: &Arc<Mutex<Registry>>,
    posted: Posted,
    forward_to_remote: &(dyn Fn(u32, u32, u32, DescriptorId) + Send + Sync),
) {
    let Posted {
        publisher_gid,
        channel,
        descriptor,
    } = posted;

    // Snapshot the subscribers to call while the lock is held, then drop
    // the lock for every individual callback invocation — a callback is
    // free to subscribe, unsubscribe, post, or delete instances without
    // deadlocking on its own delivery (spec §5).
    let (local_targets, remote_targets) = {
        let mut reg = registry.lock().unwrap();
        let Some(state) = reg.channels.get(&(publisher_gid, channel)) else {
            // Channel already torn down (instance deleted) between post and
            // redistribution; nothing to deliver.
            reg.arena.add_ref(descriptor, -1);
            return;
        };
        let locals: Vec<(u32, LocalCallback)> = state
            .local_subs
            .values()
            .map(|s| (s.id, s.callback.clone()))
            .collect();
        let remotes: Vec<u32> = state.remote_forwards.iter().copied().collect();
        (locals, remotes)
    };

    for (sub_id, callback) in local_targets {
        // Re-check the subscription is still present right before calling
        // it: an earlier callback in this same fan-out may have
        // unsubscribed it.
        let still_subscribed = {
            let reg = registry.lock().unwrap();
            reg.channels
                .get(&(publisher_gid, channel))
                .map(|s| s.local_subs.contains_key(&sub_id))
                .unwrap_or(false)
        };
        if !still_subscribed {
            continue;
        }
        deliver_local(registry, descriptor, publisher_gid, callback);
    }

    for remote_node in remote_targets {
        forward_to_remote(remote_node, publisher_gid, channel, descriptor);
    }

    let mut reg = registry.lock().unwrap();
    reg.arena.add_ref(descriptor, -1);
}

fn deliver_local(
    registry: &Arc<Mutex<Registry>>,
    descriptor: DescriptorId,
    publisher_gid: u32,
    callback: LocalCallback,
) {
    match callback {
        LocalCallback::Pointer(cb) => {
            let bytes = {
                let reg = registry.lock().unwrap();
                reg.arena.bytes(descriptor)
            };
            if let Some(bytes) = bytes {
                cb(publisher_gid, &bytes);
            }
        }
        LocalCallback::Copy(cb) => {
            let bytes = {
                let reg = registry.lock().unwrap();
                reg.arena.bytes(descriptor)
            };
            if let Some(bytes) = bytes {
                let copy = bytes.as_ref().clone();
                cb(publisher_gid, &copy);
            }
        }
        LocalCallback::Borrowed(cb) => {
            let bytes = {
                let mut reg = registry.lock().unwrap();
                reg.arena.add_ref(descriptor, 1);
                reg.arena.bytes(descriptor)
            };
            if let Some(bytes) = bytes {
                cb(
                    publisher_gid,
                    crate::buffer::Borrowed {
                        id: descriptor,
                        bytes,
                    },
                );
            }
        }
    }
}

/// Releases a [`crate::buffer::Borrowed`] handle obtained through a
/// `borrowed`-kind subscription or [`crate::Framework::borrow_data`].
/// Matches `decrement_references`.
pub(crate) fn release_borrowed(registry: &Arc<Mutex<Registry>>, id: DescriptorId) -> mato_common::Result<()> {
    let mut reg = registry.lock().unwrap();
    if !reg.arena.contains(id) {
        return Err(Error::Protocol(format!(
            "release_data called on unknown or already-freed descriptor {}",
            id.0
        )));
    }
    reg.arena.add_ref(id, -1);
    Ok(())
}
