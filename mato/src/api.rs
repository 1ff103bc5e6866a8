//! The public framework handle: every operation `original_source/mato/mato.h`
//! exposes, as methods on [`Framework`] instead of free functions taking an
//! implicit global state (spec §3, C1-C5).
//!
//! `mato_get_data_buffer`'s plain allocation helper has no counterpart here
//! — module code just builds a `Vec<u8>` and hands it to [`Framework::post_data`].

use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::oneshot;

use mato_common::{Error, Result, MATO_BROADCAST, MATO_MAIN_PROGRAM_MODULE};
use mato_config::NodesConfig;

use crate::buffer::{Borrowed, DescriptorId};
use crate::ids;
use crate::net::wire::Frame;
use crate::net::{reconnector, receiver, Connections, PeerTable};
use crate::redistribute::{self, PostedSender};
use crate::registry::{LocalCallback, Registry};
use crate::shutdown::Shutdown;
use crate::types::{BorrowedCallback, DataCallback, ModuleType, SubscriptionKind};

/// Default timeout for a remote `get_data` round trip before it gives up.
const GET_DATA_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    registry: Arc<Mutex<Registry>>,
    connections: Arc<Connections>,
    shutdown: Arc<Shutdown>,
    post_tx: PostedSender,
    self_node: u32,
    /// Keeps the framework's own background tasks alive for as long as any
    /// `Framework` handle exists, and aborts them once the last one drops
    /// — the async equivalent of the original never detaching its
    /// networking/redistribution threads from the process lifetime.
    _redistribute_task: abort_on_drop::ChildTask<()>,
    _acceptor_task: abort_on_drop::ChildTask<()>,
    _reconnector_task: abort_on_drop::ChildTask<()>,
}

/// A running mato node. Cheaply clonable; every clone refers to the same
/// underlying framework state (spec's single-process-per-node model, C1).
#[derive(Clone)]
pub struct Framework {
    inner: Arc<Inner>,
}

impl Framework {
    /// `mato_init` + `start_networking`: loads the nodes config, binds the
    /// listening socket for this node's configured address, and starts the
    /// reconnector and redistribution tasks. Returns once the listening
    /// socket is bound; connecting to peers continues in the background.
    pub async fn start(this_node_id: u32, nodes: NodesConfig) -> Result<Self> {
        let self_entry = nodes
            .find(this_node_id)
            .ok_or_else(|| Error::Configuration(format!("node {this_node_id} missing from nodes config")))?;
        let bind_addr = SocketAddr::V4(std::net::SocketAddrV4::new(self_entry.ip, self_entry.port));

        let registry = Arc::new(Mutex::new(Registry::new(this_node_id)));
        let connections = Arc::new(Connections::new(this_node_id));
        let shutdown = Arc::new(Shutdown::new());
        let (post_tx, post_rx) = tokio::sync::mpsc::unbounded_channel();

        let redistribute_task = redistribute::spawn(
            registry.clone(),
            shutdown.clone(),
            post_rx,
            forward_to_remote_fn(registry.clone(), connections.clone()),
        )
        .into();

        let acceptor_task = receiver::spawn_acceptor(
            bind_addr,
            registry.clone(),
            connections.clone(),
            shutdown.clone(),
            post_tx.clone(),
        )
        .await
        .map_err(|e| Error::Resource(format!("could not bind {bind_addr}: {e}")))?
        .into();

        let peers = PeerTable::from_config(this_node_id, &nodes);
        let reconnector_task = reconnector::spawn(
            peers,
            registry.clone(),
            connections.clone(),
            shutdown.clone(),
            post_tx.clone(),
        )
        .into();

        info!("mato node {this_node_id} started, listening on {bind_addr}");

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                connections,
                shutdown,
                post_tx,
                self_node: this_node_id,
                _redistribute_task: redistribute_task,
                _acceptor_task: acceptor_task,
                _reconnector_task: reconnector_task,
            }),
        })
    }

    /// `mato_main_program_module_id`.
    pub fn main_program_module_id(&self) -> u32 {
        MATO_MAIN_PROGRAM_MODULE
    }

    /// `mato_register_new_type_of_module`.
    pub fn register_type(&self, type_name: &str, spec: Arc<dyn ModuleType>) -> Result<()> {
        self.inner.registry.lock().unwrap().register_type(type_name, spec)
    }

    /// `mato_create_new_module_instance`: allocates the global id and
    /// calls the type's `create`, then announces the new instance to every
    /// connected peer (`net_broadcast_new_module`).
    pub fn create_instance(&self, type_name: &str, name: &str) -> Result<u32> {
        let (global_id, spec) = self
            .inner
            .registry
            .lock()
            .unwrap()
            .begin_create_instance(type_name, name)?;
        let state: Arc<dyn Any + Send + Sync> = Arc::from(spec.create(global_id));
        self.inner
            .registry
            .lock()
            .unwrap()
            .finish_create_instance(global_id, spec, state);

        let (_, local_id) = ids::unpack(global_id);
        let number_of_channels = {
            let reg = self.inner.registry.lock().unwrap();
            reg.modules.get(&global_id).map(|m| m.number_of_channels).unwrap_or(0)
        };
        self.inner.connections.broadcast(Frame::NewModuleInstance {
            local_module_id: local_id,
            name: name.to_owned(),
            type_name: type_name.to_owned(),
            number_of_channels,
        });
        Ok(global_id)
    }

    /// `mato_start_module`.
    pub fn start_instance(&self, global_id: u32) -> Result<()> {
        let (spec, state) = self
            .inner
            .registry
            .lock()
            .unwrap()
            .local_instance(global_id)
            .ok_or(Error::UnknownModule(global_id))?;
        spec.start(global_id, state.as_ref());
        Ok(())
    }

    /// `mato_start`: starts every local instance that hasn't been started
    /// yet. Since this implementation has no separate "created but not
    /// started" bookkeeping, callers that want selective control should
    /// use [`Self::start_instance`] directly; this is the convenience
    /// all-at-once entry point for the common case of starting everything
    /// right after creating it.
    pub fn start_all(&self) -> Result<()> {
        let ids: Vec<u32> = {
            let reg = self.inner.registry.lock().unwrap();
            reg.modules
                .values()
                .filter(|m| m.node_id == self.inner.self_node)
                .map(|m| m.global_id)
                .collect()
        };
        for id in ids {
            self.start_instance(id)?;
        }
        Ok(())
    }

    /// `mato_delete_module_instance`.
    pub fn delete_instance(&self, global_id: u32) -> Result<()> {
        let (spec, state, _) = self.inner.registry.lock().unwrap().begin_delete_instance(global_id)?;
        spec.delete(global_id, state.as_ref());
        let (_, local_id) = ids::unpack(global_id);
        self.inner
            .connections
            .broadcast(Frame::DeletedModuleInstance { local_module_id: local_id });
        Ok(())
    }

    /// `mato_get_module_id`.
    pub fn module_id(&self, name: &str) -> Option<u32> {
        self.inner.registry.lock().unwrap().find_by_name(name)
    }

    /// `mato_get_module_name`.
    pub fn module_name(&self, global_id: u32) -> Option<String> {
        self.inner.registry.lock().unwrap().module_name(global_id).map(str::to_owned)
    }

    /// `mato_get_module_type`.
    pub fn module_type(&self, global_id: u32) -> Option<String> {
        self.inner.registry.lock().unwrap().module_type(global_id).map(str::to_owned)
    }

    /// `mato_get_list_of_all_modules` (`mato_free_list_of_modules` has no
    /// counterpart — the returned `Vec` drops itself).
    pub fn list_all_modules(&self) -> Vec<u32> {
        self.inner.registry.lock().unwrap().list_all_modules()
    }

    /// `mato_get_list_of_modules`.
    pub fn list_modules_of_type(&self, type_name: &str) -> Vec<u32> {
        self.inner.registry.lock().unwrap().list_modules_of_type(type_name)
    }

    /// `mato_get_number_of_modules`.
    pub fn number_of_modules(&self) -> usize {
        self.inner.registry.lock().unwrap().number_of_modules()
    }

    /// `mato_subscribe`.
    pub fn subscribe(
        &self,
        subscriber_gid: u32,
        publisher_gid: u32,
        channel: u32,
        kind: SubscriptionKind,
        callback: SubscribeCallback,
    ) -> Result<u32> {
        let local_cb = match (kind, callback) {
            (SubscriptionKind::Pointer, SubscribeCallback::Data(cb)) => LocalCallback::Pointer(cb),
            (SubscriptionKind::Copy, SubscribeCallback::Data(cb)) => LocalCallback::Copy(cb),
            (SubscriptionKind::Borrowed, SubscribeCallback::Borrowed(cb)) => LocalCallback::Borrowed(cb),
            _ => {
                return Err(Error::Protocol(
                    "subscription kind does not match callback variant".into(),
                ))
            }
        };
        let outcome = self
            .inner
            .registry
            .lock()
            .unwrap()
            .subscribe(subscriber_gid, publisher_gid, channel, local_cb)?;
        if let Some(remote_node) = outcome.send_subscribe_to {
            let (_, local_module_id) = ids::unpack(publisher_gid);
            self.inner
                .connections
                .send(remote_node, Frame::Subscribe { local_module_id, channel })?;
        }
        Ok(outcome.sub_id)
    }

    /// `mato_unsubscribe`.
    pub fn unsubscribe(&self, publisher_gid: u32, channel: u32, sub_id: u32) -> Result<()> {
        let outcome = self.inner.registry.lock().unwrap().unsubscribe(publisher_gid, channel, sub_id)?;
        if let Some(remote_node) = outcome.send_unsubscribe_to {
            let (_, local_module_id) = ids::unpack(publisher_gid);
            self.inner
                .connections
                .send(remote_node, Frame::Unsubscribe { local_module_id, channel })?;
        }
        Ok(())
    }

    /// `mato_post_data`.
    pub fn post_data(&self, publisher_gid: u32, channel: u32, data: Vec<u8>) {
        redistribute::post(
            &self.inner.registry,
            &self.inner.post_tx,
            self.inner.self_node,
            publisher_gid,
            channel,
            Arc::new(data),
        );
    }

    /// `mato_get_data`: returns the current head payload as an owned copy,
    /// or an empty `Vec` if nothing has been posted yet (matching the
    /// original returning `(0, NULL)`). Transparently fetches from a
    /// remote node via a `GET_DATA`/`MSG_DATA` round trip when the
    /// publisher isn't local.
    pub async fn get_data(&self, publisher_gid: u32, channel: u32) -> Result<Vec<u8>> {
        if ids::node_of(publisher_gid) == self.inner.self_node {
            let reg = self.inner.registry.lock().unwrap();
            return Ok(reg
                .channel_head_bytes(publisher_gid, channel)
                .map(|b| b.as_ref().clone())
                .unwrap_or_default());
        }
        let remote_node = ids::node_of(publisher_gid);
        let (_, local_module_id) = ids::unpack(publisher_gid);
        let get_data_id = self.inner.connections.new_get_data_id();
        let (tx, rx) = oneshot::channel();
        self.inner.connections.register_pending_get_data(get_data_id, tx);
        self.inner.connections.send(
            remote_node,
            Frame::GetData {
                local_module_id,
                channel,
                get_data_id,
            },
        )?;
        tokio::time::timeout(GET_DATA_TIMEOUT, rx)
            .await
            .map_err(|_| Error::Timeout(format!("get_data({publisher_gid}, {channel})")))?
            .map_err(|_| Error::NodeOffline(remote_node))
    }

    /// `mato_borrow_data`: `None` when the channel has no posted value yet.
    pub fn borrow_data(&self, publisher_gid: u32, channel: u32) -> Option<Borrowed> {
        let mut reg = self.inner.registry.lock().unwrap();
        let id = reg.head_descriptor(publisher_gid, channel)?;
        reg.arena.add_ref(id, 1);
        let bytes = reg.arena.bytes(id)?;
        Some(Borrowed { id, bytes })
    }

    /// `mato_release_data`.
    pub fn release_data(&self, borrowed: Borrowed) -> Result<()> {
        release_descriptor(&self.inner.registry, borrowed.id)
    }

    /// `mato_data_buffer_usage`.
    pub fn buffer_usage(&self, global_id: u32, channel: u32) -> (usize, i64) {
        self.inner.registry.lock().unwrap().arena.usage(global_id, channel)
    }

    /// `mato_send_global_message`.
    pub fn send_global_message(&self, sender_gid: u32, message_id: i32, data: Vec<u8>) {
        self.dispatch_local_message(sender_gid, MATO_BROADCAST, message_id, &data);
        self.inner.connections.broadcast(Frame::GlobalMessage {
            sending_global_module_id: sender_gid,
            receiver_global_module_id: MATO_BROADCAST,
            message_id,
            data,
        });
    }

    /// `mato_send_message`.
    pub fn send_message(&self, sender_gid: u32, receiver_gid: u32, message_id: i32, data: Vec<u8>) -> Result<()> {
        if ids::node_of(receiver_gid) == self.inner.self_node {
            self.dispatch_local_message(sender_gid, receiver_gid, message_id, &data);
            return Ok(());
        }
        let remote_node = ids::node_of(receiver_gid);
        self.inner.connections.send(
            remote_node,
            Frame::GlobalMessage {
                sending_global_module_id: sender_gid,
                receiver_global_module_id: receiver_gid,
                message_id,
                data,
            },
        )
    }

    fn dispatch_local_message(&self, sender_gid: u32, receiver_gid: u32, message_id: i32, data: &[u8]) {
        let targets: Vec<u32> = if receiver_gid == MATO_BROADCAST {
            let reg = self.inner.registry.lock().unwrap();
            reg.list_all_modules()
                .into_iter()
                .filter(|gid| ids::node_of(*gid) == self.inner.self_node && *gid != sender_gid)
                .collect()
        } else {
            vec![receiver_gid]
        };
        for target in targets {
            let instance = self.inner.registry.lock().unwrap().local_instance(target);
            if let Some((spec, state)) = instance {
                debug!("dispatching message {message_id} from {sender_gid} to {target}");
                spec.on_message(target, state.as_ref(), sender_gid, message_id, data);
            }
        }
    }

    /// `mato_inc_thread_count`.
    pub fn inc_thread_count(&self) {
        self.inner.shutdown.inc_thread_count();
    }

    /// `mato_dec_thread_count`.
    pub fn dec_thread_count(&self) {
        self.inner.shutdown.dec_thread_count();
    }

    /// `mato_threads_running`.
    pub fn threads_running(&self) -> i64 {
        self.inner.shutdown.threads_running()
    }

    /// `mato_shutdown`.
    pub async fn shutdown(&self) {
        self.inner.shutdown.shutdown().await;
    }
}

fn release_descriptor(registry: &Arc<Mutex<Registry>>, id: DescriptorId) -> Result<()> {
    redistribute::release_borrowed(registry, id)
}

/// Builds the hook `redistribute::redistribute_one` calls for every remote
/// subscriber of a just-posted channel: looks the payload back up by its
/// descriptor id (the lock was already released before this runs) and
/// sends it as `SUBSCRIBED_DATA` (M7). Matches `net_send_subscribed_data`.
fn forward_to_remote_fn(
    registry: Arc<Mutex<Registry>>,
    connections: Arc<Connections>,
) -> Arc<dyn Fn(u32, u32, u32, DescriptorId) + Send + Sync> {
    Arc::new(move |remote_node, publisher_gid, channel, descriptor| {
        let bytes = registry.lock().unwrap().arena.bytes(descriptor);
        let Some(bytes) = bytes else { return };
        let (_, local_module_id) = ids::unpack(publisher_gid);
        let _ = connections.send(
            remote_node,
            Frame::SubscribedData {
                local_module_id,
                channel,
                data: bytes.as_ref().clone(),
            },
        );
    })
}

/// Which callback shape a subscription uses, matched against
/// [`SubscriptionKind`] at [`Framework::subscribe`] time.
pub enum SubscribeCallback {
    Data(DataCallback),
    Borrowed(BorrowedCallback),
}
