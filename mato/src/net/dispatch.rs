//! Turns one incoming [`Frame`](super::wire::Frame) from a connected peer
//! into the corresponding registry mutation or module callback, mirroring
//! `original_source/mato/mato_net.c`'s `net_process_*` family
//! (`handle_incomming_message`'s dispatch switch).

use std::sync::{Arc, Mutex};

use mato_common::MATO_BROADCAST;

use crate::ids;
use crate::net::wire::Frame;
use crate::net::Connections;
use crate::redistribute::{self, PostedSender};
use crate::registry::Registry;

/// Everything a connection's read task needs to act on an incoming frame.
pub(crate) struct Dispatcher {
    pub registry: Arc<Mutex<Registry>>,
    pub connections: Arc<Connections>,
    pub post_tx: PostedSender,
}

impl Dispatcher {
    /// `sender_node` is the node id learned from this connection's
    /// handshake, never trusted from the frame itself.
    pub fn handle(&self, sender_node: u32, frame: Frame) {
        match frame {
            Frame::NewModuleInstance {
                local_module_id,
                name,
                type_name,
                number_of_channels,
            } => {
                let mut reg = self.registry.lock().unwrap();
                reg.store_remote_module(sender_node, local_module_id, name, type_name, number_of_channels);
            }
            Frame::DeletedModuleInstance { local_module_id } => {
                let global_id = ids::pack(sender_node, local_module_id);
                let mut reg = self.registry.lock().unwrap();
                reg.forget_remote_module(global_id);
            }
            Frame::Subscribe {
                local_module_id,
                channel,
            } => {
                let mut reg = self.registry.lock().unwrap();
                reg.add_remote_forward(local_module_id, channel, sender_node);
            }
            Frame::Unsubscribe {
                local_module_id,
                channel,
            } => {
                let mut reg = self.registry.lock().unwrap();
                reg.remove_remote_forward(local_module_id, channel, sender_node);
            }
            Frame::GetData {
                local_module_id,
                channel,
                get_data_id,
            } => {
                let global_id = ids::pack(self.self_node(), local_module_id);
                let bytes = {
                    let reg = self.registry.lock().unwrap();
                    reg.channel_head_bytes(global_id, channel)
                };
                let data = bytes.map(|b| b.as_ref().clone()).unwrap_or_default();
                let _ = self.connections.send(sender_node, Frame::Data { get_data_id, data });
            }
            Frame::Data { get_data_id, data } => {
                self.connections.resolve_get_data(get_data_id, data);
            }
            Frame::SubscribedData {
                local_module_id,
                channel,
                data,
            } => {
                // The publisher lives on `sender_node`; its global id as we
                // track it locally combines that node id with the local id
                // it used on its own side.
                let publisher_gid = ids::pack(sender_node, local_module_id);
                redistribute::post(
                    &self.registry,
                    &self.post_tx,
                    sender_node,
                    publisher_gid,
                    channel,
                    Arc::new(data),
                );
            }
            Frame::GlobalMessage {
                sending_global_module_id,
                receiver_global_module_id,
                message_id,
                data,
            } => {
                self.dispatch_global_message(sending_global_module_id, receiver_global_module_id, message_id, &data);
            }
        }
    }

    fn dispatch_global_message(
        &self,
        sending_global_module_id: u32,
        receiver_global_module_id: u32,
        message_id: i32,
        data: &[u8],
    ) {
        let targets: Vec<u32> = {
            let reg = self.registry.lock().unwrap();
            if receiver_global_module_id == MATO_BROADCAST {
                reg.list_all_modules()
                    .into_iter()
                    .filter(|gid| ids::node_of(*gid) == self.self_node())
                    .collect()
            } else {
                vec![receiver_global_module_id]
            }
        };
        for target in targets {
            let instance = {
                let reg = self.registry.lock().unwrap();
                reg.local_instance(target)
            };
            if let Some((spec, state)) = instance {
                spec.on_message(target, state.as_ref(), sending_global_module_id, message_id, data);
            }
        }
    }

    fn self_node(&self) -> u32 {
        self.connections.self_node()
    }
}
