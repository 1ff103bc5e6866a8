//! The module/channel/subscription registry (spec §4.2, C2) and the single
//! `framework_mutex` that serializes every read or write of it (spec §5).
//!
//! Grounded in `original_source/mato/mato_core.h`'s nested `GArray`s
//! (`module_names`, `module_types`, `instance_data`, `buffers`,
//! `subscriptions`), replaced per the Design Notes with a flat mapping keyed
//! by the tuples the C source indexed into arrays by.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mato_common::{Error, Result, NODE_MULTIPLIER};

use crate::buffer::{BufferArena, DescriptorId};
use crate::ids;
use crate::types::{BorrowedCallback, DataCallback, ModuleType};

/// A registered module type. Types are immutable for the process lifetime
/// (spec §3).
pub(crate) struct TypeEntry {
    pub spec: Arc<dyn ModuleType>,
}

/// State that only exists for a module instance hosted on this node.
pub(crate) struct LocalInstance {
    pub spec: Arc<dyn ModuleType>,
    pub state: Arc<dyn Any + Send + Sync>,
}

/// One entry of the module directory. Present for both modules hosted on
/// this node and modules merely known about via an M1 announcement from a
/// peer — spec §4.5's "eventual consistency of the module directory".
pub(crate) struct ModuleRecord {
    pub global_id: u32,
    pub node_id: u32,
    pub name: String,
    pub type_name: String,
    pub number_of_channels: u32,
    pub local: Option<LocalInstance>,
}

/// What a local subscriber wants delivered.
#[derive(Clone)]
pub(crate) enum LocalCallback {
    Pointer(DataCallback),
    Copy(DataCallback),
    Borrowed(BorrowedCallback),
}

/// A single local subscription, attached under `channels[(publisher, channel)]`.
#[derive(Clone)]
pub(crate) struct Subscription {
    pub id: u32,
    pub subscriber_module: u32,
    pub callback: LocalCallback,
}

/// Everything the registry tracks for one `(module, channel)` pair.
#[derive(Default)]
pub(crate) struct ChannelState {
    pub head: Option<DescriptorId>,
    pub local_subs: HashMap<u32, Subscription>,
    /// Node ids that have asked (via `SUBSCRIBE`, M3) to have this channel
    /// forwarded to them. Only ever populated on the node that actually
    /// hosts the publisher.
    pub remote_forwards: HashSet<u32>,
}

impl ChannelState {
    fn is_empty_of_interest(&self) -> bool {
        self.head.is_none()
            && self.local_subs.is_empty()
            && self.remote_forwards.is_empty()
    }
}

/// Outcome of [`Registry::subscribe`]: whether the caller must additionally
/// send a `SUBSCRIBE` (M3) frame to the publisher's home node.
pub(crate) struct SubscribeOutcome {
    pub sub_id: u32,
    pub send_subscribe_to: Option<u32>,
}

/// Outcome of [`Registry::unsubscribe`]: whether the caller must send an
/// `UNSUBSCRIBE` (M4) frame.
pub(crate) struct UnsubscribeOutcome {
    pub send_unsubscribe_to: Option<u32>,
}

pub(crate) struct Registry {
    pub self_node: u32,
    pub types: HashMap<String, TypeEntry>,
    pub modules: HashMap<u32, ModuleRecord>,
    names: HashMap<(u32, String), u32>,
    pub channels: HashMap<(u32, u32), ChannelState>,
    pub arena: BufferArena,
    next_local_id: u32,
    next_sub_id: u32,
    /// Descriptors detached from a channel by `delete_instance` or a
    /// disconnect while a borrower still held them (spec glossary:
    /// "Dangling list"). Purely diagnostic — the descriptors stay alive in
    /// `arena` regardless, addressed by stable id, so `release_data`
    /// doesn't need this list to function.
    pub dangling: Vec<DescriptorId>,
}

impl Registry {
    pub fn new(self_node: u32) -> Self {
        Self {
            self_node,
            types: HashMap::new(),
            modules: HashMap::new(),
            names: HashMap::new(),
            channels: HashMap::new(),
            arena: BufferArena::default(),
            // Local id 0 is reserved for MATO_MAIN_PROGRAM_MODULE.
            next_local_id: 1,
            next_sub_id: 0,
            dangling: Vec::new(),
        }
    }

    pub fn register_type(&mut self, name: &str, spec: Arc<dyn ModuleType>) -> Result<()> {
        if self.types.contains_key(name) {
            return Err(Error::DuplicateType(name.to_owned()));
        }
        self.types.insert(name.to_owned(), TypeEntry { spec });
        Ok(())
    }

    /// Reserves a name + local id for a new local instance, without yet
    /// calling into module code. Returns the global id and the type's spec
    /// so the caller can invoke `spec.create()` with the registry lock
    /// released.
    pub fn begin_create_instance(
        &mut self,
        type_name: &str,
        name: &str,
    ) -> Result<(u32, Arc<dyn ModuleType>)> {
        let type_entry = self
            .types
            .get(type_name)
            .ok_or_else(|| Error::UnknownType(type_name.to_owned()))?;
        if self.names.contains_key(&(self.self_node, name.to_owned())) {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        if self.next_local_id >= NODE_MULTIPLIER {
            return Err(Error::ModuleLimitReached(self.self_node));
        }
        let local_id = self.next_local_id;
        self.next_local_id += 1;
        let global_id = ids::pack(self.self_node, local_id);
        let spec = type_entry.spec.clone();
        self.names
            .insert((self.self_node, name.to_owned()), global_id);
        self.modules.insert(
            global_id,
            ModuleRecord {
                global_id,
                node_id: self.self_node,
                name: name.to_owned(),
                type_name: type_name.to_owned(),
                number_of_channels: spec.number_of_channels(),
                local: None,
            },
        );
        Ok((global_id, spec))
    }

    /// Attaches instance state produced by `spec.create()` to the record
    /// reserved by [`Self::begin_create_instance`].
    pub fn finish_create_instance(
        &mut self,
        global_id: u32,
        spec: Arc<dyn ModuleType>,
        state: Arc<dyn Any + Send + Sync>,
    ) {
        if let Some(record) = self.modules.get_mut(&global_id) {
            record.local = Some(LocalInstance { spec, state });
        }
    }

    /// Records a module instance announced by a peer (M1), or — when the
    /// announcement repeats — overwrites the existing entry in place
    /// (spec §4.5: "duplicate M1 announcements are tolerated: second
    /// receiver must overwrite, not append").
    pub fn store_remote_module(
        &mut self,
        node_id: u32,
        local_id: u32,
        name: String,
        type_name: String,
        number_of_channels: u32,
    ) {
        let global_id = ids::pack(node_id, local_id);
        if let Some(existing) = self.modules.get(&global_id) {
            self.names.remove(&(node_id, existing.name.clone()));
        }
        self.names.insert((node_id, name.clone()), global_id);
        self.modules.insert(
            global_id,
            ModuleRecord {
                global_id,
                node_id,
                name,
                type_name,
                number_of_channels,
                local: None,
            },
        );
    }

    /// Begins deleting a local instance: removes it from the directory and
    /// cancels every subscription that touches it, returning the instance's
    /// spec/state so the caller can invoke `spec.delete()` with the lock
    /// released.
    pub fn begin_delete_instance(
        &mut self,
        global_id: u32,
    ) -> Result<(Arc<dyn ModuleType>, Arc<dyn Any + Send + Sync>, u32)> {
        let record = self
            .modules
            .get(&global_id)
            .ok_or(Error::UnknownModule(global_id))?;
        if record.node_id != self.self_node {
            return Err(Error::UnknownModule(global_id));
        }
        let local = record
            .local
            .as_ref()
            .ok_or(Error::UnknownModule(global_id))?;
        let spec = local.spec.clone();
        let state = local.state.clone();
        let number_of_channels = record.number_of_channels;

        self.names.remove(&(self.self_node, record.name.clone()));
        self.modules.remove(&global_id);
        self.cancel_subscriptions_for_module(global_id, number_of_channels);

        Ok((spec, state, number_of_channels))
    }

    /// Removes every subscription to any channel of `global_id` (it is
    /// being deleted as a publisher) and every subscription `global_id`
    /// itself originated (it is being deleted as a subscriber), detaching
    /// any still-referenced descriptors into the dangling list.
    fn cancel_subscriptions_for_module(&mut self, global_id: u32, number_of_channels: u32) {
        for channel in 0..number_of_channels {
            if let Some(mut state) = self.channels.remove(&(global_id, channel)) {
                if let Some(head) = state.head.take() {
                    if self.arena.add_ref(head, -1) {
                        // freed
                    } else {
                        self.dangling.push(head);
                    }
                }
            }
        }
        let mut to_clear = Vec::new();
        for (key, state) in self.channels.iter() {
            if state
                .local_subs
                .values()
                .any(|s| s.subscriber_module == global_id)
            {
                to_clear.push(*key);
            }
        }
        for key in to_clear {
            if let Some(state) = self.channels.get_mut(&key) {
                state.local_subs.retain(|_, s| s.subscriber_module != global_id);
                if state.is_empty_of_interest() {
                    self.channels.remove(&key);
                }
            }
        }
    }

    pub fn subscribe(
        &mut self,
        subscriber_gid: u32,
        publisher_gid: u32,
        channel: u32,
        callback: LocalCallback,
    ) -> Result<SubscribeOutcome> {
        if ids::node_of(subscriber_gid) != self.self_node {
            return Err(Error::UnknownModule(subscriber_gid));
        }
        let publisher = self
            .modules
            .get(&publisher_gid)
            .ok_or(Error::UnknownModule(publisher_gid))?;
        if channel >= publisher.number_of_channels {
            return Err(Error::InvalidChannel {
                module: publisher_gid,
                channel,
            });
        }
        let publisher_node = publisher.node_id;
        let sub_id = self.next_sub_id;
        self.next_sub_id += 1;
        let state = self.channels.entry((publisher_gid, channel)).or_default();
        let is_first = state.local_subs.is_empty();
        state.local_subs.insert(
            sub_id,
            Subscription {
                id: sub_id,
                subscriber_module: subscriber_gid,
                callback,
            },
        );
        let send_subscribe_to = if publisher_node != self.self_node && is_first {
            Some(publisher_node)
        } else {
            None
        };
        Ok(SubscribeOutcome {
            sub_id,
            send_subscribe_to,
        })
    }

    pub fn unsubscribe(
        &mut self,
        publisher_gid: u32,
        channel: u32,
        sub_id: u32,
    ) -> Result<UnsubscribeOutcome> {
        let key = (publisher_gid, channel);
        let state = self
            .channels
            .get_mut(&key)
            .ok_or(Error::UnknownSubscription(sub_id))?;
        if state.local_subs.remove(&sub_id).is_none() {
            return Err(Error::UnknownSubscription(sub_id));
        }
        let publisher_node = ids::node_of(publisher_gid);
        let send_unsubscribe_to = if publisher_node != self.self_node && state.local_subs.is_empty()
        {
            Some(publisher_node)
        } else {
            None
        };
        if state.is_empty_of_interest() {
            self.channels.remove(&key);
        }
        Ok(UnsubscribeOutcome {
            send_unsubscribe_to,
        })
    }

    /// A remote node subscribed to one of our local modules' channels (M3).
    pub fn add_remote_forward(&mut self, publisher_local_id: u32, channel: u32, remote_node: u32) {
        let global_id = ids::pack(self.self_node, publisher_local_id);
        self.channels
            .entry((global_id, channel))
            .or_default()
            .remote_forwards
            .insert(remote_node);
    }

    /// A remote node unsubscribed (M4).
    pub fn remove_remote_forward(
        &mut self,
        publisher_local_id: u32,
        channel: u32,
        remote_node: u32,
    ) {
        let global_id = ids::pack(self.self_node, publisher_local_id);
        let key = (global_id, channel);
        if let Some(state) = self.channels.get_mut(&key) {
            state.remote_forwards.remove(&remote_node);
            if state.is_empty_of_interest() {
                self.channels.remove(&key);
            }
        }
    }

    /// Every piece of state touching a node that just went offline: its
    /// modules drop out of the directory, any channel keyed by one of them
    /// is torn down (head descriptor loses its head reference, non-head
    /// descriptors move to the dangling list), and it's removed as a
    /// forwarding target everywhere else (spec §4.5 disconnect cleanup).
    pub fn disconnect_node(&mut self, node_id: u32) {
        let dead_modules: Vec<u32> = self
            .modules
            .iter()
            .filter(|(_, m)| m.node_id == node_id)
            .map(|(gid, _)| *gid)
            .collect();
        for gid in &dead_modules {
            if let Some(record) = self.modules.remove(gid) {
                self.names.remove(&(node_id, record.name));
            }
        }
        let dead_keys: Vec<(u32, u32)> = self
            .channels
            .keys()
            .filter(|(gid, _)| ids::node_of(*gid) == node_id)
            .copied()
            .collect();
        for key in dead_keys {
            if let Some(mut state) = self.channels.remove(&key) {
                if let Some(head) = state.head.take() {
                    if self.arena.add_ref(head, -1) {
                        // freed
                    } else {
                        self.dangling.push(head);
                    }
                }
            }
        }
        for state in self.channels.values_mut() {
            state.remote_forwards.remove(&node_id);
        }
        self.channels.retain(|_, state| !state.is_empty_of_interest());
    }

    pub fn list_all_modules(&self) -> Vec<u32> {
        self.modules.keys().copied().collect()
    }

    pub fn list_modules_of_type(&self, type_name: &str) -> Vec<u32> {
        self.modules
            .values()
            .filter(|m| m.type_name == type_name)
            .map(|m| m.global_id)
            .collect()
    }

    /// Every locally hosted instance, as `(local_id, name, type_name,
    /// number_of_channels)` — used to replay `NewModuleInstance` (M1) to a
    /// peer right after connecting (`inform_about_our_modules`).
    pub fn local_modules(&self) -> Vec<(u32, String, String, u32)> {
        self.modules
            .values()
            .filter(|m| m.node_id == self.self_node)
            .map(|m| {
                let (_, local_id) = ids::unpack(m.global_id);
                (local_id, m.name.clone(), m.type_name.clone(), m.number_of_channels)
            })
            .collect()
    }

    /// Clones out a local instance's spec/state for a module callback
    /// invocation with the lock released.
    pub fn local_instance(&self, global_id: u32) -> Option<(Arc<dyn ModuleType>, Arc<dyn Any + Send + Sync>)> {
        self.modules.get(&global_id).and_then(|m| {
            m.local
                .as_ref()
                .map(|l| (l.spec.clone(), l.state.clone()))
        })
    }

    /// A peer announced one of its modules has been deleted (M2): drop the
    /// directory entry and cancel subscriptions the same way a local
    /// deletion does.
    pub fn forget_remote_module(&mut self, global_id: u32) {
        if let Some(record) = self.modules.remove(&global_id) {
            self.names.remove(&(record.node_id, record.name));
            self.cancel_subscriptions_for_module(global_id, record.number_of_channels);
        }
    }

    /// Bytes of the current head descriptor for a channel, if any — serves
    /// a `GET_DATA` (M5) request from a peer and backs local `get_data`.
    pub fn channel_head_bytes(&self, global_id: u32, channel: u32) -> Option<Arc<Vec<u8>>> {
        self.channels
            .get(&(global_id, channel))
            .and_then(|s| s.head)
            .and_then(|id| self.arena.bytes(id))
    }

    pub fn head_descriptor(&self, global_id: u32, channel: u32) -> Option<DescriptorId> {
        self.channels.get(&(global_id, channel)).and_then(|s| s.head)
    }

    /// `mato_get_module_id`: looks up a module by name on this node.
    pub fn find_by_name(&self, name: &str) -> Option<u32> {
        self.names.get(&(self.self_node, name.to_owned())).copied()
    }

    pub fn module_name(&self, global_id: u32) -> Option<&str> {
        self.modules.get(&global_id).map(|m| m.name.as_str())
    }

    pub fn module_type(&self, global_id: u32) -> Option<&str> {
        self.modules.get(&global_id).map(|m| m.type_name.as_str())
    }

    pub fn number_of_modules(&self) -> usize {
        self.modules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Dummy(AtomicU32);
    impl ModuleType for Dummy {
        fn number_of_channels(&self) -> u32 {
            2
        }
        fn create(&self, _global_id: u32) -> Box<dyn Any + Send + Sync> {
            Box::new(())
        }
    }

    fn dummy_spec() -> Arc<dyn ModuleType> {
        Arc::new(Dummy(AtomicU32::new(0)))
    }

    #[test]
    fn create_instance_assigns_sequential_ids_starting_after_main_program() {
        let mut reg = Registry::new(0);
        reg.register_type("A", dummy_spec()).unwrap();
        let (g1, _) = reg.begin_create_instance("A", "a1").unwrap();
        let (g2, _) = reg.begin_create_instance("A", "a2").unwrap();
        assert_eq!(g1, 1);
        assert_eq!(g2, 2);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut reg = Registry::new(0);
        reg.register_type("A", dummy_spec()).unwrap();
        reg.begin_create_instance("A", "a1").unwrap();
        assert!(matches!(
            reg.begin_create_instance("A", "a1"),
            Err(Error::DuplicateName(_))
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        let mut reg = Registry::new(0);
        assert!(matches!(
            reg.begin_create_instance("Nope", "x"),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn subscribe_to_remote_publisher_requests_forward_only_once() {
        let mut reg = Registry::new(1);
        // Learn about a remote module on node 0 via M1.
        reg.store_remote_module(0, 5, "pub".into(), "A".into(), 2);
        let (sub_gid, _) = {
            reg.register_type("B", dummy_spec()).unwrap();
            reg.begin_create_instance("B", "sub").unwrap()
        };
        let publisher_gid = ids::pack(0, 5);
        let cb = LocalCallback::Pointer(Arc::new(|_, _| {}));
        let first = reg
            .subscribe(sub_gid, publisher_gid, 0, cb.clone())
            .unwrap();
        assert_eq!(first.send_subscribe_to, Some(0));
        let second = reg.subscribe(sub_gid, publisher_gid, 0, cb).unwrap();
        assert_eq!(second.send_subscribe_to, None);
    }

    #[test]
    fn delete_instance_cancels_subscriptions_to_its_channels() {
        let mut reg = Registry::new(0);
        reg.register_type("A", dummy_spec()).unwrap();
        let (pub_gid, _) = reg.begin_create_instance("A", "pub").unwrap();
        let (sub_gid, _) = reg.begin_create_instance("A", "sub").unwrap();
        reg.subscribe(
            sub_gid,
            pub_gid,
            0,
            LocalCallback::Pointer(Arc::new(|_, _| {})),
        )
        .unwrap();
        assert!(reg.channels.contains_key(&(pub_gid, 0)));
        reg.begin_delete_instance(pub_gid).unwrap();
        assert!(!reg.channels.contains_key(&(pub_gid, 0)));
    }

    #[test]
    fn delete_instance_decrements_head_refcount_instead_of_leaking_it() {
        let mut reg = Registry::new(0);
        reg.register_type("A", dummy_spec()).unwrap();
        let (pub_gid, _) = reg.begin_create_instance("A", "pub").unwrap();

        // Post directly through the arena/channel table, as `redistribute::post`
        // does: insert at refcount 2, set as channel head.
        let id = reg.arena.insert(0, pub_gid, 0, Arc::new(vec![1, 2, 3]));
        reg.arena.add_ref(id, 2);
        reg.channels.entry((pub_gid, 0)).or_default().head = Some(id);
        // Mirrors fan-out completing and releasing its own in-flight ref,
        // leaving exactly the one ref the channel head itself holds.
        reg.arena.add_ref(id, -1);
        assert!(reg.arena.contains(id));

        reg.begin_delete_instance(pub_gid).unwrap();
        assert!(
            !reg.arena.contains(id),
            "deleting the publisher must decrement the head's refcount, not just drop the channel entry"
        );
        assert!(reg.dangling.is_empty());
    }

    #[test]
    fn disconnect_node_drops_its_modules_and_forwards() {
        let mut reg = Registry::new(0);
        reg.store_remote_module(1, 3, "r".into(), "A".into(), 1);
        let remote_gid = ids::pack(1, 3);
        reg.add_remote_forward(3, 0, 1); // nonsensical self-forward path exercised just for bookkeeping
        assert!(reg.modules.contains_key(&remote_gid));
        reg.disconnect_node(1);
        assert!(!reg.modules.contains_key(&remote_gid));
    }
}
