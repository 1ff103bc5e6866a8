//! Public types a module implementation interacts with: the
//! [`ModuleType`] capability set and subscription delivery kinds.
//!
//! Grounded in `original_source/mato/mato.h`'s `module_specification`
//! (`create_instance`, `start_instance`, `delete_instance`,
//! `global_message` function pointers) and in the Design Notes replacement
//! "Dynamic dispatch through function pointers -> polymorphism over the
//! capability set". `instance_state` is kept fully opaque to the framework
//! via `Box<dyn Any + Send + Sync>`, matching "the framework never inspects
//! it" (spec §3).

use std::any::Any;
use std::sync::Arc;

/// The capability set a module type must provide. One implementation of
/// this trait is registered per type name via [`crate::Framework::register_type`].
pub trait ModuleType: Send + Sync + 'static {
    /// Number of output channels instances of this type expose.
    fn number_of_channels(&self) -> u32;

    /// Allocates and initializes instance state for a freshly created
    /// module instance. The returned box is handed back unchanged to
    /// every later callback for this instance.
    fn create(&self, global_id: u32) -> Box<dyn Any + Send + Sync>;

    /// Starts the instance — typically spawns module-owned worker threads
    /// and/or subscribes to other modules' channels.
    fn start(&self, _global_id: u32, _state: &(dyn Any + Send + Sync)) {}

    /// Tears the instance down. Called exactly once, before the instance's
    /// state is dropped.
    fn delete(&self, _global_id: u32, _state: &(dyn Any + Send + Sync)) {}

    /// Invoked for every global/unicast message the instance receives,
    /// except messages it sent itself.
    fn on_message(
        &self,
        _global_id: u32,
        _state: &(dyn Any + Send + Sync),
        _sender_global_id: u32,
        _message_id: i32,
        _data: &[u8],
    ) {
    }
}

/// What a subscriber receives when the publisher posts new data (spec §3,
/// "Subscription"). Mirrors the Design Notes' tagged variants
/// `{Pointer, Copy, Borrowed, RemoteForward{node}}`; `RemoteForward` is an
/// internal registry detail (a publisher's `remote_forwards` set on
/// [`crate::registry::ChannelState`]), not something a module chooses
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// Callback receives a reference to the framework-owned buffer for the
    /// duration of the call; no refcount change.
    Pointer,
    /// Callback receives an independent copy it may freely mutate or keep;
    /// no refcount change (the copy is simply dropped after the call).
    Copy,
    /// Callback receives a [`crate::buffer::Borrowed`] handle and must call
    /// [`crate::Framework::release_data`] on it once done.
    Borrowed,
}

/// A subscriber's callback for `pointer`/`copy` deliveries.
pub type DataCallback = Arc<dyn Fn(u32, &[u8]) + Send + Sync>;

/// A subscriber's callback for `borrowed` deliveries.
pub type BorrowedCallback = Arc<dyn Fn(u32, crate::buffer::Borrowed) + Send + Sync>;
