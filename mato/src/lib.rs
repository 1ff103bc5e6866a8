//! # mato
//!
//! A distributed, multi-node module control framework: modules publish
//! typed payloads on numbered channels, other modules (local or on a
//! different node) subscribe to them, and a framework-owned redistribution
//! loop fans each payload out with reference-counted lifetime tracking.
//!
//! Every node runs one [`Framework`] instance. Modules are registered
//! types ([`ModuleType`]) instantiated by name ([`Framework::create_instance`]);
//! instances publish via [`Framework::post_data`] and receive data through
//! a subscription callback ([`Framework::subscribe`]) in one of three
//! delivery modes ([`SubscriptionKind`]).

mod api;
mod buffer;
mod ids;
pub mod logs;
mod net;
mod redistribute;
mod registry;
mod shutdown;
mod types;

pub use api::{Framework, SubscribeCallback};
pub use buffer::{Borrowed, DescriptorId};
pub use types::{BorrowedCallback, DataCallback, ModuleType, SubscriptionKind};

pub use mato_common::{Error, Result, MATO_BROADCAST, MATO_MAIN_PROGRAM_MODULE, NODE_MULTIPLIER};
pub use mato_config::{NodeEntry, NodesConfig, VarValConfig};
