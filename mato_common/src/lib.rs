//! # mato_common
//! Shared error type and small constants used throughout the mato framework
//! and its satellite crates (`mato_config`, `mato`).

/// The central error type used throughout mato.
///
/// All fallible, module-facing operations return this type (spec §7:
/// "Module-facing" errors are reported as return values plus a log entry,
/// never a process abort). Internal invariant violations are not
/// represented here at all — they are `assert!`/`panic!`, matching the
/// "must assert and terminate the process" requirement for those cases.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Missing or malformed configuration. Fatal at init.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Pipe/socket/thread creation failure.
    #[error("resource error: {0}")]
    Resource(String),

    /// `register_type` called with a name that is already registered.
    #[error("module type already registered: {0}")]
    DuplicateType(String),

    /// Operation referenced a type name that was never registered.
    #[error("unknown module type: {0}")]
    UnknownType(String),

    /// `create_instance` called with a name already in use on this node.
    #[error("module name already in use on this node: {0}")]
    DuplicateName(String),

    /// Operation referenced a module id that doesn't exist (or isn't local
    /// when locality is required).
    #[error("unknown module id: {0}")]
    UnknownModule(u32),

    /// A node would need a 100,000th local module id.
    #[error("module id space exhausted on node {0}")]
    ModuleLimitReached(u32),

    /// Channel index outside `0..type.number_of_channels`.
    #[error("invalid channel {channel} for module {module}")]
    InvalidChannel { module: u32, channel: u32 },

    /// Operation referenced a subscription id that doesn't exist.
    #[error("unknown subscription id: {0}")]
    UnknownSubscription(u32),

    /// Unknown wire frame type, or a length field that cannot be trusted.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The named peer node is not currently connected.
    #[error("node {0} is offline")]
    NodeOffline(u32),

    /// A remote `get_data`/`GET_GLOBAL_MESSAGE` round trip did not get a
    /// reply before its deadline.
    #[error("timed out waiting for remote reply: {0}")]
    Timeout(String),

    /// Transport-level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors raised by module code that doesn't fit a more
    /// specific variant above.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Generic result type used throughout mato.
pub type Result<T> = std::result::Result<T, Error>;

/// `node_id * NODE_MULTIPLIER + local_id` is the encoding used for every
/// global module id in the system (spec §3, C1).
pub const NODE_MULTIPLIER: u32 = 100_000;

/// Reserved local id standing in for "the hosting program" so that it may
/// call `send_global_message` without being a registered module instance.
pub const MATO_MAIN_PROGRAM_MODULE: u32 = 0;

/// Reserved receiver id meaning "every local instance" for
/// `send_message`/the wire protocol's `GLOBAL_MESSAGE` receiver field.
pub const MATO_BROADCAST: u32 = u32::MAX;

/// Default filename mato looks for in a node's working directory when no
/// explicit path is given (`mato_core.h`'s `CONFIG_FILENAME`).
pub const DEFAULT_NODES_CONFIG_FILENAME: &str = "mato_nodes.conf";
