//! # mato_config
//! Parsers for mato's two configuration file formats (spec §6):
//!
//! - the nodes config, a line-based CSV listing every computational node
//!   ([`nodes`]);
//! - the var:val config, used by host programs and modules for their own
//!   settings ([`varval`]).
//!
//! Both formats are hand-parsed rather than routed through `serde`: they are
//! small, line-oriented, and the var:val format's "missing key returns the
//! caller's default" contract doesn't map cleanly onto a derived
//! deserializer (see `SPEC_FULL.md` §9.3).

pub mod nodes;
pub mod varval;

pub use nodes::{NodeEntry, NodesConfig};
pub use varval::VarValConfig;
