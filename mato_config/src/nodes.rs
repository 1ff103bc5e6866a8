//! The nodes config file: a line-based CSV of `node_id,ipv4,port,name`,
//! with `#`-prefixed comment lines, parsed by
//! `original_source/mato/mato_config.c`'s sibling logic in `mato_core.c`'s
//! node table loader. Whitespace at the end of a line is ignored; any
//! malformed line aborts parsing with a `Configuration` error (spec §7:
//! Configuration errors are fatal at init).

use std::net::Ipv4Addr;
use std::path::Path;

use mato_common::{Error, Result};

/// One line of the nodes config: a peer this process may connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub node_id: u32,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub name: String,
}

/// The full parsed nodes config, in file order.
#[derive(Debug, Clone, Default)]
pub struct NodesConfig {
    pub entries: Vec<NodeEntry>,
}

impl NodesConfig {
    /// Reads and parses a nodes config file from disk.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read nodes config {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
    }

    /// Parses nodes config text directly; split out from [`Self::read`] so
    /// it can be unit tested without touching the filesystem.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim_end();
            let line = line.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.splitn(4, ',').map(str::trim).collect();
            if fields.len() != 4 {
                return Err(Error::Configuration(format!(
                    "nodes config line {}: expected 4 comma-separated fields, got {}",
                    lineno + 1,
                    fields.len()
                )));
            }
            let node_id: u32 = fields[0].parse().map_err(|_| {
                Error::Configuration(format!(
                    "nodes config line {}: invalid node_id {:?}",
                    lineno + 1,
                    fields[0]
                ))
            })?;
            let ip: Ipv4Addr = fields[1].parse().map_err(|_| {
                Error::Configuration(format!(
                    "nodes config line {}: invalid ipv4 address {:?}",
                    lineno + 1,
                    fields[1]
                ))
            })?;
            let port: u16 = fields[2].parse().map_err(|_| {
                Error::Configuration(format!(
                    "nodes config line {}: invalid port {:?}",
                    lineno + 1,
                    fields[2]
                ))
            })?;
            let name = fields[3].to_owned();
            if name.is_empty() {
                return Err(Error::Configuration(format!(
                    "nodes config line {}: empty node name",
                    lineno + 1
                )));
            }
            entries.push(NodeEntry {
                node_id,
                ip,
                port,
                name,
            });
        }
        Ok(Self { entries })
    }

    pub fn find(&self, node_id: u32) -> Option<&NodeEntry> {
        self.entries.iter().find(|e| e.node_id == node_id)
    }
}
