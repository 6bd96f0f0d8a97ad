use std::collections::BTreeMap;

use serde_derive::Deserialize;

use crate::error::{Error, Result};
use crate::raft::NodeId;

/// The static cluster layout: node id to network address.
///
/// Every peer loads the same file at startup; the protocol assumes the
/// mappings are identical everywhere. There is no runtime membership change.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterConfig {
    nodes: BTreeMap<NodeId, String>,
}

/// On-disk shape of the cluster file. YAML mapping keys arrive as strings.
#[derive(Debug, Deserialize)]
struct RawConfig {
    nodes: BTreeMap<String, String>,
}

impl ClusterConfig {
    /// Loads the cluster file, with `LEASEKV_*` environment overrides.
    pub fn load(file: &str) -> Result<Self> {
        let raw: RawConfig = config::Config::builder()
            .add_source(config::File::with_name(file))
            .add_source(config::Environment::with_prefix("LEASEKV").separator("__"))
            .build()?
            .try_deserialize()?;
        Self::from_entries(raw.nodes)
    }

    fn from_entries(entries: BTreeMap<String, String>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::Config("cluster file lists no nodes".to_string()));
        }
        let mut nodes = BTreeMap::new();
        for (id, addr) in entries {
            let id: NodeId = id
                .parse()
                .map_err(|_| Error::Config(format!("invalid node id {:?}", id)))?;
            if addr.trim().is_empty() {
                return Err(Error::Config(format!("node {} has an empty address", id)));
            }
            if nodes.insert(id, addr).is_some() {
                return Err(Error::Config(format!("node {} listed twice", id)));
            }
        }
        Ok(Self { nodes })
    }

    /// The address of a node. Missing entries are a configuration error.
    pub fn addr(&self, id: NodeId) -> Result<&str> {
        self.nodes
            .get(&id)
            .map(|s| s.as_str())
            .ok_or_else(|| Error::Config(format!("node {} is not in the cluster file", id)))
    }

    /// All node ids except `id`, in ascending order.
    pub fn peers(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes.keys().copied().filter(|n| *n != id).collect()
    }

    /// All (id, address) pairs, in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &str)> {
        self.nodes.iter().map(|(id, addr)| (*id, addr.as_str()))
    }

    /// Total cluster size N.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Strict majority of the full cluster, `ceil((N + 1) / 2)`.
    pub fn quorum(&self) -> usize {
        self.nodes.len() / 2 + 1
    }
}
