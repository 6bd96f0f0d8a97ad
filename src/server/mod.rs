use std::path::Path;

use log::info;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::ClusterConfig;
use crate::error::Result;
use crate::raft::transport::{self, PeerTransport};
use crate::raft::{Event, Node, NodeId};
use crate::storage::DiskStorage;

/// Wires one cluster node together: configuration, persistent storage
/// (fresh or recovered), the peer transport, and the consensus core.
pub struct Server {
    node: Node,
    listener: TcpListener,
    events: mpsc::UnboundedSender<Event>,
}

impl Server {
    /// Prepares a node for serving. A fresh start wipes the data directory;
    /// a restart recovers the log and metadata and replays the committed
    /// prefix. Configuration and startup I/O errors are fatal here.
    pub async fn start(
        id: NodeId,
        restarting: bool,
        config: &ClusterConfig,
        data_dir: &Path,
    ) -> Result<Self> {
        let addr = config.addr(id)?;
        let listener = transport::bind(addr).await?;
        let transport = PeerTransport::start(id, config);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

        let node = if restarting {
            info!("node {} recovering from {}", id, data_dir.display());
            let (storage, metadata, entries) = DiskStorage::open(data_dir)?;
            Node::recover(id, config.peers(id), storage, metadata, entries, transport, event_rx)
        } else {
            info!("node {} starting fresh in {}", id, data_dir.display());
            let storage = DiskStorage::create(data_dir)?;
            Node::new(id, config.peers(id), storage, transport, event_rx)
        };

        Ok(Self { node, listener, events: event_tx })
    }

    /// Accepts connections and runs the consensus core until shutdown.
    pub async fn serve(self) -> Result<()> {
        let Server { node, listener, events } = self;
        tokio::spawn(transport::serve(listener, events));
        node.run().await
    }
}
