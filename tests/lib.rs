//! Shared fixtures for bt-p2p integration tests.

use bt_core::{Node, NodeConfig, PROTOCOL_ID, SeedSession};
use bt_discovery::MemoryDiscovery;
use bt_transport::{MemoryConnector, PeerId, PeerRef};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Write `len` random bytes to `dir/name`
pub fn random_file(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&data).unwrap();
    file.sync_all().unwrap();
    (path, data)
}

/// In-process swarm: one connector and one provider table shared by every node
#[derive(Clone, Default)]
pub struct MemorySwarm {
    /// Connection service shared by all nodes
    pub connector: MemoryConnector,
    /// Provider table shared by all nodes
    pub discovery: MemoryDiscovery,
}

impl MemorySwarm {
    /// Empty swarm
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `path` from a fresh node and announce it
    pub async fn seeder(&self, path: &Path, config: NodeConfig) -> (Node, SeedSession) {
        let id = PeerId::random();
        let node = Node::new(
            Arc::new(self.connector.clone()),
            Arc::new(self.discovery.with_local(PeerRef::new(id, Vec::new()))),
            config,
        )
        .unwrap();
        let seeded = node.seed(path).await.unwrap();
        self.connector
            .register(id, PROTOCOL_ID, seeded.server.clone());
        assert!(node.announce(&seeded.metadata.file_id).await);
        (node, seeded)
    }

    /// A node that only downloads
    pub fn leecher(&self, config: NodeConfig) -> Node {
        Node::new(
            Arc::new(self.connector.clone()),
            Arc::new(self.discovery.clone()),
            config,
        )
        .unwrap()
    }
}
