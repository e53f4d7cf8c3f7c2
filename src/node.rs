use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::grpc::GrpcServer;
use crate::raft::RaftNode;

/// Main node that wires the consensus core to its gRPC surface.
pub struct Node {
    pub config: NodeConfig,
    pub raft_node: Arc<RaftNode>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let raft_node = Arc::new(RaftNode::new(config.clone())?);
        Ok(Self { config, raft_node })
    }

    /// Run the node until `shutdown` is cancelled.
    ///
    /// Spawns the Raft driver loop and the commit applier, then serves gRPC
    /// on `listen_addr` (or on `listener` when one is already bound).
    ///
    /// # Errors
    ///
    /// Returns an error if the gRPC server fails to start or stops abnormally.
    pub async fn run(
        self,
        listener: Option<TcpListener>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let raft_node = self.raft_node.clone();
        let raft_shutdown = shutdown.clone();
        tokio::spawn(async move {
            raft_node.run(raft_shutdown).await;
        });

        let applier_node = self.raft_node.clone();
        let applier_shutdown = shutdown.clone();
        tokio::spawn(async move {
            Self::apply_loop(applier_node, applier_shutdown).await;
        });

        let server = GrpcServer::new(self.config.listen_addr, self.raft_node.clone());
        match listener {
            Some(listener) => server.run_with_listener(listener, shutdown).await?,
            None => server.run(shutdown).await?,
        }

        tracing::info!(node_id = %self.config.node_id, "Node stopped");
        Ok(())
    }

    /// Hand committed entries to the application as the commit index advances.
    ///
    /// The log payload is opaque here; entries are only traced.
    async fn apply_loop(raft_node: Arc<RaftNode>, shutdown: CancellationToken) {
        let mut commit_rx = raft_node.subscribe_commits();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = commit_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    for (index, entry) in raft_node.take_committed_entries().await {
                        tracing::debug!(
                            node_id = %raft_node.id,
                            index,
                            term = entry.term,
                            bytes = entry.data.len(),
                            "Applied committed entry"
                        );
                    }
                }
            }
        }
    }
}
