use std::sync::Arc;

use crate::error::Result;
use crate::raft::RaftNode;

/// What the application layer needs from the consensus core.
///
/// Mutating operations check [`is_leader`](Consensus::is_leader) first and
/// apply a change only after [`propose_log_entry`](Consensus::propose_log_entry)
/// returned `true`.
#[tonic::async_trait]
pub trait Consensus: Send + Sync + 'static {
    async fn is_leader(&self) -> bool;

    /// `true` once a majority holds the entry. `false` means "uncommitted, do not apply".
    async fn propose_log_entry(&self, data: String) -> Result<bool>;
}

#[tonic::async_trait]
impl Consensus for Arc<RaftNode> {
    async fn is_leader(&self) -> bool {
        RaftNode::is_leader(self).await
    }

    async fn propose_log_entry(&self, data: String) -> Result<bool> {
        RaftNode::propose_log_entry(self, data).await
    }
}
