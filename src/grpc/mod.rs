pub mod cluster_service;
pub mod log_service;
pub mod server;

pub use cluster_service::ClusterService;
pub use log_service::LogServiceImpl;
pub use server::GrpcServer;

use tonic::{Code, Status};

use crate::raft::Consensus;

/// Detail attached to the reserved "not leader" status.
pub const NOT_LEADER_MESSAGE: &str = "This node is not the leader";

/// Reject a mutating call unless this node leads.
///
/// The rejection uses `FAILED_PRECONDITION`, keeping `UNAVAILABLE` for nodes
/// that are down or cannot reach a majority.
pub async fn require_leader(consensus: &dyn Consensus) -> Result<(), Status> {
    if consensus.is_leader().await {
        Ok(())
    } else {
        Err(Status::failed_precondition(NOT_LEADER_MESSAGE))
    }
}

/// The caller hit a non-leader and should rediscover the leader.
pub fn is_not_leader(status: &Status) -> bool {
    status.code() == Code::FailedPrecondition
}

/// The node could not serve the call; rediscover and retry elsewhere.
pub fn is_retryable(status: &Status) -> bool {
    matches!(status.code(), Code::FailedPrecondition | Code::Unavailable)
}
