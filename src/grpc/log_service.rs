use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::error::ConsensusError;
use crate::grpc::require_leader;
use crate::proto::log_service_server::LogService;
use crate::proto::{ProposeRequest, ProposeResponse};
use crate::raft::Consensus;

/// Leader-guarded entry point the application layer uses to order a change.
pub struct LogServiceImpl {
    consensus: Arc<dyn Consensus>,
}

impl LogServiceImpl {
    pub fn new(consensus: Arc<dyn Consensus>) -> Self {
        Self { consensus }
    }
}

#[tonic::async_trait]
impl LogService for LogServiceImpl {
    async fn propose(
        &self,
        request: Request<ProposeRequest>,
    ) -> Result<Response<ProposeResponse>, Status> {
        let req = request.into_inner();
        if req.data.is_empty() {
            return Err(Status::invalid_argument("Data cannot be empty"));
        }

        require_leader(self.consensus.as_ref()).await?;

        match self.consensus.propose_log_entry(req.data).await {
            Ok(true) => Ok(Response::new(ProposeResponse { committed: true })),
            // The entry stays appended on the leader; re-sending would duplicate it
            Ok(false) => {
                tracing::info!("Proposal not committed by a majority");
                Ok(Response::new(ProposeResponse { committed: false }))
            }
            Err(ConsensusError::NotLeader(_)) => Err(Status::failed_precondition(
                crate::grpc::NOT_LEADER_MESSAGE,
            )),
            Err(e) => {
                tracing::error!(error = %e, "Proposal failed");
                Err(Status::unavailable("Service temporarily unavailable, retry"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeConsensus {
        leader: AtomicBool,
        commit: bool,
        proposals: AtomicUsize,
    }

    impl FakeConsensus {
        fn new(leader: bool, commit: bool) -> Arc<Self> {
            Arc::new(Self {
                leader: AtomicBool::new(leader),
                commit,
                proposals: AtomicUsize::new(0),
            })
        }
    }

    #[tonic::async_trait]
    impl Consensus for FakeConsensus {
        async fn is_leader(&self) -> bool {
            self.leader.load(Ordering::SeqCst)
        }

        async fn propose_log_entry(&self, _data: String) -> Result<bool> {
            self.proposals.fetch_add(1, Ordering::SeqCst);
            Ok(self.commit)
        }
    }

    fn request(data: &str) -> Request<ProposeRequest> {
        Request::new(ProposeRequest {
            data: data.to_string(),
        })
    }

    #[tokio::test]
    async fn follower_rejects_with_not_leader() {
        let fake = FakeConsensus::new(false, true);
        let service = LogServiceImpl::new(fake.clone());

        let status = service.propose(request("enroll:alice")).await.unwrap_err();

        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert_eq!(fake.proposals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn leader_commits() {
        let fake = FakeConsensus::new(true, true);
        let service = LogServiceImpl::new(fake.clone());

        let response = service.propose(request("enroll:alice")).await.unwrap();

        assert!(response.into_inner().committed);
        assert_eq!(fake.proposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_majority_reports_uncommitted() {
        let fake = FakeConsensus::new(true, false);
        let service = LogServiceImpl::new(fake.clone());

        let response = service.propose(request("enroll:alice")).await.unwrap();

        assert!(!response.into_inner().committed);
        assert_eq!(fake.proposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_data_is_invalid() {
        let service = LogServiceImpl::new(FakeConsensus::new(true, true));

        let status = service.propose(request("")).await.unwrap_err();

        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
