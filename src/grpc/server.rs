use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::Server;

use crate::grpc::cluster_service::ClusterService;
use crate::grpc::log_service::LogServiceImpl;
use crate::proto::log_service_server::LogServiceServer;
use crate::proto::raft_service_server::RaftServiceServer;
use crate::raft::RaftNode;

pub struct GrpcServer {
    addr: SocketAddr,
    raft_node: Arc<RaftNode>,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, raft_node: Arc<RaftNode>) -> Self {
        Self { addr, raft_node }
    }

    fn router(&self) -> Router {
        let cluster_service = ClusterService::new(self.raft_node.clone());
        let log_service = LogServiceImpl::new(Arc::new(self.raft_node.clone()));

        Server::builder()
            .add_service(RaftServiceServer::new(cluster_service))
            .add_service(LogServiceServer::new(log_service))
    }

    /// Bind `addr` and serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %self.addr, "Starting gRPC server");

        self.router()
            .serve_with_shutdown(self.addr, shutdown.cancelled_owned())
            .await
    }

    /// Serve on an already bound listener until `shutdown` is cancelled.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %self.addr, "Starting gRPC server on bound listener");

        self.router()
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await
    }
}
