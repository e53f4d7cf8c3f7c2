use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint};

use crate::error::{ConsensusError, Result};
use crate::proto::raft_service_client::RaftServiceClient;
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};

/// Outbound connection to one member of the static peer set.
#[derive(Debug)]
pub struct Peer {
    pub addr: String,
    client: Mutex<Option<RaftServiceClient<Channel>>>,
    /// Held for the duration of one AppendEntries exchange
    lane: Mutex<()>,
    /// Cleared to simulate a network partition
    reachable: AtomicBool,
    rpc_timeout: Duration,
}

impl Peer {
    pub fn new(addr: impl Into<String>, rpc_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            client: Mutex::new(None),
            lane: Mutex::new(()),
            reachable: AtomicBool::new(true),
            rpc_timeout,
        }
    }

    /// Drop all traffic to this peer until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        self.reachable.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.reachable.store(true, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Wait for the replication lane.
    pub async fn lane(&self) -> MutexGuard<'_, ()> {
        self.lane.lock().await
    }

    /// Take the replication lane only if no exchange is in flight.
    pub fn try_lane(&self) -> Option<MutexGuard<'_, ()>> {
        self.lane.try_lock().ok()
    }

    async fn client(&self) -> Result<RaftServiceClient<Channel>> {
        if !self.is_reachable() {
            return Err(ConsensusError::PeerUnreachable(self.addr.clone()));
        }

        let mut client = self.client.lock().await;
        if let Some(client) = client.as_ref() {
            return Ok(client.clone());
        }

        let endpoint = Endpoint::from_shared(format!("http://{}", self.addr))?
            .connect_timeout(self.rpc_timeout)
            .timeout(self.rpc_timeout);
        let created = RaftServiceClient::new(endpoint.connect_lazy());
        *client = Some(created.clone());
        Ok(created)
    }

    pub async fn request_vote(&self, req: VoteRequest) -> Result<VoteResponse> {
        let mut client = self.client().await?;
        match timeout(self.rpc_timeout, client.request_vote(req)).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(status.into()),
            Err(_) => Err(ConsensusError::Timeout(self.addr.clone())),
        }
    }

    pub async fn append_entries(&self, req: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        let mut client = self.client().await?;
        match timeout(self.rpc_timeout, client.append_entries(req)).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(status.into()),
            Err(_) => Err(ConsensusError::Timeout(self.addr.clone())),
        }
    }
}
