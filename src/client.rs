//! Client-side leader discovery.
//!
//! Any node answers `GetLeader`, but only the leader returns a non-empty
//! address. Clients poll every node with exponential backoff until one claims
//! leadership, then send mutating calls there. A `FAILED_PRECONDITION`
//! ("not leader") or `UNAVAILABLE` reply sends the client back to discovery.

use std::time::Duration;

use tokio::time::{timeout, Instant};
use tonic::transport::{Channel, Endpoint};

use crate::config::ClientConfig;
use crate::error::{ConsensusError, Result};
use crate::grpc::{is_not_leader, is_retryable};
use crate::proto::log_service_client::LogServiceClient;
use crate::proto::raft_service_client::RaftServiceClient;
use crate::proto::{Empty, LastLogIndexResponse, ProposeRequest};

/// Exponential backoff with a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
        }
    }

    /// Delay to wait now; the following one grows by the multiplier up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(32), 1.3)
    }
}

async fn connect(addr: &str, rpc_timeout: Duration) -> Result<Channel> {
    let endpoint = Endpoint::from_shared(format!("http://{}", addr))?
        .connect_timeout(rpc_timeout)
        .timeout(rpc_timeout);
    Ok(endpoint.connect().await?)
}

/// Ask one node whether it leads. `Ok(None)` means it answered but is not the leader.
pub async fn query_leader(addr: &str, rpc_timeout: Duration) -> Result<Option<String>> {
    let mut client = RaftServiceClient::new(connect(addr, rpc_timeout).await?);
    let response = timeout(rpc_timeout, client.get_leader(Empty {}))
        .await
        .map_err(|_| ConsensusError::Timeout(addr.to_string()))??
        .into_inner();

    if response.leader_address.is_empty() {
        Ok(None)
    } else {
        Ok(Some(response.leader_address))
    }
}

pub async fn query_last_log_index(
    addr: &str,
    rpc_timeout: Duration,
) -> Result<LastLogIndexResponse> {
    let mut client = RaftServiceClient::new(connect(addr, rpc_timeout).await?);
    let response = timeout(rpc_timeout, client.get_last_log_index(Empty {}))
        .await
        .map_err(|_| ConsensusError::Timeout(addr.to_string()))??;
    Ok(response.into_inner())
}

/// Client that tracks the current leader and follows it across elections.
pub struct ClusterClient {
    config: ClientConfig,
    leader: Option<String>,
    client: Option<LogServiceClient<Channel>>,
}

impl ClusterClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            leader: None,
            client: None,
        }
    }

    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    /// Poll every node until one reports itself leader.
    pub async fn find_leader(&mut self) -> Result<String> {
        self.leader = None;
        self.client = None;

        let started = Instant::now();
        let mut backoff = Backoff::new(
            self.config.initial_backoff,
            self.config.max_backoff,
            self.config.backoff_multiplier,
        );

        loop {
            tracing::info!("Searching for leader...");
            for node in &self.config.nodes {
                match query_leader(node, self.config.rpc_timeout).await {
                    Ok(Some(leader)) => {
                        tracing::info!(leader = %leader, "Current leader found");
                        self.leader = Some(leader.clone());
                        return Ok(leader);
                    }
                    Ok(None) => tracing::debug!(node = %node, "Node is not the leader"),
                    Err(e) => tracing::warn!(node = %node, error = %e, "Failed to contact node"),
                }
            }

            let delay = backoff.next_delay();
            if let Some(limit) = self.config.discovery_timeout {
                if started.elapsed() + delay > limit {
                    return Err(ConsensusError::LeaderNotFound(self.config.nodes.clone()));
                }
            }
            tracing::warn!(
                retry_in_ms = delay.as_millis() as u64,
                "Leader not found, retrying with backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn leader_client(&mut self) -> Result<LogServiceClient<Channel>> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let leader = match &self.leader {
            Some(leader) => leader.clone(),
            None => self.find_leader().await?,
        };
        let client = LogServiceClient::new(connect(&leader, self.config.rpc_timeout).await?);
        tracing::info!(leader = %leader, "Connected to leader");
        self.client = Some(client.clone());
        Ok(client)
    }

    /// Propose `data` through the leader, following redirects.
    pub async fn propose(&mut self, data: impl Into<String>) -> Result<bool> {
        let data = data.into();
        let mut last_error = None;

        for attempt in 1..=self.config.max_attempts.max(1) {
            let mut client = match self.leader_client().await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Could not reach leader");
                    self.leader = None;
                    last_error = Some(e);
                    continue;
                }
            };

            match client.propose(ProposeRequest { data: data.clone() }).await {
                Ok(response) => return Ok(response.into_inner().committed),
                Err(status) if is_retryable(&status) => {
                    if is_not_leader(&status) {
                        tracing::info!(
                            attempt,
                            "Node is not the leader, re-fetching the current leader"
                        );
                    } else {
                        tracing::warn!(
                            attempt,
                            message = status.message(),
                            "Leader unavailable, re-fetching the current leader"
                        );
                    }
                    self.leader = None;
                    self.client = None;
                    last_error = Some(status.into());
                }
                Err(status) => return Err(status.into()),
            }
        }

        Err(last_error.unwrap_or_else(|| ConsensusError::LeaderNotFound(self.config.nodes.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_by_multiplier() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1690));
    }

    #[test]
    fn backoff_is_capped() {
        let mut backoff = Backoff::default();
        let mut last = Duration::ZERO;
        for _ in 0..30 {
            last = backoff.next_delay();
        }
        assert_eq!(last, Duration::from_secs(32));
    }

    #[tokio::test]
    async fn discovery_gives_up_after_timeout() {
        let mut config = ClientConfig::new(vec!["127.0.0.1:1".to_string()]);
        config.initial_backoff = Duration::from_millis(10);
        config.rpc_timeout = Duration::from_millis(50);
        config.discovery_timeout = Some(Duration::from_millis(100));
        let mut client = ClusterClient::new(config);

        let result = client.find_leader().await;

        assert!(matches!(result, Err(ConsensusError::LeaderNotFound(_))));
        assert!(client.leader().is_none());
    }
}
