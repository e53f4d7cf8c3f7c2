use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConsensusError, Result};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name used as `candidate_id` / `leader_id` on the wire
    pub node_id: String,
    pub listen_addr: SocketAddr,
    /// Address peers and clients use to reach this node; returned by GetLeader
    pub advertise_addr: String,
    pub peers: Vec<PeerConfig>,
    /// Directory holding `raft.log` and `state.json`
    pub data_dir: PathBuf,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Bound on every outbound RPC; must stay below the election timeout floor
    pub rpc_timeout_ms: u64,
    /// Require the candidate's log to be at least as up to date as ours before voting
    pub check_vote_log_freshness: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub addr: String, // host:port format, supports both IP and hostnames
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            advertise_addr: "127.0.0.1:50051".to_string(),
            peers: Vec::new(),
            data_dir: PathBuf::from("data"),
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            rpc_timeout_ms: 100,
            check_vote_log_freshness: false,
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            node_id: node_id.into(),
            listen_addr,
            advertise_addr: listen_addr.to_string(),
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, addr: impl Into<String>) -> Self {
        self.peers.push(PeerConfig { addr: addr.into() });
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_timeouts(
        mut self,
        election_min_ms: u64,
        election_max_ms: u64,
        heartbeat_ms: u64,
    ) -> Self {
        self.election_timeout_min_ms = election_min_ms;
        self.election_timeout_max_ms = election_max_ms;
        self.heartbeat_interval_ms = heartbeat_ms;
        self
    }

    /// Votes needed to win an election or commit an entry (self included).
    pub fn quorum(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(ConsensusError::InvalidConfig("node id must not be empty".into()));
        }
        if self.election_timeout_min_ms > self.election_timeout_max_ms {
            return Err(ConsensusError::InvalidConfig(format!(
                "election timeout range {}..{} ms is inverted",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err(ConsensusError::InvalidConfig(format!(
                "heartbeat interval {} ms must be below the election timeout floor {} ms",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        if self.rpc_timeout_ms == 0 || self.rpc_timeout_ms >= self.election_timeout_min_ms {
            return Err(ConsensusError::InvalidConfig(format!(
                "rpc timeout {} ms must be non-zero and below the election timeout floor {} ms",
                self.rpc_timeout_ms, self.election_timeout_min_ms
            )));
        }
        if self.peers.iter().any(|p| p.addr == self.advertise_addr) {
            return Err(ConsensusError::InvalidConfig(format!(
                "peer list contains this node's own address {}",
                self.advertise_addr
            )));
        }
        Ok(())
    }
}

/// Parse a comma-separated `host:port` list, dropping blanks and this node's own address.
///
/// The same list can be handed to every node of the cluster.
pub fn parse_peers(peers: &str, self_addr: &str) -> Vec<PeerConfig> {
    let mut parsed: Vec<PeerConfig> = Vec::new();
    for addr in peers.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        if addr == self_addr {
            continue;
        }
        if !addr.contains(':') {
            tracing::warn!(peer = addr, "Invalid peer format, expected host:port");
            continue;
        }
        if parsed.iter().all(|p| p.addr != addr) {
            parsed.push(PeerConfig {
                addr: addr.to_string(),
            });
        }
    }
    parsed
}

/// Settings for clients locating the leader.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Every node of the cluster, `host:port`
    pub nodes: Vec<String>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub rpc_timeout: Duration,
    /// Give up discovery after this long; `None` searches forever
    pub discovery_timeout: Option<Duration>,
    /// Attempts per request before surfacing the last error
    pub max_attempts: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
            backoff_multiplier: 1.3,
            rpc_timeout: Duration::from_secs(2),
            discovery_timeout: None,
            max_attempts: 5,
        }
    }
}

impl ClientConfig {
    pub fn new(nodes: Vec<String>) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }
}
