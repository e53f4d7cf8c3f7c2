use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Not the leader, last known leader is {0:?}")]
    NotLeader(Option<String>),

    #[error("Node halted after a storage failure and no longer participates")]
    Halted,

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Log record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Peer {0} is unreachable")]
    PeerUnreachable(String),

    #[error("RPC to {0} timed out")]
    Timeout(String),

    #[error("gRPC error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No leader found among {0:?}")]
    LeaderNotFound(Vec<String>),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
