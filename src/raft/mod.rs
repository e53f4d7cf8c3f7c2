pub mod facade;
pub mod node;
pub mod peer;
pub mod rpc;
pub mod state;
pub mod storage;
pub mod timer;

pub use facade::Consensus;
pub use node::{Proposal, RaftNode};
pub use state::{HardState, LogEntry, NodeState, RaftRole};
pub use storage::LogStore;
