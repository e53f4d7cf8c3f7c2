use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::{ConsensusError, Result};
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::peer::Peer;
use crate::raft::rpc::{
    build_append_request, build_vote_request, handle_append_entries, handle_request_vote,
};
use crate::raft::state::{LogEntry, NodeState, RaftRole};
use crate::raft::storage::LogStore;
use crate::raft::timer::ElectionTimer;

/// Outcome of a proposal made on the leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub index: i64,
    pub term: u64,
    pub committed: bool,
}

/// The main Raft node that coordinates consensus.
///
/// All protocol state sits behind `state`; every role, term, log and commit
/// transition happens inside one write-locked section, and log persistence is
/// done before that section ends.
pub struct RaftNode {
    pub id: String,
    pub address: String,
    pub state: Arc<RwLock<NodeState>>,
    config: NodeConfig,
    peers: Vec<Arc<Peer>>,
    storage: LogStore,
    timer: ElectionTimer,
    commit_tx: watch::Sender<i64>,
    halted: AtomicBool,
}

impl RaftNode {
    /// Build a node from its configuration, loading the log and hard state from `data_dir`.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let storage = LogStore::open(&config.data_dir)?;
        let log = storage.load_log()?;
        let hard = storage.load_hard_state()?;
        let state = NodeState::restore(hard, log);

        tracing::info!(
            node_id = %config.node_id,
            term = state.current_term,
            log_len = state.log.len(),
            commit_index = state.commit_index,
            data_dir = %storage.dir().display(),
            "Loaded persisted state"
        );

        let peers = config
            .peers
            .iter()
            .map(|p| Arc::new(Peer::new(p.addr.clone(), config.rpc_timeout())))
            .collect();
        let (commit_tx, _) = watch::channel(state.commit_index);

        Ok(Self {
            id: config.node_id.clone(),
            address: config.advertise_addr.clone(),
            state: Arc::new(RwLock::new(state)),
            timer: ElectionTimer::new(
                config.election_timeout_min_ms,
                config.election_timeout_max_ms,
            ),
            config,
            peers,
            storage,
            commit_tx,
            halted: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn peer_addrs(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.addr.clone()).collect()
    }

    /// Watch the commit index. Receivers see every advance.
    pub fn subscribe_commits(&self) -> watch::Receiver<i64> {
        self.commit_tx.subscribe()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Simulate a partition towards `addr` (outbound traffic only).
    pub fn disconnect_peer(&self, addr: &str) {
        if let Some(peer) = self.peers.iter().find(|p| p.addr == addr) {
            peer.disconnect();
            tracing::info!(node_id = %self.id, peer = addr, "Disconnected peer");
        }
    }

    pub fn reconnect_peer(&self, addr: &str) {
        if let Some(peer) = self.peers.iter().find(|p| p.addr == addr) {
            peer.reconnect();
            tracing::info!(node_id = %self.id, peer = addr, "Reconnected peer");
        }
    }

    /// Run the Raft driver loop until `shutdown` is cancelled.
    ///
    /// Followers and candidates sleep until the election deadline; leaders
    /// send a heartbeat round every `heartbeat_interval`. Any timer reset
    /// (leader contact, granted vote, role change) wakes the loop so it
    /// re-reads the role and the new deadline.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.timer.reset();
        let heartbeat_interval = self.config.heartbeat_interval();

        loop {
            if self.is_halted() {
                tracing::warn!(node_id = %self.id, "Node halted, raft loop idle until shutdown");
                shutdown.cancelled().await;
                tracing::info!(node_id = %self.id, "Raft loop stopped");
                break;
            }

            let role = self.state.read().await.role;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(node_id = %self.id, "Raft loop stopped");
                    break;
                }

                _ = self.timer.rearmed() => {}

                _ = tokio::time::sleep_until(self.timer.deadline()),
                    if role != RaftRole::Leader =>
                {
                    if self.timer.is_expired() {
                        tracing::info!(node_id = %self.id, "Election timeout, starting election");
                        self.start_election().await;
                    }
                }

                _ = tokio::time::sleep(heartbeat_interval), if role == RaftRole::Leader => {
                    self.send_heartbeats().await;
                }
            }
        }
    }

    /// Start a new election and collect votes until the round is decided.
    pub async fn start_election(self: &Arc<Self>) {
        if self.is_halted() {
            return;
        }

        let req = {
            let mut state = self.state.write().await;
            if state.role == RaftRole::Leader {
                return;
            }
            state.become_candidate(&self.id);
            if let Err(e) = self.storage.save_hard_state(&state.hard_state()) {
                self.halt(&mut state, e);
                return;
            }
            tracing::info!(node_id = %self.id, term = state.current_term, "Started election");

            if state.votes_received >= self.config.quorum() {
                self.become_leader(&mut state);
                return;
            }
            build_vote_request(&state, &self.id)
        };
        self.timer.reset();

        let mut votes = JoinSet::new();
        for peer in self.peers.iter().cloned() {
            let req = req.clone();
            votes.spawn(async move {
                let result = peer.request_vote(req).await;
                (peer, result)
            });
        }

        while let Some(joined) = votes.join_next().await {
            let Ok((peer, result)) = joined else {
                continue;
            };
            match result {
                Ok(resp) => {
                    if self.handle_vote_response(req.term, resp).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::info!(
                        node_id = %self.id,
                        peer = %peer.addr,
                        error = %e,
                        "Failed to request vote"
                    );
                }
            }
        }
    }

    /// Apply one vote response. Returns `true` once the election round is over.
    async fn handle_vote_response(
        self: &Arc<Self>,
        election_term: u64,
        resp: VoteResponse,
    ) -> bool {
        let mut state = self.state.write().await;

        if resp.term > state.current_term {
            tracing::info!(
                node_id = %self.id,
                term = resp.term,
                "Higher term seen in vote response, stepping down"
            );
            self.step_down(&mut state, resp.term);
            return true;
        }

        if state.role != RaftRole::Candidate || state.current_term != election_term {
            return true;
        }

        if resp.vote_granted {
            state.votes_received += 1;
            tracing::info!(
                node_id = %self.id,
                term = election_term,
                votes = state.votes_received,
                "Received vote"
            );
            if state.votes_received >= self.config.quorum() {
                self.become_leader(&mut state);
                return true;
            }
        }
        false
    }

    fn become_leader(self: &Arc<Self>, state: &mut NodeState) {
        state.become_leader(&self.id, self.peers.iter().map(|p| p.addr.as_str()));
        tracing::info!(node_id = %self.id, term = state.current_term, "Became leader");
        self.timer.reset();

        // Assert leadership right away instead of waiting for the first tick
        let node = self.clone();
        tokio::spawn(async move {
            node.send_heartbeats().await;
        });
    }

    fn step_down(&self, state: &mut NodeState, term: u64) {
        let was_leader = state.role == RaftRole::Leader;
        state.become_follower(term);
        if let Err(e) = self.storage.save_hard_state(&state.hard_state()) {
            self.halt(state, e);
        }
        if was_leader {
            tracing::info!(node_id = %self.id, term, "Stepped down from leader");
        }
        self.timer.reset();
    }

    /// Demote to follower and stop participating: local state can no longer be made durable.
    fn halt(&self, state: &mut NodeState, err: ConsensusError) {
        tracing::error!(
            node_id = %self.id,
            error = %err,
            "Failed to persist raft state, halting node"
        );
        self.halted.store(true, Ordering::SeqCst);
        state.role = RaftRole::Follower;
        state.leader_id = None;
        state.next_index.clear();
        state.match_index.clear();
        self.timer.reset();
    }

    /// Send one heartbeat round. Each peer gets its own task; a peer whose
    /// previous exchange is still in flight is skipped this round.
    pub async fn send_heartbeats(self: &Arc<Self>) {
        if self.state.read().await.role != RaftRole::Leader {
            return;
        }

        for peer in self.peers.iter().cloned() {
            let node = self.clone();
            tokio::spawn(async move {
                let Some(_lane) = peer.try_lane() else {
                    tracing::trace!(
                        peer = %peer.addr,
                        "Replication still in flight, skipping heartbeat"
                    );
                    return;
                };
                node.replicate_to(&peer).await;
            });
        }
    }

    /// Bring `peer` up to date with our log, walking `next_index` back on
    /// consistency failures. Caller must hold the peer's lane.
    ///
    /// Returns `true` if the peer acknowledged everything we sent.
    async fn replicate_to(&self, peer: &Peer) -> bool {
        loop {
            let (req, term) = {
                let state = self.state.read().await;
                if state.role != RaftRole::Leader {
                    return false;
                }
                (build_append_request(&state, &peer.addr, &self.id), state.current_term)
            };
            let prev_log_index = req.prev_log_index;
            let sent = req.entries.len() as i64;

            let resp = match peer.append_entries(req).await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::debug!(
                        node_id = %self.id,
                        peer = %peer.addr,
                        error = %e,
                        "Failed to append entries"
                    );
                    return false;
                }
            };

            let mut state = self.state.write().await;
            match self.handle_append_response(&mut state, peer, term, prev_log_index, sent, resp) {
                Some(done) => return done,
                None => continue,
            }
        }
    }

    /// Apply an AppendEntries response. `None` means retry with a longer slice.
    fn handle_append_response(
        &self,
        state: &mut NodeState,
        peer: &Peer,
        sent_term: u64,
        prev_log_index: i64,
        sent: i64,
        resp: AppendEntriesResponse,
    ) -> Option<bool> {
        if resp.term > state.current_term {
            tracing::info!(
                node_id = %self.id,
                peer = %peer.addr,
                term = resp.term,
                "Higher term seen in AppendEntries response, stepping down"
            );
            self.step_down(state, resp.term);
            return Some(false);
        }

        // Stale response from an earlier term or after losing leadership
        if state.role != RaftRole::Leader || state.current_term != sent_term {
            return Some(false);
        }

        if resp.success {
            state.record_match(&peer.addr, prev_log_index + sent);
            if sent > 0 {
                tracing::debug!(
                    node_id = %self.id,
                    peer = %peer.addr,
                    match_index = prev_log_index + sent,
                    "Log entries replicated"
                );
            }
            if state.advance_commit_index(self.config.quorum()) {
                self.on_commit_advanced(state);
            }
            return Some(true);
        }

        if state.rewind_next_index(&peer.addr) {
            tracing::debug!(
                node_id = %self.id,
                peer = %peer.addr,
                next_index = state.next_index.get(&peer.addr).copied().unwrap_or(0),
                "AppendEntries rejected, retrying with earlier entries"
            );
            None
        } else {
            tracing::warn!(
                node_id = %self.id,
                peer = %resp.node_id,
                "AppendEntries rejected at start of log"
            );
            Some(false)
        }
    }

    fn on_commit_advanced(&self, state: &mut NodeState) {
        tracing::info!(
            node_id = %self.id,
            commit_index = state.commit_index,
            "Commit index advanced"
        );
        if let Err(e) = self.storage.save_hard_state(&state.hard_state()) {
            self.halt(state, e);
            return;
        }
        self.commit_tx.send_replace(state.commit_index);
    }

    /// Append `data` to the log and synchronously replicate it to every peer.
    ///
    /// Fails with [`ConsensusError::NotLeader`] on a non-leader. The entry stays
    /// in the log even when a majority is not reached.
    pub async fn propose(self: &Arc<Self>, data: impl Into<String>) -> Result<Proposal> {
        if self.is_halted() {
            return Err(ConsensusError::Halted);
        }

        let (index, term) = {
            let mut state = self.state.write().await;
            if state.role != RaftRole::Leader {
                return Err(ConsensusError::NotLeader(state.leader_id.clone()));
            }
            let index = state.append_entry(data);
            if let Err(e) = self.storage.save_log(&state.log) {
                self.halt(&mut state, e);
                return Err(ConsensusError::Halted);
            }
            tracing::debug!(
                node_id = %self.id,
                index,
                term = state.current_term,
                "Appended entry to log"
            );
            if state.advance_commit_index(self.config.quorum()) {
                self.on_commit_advanced(&mut state);
            }
            (index, state.current_term)
        };

        let mut acks = JoinSet::new();
        for peer in self.peers.iter().cloned() {
            let node = self.clone();
            acks.spawn(async move {
                let _lane = peer.lane().await;
                node.replicate_to(&peer).await
            });
        }
        while acks.join_next().await.is_some() {}

        let state = self.state.read().await;
        let committed = state.role == RaftRole::Leader
            && state.current_term == term
            && state.commit_index >= index
            && state.term_at(index) == Some(term);

        if committed {
            tracing::info!(node_id = %self.id, index, term, "Log entry committed by majority");
        } else {
            tracing::info!(
                node_id = %self.id,
                index,
                term,
                "Log entry not committed, majority not reached"
            );
        }
        Ok(Proposal {
            index,
            term,
            committed,
        })
    }

    /// Propose `data` and report whether a majority committed it.
    ///
    /// Returns `Ok(false)` on a non-leader or when no majority acknowledged the entry.
    pub async fn propose_log_entry(self: &Arc<Self>, data: impl Into<String>) -> Result<bool> {
        match self.propose(data).await {
            Ok(proposal) => Ok(proposal.committed),
            Err(ConsensusError::NotLeader(_)) => {
                tracing::info!(node_id = %self.id, "Not the leader, cannot propose log entry");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Handle incoming RequestVote RPC
    pub async fn handle_vote_request(&self, req: VoteRequest) -> VoteResponse {
        let mut state = self.state.write().await;
        if self.is_halted() {
            return VoteResponse {
                term: state.current_term,
                vote_granted: false,
            };
        }

        let before = state.hard_state();
        let role_before = state.role;
        let mut response =
            handle_request_vote(&mut state, &req, &self.id, self.config.check_vote_log_freshness);

        if state.hard_state() != before {
            if let Err(e) = self.storage.save_hard_state(&state.hard_state()) {
                self.halt(&mut state, e);
                response.vote_granted = false;
                return response;
            }
        }

        if response.vote_granted || state.role != role_before {
            self.timer.reset();
        }
        response
    }

    /// Handle incoming AppendEntries RPC
    pub async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut state = self.state.write().await;
        if self.is_halted() {
            return AppendEntriesResponse {
                term: state.current_term,
                success: false,
                node_id: self.id.clone(),
            };
        }

        let before = state.hard_state();
        let mut outcome = handle_append_entries(&mut state, &req, &self.id);

        if outcome.log_changed {
            if let Err(e) = self.storage.save_log(&state.log) {
                self.halt(&mut state, e);
                outcome.response.success = false;
                return outcome.response;
            }
        }
        if state.hard_state() != before {
            if let Err(e) = self.storage.save_hard_state(&state.hard_state()) {
                self.halt(&mut state, e);
                outcome.response.success = false;
                return outcome.response;
            }
        }
        if outcome.commit_changed {
            self.commit_tx.send_replace(state.commit_index);
        }
        if outcome.accepted_leader {
            self.timer.reset();
        }
        outcome.response
    }

    /// Check if this node is the leader
    pub async fn is_leader(&self) -> bool {
        self.state.read().await.role == RaftRole::Leader
    }

    /// Our own address while we lead, otherwise `None`.
    pub async fn leader_address(&self) -> Option<String> {
        if self.is_leader().await {
            Some(self.address.clone())
        } else {
            None
        }
    }

    pub async fn last_log_position(&self) -> (i64, u64) {
        let state = self.state.read().await;
        (state.last_log_index(), state.last_log_term())
    }

    /// Drain entries that are committed but not yet handed to the application.
    pub async fn take_committed_entries(&self) -> Vec<(i64, LogEntry)> {
        let mut state = self.state.write().await;
        let mut entries = Vec::new();

        while state.last_applied < state.commit_index {
            state.last_applied += 1;
            let index = state.last_applied;
            if let Some(entry) = state.get_entry(index) {
                entries.push((index, entry.clone()));
            }
        }

        entries
    }
}
