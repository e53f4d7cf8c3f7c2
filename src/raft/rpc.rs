use crate::proto::{
    AppendEntriesRequest, AppendEntriesResponse, LogEntry as ProtoLogEntry, VoteRequest,
    VoteResponse,
};
use crate::raft::state::{LogEntry, NodeState, RaftRole};

/// Handle RequestVote RPC.
///
/// A vote goes to the first candidate asking in a term. With
/// `require_up_to_date_log` the candidate's log must also be at least as
/// recent as ours.
pub fn handle_request_vote(
    state: &mut NodeState,
    req: &VoteRequest,
    my_id: &str,
    require_up_to_date_log: bool,
) -> VoteResponse {
    if req.term < state.current_term {
        tracing::debug!(
            node_id = my_id,
            candidate = %req.candidate_id,
            term = req.term,
            current_term = state.current_term,
            "Rejecting RequestVote from stale term"
        );
        return VoteResponse {
            term: state.current_term,
            vote_granted: false,
        };
    }

    if req.term > state.current_term {
        state.become_follower(req.term);
    }

    let vote_granted = if state
        .voted_for
        .as_deref()
        .is_some_and(|voted| voted != req.candidate_id)
    {
        false
    } else if require_up_to_date_log
        && !state.is_log_up_to_date(req.last_log_index, req.last_log_term)
    {
        false
    } else {
        state.voted_for = Some(req.candidate_id.clone());
        true
    };

    tracing::debug!(
        node_id = my_id,
        candidate = %req.candidate_id,
        term = req.term,
        granted = vote_granted,
        "RequestVote response"
    );

    VoteResponse {
        term: state.current_term,
        vote_granted,
    }
}

/// Result of applying an AppendEntries request to local state.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub response: AppendEntriesResponse,
    /// The request came from a current leader; the election timer must be reset
    pub accepted_leader: bool,
    pub log_changed: bool,
    pub commit_changed: bool,
}

/// Handle AppendEntries RPC
pub fn handle_append_entries(
    state: &mut NodeState,
    req: &AppendEntriesRequest,
    my_id: &str,
) -> AppendOutcome {
    if req.term < state.current_term {
        tracing::warn!(
            node_id = my_id,
            leader = %req.leader_id,
            term = req.term,
            current_term = state.current_term,
            "Rejected AppendEntries from stale term"
        );
        return reject(state, my_id, false, false);
    }

    // Valid leader for this term
    if state.role != RaftRole::Follower || req.term > state.current_term {
        state.become_follower(req.term);
    }
    state.leader_id = Some(req.leader_id.clone());

    if req.prev_log_index >= 0 {
        match state.term_at(req.prev_log_index) {
            None => {
                tracing::info!(
                    node_id = my_id,
                    log_len = state.log.len(),
                    prev_log_index = req.prev_log_index,
                    "Log inconsistency: log is shorter than prev_log_index"
                );
                return reject(state, my_id, true, false);
            }
            Some(term) if term != req.prev_log_term => {
                tracing::info!(
                    node_id = my_id,
                    prev_log_index = req.prev_log_index,
                    local_term = term,
                    leader_term = req.prev_log_term,
                    "Log inconsistency: term mismatch"
                );
                // Drop the conflicting suffix so the retried request can refill it
                let truncated = req.prev_log_index > state.commit_index;
                if truncated {
                    state.log.truncate(req.prev_log_index as usize);
                }
                return reject(state, my_id, true, truncated);
            }
            Some(_) => {}
        }
    }

    let entries: Vec<LogEntry> = req.entries.iter().map(proto_to_log_entry).collect();

    if let Some(conflict) = state.first_conflict(req.prev_log_index, &entries) {
        if conflict <= state.commit_index {
            tracing::error!(
                node_id = my_id,
                leader = %req.leader_id,
                conflict_index = conflict,
                commit_index = state.commit_index,
                "Refusing to overwrite committed entry"
            );
            return reject(state, my_id, true, false);
        }
    }

    let log_changed = state.merge_entries(req.prev_log_index, &entries);
    if log_changed {
        tracing::debug!(
            node_id = my_id,
            entries_appended = entries.len(),
            new_last_index = state.last_log_index(),
            "Appended entries"
        );
    }

    let last_new_index = req.prev_log_index + entries.len() as i64;
    let new_commit = req.commit_index.min(last_new_index);
    let commit_changed = new_commit > state.commit_index;
    if commit_changed {
        state.commit_index = new_commit;
        tracing::debug!(node_id = my_id, commit_index = new_commit, "Updated commit index");
    }

    AppendOutcome {
        response: AppendEntriesResponse {
            term: state.current_term,
            success: true,
            node_id: my_id.to_string(),
        },
        accepted_leader: true,
        log_changed,
        commit_changed,
    }
}

fn reject(
    state: &NodeState,
    my_id: &str,
    accepted_leader: bool,
    log_changed: bool,
) -> AppendOutcome {
    AppendOutcome {
        response: AppendEntriesResponse {
            term: state.current_term,
            success: false,
            node_id: my_id.to_string(),
        },
        accepted_leader,
        log_changed,
        commit_changed: false,
    }
}

/// Build the AppendEntries request for `peer` from its `next_index`.
pub fn build_append_request(state: &NodeState, peer: &str, my_id: &str) -> AppendEntriesRequest {
    let next_index = state
        .next_index
        .get(peer)
        .copied()
        .unwrap_or(state.log.len() as i64);
    let prev_log_index = next_index - 1;

    AppendEntriesRequest {
        term: state.current_term,
        leader_id: my_id.to_string(),
        prev_log_index,
        prev_log_term: state.term_at(prev_log_index).unwrap_or(0),
        entries: state
            .entries_from(next_index)
            .iter()
            .map(log_entry_to_proto)
            .collect(),
        commit_index: state.commit_index,
    }
}

pub fn build_vote_request(state: &NodeState, my_id: &str) -> VoteRequest {
    VoteRequest {
        term: state.current_term,
        candidate_id: my_id.to_string(),
        last_log_index: state.last_log_index(),
        last_log_term: state.last_log_term(),
    }
}

/// Convert protobuf LogEntry to internal LogEntry
pub fn proto_to_log_entry(proto: &ProtoLogEntry) -> LogEntry {
    LogEntry {
        term: proto.term,
        data: proto.data.clone(),
    }
}

/// Convert internal LogEntry to protobuf LogEntry
pub fn log_entry_to_proto(entry: &LogEntry) -> ProtoLogEntry {
    ProtoLogEntry {
        term: entry.term,
        data: entry.data.clone(),
    }
}
