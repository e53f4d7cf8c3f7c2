use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Raft node role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

/// A single entry in the replicated log. Its index is its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub data: String,
}

impl LogEntry {
    pub fn new(term: u64, data: impl Into<String>) -> Self {
        Self {
            term,
            data: data.into(),
        }
    }
}

/// The part of [`NodeState`] that must survive a restart besides the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub commit_index: i64,
}

/// State owned by one node. Indices are 0-based; `-1` means "before the first entry".
///
/// # Invariants
///
/// ## Election Safety
/// At most one leader per term: `voted_for` is written at most once per term
/// and a candidate needs a strict majority of votes.
///
/// ## Leader Append-Only
/// Leaders only append via `append_entry()`. Truncation happens on followers
/// when an AppendEntries request conflicts with their log.
///
/// ## Committed Entries Are Stable
/// Nothing at or below `commit_index` is truncated, and `commit_index` never
/// decreases.
///
/// ## Replication Cursors
/// `next_index[p] >= match_index[p] + 1` for every peer.
#[derive(Debug)]
pub struct NodeState {
    // Persistent state
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub log: Vec<LogEntry>,

    pub commit_index: i64,
    pub last_applied: i64,

    // Volatile state on leaders (reinitialized after election)
    pub next_index: HashMap<String, i64>,
    pub match_index: HashMap<String, i64>,

    pub role: RaftRole,
    pub leader_id: Option<String>,

    // Votes received in current election (for candidates)
    pub votes_received: usize,
}

impl NodeState {
    pub fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            commit_index: -1,
            last_applied: -1,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            role: RaftRole::Follower,
            leader_id: None,
            votes_received: 0,
        }
    }

    /// Rebuild the state loaded from disk at startup.
    pub fn restore(hard: HardState, log: Vec<LogEntry>) -> Self {
        let mut state = Self::new();
        state.current_term = hard.current_term;
        state.voted_for = hard.voted_for;
        state.log = log;
        state.commit_index = hard.commit_index.min(state.last_log_index()).max(-1);
        state
    }

    pub fn hard_state(&self) -> HardState {
        HardState {
            current_term: self.current_term,
            voted_for: self.voted_for.clone(),
            commit_index: self.commit_index,
        }
    }

    pub fn last_log_index(&self) -> i64 {
        self.log.len() as i64 - 1
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn get_entry(&self, index: i64) -> Option<&LogEntry> {
        if index < 0 {
            return None;
        }
        self.log.get(index as usize)
    }

    pub fn term_at(&self, index: i64) -> Option<u64> {
        self.get_entry(index).map(|e| e.term)
    }

    /// Entries starting from `start_index` (inclusive).
    pub fn entries_from(&self, start_index: i64) -> Vec<LogEntry> {
        let start = start_index.max(0) as usize;
        if start >= self.log.len() {
            return Vec::new();
        }
        self.log[start..].to_vec()
    }

    /// Append a new entry stamped with the current term, returning its index.
    pub fn append_entry(&mut self, data: impl Into<String>) -> i64 {
        self.log.push(LogEntry::new(self.current_term, data));
        self.last_log_index()
    }

    /// First index in `entries` (placed right after `prev_log_index`) whose term
    /// disagrees with ours.
    pub fn first_conflict(&self, prev_log_index: i64, entries: &[LogEntry]) -> Option<i64> {
        entries.iter().enumerate().find_map(|(offset, entry)| {
            let index = prev_log_index + 1 + offset as i64;
            match self.term_at(index) {
                Some(term) if term != entry.term => Some(index),
                _ => None,
            }
        })
    }

    /// Place `entries` right after `prev_log_index`, replacing a conflicting
    /// suffix. Entries we already hold with the same term are left alone so a
    /// delayed request cannot drop entries a newer one appended.
    ///
    /// Returns whether the log changed.
    pub fn merge_entries(&mut self, prev_log_index: i64, entries: &[LogEntry]) -> bool {
        let mut changed = false;
        for (offset, entry) in entries.iter().enumerate() {
            let index = prev_log_index + 1 + offset as i64;
            match self.term_at(index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    self.log.truncate(index as usize);
                    self.log.push(entry.clone());
                }
                None => self.log.push(entry.clone()),
            }
            changed = true;
        }
        changed
    }

    /// Check if candidate's log is at least as up-to-date as ours
    pub fn is_log_up_to_date(&self, last_log_index: i64, last_log_term: u64) -> bool {
        let our_last_term = self.last_log_term();
        let our_last_index = self.last_log_index();

        last_log_term > our_last_term
            || (last_log_term == our_last_term && last_log_index >= our_last_index)
    }

    /// Become a follower of `term`. The vote is only cleared when the term advances.
    pub fn become_follower(&mut self, term: u64) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
        }
        self.role = RaftRole::Follower;
        self.votes_received = 0;
        self.next_index.clear();
        self.match_index.clear();
    }

    pub fn become_candidate(&mut self, my_id: &str) {
        self.role = RaftRole::Candidate;
        self.current_term += 1;
        self.voted_for = Some(my_id.to_string());
        self.votes_received = 1; // Vote for self
        self.leader_id = None;
    }

    pub fn become_leader<'a>(&mut self, my_id: &str, peers: impl IntoIterator<Item = &'a str>) {
        self.role = RaftRole::Leader;
        self.leader_id = Some(my_id.to_string());

        let next = self.log.len() as i64;
        self.next_index.clear();
        self.match_index.clear();
        for peer in peers {
            self.next_index.insert(peer.to_string(), next);
            self.match_index.insert(peer.to_string(), -1);
        }
    }

    /// Record a successful exchange with `peer` that left it holding everything
    /// through `matched`.
    pub fn record_match(&mut self, peer: &str, matched: i64) {
        let current = self.match_index.get(peer).copied().unwrap_or(-1);
        let matched = matched.max(current);
        self.match_index.insert(peer.to_string(), matched);
        self.next_index.insert(peer.to_string(), matched + 1);
    }

    /// Step `next_index[peer]` back after a consistency-check failure.
    ///
    /// Returns `false` when it cannot move back any further.
    pub fn rewind_next_index(&mut self, peer: &str) -> bool {
        let floor = self.match_index.get(peer).copied().unwrap_or(-1) + 1;
        let next = self.next_index.entry(peer.to_string()).or_insert(0);
        if *next <= floor {
            return false;
        }
        *next -= 1;
        true
    }

    /// Advance `commit_index` to the highest index held by `quorum` nodes
    /// (self included) whose entry was written in the current term.
    pub fn advance_commit_index(&mut self, quorum: usize) -> bool {
        let mut matched: Vec<i64> = self.match_index.values().copied().collect();
        matched.push(self.last_log_index());
        matched.sort_unstable_by(|a, b| b.cmp(a));

        let Some(&candidate) = matched.get(quorum.saturating_sub(1)) else {
            return false;
        };
        if candidate > self.commit_index && self.term_at(candidate) == Some(self.current_term) {
            self.commit_index = candidate;
            return true;
        }
        false
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}
