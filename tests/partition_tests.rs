//! Network partition tests for Raft cluster behavior.
//!
//! These tests cut peer links to verify that an isolated leader cannot commit,
//! that the majority side moves on to a higher term, and that the old leader
//! steps down once it can talk to the cluster again.


use std::time::Duration;

use lms_raft::raft::{LogEntry, RaftRole};
use test_harness::{assert_eventually, TestCluster};

/// The majority side elects a leader with a strictly higher term; the old
/// leader steps down to that term after the partition heals.
#[tokio::test]
async fn test_isolated_leader_rejoins_and_steps_down() {
    let cluster = TestCluster::new(3).await;

    let old_leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Initial leader should be elected");
    let old_term = cluster.node(old_leader).current_term().await;

    cluster.isolate_node(old_leader);
    let majority = cluster.other_ids(old_leader);

    let new_leader = cluster
        .wait_for_leader_in_group(&majority, Duration::from_secs(10))
        .await
        .expect("Majority partition should elect a leader");
    let new_term = cluster.node(new_leader).current_term().await;
    assert!(
        new_term > old_term,
        "New leader term {} should exceed old term {}",
        new_term,
        old_term
    );

    cluster.heal_node(old_leader);

    let old = cluster.node(old_leader);
    assert_eventually(
        || async { old.role().await == RaftRole::Follower && old.current_term().await >= new_term },
        Duration::from_secs(5),
        "Old leader should step down to the new term",
    )
    .await;

    assert_eventually(
        || async { cluster.count_leaders().await == 1 },
        Duration::from_secs(5),
        "Exactly one leader after healing",
    )
    .await;
}

/// A leader cut off from both followers appends locally but cannot commit.
/// Once healed, the next proposal commits and carries the earlier entry along.
#[tokio::test]
async fn test_proposal_needs_majority() {
    let cluster = TestCluster::manual(3).await;
    assert!(cluster.elect(1).await);

    cluster.isolate_node(1);

    let committed = cluster.propose(1, "enroll:alice").await.expect("no error");
    assert!(!committed, "Only the leader holds the entry");
    assert_eq!(cluster.node(1).log().await, vec![LogEntry::new(1, "enroll:alice")]);
    assert_eq!(cluster.node(1).commit_index().await, -1);
    assert_eq!(cluster.node(2).log_len().await, 0);
    assert_eq!(cluster.node(3).log_len().await, 0);
    assert!(cluster.node(1).is_leader().await, "Leader keeps its role while isolated");

    cluster.heal_node(1);

    let committed = cluster.propose(1, "enroll:bob").await.expect("no error");
    assert!(committed, "Entry should commit once a majority is reachable");
    assert_eq!(cluster.node(1).commit_index().await, 1);

    assert!(
        cluster
            .wait_for_log_len(&[1, 2, 3], 2, Duration::from_secs(2))
            .await,
        "Followers should catch up on both entries"
    );
    assert_eq!(
        cluster.node(2).log().await,
        vec![LogEntry::new(1, "enroll:alice"), LogEntry::new(1, "enroll:bob")]
    );
}

/// Two of three nodes are enough to commit
#[tokio::test]
async fn test_proposal_commits_with_one_follower_down() {
    let cluster = TestCluster::manual(3).await;
    assert!(cluster.elect(1).await);

    cluster.isolate_node(3);

    let committed = cluster.propose(1, "enroll:alice").await.expect("no error");
    assert!(committed);
    assert_eq!(cluster.node(2).log().await, vec![LogEntry::new(1, "enroll:alice")]);
    assert_eq!(cluster.node(3).log_len().await, 0);

    cluster.heal_node(3);

    assert_eventually(
        || async { cluster.node(3).commit_index().await == 0 },
        Duration::from_secs(2),
        "Healed follower should catch up",
    )
    .await;
    assert_eq!(cluster.node(3).log().await, vec![LogEntry::new(1, "enroll:alice")]);
}

/// A minority node keeps campaigning but never becomes leader
#[tokio::test]
async fn test_minority_cannot_elect_leader() {
    let cluster = TestCluster::manual(3).await;
    assert!(cluster.elect(1).await);

    cluster.isolate_node(3);
    for _ in 0..3 {
        assert!(!cluster.elect(3).await, "Isolated node must not win");
    }
    assert_eq!(cluster.node(3).role().await, RaftRole::Candidate);
    assert!(cluster.node(1).is_leader().await);
}

/// Uncommitted entries of a deposed leader are replaced by the new leader's log
#[tokio::test]
async fn test_divergent_uncommitted_entries_are_replaced() {
    let cluster = TestCluster::manual(3).await;
    assert!(cluster.elect(1).await);
    assert!(cluster.propose(1, "enroll:alice").await.expect("no error"));

    // Node 1 appends an entry nobody else sees
    cluster.isolate_node(1);
    assert!(!cluster.propose(1, "drop:alice").await.expect("no error"));

    // Node 2 takes over in a later term and commits its own entry
    assert!(cluster.elect(2).await);
    assert!(cluster.propose(2, "enroll:bob").await.expect("no error"));

    cluster.heal_node(1);

    let expected = vec![LogEntry::new(1, "enroll:alice"), LogEntry::new(2, "enroll:bob")];
    assert_eventually(
        || async { cluster.node(1).log().await == expected },
        Duration::from_secs(3),
        "Old leader's uncommitted suffix should be replaced",
    )
    .await;
    assert_eq!(cluster.node(1).role().await, RaftRole::Follower);
    assert_eq!(cluster.node(1).current_term().await, 2);
}
