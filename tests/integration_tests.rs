//! Integration tests for multi-node Raft cluster operations.
//!
//! These tests verify leader election, log replication and consistency across
//! a three-node cluster talking gRPC over loopback.


use std::collections::HashSet;
use std::time::Duration;

use lms_raft::raft::{LogEntry, RaftRole};
use test_harness::{assert_eventually, TestCluster};

/// Three-node cluster elects exactly one leader on its own
#[tokio::test]
async fn test_three_node_cluster_elects_leader() {
    let cluster = TestCluster::new(3).await;

    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("A leader should be elected within 10 seconds");
    let leader_name = format!("lms_server_{}", leader_id);

    assert_eventually(
        || async {
            for node in cluster.nodes.values() {
                if node.leader_id().await.as_deref() != Some(leader_name.as_str()) {
                    return false;
                }
            }
            true
        },
        Duration::from_secs(3),
        "All nodes should agree on the leader",
    )
    .await;

    assert_eq!(cluster.count_leaders().await, 1, "Exactly one leader should exist");
}

/// A elected in term 1 proposes `enroll:alice`; after the next heartbeat round
/// every log holds exactly that entry.
#[tokio::test]
async fn test_proposal_reaches_every_log() {
    let cluster = TestCluster::manual(3).await;

    assert!(cluster.elect(1).await, "Node 1 should win the first election");
    let leader = cluster.node(1);
    assert_eq!(leader.current_term().await, 1);

    let committed = cluster
        .propose(1, "enroll:alice")
        .await
        .expect("proposal should not fail");
    assert!(committed, "Entry should be committed by a majority");
    assert_eq!(leader.commit_index().await, 0);

    let expected = vec![LogEntry::new(1, "enroll:alice")];
    assert_eventually(
        || async {
            for node in cluster.nodes.values() {
                if node.log().await != expected || node.commit_index().await != 0 {
                    return false;
                }
            }
            true
        },
        Duration::from_secs(2),
        "Every node should hold the entry and know it is committed",
    )
    .await;

    for node in cluster.nodes.values() {
        assert_eq!(node.current_term().await, 1);
    }
}

/// Concurrently injected election timeouts never produce two leaders in one term
#[tokio::test]
async fn test_election_safety_under_concurrent_timeouts() {
    let cluster = TestCluster::manual(3).await;
    let n1 = cluster.node(1).raft_node.clone();
    let n2 = cluster.node(2).raft_node.clone();
    let n3 = cluster.node(3).raft_node.clone();

    for _ in 0..5 {
        tokio::join!(n1.start_election(), n2.start_election(), n3.start_election());

        let terms = cluster.leader_terms().await;
        let distinct: HashSet<u64> = terms.iter().copied().collect();
        assert_eq!(
            distinct.len(),
            terms.len(),
            "Two leaders share a term: {:?}",
            terms
        );

        // Let a winner's heartbeats settle the cluster before the next round
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Committed prefixes are identical on every node
#[tokio::test]
async fn test_log_matching_for_committed_entries() {
    let cluster = TestCluster::new(3).await;
    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("A leader should be elected");

    for i in 0..5 {
        let committed = cluster
            .propose(leader_id, &format!("grade:assignment-{}", i))
            .await
            .expect("proposal should not fail");
        assert!(committed, "Entry {} should be committed", i);
    }

    assert!(
        cluster.wait_for_commit_on_all(4, Duration::from_secs(3)).await,
        "All nodes should learn the commit index"
    );

    let reference = cluster.node(leader_id).log().await;
    for node in cluster.nodes.values() {
        let log = node.log().await;
        let commit = node.commit_index().await as usize;
        assert_eq!(&log[..=commit], &reference[..=commit]);
    }
    assert_eq!(reference.len(), 5);
    assert_eq!(reference[2].data, "grade:assignment-2");
}

/// Proposals on a follower are refused without touching its log
#[tokio::test]
async fn test_follower_refuses_proposals() {
    let cluster = TestCluster::manual(3).await;
    assert!(cluster.elect(2).await);

    assert_eq!(cluster.node(1).role().await, RaftRole::Follower);
    let result = cluster.propose(1, "enroll:bob").await.expect("no error");
    assert!(!result);
    assert_eq!(cluster.node(1).log_len().await, 0);
}

/// Heartbeat rounds without new proposals leave every log untouched
#[tokio::test]
async fn test_heartbeats_do_not_change_logs() {
    let cluster = TestCluster::manual(3).await;
    assert!(cluster.elect(1).await);
    assert!(cluster.propose(1, "enroll:carol").await.expect("no error"));

    assert!(cluster.wait_for_commit_on_all(0, Duration::from_secs(2)).await);
    let before: Vec<Vec<LogEntry>> = {
        let mut logs = Vec::new();
        for id in 1..=3 {
            logs.push(cluster.node(id).log().await);
        }
        logs
    };

    // Many 20 ms heartbeat rounds
    tokio::time::sleep(Duration::from_millis(300)).await;

    for (i, id) in (1..=3).enumerate() {
        assert_eq!(cluster.node(id).log().await, before[i]);
    }
    assert_eq!(cluster.node(1).current_term().await, 1);
}
