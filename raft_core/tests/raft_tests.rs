//! End-to-end tests against an in-process loopback cluster.
//!
//! Scenario names and structure follow the teacher's own
//! `should_elect_leader_without_network_partition` /
//! `should_not_be_able_to_elect_leader_without_quorum` style integration
//! tests, rebuilt against the async `RaftCluster` API and a lighter-weight
//! in-process network stand-in (`support::ClusterHarness`) instead of the
//! teacher's thread-parked packet-loss simulator.

mod support;

use std::time::Duration;

use raft_core::types::ServerId;
use support::{fast_config, ClusterHarness};

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn should_elect_leader_without_network_partition() {
    let harness = ClusterHarness::new(5, fast_config()).await;
    harness.start_all().await;

    let elected = harness
        .wait_until(|| async { harness.current_leader_count().await == 1 }, Duration::from_secs(3))
        .await;
    assert!(elected, "expected exactly one leader to emerge");
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn should_elect_leader_during_network_partition_if_we_have_quorum() {
    let harness = ClusterHarness::new(5, fast_config()).await;
    harness.start_all().await;
    assert!(
        harness.wait_until(|| async { harness.current_leader_count().await == 1 }, Duration::from_secs(3)).await
    );

    // Split into a 3-node majority and a 2-node minority.
    let majority: Vec<ServerId> = (0..3).map(ServerId).collect();
    let minority: Vec<ServerId> = (3..5).map(ServerId).collect();
    harness.partition(&majority, &minority);

    let still_has_leader = harness
        .wait_until(
            || async {
                let mut count = 0;
                for &id in &majority {
                    if harness.node(id.0).is_leader().await {
                        count += 1;
                    }
                }
                count == 1
            },
            Duration::from_secs(3),
        )
        .await;
    assert!(still_has_leader, "majority side should retain or re-elect a leader");
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn should_not_be_able_to_elect_leader_without_quorum() {
    let harness = ClusterHarness::new(5, fast_config()).await;
    harness.start_all().await;

    // Immediately fragment into two minorities (2 and 3) -- wait, 3 is a
    // majority of 5. Use three pairs-of-two plus a singleton so no side has
    // 3+ nodes able to reach each other.
    let a: Vec<ServerId> = vec![ServerId(0), ServerId(1)];
    let b: Vec<ServerId> = vec![ServerId(2), ServerId(3)];
    let c: Vec<ServerId> = vec![ServerId(4)];
    harness.partition(&a, &b);
    harness.partition(&a, &c);
    harness.partition(&b, &c);

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(harness.current_leader_count().await, 0, "no island has a quorum, so no leader should emerge");

    harness.heal();
    let elected = harness
        .wait_until(|| async { harness.current_leader_count().await == 1 }, Duration::from_secs(3))
        .await;
    assert!(elected, "healing the partition should let a leader emerge");
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn replicated_command_becomes_committed_on_every_node() {
    let harness = ClusterHarness::new(3, fast_config()).await;
    harness.start_all().await;
    assert!(
        harness.wait_until(|| async { harness.current_leader_count().await == 1 }, Duration::from_secs(3)).await
    );

    let leader = {
        let mut found = None;
        for node in &harness.nodes {
            if node.is_leader().await {
                found = Some(node.clone());
            }
        }
        found.expect("a leader must exist")
    };

    let committed = leader.replicate(42u64).await.expect("replicate should succeed on the leader");
    assert!(committed, "entry should commit under its originating term");
    let target_index = leader.last_committed_index().await;

    for node in &harness.nodes {
        let node = node.clone();
        let caught_up = harness
            .wait_until(
                || {
                    let node = node.clone();
                    async move { node.last_committed_index().await.0 >= target_index.0 }
                },
                Duration::from_secs(2),
            )
            .await;
        assert!(caught_up, "every node should eventually catch up to the leader's commit index");
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn non_leader_replicate_returns_not_leader() {
    let harness = ClusterHarness::new(3, fast_config()).await;
    harness.start_all().await;
    assert!(
        harness.wait_until(|| async { harness.current_leader_count().await == 1 }, Duration::from_secs(3)).await
    );

    for node in &harness.nodes {
        if !node.is_leader().await {
            let result = node.replicate(7u64).await;
            assert!(matches!(result, Err(raft_core::RaftError::NotLeader)));
            return;
        }
    }
    panic!("expected at least one non-leader node");
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn stable_leader_rejects_pre_vote_with_aggressive_stickiness() {
    let mut config = fast_config();
    config.aggressive_leader_stickiness = true;
    let harness = ClusterHarness::new(3, config).await;
    harness.start_all().await;
    assert!(
        harness.wait_until(|| async { harness.current_leader_count().await == 1 }, Duration::from_secs(3)).await
    );

    let leader = {
        let mut found = None;
        for node in &harness.nodes {
            if node.is_leader().await {
                found = Some(node.clone());
            }
        }
        found.expect("a leader must exist")
    };

    let result = leader
        .pre_vote(raft_core::types::TermIndex(999), raft_core::types::LogIndex(0), raft_core::types::TermIndex(0))
        .await
        .expect("pre_vote handler itself should not error");
    assert_eq!(result, raft_core::transport::PreVoteResult::RejectedByLeader);
}
