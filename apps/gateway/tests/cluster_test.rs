mod common;

use std::sync::Arc;

use futures_util::future::join_all;
use relay_gateway::gateway::events::{CONNECTION_COUNT_KEY, CONNECTION_COUNT_UPDATED_CHANNEL};
use relay_gateway::gateway::registry::SessionRegistry;
use relay_gateway::gateway::tracker::ConnectionTracker;
use relay_gateway::store::{ChannelBus, CounterStore};
use relay_gateway::AppState;

use common::{
    collect_until, connect, count_event, disconnect, message_event, settle, wait_for_count,
    Cluster, TestClient,
};

fn total_local(nodes: &[AppState]) -> i64 {
    nodes
        .iter()
        .map(|n| n.tracker.local_session_count() as i64)
        .sum()
}

#[tokio::test]
async fn counter_matches_live_sessions_across_nodes() {
    let cluster = Cluster::new();
    let nodes = vec![
        cluster.spawn_node().await,
        cluster.spawn_node().await,
        cluster.spawn_node().await,
    ];

    let mut clients: Vec<(usize, TestClient)> = Vec::new();
    for step in 0..30usize {
        let node = step % nodes.len();
        clients.push((node, connect(&nodes[node]).await));
        // Every third step, drop the oldest client still connected.
        if step % 3 == 2 {
            let (owner, client) = clients.remove(0);
            disconnect(&nodes[owner], &client).await;
        }
    }

    assert_eq!(cluster.counter().await, Some(clients.len() as i64));
    assert_eq!(total_local(&nodes), clients.len() as i64);
}

#[tokio::test]
async fn concurrent_churn_converges() {
    let cluster = Cluster::new();
    let a = cluster.spawn_node().await;
    let b = cluster.spawn_node().await;

    let connects = (0..40).map(|i| {
        let node = if i % 2 == 0 { a.clone() } else { b.clone() };
        async move { (node.clone(), connect(&node).await) }
    });
    let clients = join_all(connects).await;
    assert_eq!(cluster.counter().await, Some(40));

    let disconnects = clients
        .iter()
        .step_by(2)
        .map(|(node, client)| disconnect(node, client));
    join_all(disconnects).await;

    assert_eq!(cluster.counter().await, Some(20));
    assert_eq!(total_local(&[a, b]), 20);
}

#[tokio::test]
async fn counter_updates_never_go_negative() {
    let cluster = Cluster::new();
    let node = cluster.spawn_node().await;
    let mut raw = cluster
        .bus
        .subscribe(&[CONNECTION_COUNT_UPDATED_CHANNEL])
        .await
        .unwrap();

    let clients = vec![connect(&node).await, connect(&node).await, connect(&node).await];
    // Simulate drift: the counter was reset while sessions were still live.
    cluster.store.set(CONNECTION_COUNT_KEY, 1).await.unwrap();
    for client in &clients {
        disconnect(&node, client).await;
    }

    let mut totals = Vec::new();
    for _ in 0..6 {
        let msg = raw.recv().await.unwrap();
        totals.push(msg.payload.parse::<i64>().unwrap());
    }
    assert!(totals.iter().all(|t| *t >= 0), "observed {totals:?}");
    assert_eq!(totals.last(), Some(&0));
    assert_eq!(cluster.counter().await, Some(0));
}

#[tokio::test]
async fn chat_reaches_every_node_including_sender() {
    let cluster = Cluster::new();
    let nodes = vec![
        cluster.spawn_node().await,
        cluster.spawn_node().await,
        cluster.spawn_node().await,
    ];
    let mut clients = Vec::new();
    for node in &nodes {
        clients.push(connect(node).await);
    }

    nodes[0]
        .relay
        .on_client_message(&clients[0].session, "hello cluster".to_string())
        .await;

    let expected = message_event("hello cluster");
    for client in &mut clients {
        collect_until(&mut client.rx, |seen| seen.contains(&expected)).await;
    }
}

#[tokio::test]
async fn racing_cold_start_initializes_once() {
    let cluster = Cluster::new();
    let tracker = || {
        ConnectionTracker::new(
            cluster.store.clone(),
            cluster.bus.clone(),
            Arc::new(SessionRegistry::new()),
        )
    };
    let (first, second) = (tracker(), tracker());

    let (a, b) = tokio::join!(first.initialize_counter(), second.initialize_counter());
    let created = [a.unwrap(), b.unwrap()];
    assert_eq!(created.iter().filter(|c| **c).count(), 1);
    assert_eq!(cluster.counter().await, Some(0));
}

#[tokio::test]
async fn late_starting_node_keeps_existing_counter() {
    let cluster = Cluster::new();
    let a = cluster.spawn_node().await;
    let _c1 = connect(&a).await;
    let _c2 = connect(&a).await;

    let _b = cluster.spawn_node().await;
    assert_eq!(cluster.counter().await, Some(2));
}

#[tokio::test]
async fn scenario_two_nodes_counts_and_chat() {
    let cluster = Cluster::new();
    let a = cluster.spawn_node().await;
    let b = cluster.spawn_node().await;
    let mut raw = cluster
        .bus
        .subscribe(&[CONNECTION_COUNT_UPDATED_CHANNEL])
        .await
        .unwrap();

    let mut a_clients = vec![connect(&a).await, connect(&a).await, connect(&a).await];
    for expected in ["1", "2", "3"] {
        assert_eq!(raw.recv().await.unwrap().payload, expected);
    }

    // Before B's connect nobody on A has seen a 4.
    let seen = wait_for_count(&mut a_clients[0].rx, 3).await;
    assert!(!seen.contains(&count_event(4)));

    let mut b_client = connect(&b).await;
    assert_eq!(raw.recv().await.unwrap().payload, "4");

    b.relay
        .on_client_message(&b_client.session, "hi".to_string())
        .await;

    let hi = message_event("hi");
    for client in &mut a_clients {
        collect_until(&mut client.rx, |seen| {
            seen.contains(&hi) && seen.contains(&count_event(4))
        })
        .await;
    }
    collect_until(&mut b_client.rx, |seen| seen.contains(&hi)).await;
}

#[tokio::test]
async fn store_outage_degrades_counter_but_not_chat() {
    let cluster = Cluster::new();
    let node = cluster.spawn_node().await;
    let mut first = connect(&node).await;
    wait_for_count(&mut first.rx, 1).await;

    cluster.store.set_available(false);
    let second = connect(&node).await;
    assert!(second.session.is_connected());
    assert_eq!(node.tracker.local_session_count(), 2);

    node.relay
        .on_client_message(&second.session, "still here".to_string())
        .await;
    let events = collect_until(&mut first.rx, |seen| {
        seen.contains(&message_event("still here"))
    })
    .await;
    // No count was announced for the failed increment.
    assert!(!events.contains(&count_event(2)));

    cluster.store.set_available(true);
    assert_eq!(cluster.counter().await, Some(1));
}

#[tokio::test]
async fn subscription_failure_is_fatal() {
    let cluster = Cluster::new();
    cluster.bus.set_available(false);
    let result = AppState::bootstrap(
        common::test_config(),
        cluster.store.clone(),
        cluster.bus.clone(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn unavailable_store_at_startup_is_fatal() {
    let cluster = Cluster::new();
    cluster.store.set_available(false);
    let result = AppState::bootstrap(
        common::test_config(),
        cluster.store.clone(),
        cluster.bus.clone(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn malformed_counter_payload_is_ignored() {
    let cluster = Cluster::new();
    let node = cluster.spawn_node().await;
    let mut client = connect(&node).await;
    wait_for_count(&mut client.rx, 1).await;

    cluster
        .bus
        .publish(CONNECTION_COUNT_UPDATED_CHANNEL, "not-a-number")
        .await
        .unwrap();
    cluster
        .bus
        .publish(CONNECTION_COUNT_UPDATED_CHANNEL, "7")
        .await
        .unwrap();

    let next = common::next_event(&mut client.rx).await;
    assert_eq!(next, count_event(7));
    settle().await;
    assert!(node.subscription.is_live());
}
