//! Event distribution properties: strict channel isolation and heartbeat
//! eviction, driven through the router exactly as the mutation layer drives
//! it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use task_service::models::{Task, TaskStatus};
use task_service::realtime::{
    ConnectionHandle, ConnectionRegistry, EventRouter, HeartbeatConfig, ServerEvent,
};

fn registry(interval: Duration) -> Arc<ConnectionRegistry> {
    Arc::new(ConnectionRegistry::new(HeartbeatConfig {
        interval,
        missed_threshold: 3,
    }))
}

fn subscribe(
    registry: &ConnectionRegistry,
    org_id: Uuid,
) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
    let (tx, rx) = mpsc::channel(32);
    let handle = ConnectionHandle::new(Uuid::new_v4(), tx);
    registry.subscribe(org_id, handle.clone());
    (handle, rx)
}

fn task_updated(org_id: Uuid) -> ServerEvent {
    let task = Task::new(
        org_id,
        "quarterly report".to_string(),
        None,
        TaskStatus::Doing,
        None,
        None,
    );
    ServerEvent::TaskUpdated {
        org_id,
        user_id: Some(Uuid::new_v4()),
        task,
    }
}

fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn events_reach_both_org_subscribers_and_no_foreign_ones() {
    let registry = registry(Duration::from_secs(30));
    let router = EventRouter::new(Arc::clone(&registry));

    let org_1 = Uuid::new_v4();
    let org_2 = Uuid::new_v4();

    let (_h1, mut rx_a) = subscribe(&registry, org_1);
    let (_h2, mut rx_b) = subscribe(&registry, org_1);
    let (_h3, mut rx_other) = subscribe(&registry, org_2);

    // An update for org 1 is delivered to both of its clients
    assert_eq!(router.publish(org_1, task_updated(org_1)), 2);
    assert!(matches!(
        drain(&mut rx_a).as_slice(),
        [ServerEvent::TaskUpdated { .. }]
    ));
    assert!(matches!(
        drain(&mut rx_b).as_slice(),
        [ServerEvent::TaskUpdated { .. }]
    ));
    assert!(drain(&mut rx_other).is_empty());

    // An event for org 2 reaches neither org 1 client
    assert_eq!(router.publish(org_2, task_updated(org_2)), 1);
    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_b).is_empty());
    assert!(matches!(
        drain(&mut rx_other).as_slice(),
        [ServerEvent::TaskUpdated { .. }]
    ));
}

#[tokio::test]
async fn isolation_holds_across_many_orgs_and_connections() {
    let registry = registry(Duration::from_secs(30));
    let router = EventRouter::new(Arc::clone(&registry));

    let orgs: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    let mut receivers = Vec::new();
    for &org_id in &orgs {
        for _ in 0..3 {
            let (_handle, rx) = subscribe(&registry, org_id);
            receivers.push((org_id, rx));
        }
    }

    for &org_id in &orgs {
        assert_eq!(router.publish(org_id, task_updated(org_id)), 3);
    }

    for (org_id, rx) in receivers.iter_mut() {
        let events = drain(rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::TaskUpdated {
                org_id: event_org, ..
            } => assert_eq!(event_org, org_id),
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test]
async fn silent_connection_is_evicted_and_excluded_from_publishes() {
    let interval = Duration::from_millis(25);
    let registry = registry(interval);
    let router = EventRouter::new(Arc::clone(&registry));
    let reaper = registry.spawn_reaper();

    let org_id = Uuid::new_v4();
    let (lively, _rx_lively) = subscribe(&registry, org_id);
    let (_silent, _rx_silent) = subscribe(&registry, org_id);

    // Keep one connection alive while the other misses every heartbeat;
    // eviction is due after 3 missed intervals plus one interval of slack.
    for _ in 0..8 {
        lively.touch();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(registry.connection_count(org_id), 1);
    assert_eq!(router.publish(org_id, task_updated(org_id)), 1);

    reaper.abort();
}

#[tokio::test]
async fn closing_a_connection_removes_it_from_the_fanout_immediately() {
    let registry = registry(Duration::from_secs(30));
    let router = EventRouter::new(Arc::clone(&registry));

    let org_id = Uuid::new_v4();
    let (handle_a, mut rx_a) = subscribe(&registry, org_id);
    let (_handle_b, mut rx_b) = subscribe(&registry, org_id);

    registry.unsubscribe(org_id, handle_a.conn_id);

    assert_eq!(router.publish(org_id, task_updated(org_id)), 1);
    assert!(drain(&mut rx_a).is_empty());
    assert_eq!(drain(&mut rx_b).len(), 1);
}
