//! Connection registry and event router.
//!
//! Live connections are grouped per organization in a dashmap, one shard map
//! entry per org, so activity in one tenant never contends with another.
//! Channel keying is structural: `publish` can only ever reach the handles
//! registered under the given org id.

use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::realtime::ServerEvent;

/// Heartbeat cadence and eviction threshold. Fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub missed_threshold: u32,
}

impl HeartbeatConfig {
    fn eviction_cutoff_millis(&self) -> i64 {
        self.interval.as_millis() as i64 * i64::from(self.missed_threshold)
    }
}

/// Handle for one live, authenticated connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub user_id: Uuid,
    sender: mpsc::Sender<ServerEvent>,
    last_seen: Arc<AtomicI64>,
}

impl ConnectionHandle {
    pub fn new(user_id: Uuid, sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            user_id,
            sender,
            last_seen: Arc::new(AtomicI64::new(now_millis())),
        }
    }

    /// Record inbound traffic; any frame counts as liveness.
    pub fn touch(&self) {
        self.last_seen.store(now_millis(), Ordering::Relaxed);
    }

    fn silent_for_millis(&self, now: i64) -> i64 {
        now - self.last_seen.load(Ordering::Relaxed)
    }

    /// Non-blocking send. A full or closed channel loses the frame;
    /// delivery is fire-and-forget.
    fn try_send(&self, event: ServerEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Registry of live connections keyed by organization.
pub struct ConnectionRegistry {
    channels: DashMap<Uuid, HashMap<Uuid, ConnectionHandle>>,
    heartbeat: HeartbeatConfig,
}

impl ConnectionRegistry {
    pub fn new(heartbeat: HeartbeatConfig) -> Self {
        Self {
            channels: DashMap::new(),
            heartbeat,
        }
    }

    pub fn heartbeat(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    /// Register an authenticated connection under its organization.
    /// Callers must have validated the connection's token first.
    pub fn subscribe(&self, org_id: Uuid, handle: ConnectionHandle) {
        let conn_id = handle.conn_id;
        self.channels
            .entry(org_id)
            .or_default()
            .insert(conn_id, handle);

        counter!("ws_connections_total").increment(1);
        gauge!("ws_connections_active").increment(1.0);
        tracing::debug!(org_id = %org_id, conn_id = %conn_id, "Connection subscribed");
    }

    /// Remove a connection. Safe to call from the socket task and the reaper
    /// concurrently; removal is idempotent.
    pub fn unsubscribe(&self, org_id: Uuid, conn_id: Uuid) {
        let mut removed = false;
        let mut emptied = false;
        if let Some(mut connections) = self.channels.get_mut(&org_id) {
            removed = connections.remove(&conn_id).is_some();
            emptied = connections.is_empty();
        }
        if emptied {
            // Guard dropped above; re-check emptiness to not race a new subscriber.
            self.channels.remove_if(&org_id, |_, connections| connections.is_empty());
        }
        if removed {
            gauge!("ws_connections_active").decrement(1.0);
            tracing::debug!(org_id = %org_id, conn_id = %conn_id, "Connection unsubscribed");
        }
    }

    /// Deliver an event to every connection registered under the org.
    ///
    /// Iterates a snapshot of the current subscribers so new subscriptions
    /// proceed concurrently; never blocks on a slow consumer. Returns the
    /// number of connections the event was handed to.
    pub fn publish(&self, org_id: Uuid, event: &ServerEvent) -> usize {
        let handles: Vec<ConnectionHandle> = match self.channels.get(&org_id) {
            Some(connections) => connections.values().cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for handle in &handles {
            if handle.try_send(event.clone()) {
                delivered += 1;
            } else {
                tracing::warn!(
                    org_id = %org_id,
                    conn_id = %handle.conn_id,
                    "Dropped event for saturated connection"
                );
                counter!("ws_events_dropped_total").increment(1);
            }
        }

        counter!("ws_events_published_total").increment(1);
        delivered
    }

    pub fn connection_count(&self, org_id: Uuid) -> usize {
        self.channels.get(&org_id).map(|c| c.len()).unwrap_or(0)
    }

    /// One reaper pass: ping every live connection, evict those silent past
    /// the threshold. Failures are logged and retried next cycle.
    pub fn sweep(&self) {
        let now = now_millis();
        let cutoff = self.heartbeat.eviction_cutoff_millis();
        let mut stale: Vec<(Uuid, Uuid)> = Vec::new();

        for entry in self.channels.iter() {
            let org_id = *entry.key();
            for handle in entry.value().values() {
                if handle.silent_for_millis(now) > cutoff {
                    stale.push((org_id, handle.conn_id));
                } else if !handle.try_send(ServerEvent::Ping) {
                    tracing::debug!(
                        org_id = %org_id,
                        conn_id = %handle.conn_id,
                        "Heartbeat ping not deliverable; retrying next cycle"
                    );
                }
            }
        }

        for (org_id, conn_id) in stale {
            tracing::info!(org_id = %org_id, conn_id = %conn_id, "Evicting silent connection");
            counter!("ws_connections_evicted_total").increment(1);
            self.unsubscribe(org_id, conn_id);
        }
    }

    /// Run the heartbeat reaper until the registry is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.heartbeat.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep();
            }
        })
    }
}

/// Routes mutation events into the per-org channels. Thin by design: the
/// structural keying in the registry is what makes cross-tenant delivery
/// unrepresentable.
#[derive(Clone)]
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
}

impl EventRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Fire-and-forget delivery to the org's subscribers.
    pub fn publish(&self, org_id: Uuid, event: ServerEvent) -> usize {
        self.registry.publish(org_id, &event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry(interval_ms: u64) -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(HeartbeatConfig {
            interval: Duration::from_millis(interval_ms),
            missed_threshold: 3,
        }))
    }

    fn connect(registry: &ConnectionRegistry, org_id: Uuid) -> (Uuid, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let handle = ConnectionHandle::new(Uuid::new_v4(), tx);
        let conn_id = handle.conn_id;
        registry.subscribe(org_id, handle);
        (conn_id, rx)
    }

    fn event_for(org_id: Uuid) -> ServerEvent {
        ServerEvent::Connected {
            org_id,
            user_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_org_subscribers() {
        let registry = test_registry(1000);
        let org = Uuid::new_v4();
        let (_, mut rx_a) = connect(&registry, org);
        let (_, mut rx_b) = connect(&registry, org);

        assert_eq!(registry.publish(org, &event_for(org)), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn channel_isolation_is_structural() {
        let registry = test_registry(1000);
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let (_, mut rx_a) = connect(&registry, org_a);
        let (_, mut rx_b) = connect(&registry, org_b);

        assert_eq!(registry.publish(org_a, &event_for(org_a)), 1);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        // And an org with no subscribers delivers to nobody
        assert_eq!(registry.publish(Uuid::new_v4(), &event_for(org_a)), 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_synchronous_and_idempotent() {
        let registry = test_registry(1000);
        let org = Uuid::new_v4();
        let (conn_id, _rx) = connect(&registry, org);

        registry.unsubscribe(org, conn_id);
        assert_eq!(registry.connection_count(org), 0);
        assert_eq!(registry.publish(org, &event_for(org)), 0);

        // Second removal is a no-op
        registry.unsubscribe(org, conn_id);
    }

    #[tokio::test]
    async fn silent_connections_are_evicted_after_missed_heartbeats() {
        let registry = test_registry(20);
        let org = Uuid::new_v4();
        let (_, _rx) = connect(&registry, org);
        let reaper = registry.spawn_reaper();

        // 3 missed intervals at 20ms plus one interval of slack
        tokio::time::sleep(Duration::from_millis(140)).await;

        assert_eq!(registry.connection_count(org), 0);
        assert_eq!(registry.publish(org, &event_for(org)), 0);

        reaper.abort();
    }

    #[tokio::test]
    async fn touched_connections_survive_the_reaper() {
        let registry = test_registry(20);
        let org = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(32);
        let handle = ConnectionHandle::new(Uuid::new_v4(), tx);
        let keepalive = handle.clone();
        registry.subscribe(org, handle);
        let reaper = registry.spawn_reaper();

        for _ in 0..10 {
            keepalive.touch();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }

        assert_eq!(registry.connection_count(org), 1);
        // Reaper pings were delivered along the way
        assert!(rx.try_recv().is_ok());

        reaper.abort();
    }
}
