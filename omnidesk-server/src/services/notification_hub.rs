//! Tenant-partitioned registry of live agent connections.
//!
//! Every accepted WebSocket gets a bounded outbound queue drained by its own
//! socket task, so a frame is serialized once per publish and a slow peer can
//! never stall delivery to the rest of its company. A full or closed queue is
//! treated as a transport fault: the connection is dropped from the registry
//! and the publish carries on.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use metrics::{counter, gauge};
use shared::{
    config::server::RealtimeConfig,
    models::{RealtimeStats, ServerEvent},
};
use tokio::{
    sync::{RwLock, mpsc},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type CompanyId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// A liveness probe is outstanding.
    Pending,
    Closed,
}

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_PENDING: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// Work item for a connection's socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized [`ServerEvent`] text frame.
    Event(Arc<str>),
    /// Liveness probe, sent as a WebSocket ping.
    Probe,
    Close,
}

/// Liveness flag shared between the hub and the socket task.
#[derive(Debug)]
pub struct Liveness {
    state: AtomicU8,
}

enum ProbeOutcome {
    Sent,
    Unanswered,
    Skipped,
}

impl Liveness {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CONNECTING),
        }
    }

    fn mark_open(&self) {
        let _ = self.state.compare_exchange(
            STATE_CONNECTING,
            STATE_OPEN,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Records that the peer showed signs of life. Returns `false` once the
    /// connection has been closed.
    pub fn mark_alive(&self) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| {
                (state != STATE_CLOSED).then_some(STATE_OPEN)
            })
            .is_ok()
    }

    fn begin_probe(&self) -> ProbeOutcome {
        match self.state.compare_exchange(
            STATE_OPEN,
            STATE_PENDING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => ProbeOutcome::Sent,
            Err(STATE_PENDING) => ProbeOutcome::Unanswered,
            Err(_) => ProbeOutcome::Skipped,
        }
    }

    fn close(&self) -> bool {
        self.state.swap(STATE_CLOSED, Ordering::SeqCst) != STATE_CLOSED
    }

    fn accepts_frames(&self) -> bool {
        matches!(
            self.state.load(Ordering::SeqCst),
            STATE_OPEN | STATE_PENDING
        )
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CONNECTING => ConnectionState::Connecting,
            STATE_OPEN => ConnectionState::Open,
            STATE_PENDING => ConnectionState::Pending,
            _ => ConnectionState::Closed,
        }
    }
}

/// Handle returned to the socket task when a connection is accepted.
#[derive(Debug)]
pub struct Subscription {
    pub id: ConnectionId,
    pub company_id: CompanyId,
    pub liveness: Arc<Liveness>,
    pub receiver: mpsc::Receiver<Outbound>,
}

#[derive(Debug)]
struct ConnectionSlot {
    sender: mpsc::Sender<Outbound>,
    liveness: Arc<Liveness>,
}

#[derive(Debug, Default)]
struct Registry {
    groups: HashMap<CompanyId, HashMap<ConnectionId, ConnectionSlot>>,
    owners: HashMap<ConnectionId, CompanyId>,
}

impl Registry {
    fn insert(&mut self, company_id: CompanyId, id: ConnectionId, slot: ConnectionSlot) {
        self.groups.entry(company_id).or_default().insert(id, slot);
        self.owners.insert(id, company_id);
    }

    fn remove(&mut self, id: ConnectionId) -> Option<ConnectionSlot> {
        let company_id = self.owners.remove(&id)?;
        let group = self.groups.get_mut(&company_id)?;
        let slot = group.remove(&id);
        if group.is_empty() {
            self.groups.remove(&company_id);
        }
        slot
    }

    fn report_gauge(&self) {
        gauge!("omnidesk_ws_connections").set(self.owners.len() as f64);
    }
}

/// Result of one heartbeat sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

#[derive(Debug)]
pub struct NotificationHub {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    heartbeat_interval: Duration,
    buffer: usize,
}

impl NotificationHub {
    #[must_use]
    pub fn new(heartbeat_interval: Duration, buffer: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            heartbeat_interval,
            buffer: buffer.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(
            Duration::from_secs(config.heartbeat_seconds),
            config.connection_buffer,
        )
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Registers a connection under `company_id` and returns the queue its
    /// socket task must drain.
    pub async fn accept(&self, company_id: CompanyId) -> Subscription {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.buffer);
        let liveness = Arc::new(Liveness::new());

        {
            let mut registry = self.registry.write().await;
            registry.insert(
                company_id,
                id,
                ConnectionSlot {
                    sender,
                    liveness: Arc::clone(&liveness),
                },
            );
            registry.report_gauge();
        }
        liveness.mark_open();

        info!(connection = %id, company_id, "realtime connection registered");
        Subscription {
            id,
            company_id,
            liveness,
            receiver,
        }
    }

    /// Delivers `event` to every open connection of `company_id` and returns
    /// how many connections accepted it.
    ///
    /// Never fails. Connections whose queue is full or closed are removed.
    pub async fn publish(&self, company_id: CompanyId, event: &ServerEvent) -> usize {
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(err) => {
                warn!(company_id, kind = event.kind(), error = %err, "failed to serialize notification");
                return 0;
            }
        };

        let targets: Vec<(ConnectionId, mpsc::Sender<Outbound>)> = {
            let registry = self.registry.read().await;
            registry
                .groups
                .get(&company_id)
                .map(|group| {
                    group
                        .iter()
                        .filter(|(_, slot)| slot.liveness.accepts_frames())
                        .map(|(id, slot)| (*id, slot.sender.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        if targets.is_empty() {
            debug!(company_id, kind = event.kind(), "no listeners for notification");
            return 0;
        }

        let mut delivered = 0_usize;
        let mut faulted = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(Outbound::Event(Arc::clone(&payload))) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = %id, company_id, "outbound queue full; dropping connection");
                    faulted.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection = %id, company_id, "outbound queue closed; dropping connection");
                    faulted.push(id);
                }
            }
        }

        for id in faulted {
            counter!("omnidesk_ws_delivery_failures_total").increment(1);
            self.remove(id).await;
        }

        counter!("omnidesk_ws_notifications_total", "kind" => event.kind())
            .increment(delivered as u64);
        debug!(company_id, kind = event.kind(), delivered, "notification published");
        delivered
    }

    /// Removes a connection from the registry. Idempotent; returns whether the
    /// connection was still registered.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let slot = {
            let mut registry = self.registry.write().await;
            let slot = registry.remove(id);
            registry.report_gauge();
            slot
        };

        let Some(slot) = slot else {
            return false;
        };

        if slot.liveness.close() {
            // Best effort: when the queue is full the socket task still stops
            // once it drains, because this was the last sender.
            let _ = slot.sender.try_send(Outbound::Close);
        }
        info!(connection = %id, "realtime connection removed");
        true
    }

    /// Probes every connection that answered the previous probe and evicts the
    /// ones that did not.
    pub async fn sweep(&self) -> SweepReport {
        let snapshot: Vec<(ConnectionId, Arc<Liveness>, mpsc::Sender<Outbound>)> = {
            let registry = self.registry.read().await;
            registry
                .groups
                .values()
                .flat_map(HashMap::iter)
                .map(|(id, slot)| (*id, Arc::clone(&slot.liveness), slot.sender.clone()))
                .collect()
        };

        let mut report = SweepReport::default();
        let mut dead = Vec::new();
        for (id, liveness, sender) in snapshot {
            match liveness.begin_probe() {
                ProbeOutcome::Sent => match sender.try_send(Outbound::Probe) {
                    Ok(()) => report.probed += 1,
                    // A backed-up queue cannot carry the answer either; the
                    // next sweep finds the probe unanswered.
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id),
                },
                ProbeOutcome::Unanswered => dead.push(id),
                ProbeOutcome::Skipped => {}
            }
        }

        for id in dead {
            if self.remove(id).await {
                warn!(connection = %id, "evicting unresponsive realtime connection");
                counter!("omnidesk_ws_heartbeat_evictions_total").increment(1);
                report.evicted += 1;
            }
        }
        report
    }

    /// Runs [`Self::sweep`] every heartbeat interval until `shutdown` fires.
    pub fn spawn_heartbeat(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = hub.sweep().await;
                        if report.evicted > 0 {
                            info!(evicted = report.evicted, probed = report.probed, "heartbeat sweep evicted connections");
                        }
                    }
                }
            }
            debug!("heartbeat task stopped");
        })
    }

    /// Closes every connection, used during graceful shutdown.
    pub async fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.registry.read().await.owners.keys().copied().collect();
        let mut closed = 0;
        for id in ids {
            if self.remove(id).await {
                closed += 1;
            }
        }
        closed
    }

    pub async fn connection_count(&self, company_id: CompanyId) -> usize {
        self.registry
            .read()
            .await
            .groups
            .get(&company_id)
            .map_or(0, HashMap::len)
    }

    pub async fn stats(&self) -> RealtimeStats {
        let registry = self.registry.read().await;
        RealtimeStats {
            tenants: registry.groups.len(),
            connections: registry.owners.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::models::{ConversationStatus, MessageDirection, MessageView};
    use tokio::sync::mpsc::error::TryRecvError;

    fn hub() -> NotificationHub {
        NotificationHub::new(Duration::from_secs(30), 8)
    }

    fn message_event(conversation_id: i64) -> ServerEvent {
        ServerEvent::new_message(MessageView {
            id: 1,
            conversation_id,
            direction: MessageDirection::Inbound,
            sender_agent_id: None,
            content: "hello".into(),
            created_at: Utc::now(),
        })
    }

    fn expect_event(receiver: &mut mpsc::Receiver<Outbound>) -> serde_json::Value {
        match receiver.try_recv() {
            Ok(Outbound::Event(payload)) => serde_json::from_str(&payload).unwrap(),
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_reaches_only_the_target_company() {
        let hub = hub();
        let mut first = hub.accept(1).await;
        let mut second = hub.accept(1).await;
        let mut other = hub.accept(2).await;

        let delivered = hub.publish(1, &message_event(42)).await;

        assert_eq!(delivered, 2);
        for subscription in [&mut first, &mut second] {
            let frame = expect_event(&mut subscription.receiver);
            assert_eq!(frame["type"], "new_message");
            assert_eq!(frame["conversationId"], 42);
        }
        assert!(matches!(
            other.receiver.try_recv(),
            Err(TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn publish_without_listeners_is_a_no_op() {
        let hub = hub();
        let _listener = hub.accept(1).await;

        let delivered = hub
            .publish(
                99,
                &ServerEvent::conversation_update(5, ConversationStatus::Closed, None),
            )
            .await;

        assert_eq!(delivered, 0);
        assert_eq!(hub.stats().await.connections, 1);
    }

    #[tokio::test]
    async fn frames_arrive_in_publish_order() {
        let hub = hub();
        let mut listener = hub.accept(3).await;

        for conversation_id in 1..=3 {
            hub.publish(3, &message_event(conversation_id)).await;
        }

        let order: Vec<i64> = (0..3)
            .map(|_| expect_event(&mut listener.receiver)["conversationId"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn closed_queue_is_removed_without_affecting_others() {
        let hub = hub();
        let gone = hub.accept(1).await;
        let mut alive = hub.accept(1).await;
        drop(gone.receiver);

        let delivered = hub.publish(1, &message_event(7)).await;

        assert_eq!(delivered, 1);
        assert_eq!(expect_event(&mut alive.receiver)["conversationId"], 7);
        assert_eq!(hub.connection_count(1).await, 1);
    }

    #[tokio::test]
    async fn full_queue_counts_as_transport_fault() {
        let hub = NotificationHub::new(Duration::from_secs(30), 1);
        let slow = hub.accept(1).await;

        assert_eq!(hub.publish(1, &message_event(1)).await, 1);
        assert_eq!(hub.publish(1, &message_event(2)).await, 0);

        assert_eq!(hub.connection_count(1).await, 0);
        assert_eq!(slow.liveness.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let hub = hub();
        let mut subscription = hub.accept(5).await;

        assert!(hub.remove(subscription.id).await);
        assert!(!hub.remove(subscription.id).await);

        assert_eq!(subscription.receiver.try_recv(), Ok(Outbound::Close));
        let stats = hub.stats().await;
        assert_eq!((stats.tenants, stats.connections), (0, 0));
        assert!(!subscription.liveness.mark_alive());
    }

    #[tokio::test]
    async fn sweep_evicts_only_connections_that_missed_a_probe() {
        let hub = hub();
        let mut responsive = hub.accept(1).await;
        let mut silent = hub.accept(1).await;

        let first = hub.sweep().await;
        assert_eq!(first, SweepReport { probed: 2, evicted: 0 });
        assert_eq!(responsive.receiver.try_recv(), Ok(Outbound::Probe));
        assert_eq!(silent.receiver.try_recv(), Ok(Outbound::Probe));
        assert_eq!(silent.liveness.state(), ConnectionState::Pending);

        assert!(responsive.liveness.mark_alive());

        let second = hub.sweep().await;
        assert_eq!(second, SweepReport { probed: 1, evicted: 1 });
        assert_eq!(silent.receiver.try_recv(), Ok(Outbound::Close));
        assert_eq!(hub.connection_count(1).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_task_evicts_silent_connection_within_two_intervals() {
        let hub = Arc::new(hub());
        let shutdown = CancellationToken::new();
        let silent = hub.accept(1).await;
        let heartbeat = hub.spawn_heartbeat(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(hub.connection_count(1).await, 0);
        assert_eq!(silent.liveness.state(), ConnectionState::Closed);

        shutdown.cancel();
        heartbeat.await.unwrap();
    }

    #[tokio::test]
    async fn close_all_empties_the_registry() {
        let hub = hub();
        let _a = hub.accept(1).await;
        let _b = hub.accept(2).await;

        assert_eq!(hub.close_all().await, 2);
        assert_eq!(hub.stats().await, RealtimeStats::default());
    }
}
