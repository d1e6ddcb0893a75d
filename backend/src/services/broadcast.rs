//! Fan-out of timer events to live client connections.
//!
//! Each connection owns a bounded outbound queue. Publishing never waits:
//! a queue that is full marks its connection as a slow consumer and the
//! connection is closed instead of stalling the publisher. The heartbeat
//! sweep pings every connection, drops idle ones, and enforces token
//! revocation and deactivation within one heartbeat interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::models::user::UserRole;
use crate::services::presence::{EventSink, TimerEvent};
use crate::services::revocation::RevocationService;
use crate::types::{CompanyId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Unauthenticated,
    /// Token revoked or account deactivated; both surface the same reason.
    Revoked,
    SlowConsumer,
    IdleTimeout,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Unauthenticated => "unauthenticated",
            CloseReason::Revoked => "revoked",
            CloseReason::SlowConsumer => "slow_consumer",
            CloseReason::IdleTimeout => "idle_timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// Serialized JSON payload: an event or a command reply.
    Text(String),
    /// Protocol-level liveness probe sent by the heartbeat sweep.
    Ping,
}

struct ConnectionHandle {
    user_id: UserId,
    company_id: Option<CompanyId>,
    role: UserRole,
    access_jti: String,
    frames: mpsc::Sender<OutboundFrame>,
    close: watch::Sender<Option<CloseReason>>,
    last_seen: Arc<AtomicI64>,
}

impl ConnectionHandle {
    fn entitled_to(&self, event: &TimerEvent) -> bool {
        self.role.is_super_admin() || self.company_id == Some(event.company_id)
    }
}

/// Per-connection endpoints handed to the socket tasks on registration.
pub struct Registration {
    pub id: u64,
    /// Outbound queue consumed by the connection's writer task.
    pub frames: mpsc::Receiver<OutboundFrame>,
    /// Latched close signal; once `Some`, the writer sends a close frame and
    /// both tasks exit.
    pub closed: watch::Receiver<Option<CloseReason>>,
    /// Sender used by the reader task for command replies.
    pub sender: mpsc::Sender<OutboundFrame>,
    /// Unix-seconds activity stamp, updated by the reader on any inbound frame.
    pub last_seen: Arc<AtomicI64>,
}

pub struct Broadcaster {
    connections: Mutex<HashMap<u64, ConnectionHandle>>,
    next_id: AtomicU64,
    queue_cap: usize,
}

impl Broadcaster {
    pub fn new(queue_cap: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_cap: queue_cap.max(1),
        }
    }

    pub fn register(
        &self,
        user_id: UserId,
        company_id: Option<CompanyId>,
        role: UserRole,
        access_jti: String,
    ) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (frames_tx, frames_rx) = mpsc::channel(self.queue_cap);
        let (close_tx, close_rx) = watch::channel(None);
        let last_seen = Arc::new(AtomicI64::new(Utc::now().timestamp()));

        let handle = ConnectionHandle {
            user_id,
            company_id,
            role,
            access_jti,
            frames: frames_tx.clone(),
            close: close_tx,
            last_seen: last_seen.clone(),
        };
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, handle);
        tracing::debug!(connection_id = id, %user_id, "realtime connection registered");

        Registration {
            id,
            frames: frames_rx,
            closed: close_rx,
            sender: frames_tx,
            last_seen,
        }
    }

    pub fn unregister(&self, id: u64) {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Enqueues the event on every entitled connection. Within a connection,
    /// publication order is delivery order; a full queue evicts only its own
    /// connection.
    pub fn publish(&self, event: &TimerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("failed to serialize timer event: {err}");
                return;
            }
        };

        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        let mut evicted = Vec::new();
        for (&id, handle) in connections.iter() {
            if !handle.entitled_to(event) {
                continue;
            }
            match handle.frames.try_send(OutboundFrame::Text(payload.clone())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection_id = id,
                        user_id = %handle.user_id,
                        "outbound queue full, evicting slow consumer"
                    );
                    let _ = handle.close.send(Some(CloseReason::SlowConsumer));
                    evicted.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push(id);
                }
            }
        }
        for id in evicted {
            connections.remove(&id);
        }
    }

    /// Closes every connection belonging to `user_id` (logout-all,
    /// deactivation).
    pub fn close_user(&self, user_id: UserId, reason: CloseReason) {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        let ids: Vec<u64> = connections
            .iter()
            .filter(|(_, handle)| handle.user_id == user_id)
            .map(|(&id, _)| id)
            .collect();
        for id in ids {
            if let Some(handle) = connections.remove(&id) {
                let _ = handle.close.send(Some(reason));
            }
        }
    }

    fn close_by_id(&self, id: u64, reason: CloseReason) {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = connections.remove(&id) {
            let _ = handle.close.send(Some(reason));
        }
    }

    /// One heartbeat tick: ping everyone, close idle connections, and close
    /// connections whose access token has been revoked since they attached.
    pub async fn heartbeat_sweep(&self, revocation: &RevocationService, idle_timeout: Duration) {
        let now = Utc::now().timestamp();
        let snapshot: Vec<(u64, String, i64, mpsc::Sender<OutboundFrame>)> = {
            let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
            connections
                .iter()
                .map(|(&id, handle)| {
                    (
                        id,
                        handle.access_jti.clone(),
                        handle.last_seen.load(Ordering::Relaxed),
                        handle.frames.clone(),
                    )
                })
                .collect()
        };

        for (id, jti, last_seen, frames) in snapshot {
            if now - last_seen > idle_timeout.as_secs() as i64 {
                self.close_by_id(id, CloseReason::IdleTimeout);
                continue;
            }
            match revocation.is_revoked(&jti).await {
                Ok(true) => {
                    self.close_by_id(id, CloseReason::Revoked);
                    continue;
                }
                Ok(false) => {}
                // KV outage: keep the connection, the next tick retries.
                Err(err) => {
                    tracing::warn!(connection_id = id, "revocation check failed: {err:#}");
                }
            }
            if frames.try_send(OutboundFrame::Ping).is_err() {
                self.close_by_id(id, CloseReason::SlowConsumer);
            }
        }
    }
}

impl EventSink for Broadcaster {
    fn deliver(&self, event: &TimerEvent) {
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv::MemoryKv;
    use crate::services::presence::TimerEventKind;
    use crate::types::TimeEntryId;

    fn event(company_id: CompanyId, user_id: UserId) -> TimerEvent {
        TimerEvent {
            event: TimerEventKind::TimerStarted,
            seq: 1,
            company_id,
            user_id,
            entry_id: TimeEntryId::new(),
            timer: None,
            entry: None,
        }
    }

    fn drain(reg: &mut Registration) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = reg.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn events_reach_only_entitled_connections() {
        let broadcaster = Broadcaster::new(16);
        let company_a = CompanyId::new();
        let company_b = CompanyId::new();

        let mut conn_a = broadcaster.register(
            UserId::new(),
            Some(company_a),
            UserRole::RegularUser,
            "jti-a".into(),
        );
        let mut conn_b = broadcaster.register(
            UserId::new(),
            Some(company_b),
            UserRole::RegularUser,
            "jti-b".into(),
        );
        let mut conn_root = broadcaster.register(
            UserId::new(),
            None,
            UserRole::SuperAdmin,
            "jti-root".into(),
        );

        broadcaster.publish(&event(company_a, UserId::new()));

        assert_eq!(drain(&mut conn_a).len(), 1);
        assert_eq!(drain(&mut conn_b).len(), 0);
        assert_eq!(drain(&mut conn_root).len(), 1);
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_without_stalling_others() {
        let cap = 4;
        let broadcaster = Broadcaster::new(cap);
        let company = CompanyId::new();

        let mut slow = broadcaster.register(
            UserId::new(),
            Some(company),
            UserRole::RegularUser,
            "jti-slow".into(),
        );
        let mut healthy = broadcaster.register(
            UserId::new(),
            Some(company),
            UserRole::RegularUser,
            "jti-ok".into(),
        );

        // The healthy connection drains as events arrive; the slow one never
        // reads and overflows its queue on event cap+1.
        let mut healthy_received = 0usize;
        for n in 0..cap + 1 {
            broadcaster.publish(&event(company, UserId::new()));
            healthy_received += drain(&mut healthy).len();
            if n < cap {
                assert!(slow.closed.borrow().is_none());
            }
        }

        assert_eq!(healthy_received, cap + 1);
        assert_eq!(*slow.closed.borrow(), Some(CloseReason::SlowConsumer));
        assert_eq!(broadcaster.connection_count(), 1);

        // The slow queue still holds the first `cap` events, none lost.
        assert_eq!(drain(&mut slow).len(), cap);
    }

    #[tokio::test]
    async fn close_user_targets_one_user_only() {
        let broadcaster = Broadcaster::new(8);
        let company = CompanyId::new();
        let victim = UserId::new();

        let victim_conn_1 = broadcaster.register(
            victim,
            Some(company),
            UserRole::RegularUser,
            "jti-1".into(),
        );
        let victim_conn_2 = broadcaster.register(
            victim,
            Some(company),
            UserRole::RegularUser,
            "jti-2".into(),
        );
        let bystander = broadcaster.register(
            UserId::new(),
            Some(company),
            UserRole::RegularUser,
            "jti-3".into(),
        );

        broadcaster.close_user(victim, CloseReason::Revoked);

        assert_eq!(*victim_conn_1.closed.borrow(), Some(CloseReason::Revoked));
        assert_eq!(*victim_conn_2.closed.borrow(), Some(CloseReason::Revoked));
        assert!(bystander.closed.borrow().is_none());
        assert_eq!(broadcaster.connection_count(), 1);
    }

    #[tokio::test]
    async fn heartbeat_closes_revoked_connections() {
        let broadcaster = Broadcaster::new(8);
        let revocation = RevocationService::new(Arc::new(MemoryKv::new()));
        let company = CompanyId::new();

        let mut revoked_conn = broadcaster.register(
            UserId::new(),
            Some(company),
            UserRole::RegularUser,
            "jti-revoked".into(),
        );
        let mut live_conn = broadcaster.register(
            UserId::new(),
            Some(company),
            UserRole::RegularUser,
            "jti-live".into(),
        );

        revocation
            .revoke("jti-revoked", Duration::from_secs(60))
            .await
            .unwrap();
        broadcaster
            .heartbeat_sweep(&revocation, Duration::from_secs(90))
            .await;

        assert_eq!(*revoked_conn.closed.borrow(), Some(CloseReason::Revoked));
        assert!(live_conn.closed.borrow().is_none());
        // The surviving connection got a ping.
        assert!(matches!(
            live_conn.frames.try_recv(),
            Ok(OutboundFrame::Ping)
        ));
        assert!(revoked_conn.frames.try_recv().is_err() || broadcaster.connection_count() == 1);
    }

    #[tokio::test]
    async fn heartbeat_closes_idle_connections() {
        let broadcaster = Broadcaster::new(8);
        let revocation = RevocationService::new(Arc::new(MemoryKv::new()));
        let company = CompanyId::new();

        let idle = broadcaster.register(
            UserId::new(),
            Some(company),
            UserRole::RegularUser,
            "jti-idle".into(),
        );
        idle.last_seen
            .store(Utc::now().timestamp() - 1000, Ordering::Relaxed);

        broadcaster
            .heartbeat_sweep(&revocation, Duration::from_secs(90))
            .await;

        assert_eq!(*idle.closed.borrow(), Some(CloseReason::IdleTimeout));
        assert_eq!(broadcaster.connection_count(), 0);
    }

    #[tokio::test]
    async fn per_connection_order_matches_publication_order() {
        let broadcaster = Broadcaster::new(32);
        let company = CompanyId::new();
        let mut conn = broadcaster.register(
            UserId::new(),
            Some(company),
            UserRole::RegularUser,
            "jti".into(),
        );

        for seq in 1..=10u64 {
            let mut e = event(company, UserId::new());
            e.seq = seq;
            broadcaster.publish(&e);
        }

        let seqs: Vec<u64> = drain(&mut conn)
            .into_iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Text(json) => serde_json::from_str::<serde_json::Value>(&json)
                    .ok()
                    .and_then(|v| v["seq"].as_u64()),
                OutboundFrame::Ping => None,
            })
            .collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
    }
}
