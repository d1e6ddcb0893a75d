//! In-memory map of running timers, one per user, plus the event feed that
//! keeps real-time clients current.
//!
//! The store is authoritative; this hub is a derived cache rebuilt from the
//! store on startup (and optionally on a periodic schedule). All mutations
//! pass through one mutex so readers never observe partial records, and the
//! sequence counter orders events for clients that need causal ordering.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::db::connection::DbPool;
use crate::models::time_entry::{ActiveTimerInfo, TimeEntryResponse};
use crate::models::user::CompanyScope;
use crate::repositories;
use crate::types::{CompanyId, TimeEntryId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerEventKind {
    #[serde(rename = "timer.started")]
    TimerStarted,
    #[serde(rename = "timer.stopped")]
    TimerStopped,
    #[serde(rename = "timeentry.created")]
    EntryCreated,
    #[serde(rename = "timeentry.updated")]
    EntryUpdated,
    #[serde(rename = "timeentry.deleted")]
    EntryDeleted,
}

#[derive(Debug, Clone, Serialize)]
/// Change notification fanned out to subscribed connections. Carries enough
/// state for a client to update derived UI without a refetch.
pub struct TimerEvent {
    pub event: TimerEventKind,
    /// Hub-wide monotonic sequence; clients use it for cross-event ordering.
    pub seq: u64,
    pub company_id: CompanyId,
    pub user_id: UserId,
    pub entry_id: TimeEntryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<ActiveTimerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<TimeEntryResponse>,
}

/// Where the hub pushes events. Implemented by the broadcast layer; tests
/// plug in a recorder. Must not block: implementations enqueue or drop.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &TimerEvent);
}

/// Sink used until the broadcast layer is wired, and by maintenance binaries.
pub struct NullSink;

impl EventSink for NullSink {
    fn deliver(&self, _event: &TimerEvent) {}
}

#[derive(Default)]
struct Inner {
    active: HashMap<UserId, ActiveTimerInfo>,
    seq: u64,
}

pub struct PresenceHub {
    inner: Mutex<Inner>,
    sink: Arc<dyn EventSink>,
}

impl PresenceHub {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            sink,
        }
    }

    fn publish(&self, build: impl FnOnce(u64, &mut HashMap<UserId, ActiveTimerInfo>) -> TimerEvent) {
        // Event construction happens under the lock so seq order and map
        // state can never disagree; delivery is try-send and cannot block.
        let event = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.seq += 1;
            let seq = inner.seq;
            build(seq, &mut inner.active)
        };
        self.sink.deliver(&event);
    }

    /// A timer began: record it and announce.
    pub fn timer_started(&self, info: ActiveTimerInfo) {
        self.publish(|seq, active| {
            let event = TimerEvent {
                event: TimerEventKind::TimerStarted,
                seq,
                company_id: info.company_id,
                user_id: info.user_id,
                entry_id: info.entry_id,
                timer: Some(info.clone()),
                entry: None,
            };
            active.insert(info.user_id, info);
            event
        });
    }

    /// A timer ended: drop the live record and announce the closed entry.
    pub fn timer_stopped(&self, company_id: CompanyId, entry: TimeEntryResponse) {
        self.publish(|seq, active| {
            active.remove(&entry.user_id);
            TimerEvent {
                event: TimerEventKind::TimerStopped,
                seq,
                company_id,
                user_id: entry.user_id,
                entry_id: entry.id,
                timer: None,
                entry: Some(entry),
            }
        });
    }

    pub fn entry_created(&self, company_id: CompanyId, entry: TimeEntryResponse) {
        self.publish(|seq, _active| TimerEvent {
            event: TimerEventKind::EntryCreated,
            seq,
            company_id,
            user_id: entry.user_id,
            entry_id: entry.id,
            timer: None,
            entry: Some(entry),
        });
    }

    /// An entry changed. When the entry is (still) running, `timer` carries
    /// the refreshed live record and the map is updated in the same step.
    pub fn entry_updated(
        &self,
        company_id: CompanyId,
        entry: TimeEntryResponse,
        timer: Option<ActiveTimerInfo>,
    ) {
        self.publish(|seq, active| {
            if let Some(info) = &timer {
                active.insert(info.user_id, info.clone());
            }
            TimerEvent {
                event: TimerEventKind::EntryUpdated,
                seq,
                company_id,
                user_id: entry.user_id,
                entry_id: entry.id,
                timer,
                entry: Some(entry),
            }
        });
    }

    pub fn entry_deleted(&self, company_id: CompanyId, user_id: UserId, entry_id: TimeEntryId) {
        self.publish(|seq, active| {
            // Deleting a running entry also clears presence.
            if active
                .get(&user_id)
                .map(|info| info.entry_id == entry_id)
                .unwrap_or(false)
            {
                active.remove(&user_id);
            }
            TimerEvent {
                event: TimerEventKind::EntryDeleted,
                seq,
                company_id,
                user_id,
                entry_id,
                timer: None,
                entry: None,
            }
        });
    }

    /// Scoped view of the live map. `user_filter` further narrows to a set of
    /// users, which is how team-level snapshots are served.
    pub fn snapshot(
        &self,
        scope: CompanyScope,
        user_filter: Option<&HashSet<UserId>>,
    ) -> Vec<ActiveTimerInfo> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut timers: Vec<ActiveTimerInfo> = inner
            .active
            .values()
            .filter(|info| scope.permits(Some(info.company_id)))
            .filter(|info| {
                user_filter
                    .map(|users| users.contains(&info.user_id))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        timers.sort_by_key(|info| info.start_time);
        timers
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
            .len()
    }

    pub fn seq(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).seq
    }

    /// Replaces the whole map in one step. No events are emitted: clients
    /// re-snapshot after reconnect rather than replaying a reload.
    pub fn replace_all(&self, timers: Vec<ActiveTimerInfo>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.seq += 1;
        inner.active = timers
            .into_iter()
            .map(|info| (info.user_id, info))
            .collect();
    }

    /// Rebuilds the map from the store's running entries. Called on startup
    /// and optionally on a periodic schedule, bounding divergence between the
    /// store and this cache.
    pub async fn reload(&self, pool: &DbPool) -> anyhow::Result<usize> {
        let timers = repositories::time_entry::running_timer_infos(pool).await?;
        let count = timers.len();
        self.replace_all(timers);
        tracing::info!(count, "presence hub reloaded from store");
        Ok(count)
    }
}
