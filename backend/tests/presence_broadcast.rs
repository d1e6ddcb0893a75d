//! Hub-to-broadcaster integration: events published by the presence hub reach
//! exactly the entitled connections, in order, and misbehaving or revoked
//! connections are closed without affecting the rest.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempo_backend::models::time_entry::{ActiveTimerInfo, TimeEntryResponse};
use tempo_backend::models::user::{CompanyScope, UserRole};
use tempo_backend::services::broadcast::{Broadcaster, CloseReason, OutboundFrame, Registration};
use tempo_backend::services::kv::MemoryKv;
use tempo_backend::services::presence::PresenceHub;
use tempo_backend::services::revocation::RevocationService;
use tempo_backend::types::{CompanyId, TimeEntryId, UserId};

fn running_timer(company_id: CompanyId, user_id: UserId) -> ActiveTimerInfo {
    ActiveTimerInfo {
        entry_id: TimeEntryId::new(),
        user_id,
        company_id,
        user_name: "Worker".into(),
        project_id: None,
        project_name: None,
        task_id: None,
        task_name: None,
        description: None,
        start_time: Utc::now(),
    }
}

fn closed_entry(info: &ActiveTimerInfo) -> TimeEntryResponse {
    let end = Utc::now();
    TimeEntryResponse {
        id: info.entry_id,
        user_id: info.user_id,
        project_id: info.project_id,
        task_id: info.task_id,
        description: info.description.clone(),
        start_time: info.start_time,
        end_time: Some(end),
        duration_seconds: Some((end - info.start_time).num_seconds()),
        is_running: false,
    }
}

fn drain_events(reg: &mut Registration) -> Vec<serde_json::Value> {
    let mut events = Vec::new();
    while let Ok(frame) = reg.frames.try_recv() {
        if let OutboundFrame::Text(payload) = frame {
            events.push(serde_json::from_str(&payload).expect("valid event json"));
        }
    }
    events
}

#[tokio::test]
async fn timer_lifecycle_events_reach_company_subscribers_in_order() {
    let broadcaster = Arc::new(Broadcaster::new(64));
    let hub = PresenceHub::new(broadcaster.clone());
    let company = CompanyId::new();
    let other_company = CompanyId::new();

    let mut same_company = broadcaster.register(
        UserId::new(),
        Some(company),
        UserRole::RegularUser,
        "jti-same".into(),
    );
    let mut cross_company = broadcaster.register(
        UserId::new(),
        Some(other_company),
        UserRole::Admin,
        "jti-cross".into(),
    );

    let timer = running_timer(company, UserId::new());
    hub.timer_started(timer.clone());
    hub.timer_stopped(company, closed_entry(&timer));

    let events = drain_events(&mut same_company);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event"], "timer.started");
    assert_eq!(events[1]["event"], "timer.stopped");
    assert!(events[0]["seq"].as_u64() < events[1]["seq"].as_u64());
    assert_eq!(
        events[0]["timer"]["user_name"].as_str(),
        Some("Worker"),
        "started event carries the denormalized live record"
    );

    // An admin of another tenant sees nothing.
    assert!(drain_events(&mut cross_company).is_empty());
}

#[tokio::test]
async fn event_storm_evicts_only_the_stalled_connection() {
    let cap = 8;
    let broadcaster = Arc::new(Broadcaster::new(cap));
    let hub = PresenceHub::new(broadcaster.clone());
    let company = CompanyId::new();

    let mut stalled = broadcaster.register(
        UserId::new(),
        Some(company),
        UserRole::RegularUser,
        "jti-stalled".into(),
    );
    let mut healthy = broadcaster.register(
        UserId::new(),
        Some(company),
        UserRole::RegularUser,
        "jti-healthy".into(),
    );

    let total = cap + 1;
    let mut healthy_received = 0;
    for _ in 0..total {
        hub.timer_started(running_timer(company, UserId::new()));
        healthy_received += drain_events(&mut healthy).len();
    }

    assert_eq!(healthy_received, total);
    assert_eq!(*stalled.closed.borrow(), Some(CloseReason::SlowConsumer));
    assert_eq!(broadcaster.connection_count(), 1);
    // Everything that fit before the overflow is still deliverable.
    assert_eq!(drain_events(&mut stalled).len(), cap);
}

#[tokio::test]
async fn revoked_token_closes_its_connection_on_the_next_sweep() {
    let broadcaster = Arc::new(Broadcaster::new(16));
    let revocation = RevocationService::new(Arc::new(MemoryKv::new()));
    let company = CompanyId::new();

    let revoked = broadcaster.register(
        UserId::new(),
        Some(company),
        UserRole::RegularUser,
        "jti-revoked".into(),
    );
    let survivor = broadcaster.register(
        UserId::new(),
        Some(company),
        UserRole::RegularUser,
        "jti-live".into(),
    );

    revocation
        .revoke("jti-revoked", Duration::from_secs(900))
        .await
        .unwrap();
    broadcaster
        .heartbeat_sweep(&revocation, Duration::from_secs(90))
        .await;

    assert_eq!(*revoked.closed.borrow(), Some(CloseReason::Revoked));
    assert!(survivor.closed.borrow().is_none());
    assert_eq!(broadcaster.connection_count(), 1);
}

#[tokio::test]
async fn snapshot_after_replace_matches_the_replacement_set() {
    let broadcaster = Arc::new(Broadcaster::new(16));
    let hub = PresenceHub::new(broadcaster.clone());
    let company = CompanyId::new();

    hub.timer_started(running_timer(company, UserId::new()));

    let rebuilt = vec![
        running_timer(company, UserId::new()),
        running_timer(company, UserId::new()),
        running_timer(CompanyId::new(), UserId::new()),
    ];
    hub.replace_all(rebuilt.clone());

    let all = hub.snapshot(CompanyScope::unrestricted(), None);
    assert_eq!(all.len(), rebuilt.len());
    let scoped = hub.snapshot(CompanyScope::company(company), None);
    assert_eq!(scoped.len(), 2);
}
