//! Time entry models: the core of the temporal state engine.

use crate::types::{CompanyId, ProjectId, TaskId, TimeEntryId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Persistent record of tracked time. A row with `end_time = NULL` is the
/// user's single running timer.
pub struct TimeEntry {
    pub id: TimeEntryId,
    pub user_id: UserId,
    pub project_id: Option<ProjectId>,
    pub task_id: Option<TaskId>,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Persisted at stop/update time to keep aggregation queries index-friendly.
    pub duration_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeEntry {
    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }

    /// Whole seconds between start and end; `None` while running.
    pub fn computed_duration_seconds(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_seconds())
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Default)]
/// Payload for starting a timer. `user_id` lets a same-company admin start a
/// timer on behalf of another user; omitted means the caller themselves.
pub struct StartTimerRequest {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Default)]
pub struct StopTimerRequest {
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Payload for recording a closed range after the fact.
pub struct CreateManualRequest {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Deserializes a present-but-possibly-null field into `Some(inner)`, so a
/// patch can distinguish "leave unchanged" (absent) from "clear" (null).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Default)]
/// Patch for an existing entry.
pub struct UpdateEntryRequest {
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub project_id: Option<Option<ProjectId>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub task_id: Option<Option<TaskId>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
/// API representation of a time entry; `is_running` is derived.
pub struct TimeEntryResponse {
    pub id: TimeEntryId,
    pub user_id: UserId,
    pub project_id: Option<ProjectId>,
    pub task_id: Option<TaskId>,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub is_running: bool,
}

impl From<TimeEntry> for TimeEntryResponse {
    fn from(entry: TimeEntry) -> Self {
        let is_running = entry.is_running();
        TimeEntryResponse {
            id: entry.id,
            user_id: entry.user_id,
            project_id: entry.project_id,
            task_id: entry.task_id,
            description: entry.description,
            start_time: entry.start_time,
            end_time: entry.end_time,
            duration_seconds: entry.duration_seconds,
            is_running,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Create-manual response; overlaps with closed entries are flagged, never
/// rejected.
pub struct CreateManualResponse {
    #[serde(flatten)]
    pub entry: TimeEntryResponse,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema, PartialEq)]
/// Denormalized view of a running timer held by the presence hub and pushed
/// over real-time connections.
pub struct ActiveTimerInfo {
    pub entry_id: TimeEntryId,
    pub user_id: UserId,
    pub company_id: CompanyId,
    pub user_name: String,
    pub project_id: Option<ProjectId>,
    pub project_name: Option<String>,
    pub task_id: Option<TaskId>,
    pub task_name: Option<String>,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
/// Filters for `GET /api/time`.
pub struct ListEntriesQuery {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PagedEntries {
    pub entries: Vec<TimeEntryResponse>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> TimeEntry {
        TimeEntry {
            id: TimeEntryId::new(),
            user_id: UserId::new(),
            project_id: None,
            task_id: None,
            description: None,
            start_time: start,
            end_time: end,
            duration_seconds: end.map(|e| (e - start).num_seconds()),
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn running_state_is_derived_from_end_time() {
        let now = Utc::now();
        assert!(entry(now, None).is_running());
        assert!(!entry(now, Some(now + Duration::seconds(10))).is_running());
    }

    #[test]
    fn computed_duration_matches_to_the_second() {
        let start = Utc::now();
        let closed = entry(start, Some(start + Duration::seconds(125)));
        assert_eq!(closed.computed_duration_seconds(), Some(125));
        assert_eq!(closed.duration_seconds, Some(125));
    }

    #[test]
    fn update_patch_distinguishes_absent_from_null() {
        let patch: UpdateEntryRequest =
            serde_json::from_str(r#"{"project_id": null, "description": "x"}"#).unwrap();
        assert_eq!(patch.project_id, Some(None));
        assert_eq!(patch.description, Some(Some("x".to_string())));
        assert!(patch.task_id.is_none());
        assert!(patch.end_time.is_none());
    }

    #[test]
    fn response_flags_running_entries() {
        let now = Utc::now();
        let response: TimeEntryResponse = entry(now, None).into();
        assert!(response.is_running);
        assert_eq!(response.duration_seconds, None);
    }
}
