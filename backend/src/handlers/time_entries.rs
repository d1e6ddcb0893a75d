use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::error::AppError;
use crate::middleware::auth::AuthedUser;
use crate::models::time_entry::{
    ActiveTimerInfo, CreateManualRequest, CreateManualResponse, ListEntriesQuery, PagedEntries,
    StartTimerRequest, StopTimerRequest, TimeEntry, TimeEntryResponse, UpdateEntryRequest,
};
use crate::models::user::User;
use crate::repositories::{self, time_entry::EntryFilters};
use crate::services::authority;
use crate::state::AppState;
use crate::types::{ProjectId, TaskId, TeamId, UserId};
use crate::utils::time::duration_seconds;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

/// Resolves the user a timer operation targets. Omitted means the caller;
/// anyone else requires management authority and must be visible under the
/// caller's scope.
async fn resolve_target(
    state: &AppState,
    authed: &AuthedUser,
    requested: Option<UserId>,
) -> Result<User, AppError> {
    let target_id = match requested {
        None => return Ok(authed.user.clone()),
        Some(id) if id == authed.user.id => return Ok(authed.user.clone()),
        Some(id) => id,
    };

    let target = repositories::user::find_scoped(&state.pool, target_id, authed.scope)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    if !authority::can_manage_entries_of(&authed.user, target.id, target.company_id) {
        return Err(AppError::Forbidden(
            "No authority over this user's entries".to_string(),
        ));
    }
    if !target.is_active {
        return Err(AppError::InvariantViolation(
            "User is deactivated".to_string(),
        ));
    }
    Ok(target)
}

/// Validates the project/task references against the entry owner's company.
/// A cross-company project is reported as absent, not as forbidden.
async fn validate_refs(
    state: &AppState,
    owner: &User,
    project_id: Option<ProjectId>,
    task_id: Option<TaskId>,
) -> Result<(), AppError> {
    let project = match project_id {
        Some(project_id) => {
            let project = repositories::project::find_with_company(&state.pool, project_id)
                .await?
                .filter(|p| owner.company_id == Some(p.company_id))
                .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;
            if project.is_archived {
                return Err(AppError::InvariantViolation(
                    "Project is archived".to_string(),
                ));
            }
            Some(project)
        }
        None => None,
    };

    if let Some(task_id) = task_id {
        let Some(project) = project else {
            return Err(AppError::InvariantViolation(
                "A task requires its project".to_string(),
            ));
        };
        let task = repositories::project::find_task(&state.pool, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Task not found".to_string()))?;
        if task.project_id != project.id {
            return Err(AppError::InvariantViolation(
                "Task does not belong to the given project".to_string(),
            ));
        }
    }

    Ok(())
}

/// Post-commit presence update for a freshly started timer. The work runs on
/// its own task so a client disconnect cannot cancel it once the transaction
/// has committed; a failed lookup only costs the live update, which the
/// periodic reload repairs.
async fn announce_started(state: &AppState, entry: &TimeEntry) {
    let task_state = state.clone();
    let entry_id = entry.id;
    let announce = tokio::spawn(async move {
        match repositories::time_entry::running_info_for(&task_state.pool, entry_id).await {
            Ok(Some(info)) => task_state.presence.timer_started(info),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%entry_id, "presence update skipped: {err:#}")
            }
        }
    });
    let _ = announce.await;
}

pub async fn start_timer(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Json(payload): Json<StartTimerRequest>,
) -> Result<Json<TimeEntryResponse>, AppError> {
    let target = resolve_target(&state, &authed, payload.user_id).await?;
    validate_refs(&state, &target, payload.project_id, payload.task_id).await?;

    let entry = repositories::time_entry::start_timer(
        &state.pool,
        target.id,
        payload.project_id,
        payload.task_id,
        payload.description.as_deref(),
        Utc::now(),
    )
    .await?;

    announce_started(&state, &entry).await;
    Ok(Json(entry.into()))
}

pub async fn stop_timer(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    payload: Option<Json<StopTimerRequest>>,
) -> Result<Json<TimeEntryResponse>, AppError> {
    let requested = payload.and_then(|Json(p)| p.user_id);
    let target = resolve_target(&state, &authed, requested).await?;

    let entry = repositories::time_entry::stop_timer(&state.pool, target.id, Utc::now()).await?;

    let response = TimeEntryResponse::from(entry);
    if let Some(company_id) = target.company_id {
        state.presence.timer_stopped(company_id, response.clone());
    }
    Ok(Json(response))
}

pub async fn create_manual(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Json(payload): Json<CreateManualRequest>,
) -> Result<Json<CreateManualResponse>, AppError> {
    if payload.end < payload.start {
        return Err(AppError::InvariantViolation(
            "end must not precede start".to_string(),
        ));
    }

    let target = resolve_target(&state, &authed, payload.user_id).await?;
    validate_refs(&state, &target, payload.project_id, payload.task_id).await?;

    let entry = repositories::time_entry::insert_manual(
        &state.pool,
        target.id,
        payload.start,
        payload.end,
        payload.project_id,
        payload.task_id,
        payload.description.as_deref(),
    )
    .await?;

    // Emit before any further await: once the insert commits, the event must
    // not be lost to a client disconnect.
    let response = TimeEntryResponse::from(entry);
    if let Some(company_id) = target.company_id {
        state.presence.entry_created(company_id, response.clone());
    }

    let mut warnings = Vec::new();
    let overlaps = repositories::time_entry::overlapping_closed_exists(
        &state.pool,
        target.id,
        payload.start,
        payload.end,
        state.config.overlap_tolerance_seconds,
        Some(response.id),
    )
    .await?;
    if overlaps {
        warnings.push("range overlaps an existing closed entry".to_string());
    }

    Ok(Json(CreateManualResponse {
        entry: response,
        warnings,
    }))
}

/// Loads an entry together with its owner, enforcing scope visibility.
async fn load_entry_and_owner(
    state: &AppState,
    authed: &AuthedUser,
    entry_id: crate::types::TimeEntryId,
) -> Result<(TimeEntry, User), AppError> {
    let entry = repositories::time_entry::find_by_id(&state.pool, entry_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Time entry not found".to_string()))?;
    let owner = repositories::user::find_by_id(&state.pool, entry.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Time entry not found".to_string()))?;
    if !authed.scope.permits(owner.company_id) {
        return Err(AppError::NotFound("Time entry not found".to_string()));
    }
    Ok((entry, owner))
}

pub async fn update_entry(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Path(entry_id): Path<crate::types::TimeEntryId>,
    Json(patch): Json<UpdateEntryRequest>,
) -> Result<Json<TimeEntryResponse>, AppError> {
    let (entry, owner) = load_entry_and_owner(&state, &authed, entry_id).await?;
    if !authority::can_manage_entries_of(&authed.user, owner.id, owner.company_id) {
        return Err(AppError::Forbidden(
            "No authority over this entry".to_string(),
        ));
    }

    let was_running = entry.is_running();
    let mut candidate = entry;
    if let Some(project_id) = patch.project_id {
        candidate.project_id = project_id;
        if project_id.is_none() {
            candidate.task_id = None;
        }
    }
    if let Some(task_id) = patch.task_id {
        candidate.task_id = task_id;
    }
    if let Some(description) = patch.description {
        candidate.description = description;
    }
    if let Some(start_time) = patch.start_time {
        candidate.start_time = start_time;
    }
    if let Some(end_time) = patch.end_time {
        candidate.end_time = end_time;
    }

    if let Some(end) = candidate.end_time {
        let duration = duration_seconds(candidate.start_time, end);
        if duration < 0 {
            return Err(AppError::InvariantViolation(
                "end must not precede start".to_string(),
            ));
        }
        candidate.duration_seconds = Some(duration);
    } else {
        candidate.duration_seconds = None;
    }

    validate_refs(&state, &owner, candidate.project_id, candidate.task_id).await?;

    let updated = repositories::time_entry::apply_update(&state.pool, &candidate).await?;
    let is_running = updated.is_running();
    let response = TimeEntryResponse::from(updated);

    // Post-commit events run on their own task so they survive a client
    // disconnect; the handler still waits for them on the happy path.
    if let Some(company_id) = owner.company_id {
        let task_state = state.clone();
        let task_response = response.clone();
        let events = tokio::spawn(async move {
            let refreshed_timer: Option<ActiveTimerInfo> = if is_running {
                repositories::time_entry::running_info_for(&task_state.pool, task_response.id)
                    .await
                    .ok()
                    .flatten()
            } else {
                None
            };
            task_state.presence.entry_updated(
                company_id,
                task_response.clone(),
                refreshed_timer.clone(),
            );
            match (was_running, is_running) {
                // The patch stopped the running timer.
                (true, false) => task_state
                    .presence
                    .timer_stopped(company_id, task_response),
                // The patch re-opened a closed entry.
                (false, true) => {
                    if let Some(info) = refreshed_timer {
                        task_state.presence.timer_started(info);
                    }
                }
                _ => {}
            }
        });
        let _ = events.await;
    }

    Ok(Json(response))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Path(entry_id): Path<crate::types::TimeEntryId>,
) -> Result<Json<Value>, AppError> {
    let (entry, owner) = load_entry_and_owner(&state, &authed, entry_id).await?;
    if !authority::can_manage_entries_of(&authed.user, owner.id, owner.company_id) {
        return Err(AppError::Forbidden(
            "No authority over this entry".to_string(),
        ));
    }

    let deleted = repositories::time_entry::delete(&state.pool, entry.id).await?;
    if !deleted {
        return Err(AppError::NotFound("Time entry not found".to_string()));
    }

    if let Some(company_id) = owner.company_id {
        state
            .presence
            .entry_deleted(company_id, owner.id, entry.id);
    }
    Ok(Json(json!({})))
}

pub async fn list_entries(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Query(query): Query<ListEntriesQuery>,
) -> Result<Json<PagedEntries>, AppError> {
    // Admins browse their whole scope; everyone else is limited to
    // themselves, or to users they lead when an explicit filter names one.
    let user_filter = if authed.user.is_admin() {
        query.user_id
    } else {
        match query.user_id {
            None => Some(authed.user.id),
            Some(requested) if requested == authed.user.id => Some(requested),
            Some(requested) => {
                let target = repositories::user::find_scoped(&state.pool, requested, authed.scope)
                    .await?
                    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
                let visible = authority::can_view_user(
                    &state.pool,
                    &authed.user,
                    target.id,
                    target.company_id,
                )
                .await?;
                if !visible {
                    return Err(AppError::Forbidden(
                        "No authority over this user's entries".to_string(),
                    ));
                }
                Some(requested)
            }
        }
    };

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let filters = EntryFilters {
        user_id: user_filter,
        project_id: query.project_id,
        from: query.from,
        to: query.to,
    };
    let (entries, total) = repositories::time_entry::list_scoped(
        &state.pool,
        authed.scope,
        &filters,
        per_page as i64,
        ((page - 1) * per_page) as i64,
    )
    .await?;

    Ok(Json(PagedEntries {
        entries: entries.into_iter().map(TimeEntryResponse::from).collect(),
        page,
        per_page,
        total,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ActiveTimersQuery {
    #[serde(default)]
    pub team_id: Option<TeamId>,
}

/// HTTP snapshot of the presence hub, scoped to the caller's company and
/// optionally narrowed to one team.
pub async fn active_timers(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Query(query): Query<ActiveTimersQuery>,
) -> Result<Json<Vec<ActiveTimerInfo>>, AppError> {
    let user_filter: Option<HashSet<UserId>> = match query.team_id {
        Some(team_id) => {
            let team = repositories::team::find_by_id(&state.pool, team_id)
                .await?
                .filter(|team| authed.scope.permits(Some(team.company_id)))
                .ok_or_else(|| AppError::NotFound("Team not found".to_string()))?;
            let members = repositories::team::member_ids(&state.pool, team.id).await?;
            Some(members.into_iter().collect())
        }
        None => None,
    };

    let timers = state.presence.snapshot(authed.scope, user_filter.as_ref());
    Ok(Json(timers))
}
