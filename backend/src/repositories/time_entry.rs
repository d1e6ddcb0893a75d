//! Time entry persistence. Start/stop run inside transactions that serialise
//! on the owner's running row; the partial unique index on
//! `(user_id) WHERE end_time IS NULL` backstops the single-timer invariant
//! against concurrent starts.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::time_entry::{ActiveTimerInfo, TimeEntry};
use crate::models::user::CompanyScope;
use crate::types::{ProjectId, TaskId, TimeEntryId, UserId};
use crate::utils::time::duration_seconds;

const SELECT_COLUMNS: &str = "id, user_id, project_id, task_id, description, start_time, \
     end_time, duration_seconds, created_at, updated_at";

const RUNNING_INFO_SELECT: &str = "SELECT te.id AS entry_id, te.user_id, u.company_id, \
     u.name AS user_name, te.project_id, p.name AS project_name, te.task_id, \
     t.name AS task_name, te.description, te.start_time \
     FROM time_entries te \
     JOIN users u ON u.id = te.user_id \
     LEFT JOIN projects p ON p.id = te.project_id \
     LEFT JOIN tasks t ON t.id = te.task_id";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

/// Opens a running entry for the user. Fails with `TimerAlreadyRunning` when
/// one exists; the read locks the running row so concurrent starts serialise,
/// and the unique index catches the race between the read and the insert.
pub async fn start_timer(
    pool: &PgPool,
    user_id: UserId,
    project_id: Option<ProjectId>,
    task_id: Option<TaskId>,
    description: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TimeEntry, AppError> {
    let mut tx = pool.begin().await?;

    let running: Option<(TimeEntryId,)> = sqlx::query_as(
        "SELECT id FROM time_entries WHERE user_id = $1 AND end_time IS NULL FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    if running.is_some() {
        return Err(AppError::TimerAlreadyRunning);
    }

    let entry = sqlx::query_as::<_, TimeEntry>(&format!(
        "INSERT INTO time_entries \
            (id, user_id, project_id, task_id, description, start_time, end_time, duration_seconds, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, NULL, NULL, $7, $7) \
         RETURNING {SELECT_COLUMNS}"
    ))
    .bind(TimeEntryId::new())
    .bind(user_id)
    .bind(project_id)
    .bind(task_id)
    .bind(description)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            AppError::TimerAlreadyRunning
        } else {
            err.into()
        }
    })?;

    tx.commit().await?;
    Ok(entry)
}

/// Closes the user's running entry, persisting the derived duration.
pub async fn stop_timer(
    pool: &PgPool,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<TimeEntry, AppError> {
    let mut tx = pool.begin().await?;

    let running: Option<TimeEntry> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM time_entries \
         WHERE user_id = $1 AND end_time IS NULL FOR UPDATE"
    ))
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(running) = running else {
        return Err(AppError::NoRunningTimer);
    };

    let duration = duration_seconds(running.start_time, now);
    if duration < 0 {
        return Err(AppError::ClockSkew);
    }

    let entry = sqlx::query_as::<_, TimeEntry>(&format!(
        "UPDATE time_entries \
         SET end_time = $1, duration_seconds = $2, updated_at = $1 \
         WHERE id = $3 \
         RETURNING {SELECT_COLUMNS}"
    ))
    .bind(now)
    .bind(duration)
    .bind(running.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(entry)
}

/// Inserts a closed entry covering `[start, end]`.
pub async fn insert_manual(
    pool: &PgPool,
    user_id: UserId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    project_id: Option<ProjectId>,
    task_id: Option<TaskId>,
    description: Option<&str>,
) -> Result<TimeEntry, AppError> {
    let now = Utc::now();
    let entry = sqlx::query_as::<_, TimeEntry>(&format!(
        "INSERT INTO time_entries \
            (id, user_id, project_id, task_id, description, start_time, end_time, duration_seconds, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
         RETURNING {SELECT_COLUMNS}"
    ))
    .bind(TimeEntryId::new())
    .bind(user_id)
    .bind(project_id)
    .bind(task_id)
    .bind(description)
    .bind(start)
    .bind(end)
    .bind(duration_seconds(start, end))
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(entry)
}

pub async fn find_by_id(
    pool: &PgPool,
    entry_id: TimeEntryId,
) -> Result<Option<TimeEntry>, sqlx::Error> {
    sqlx::query_as::<_, TimeEntry>(&format!(
        "SELECT {SELECT_COLUMNS} FROM time_entries WHERE id = $1"
    ))
    .bind(entry_id)
    .fetch_optional(pool)
    .await
}

/// Persists a fully patched entry. When the patch leaves the entry running,
/// the transaction re-asserts the single-timer invariant before writing.
pub async fn apply_update(pool: &PgPool, entry: &TimeEntry) -> Result<TimeEntry, AppError> {
    let mut tx = pool.begin().await?;

    if entry.end_time.is_none() {
        let other_running: Option<(TimeEntryId,)> = sqlx::query_as(
            "SELECT id FROM time_entries \
             WHERE user_id = $1 AND end_time IS NULL AND id <> $2 FOR UPDATE",
        )
        .bind(entry.user_id)
        .bind(entry.id)
        .fetch_optional(&mut *tx)
        .await?;
        if other_running.is_some() {
            return Err(AppError::TimerAlreadyRunning);
        }
    }

    let updated = sqlx::query_as::<_, TimeEntry>(&format!(
        "UPDATE time_entries \
         SET project_id = $2, task_id = $3, description = $4, start_time = $5, \
             end_time = $6, duration_seconds = $7, updated_at = $8 \
         WHERE id = $1 \
         RETURNING {SELECT_COLUMNS}"
    ))
    .bind(entry.id)
    .bind(entry.project_id)
    .bind(entry.task_id)
    .bind(&entry.description)
    .bind(entry.start_time)
    .bind(entry.end_time)
    .bind(entry.duration_seconds)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            AppError::TimerAlreadyRunning
        } else {
            AppError::from(err)
        }
    })?;

    tx.commit().await?;
    Ok(updated)
}

pub async fn delete(pool: &PgPool, entry_id: TimeEntryId) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM time_entries WHERE id = $1")
        .bind(entry_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Whether a closed entry of the user overlaps `[start, end]` by more than
/// `tolerance_seconds`. Feeds the create-manual warning, never an error.
pub async fn overlapping_closed_exists(
    pool: &PgPool,
    user_id: UserId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tolerance_seconds: i64,
    exclude: Option<TimeEntryId>,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS ( \
            SELECT 1 FROM time_entries \
            WHERE user_id = $1 \
              AND end_time IS NOT NULL \
              AND ($5::uuid IS NULL OR id <> $5) \
              AND start_time < $3 AND end_time > $2 \
              AND EXTRACT(EPOCH FROM (LEAST(end_time, $3) - GREATEST(start_time, $2))) > $4 \
         )",
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .bind(tolerance_seconds as f64)
    .bind(exclude)
    .fetch_one(pool)
    .await
}

#[derive(Debug, Default)]
pub struct EntryFilters {
    pub user_id: Option<UserId>,
    pub project_id: Option<ProjectId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Scoped, filtered, paged listing. The tenancy predicate is part of the
/// query itself, not post-filtering.
pub async fn list_scoped(
    pool: &PgPool,
    scope: CompanyScope,
    filters: &EntryFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<TimeEntry>, i64), sqlx::Error> {
    let entries = sqlx::query_as::<_, TimeEntry>(&format!(
        "SELECT te.{} FROM time_entries te \
         JOIN users u ON u.id = te.user_id \
         WHERE ($1::uuid IS NULL OR u.company_id = $1) \
           AND ($2::uuid IS NULL OR te.user_id = $2) \
           AND ($3::uuid IS NULL OR te.project_id = $3) \
           AND ($4::timestamptz IS NULL OR te.start_time >= $4) \
           AND ($5::timestamptz IS NULL OR te.start_time <= $5) \
         ORDER BY te.start_time DESC, te.id DESC \
         LIMIT $6 OFFSET $7",
        SELECT_COLUMNS.replace(", ", ", te.")
    ))
    .bind(scope.company_id())
    .bind(filters.user_id)
    .bind(filters.project_id)
    .bind(filters.from)
    .bind(filters.to)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM time_entries te \
         JOIN users u ON u.id = te.user_id \
         WHERE ($1::uuid IS NULL OR u.company_id = $1) \
           AND ($2::uuid IS NULL OR te.user_id = $2) \
           AND ($3::uuid IS NULL OR te.project_id = $3) \
           AND ($4::timestamptz IS NULL OR te.start_time >= $4) \
           AND ($5::timestamptz IS NULL OR te.start_time <= $5)",
    )
    .bind(scope.company_id())
    .bind(filters.user_id)
    .bind(filters.project_id)
    .bind(filters.from)
    .bind(filters.to)
    .fetch_one(pool)
    .await?;

    Ok((entries, total))
}

/// Denormalized view of one running entry, for presence updates after a
/// start commits.
pub async fn running_info_for(
    pool: &PgPool,
    entry_id: TimeEntryId,
) -> Result<Option<ActiveTimerInfo>, sqlx::Error> {
    sqlx::query_as::<_, ActiveTimerInfo>(&format!(
        "{RUNNING_INFO_SELECT} WHERE te.id = $1 AND te.end_time IS NULL AND u.company_id IS NOT NULL"
    ))
    .bind(entry_id)
    .fetch_optional(pool)
    .await
}

/// All running entries, for the presence hub reload.
pub async fn running_timer_infos(pool: &PgPool) -> Result<Vec<ActiveTimerInfo>, sqlx::Error> {
    sqlx::query_as::<_, ActiveTimerInfo>(&format!(
        "{RUNNING_INFO_SELECT} WHERE te.end_time IS NULL AND u.company_id IS NOT NULL \
         ORDER BY te.start_time"
    ))
    .fetch_all(pool)
    .await
}
