use sqlx::{FromRow, PgPool};

use crate::models::project::Task;
use crate::types::{CompanyId, ProjectId, TeamId};

#[derive(Debug, FromRow)]
/// Project joined with its team's company, for tenancy validation.
pub struct ProjectRef {
    pub id: ProjectId,
    pub team_id: TeamId,
    pub company_id: CompanyId,
    pub name: String,
    pub is_archived: bool,
}

pub async fn find_with_company(
    pool: &PgPool,
    project_id: ProjectId,
) -> Result<Option<ProjectRef>, sqlx::Error> {
    sqlx::query_as::<_, ProjectRef>(
        "SELECT p.id, p.team_id, t.company_id, p.name, p.is_archived \
         FROM projects p \
         JOIN teams t ON t.id = p.team_id \
         WHERE p.id = $1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await
}

pub async fn find_task(
    pool: &PgPool,
    task_id: crate::types::TaskId,
) -> Result<Option<Task>, sqlx::Error> {
    sqlx::query_as::<_, Task>("SELECT id, project_id, name, status FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await
}
