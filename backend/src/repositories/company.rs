use sqlx::PgPool;

use crate::models::company::Company;
use crate::types::CompanyId;

const SELECT_COLUMNS: &str = "id, slug, name, status, max_users, max_projects, created_at";

pub async fn find_by_id(
    pool: &PgPool,
    company_id: CompanyId,
) -> Result<Option<Company>, sqlx::Error> {
    sqlx::query_as::<_, Company>(&format!(
        "SELECT {SELECT_COLUMNS} FROM companies WHERE id = $1"
    ))
    .bind(company_id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Company>, sqlx::Error> {
    sqlx::query_as::<_, Company>(&format!(
        "SELECT {SELECT_COLUMNS} FROM companies WHERE slug = $1"
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await
}
