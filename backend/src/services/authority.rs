//! Role/tenancy authority predicates. This is the only place that interprets
//! roles; handlers ask questions, they never inspect the role themselves.

use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::models::user::User;
use crate::repositories;
use crate::types::{CompanyId, UserId};

/// Whether the caller may create, mutate, or delete time entries owned by the
/// target user: the user themselves, or an admin of the same company.
/// Super admins cross tenants.
pub fn can_manage_entries_of(
    caller: &User,
    target_user_id: UserId,
    target_company_id: Option<CompanyId>,
) -> bool {
    if caller.id == target_user_id {
        return true;
    }
    if caller.is_super_admin() {
        return true;
    }
    caller.is_admin()
        && caller.company_id.is_some()
        && caller.company_id == target_company_id
}

/// Read authority over another user's entries and presence: management
/// authority, or a team-lead relationship within the same company.
pub async fn can_view_user(
    pool: &DbPool,
    caller: &User,
    target_user_id: UserId,
    target_company_id: Option<CompanyId>,
) -> Result<bool, AppError> {
    if can_manage_entries_of(caller, target_user_id, target_company_id) {
        return Ok(true);
    }
    if caller.company_id != target_company_id {
        return Ok(false);
    }
    let leads = repositories::team::leads_user(pool, caller.id, target_user_id).await?;
    Ok(leads)
}

pub fn require_admin(caller: &User) -> Result<(), AppError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Administrator role required".to_string(),
        ))
    }
}

pub fn require_super_admin(caller: &User) -> Result<(), AppError> {
    if caller.is_super_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Platform administrator role required".to_string(),
        ))
    }
}
