//! Team and membership models.

use crate::types::{CompanyId, TeamId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// A team scoped to exactly one company.
pub struct Team {
    pub id: TeamId,
    pub company_id: CompanyId,
    pub owner_user_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Membership row; compound key `(team_id, user_id)`.
pub struct TeamMember {
    pub team_id: TeamId,
    pub user_id: UserId,
    pub role_in_team: TeamRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Owner,
    Admin,
    Member,
}
