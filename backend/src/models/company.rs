//! Tenant models.

use crate::types::CompanyId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Tenancy root. Every non-platform entity traces back to one company.
pub struct Company {
    pub id: CompanyId,
    /// URL-safe unique identifier used in invitations and branding lookups.
    pub slug: String,
    pub name: String,
    pub status: CompanyStatus,
    /// Seat limit enforced when admins create users.
    pub max_users: i32,
    /// Project limit enforced when projects are created.
    pub max_projects: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    Active,
    Trial,
    Suspended,
    Cancelled,
}

impl Company {
    /// Suspended and cancelled tenants cannot authenticate or mutate data.
    pub fn is_operational(&self) -> bool {
        matches!(self.status, CompanyStatus::Active | CompanyStatus::Trial)
    }
}
