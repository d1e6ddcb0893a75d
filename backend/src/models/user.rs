//! Models that represent users, authentication payloads, and role metadata.

use crate::types::{CompanyId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Database representation of an authenticated user account.
pub struct User {
    /// Unique identifier for the user.
    pub id: UserId,
    /// Tenant the user belongs to. `None` only for super admins.
    pub company_id: Option<CompanyId>,
    /// Unique email used for login.
    pub email: String,
    /// Argon2 hash of the user's password.
    pub password_hash: String,
    /// Human-readable display name.
    pub name: String,
    /// Role describing the user's privileges.
    pub role: UserRole,
    /// Soft-deactivation flag; inactive users cannot authenticate.
    pub is_active: bool,
    /// Creation timestamp for auditing.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp for auditing.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, ToSchema, Default)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
/// Supported user roles stored in the database.
pub enum UserRole {
    /// Platform operator; crosses tenants, has no company of its own.
    SuperAdmin,
    /// Company-scoped administrator.
    Admin,
    /// Company-scoped administrator created through the company console.
    CompanyAdmin,
    /// Lead of one or more teams; read authority over their members.
    TeamLead,
    /// Standard user with authority over their own entries only.
    #[default]
    RegularUser,
}

impl UserRole {
    /// Returns the canonical snake_case representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::SuperAdmin => "super_admin",
            UserRole::Admin => "admin",
            UserRole::CompanyAdmin => "company_admin",
            UserRole::TeamLead => "team_lead",
            UserRole::RegularUser => "regular_user",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "super_admin" => Some(UserRole::SuperAdmin),
            "admin" => Some(UserRole::Admin),
            "company_admin" => Some(UserRole::CompanyAdmin),
            "team_lead" => Some(UserRole::TeamLead),
            "regular_user" => Some(UserRole::RegularUser),
            _ => None,
        }
    }

    /// Roles allowed to run admin-only operations within their company.
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            UserRole::SuperAdmin | UserRole::Admin | UserRole::CompanyAdmin
        )
    }

    pub fn is_super_admin(&self) -> bool {
        matches!(self, UserRole::SuperAdmin)
    }
}

impl Serialize for UserRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UserRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        UserRole::parse(&s).ok_or_else(|| {
            serde::de::Error::unknown_variant(
                &s,
                &[
                    "super_admin",
                    "admin",
                    "company_admin",
                    "team_lead",
                    "regular_user",
                ],
            )
        })
    }
}

/// Tenancy filter derived from the caller's identity. Applied to every store
/// query; `unrestricted` exists only for super admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompanyScope(Option<CompanyId>);

impl CompanyScope {
    pub fn unrestricted() -> Self {
        Self(None)
    }

    pub fn company(id: CompanyId) -> Self {
        Self(Some(id))
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.0
    }

    pub fn is_unrestricted(&self) -> bool {
        self.0.is_none()
    }

    /// Whether an entity belonging to `company_id` is visible under this scope.
    pub fn permits(&self, company_id: Option<CompanyId>) -> bool {
        match self.0 {
            None => true,
            Some(scope) => company_id == Some(scope),
        }
    }
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn is_super_admin(&self) -> bool {
        self.role.is_super_admin()
    }

    /// Derives the tenancy scope applied to every query this user issues.
    pub fn company_scope(&self) -> CompanyScope {
        match (self.role, self.company_id) {
            (UserRole::SuperAdmin, _) => CompanyScope::unrestricted(),
            (_, Some(company_id)) => CompanyScope::company(company_id),
            // Non-super-admin accounts always carry a company id; an account
            // that lost it is treated as seeing nothing rather than everything.
            (_, None) => CompanyScope::company(CompanyId::from_uuid(uuid::Uuid::nil())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
/// Credentials submitted by a user attempting to authenticate.
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Default)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Authentication tokens returned after a successful login or refresh.
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
/// Payload for creating a new user account (admin only).
pub struct CreateUserRequest {
    #[validate(email)]
    pub email: String,
    pub password: String,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub role: UserRole,
    /// Target company; only honoured for super-admin callers, everyone else
    /// creates inside their own company.
    #[serde(default)]
    pub company_id: Option<CompanyId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
/// Public-facing representation of a user returned by the API.
pub struct UserResponse {
    pub id: UserId,
    pub company_id: Option<CompanyId>,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            company_id: user.company_id,
            email: user.email,
            name: user.name,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

impl User {
    /// Constructs a new user with freshly generated identifiers.
    pub fn new(
        company_id: Option<CompanyId>,
        email: String,
        password_hash: String,
        name: String,
        role: UserRole,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            company_id,
            email,
            password_hash,
            name,
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
