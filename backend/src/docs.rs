use axum::Json;
use utoipa::OpenApi;

use crate::models::{company, project, session, team, time_entry, user};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "tempo API",
        description = "Multi-tenant time tracking: timers, manual entries, presence, and the realtime channel."
    ),
    components(schemas(
        user::UserResponse,
        user::UserRole,
        user::LoginRequest,
        user::LoginResponse,
        user::RefreshRequest,
        user::LogoutRequest,
        user::CreateUserRequest,
        company::CompanyStatus,
        team::TeamRole,
        project::TaskStatus,
        session::SessionResponse,
        time_entry::TimeEntryResponse,
        time_entry::CreateManualRequest,
        time_entry::CreateManualResponse,
        time_entry::StartTimerRequest,
        time_entry::StopTimerRequest,
        time_entry::UpdateEntryRequest,
        time_entry::ActiveTimerInfo,
        time_entry::PagedEntries,
    ))
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
