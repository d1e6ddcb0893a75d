#![allow(dead_code)]

use std::env;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tower::ServiceExt;
use uuid::Uuid;

use tempo_backend::{
    config::Config,
    models::user::{User, UserRole},
    services::kv::MemoryKv,
    state::AppState,
    types::{CompanyId, ProjectId, TaskId, TeamId, UserId},
    utils::jwt::issue_pair,
    utils::password::hash_password,
};

/// Store-backed tests opt in through TEST_DATABASE_URL and skip silently
/// when it is absent, so the suite stays green on machines without Postgres.
pub async fn db_pool() -> Option<PgPool> {
    let Ok(url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping store-backed test");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("connect to TEST_DATABASE_URL");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(pool)
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        redis_url: None,
        redis_pool_size: 1,
        redis_connect_timeout: 1,
        signing_key: "integration-test-signing-key-0123456789".to_string(),
        access_ttl_seconds: 900,
        refresh_ttl_seconds: 604_800,
        // Generous budgets: rate limiting has dedicated tests and must not
        // interfere with the rest of the suite.
        rate_limit_general_per_min: 100_000,
        rate_limit_auth_per_min: 100_000,
        login_lock_threshold: 5,
        login_lock_window_seconds: 900,
        ws_idle_timeout_seconds: 90,
        ws_heartbeat_seconds: 30,
        ws_outbound_queue_cap: 256,
        presence_reload_seconds: 0,
        password_min_length: 12,
        overlap_tolerance_seconds: 0,
        cors_allow_origins: vec!["http://localhost:8000".to_string()],
        bind_addr: "127.0.0.1:0".to_string(),
    }
}

pub fn test_state(pool: PgPool) -> AppState {
    AppState::assemble(pool, Arc::new(MemoryKv::new()), test_config())
}

pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

pub async fn create_company(pool: &PgPool, slug_prefix: &str) -> CompanyId {
    let id = CompanyId::new();
    sqlx::query(
        "INSERT INTO companies (id, slug, name, status, max_users, max_projects) \
         VALUES ($1, $2, $3, 'active', 100, 50)",
    )
    .bind(id)
    .bind(unique(slug_prefix))
    .bind(slug_prefix)
    .execute(pool)
    .await
    .expect("insert company");
    id
}

pub async fn create_user(
    pool: &PgPool,
    company_id: Option<CompanyId>,
    role: UserRole,
    password: &str,
) -> User {
    let user = User::new(
        company_id,
        format!("{}@example.com", unique("user")),
        hash_password(password).expect("hash fixture password"),
        "Fixture User".to_string(),
        role,
    );
    tempo_backend::repositories::user::insert(pool, &user)
        .await
        .expect("insert user")
}

pub async fn create_team(pool: &PgPool, company_id: CompanyId, owner: UserId) -> TeamId {
    let id = TeamId::new();
    sqlx::query("INSERT INTO teams (id, company_id, owner_user_id, name) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(company_id)
        .bind(owner)
        .bind(unique("team"))
        .execute(pool)
        .await
        .expect("insert team");
    id
}

pub async fn add_team_member(pool: &PgPool, team_id: TeamId, user_id: UserId, role: &str) {
    sqlx::query(
        "INSERT INTO team_members (team_id, user_id, role_in_team) VALUES ($1, $2, $3)",
    )
    .bind(team_id)
    .bind(user_id)
    .bind(role)
    .execute(pool)
    .await
    .expect("insert team member");
}

pub async fn create_project(pool: &PgPool, team_id: TeamId) -> ProjectId {
    let id = ProjectId::new();
    sqlx::query("INSERT INTO projects (id, team_id, name, is_archived) VALUES ($1, $2, $3, FALSE)")
        .bind(id)
        .bind(team_id)
        .bind(unique("project"))
        .execute(pool)
        .await
        .expect("insert project");
    id
}

pub async fn create_task(pool: &PgPool, project_id: ProjectId) -> TaskId {
    let id = TaskId::new();
    sqlx::query("INSERT INTO tasks (id, project_id, name, status) VALUES ($1, $2, $3, 'TODO')")
        .bind(id)
        .bind(project_id)
        .bind(unique("task"))
        .execute(pool)
        .await
        .expect("insert task");
    id
}

/// Access token for a fixture user, bypassing the login endpoint.
pub fn access_token(state: &AppState, user: &User) -> String {
    issue_pair(
        user,
        &state.config.signing_key,
        state.config.access_ttl_seconds,
        state.config.refresh_ttl_seconds,
    )
    .expect("issue token pair")
    .access
}

pub async fn send_request(
    router: &Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request"),
        None => builder.body(Body::empty()).expect("build request"),
    };

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("dispatch request");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}
