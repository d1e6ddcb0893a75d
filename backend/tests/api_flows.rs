//! End-to-end request flows through the full router: login and lockout,
//! refresh rotation, timer lifecycle, and tenancy isolation. Skipped without
//! TEST_DATABASE_URL.

mod support;

use axum::http::StatusCode;
use serde_json::json;

use tempo_backend::app::build_router;
use tempo_backend::models::user::UserRole;

#[tokio::test]
async fn login_lockout_engages_after_failed_attempts() {
    let Some(pool) = support::db_pool().await else {
        return;
    };
    let state = support::test_state(pool.clone());
    let router = build_router(state.clone());

    let company = support::create_company(&pool, "acme").await;
    let password = "Str0ng&Pass!word";
    let user = support::create_user(&pool, Some(company), UserRole::RegularUser, password).await;

    for _ in 0..5 {
        let (status, _) = support::send_request(
            &router,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": user.email, "password": "wrong-password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Locked: even the correct password is refused, with a retry hint.
    let (status, body) = support::send_request(
        &router,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": user.email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "ACCOUNT_LOCKED");
    assert!(body["details"]["retry_after"].as_u64().unwrap_or(0) > 0);
}

#[tokio::test]
async fn successful_login_returns_a_working_pair() {
    let Some(pool) = support::db_pool().await else {
        return;
    };
    let state = support::test_state(pool.clone());
    let router = build_router(state.clone());

    let company = support::create_company(&pool, "acme").await;
    let password = "Str0ng&Pass!word";
    let user = support::create_user(&pool, Some(company), UserRole::RegularUser, password).await;

    let (status, body) = support::send_request(
        &router,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": user.email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = body["access_token"].as_str().expect("access token");
    assert_eq!(body["user"]["id"], json!(user.id));

    let (status, me) = support::send_request(&router, "GET", "/auth/me", Some(access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], json!(user.email));
}

#[tokio::test]
async fn refresh_rotation_rejects_the_old_token() {
    let Some(pool) = support::db_pool().await else {
        return;
    };
    let state = support::test_state(pool.clone());
    let router = build_router(state.clone());

    let company = support::create_company(&pool, "acme").await;
    let password = "Str0ng&Pass!word";
    let user = support::create_user(&pool, Some(company), UserRole::RegularUser, password).await;

    let (_, login) = support::send_request(
        &router,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": user.email, "password": password })),
    )
    .await;
    let r1 = login["refresh_token"].as_str().expect("refresh token");

    let (status, rotated) = support::send_request(
        &router,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({ "refresh_token": r1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let r2 = rotated["refresh_token"].as_str().expect("rotated token");
    assert_ne!(r1, r2);

    // Replaying the superseded token fails; the replacement still works.
    let (status, _) = support::send_request(
        &router,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({ "refresh_token": r1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = support::send_request(
        &router,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({ "refresh_token": r2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn timer_lifecycle_over_http() {
    let Some(pool) = support::db_pool().await else {
        return;
    };
    let state = support::test_state(pool.clone());
    let router = build_router(state.clone());

    let company = support::create_company(&pool, "acme").await;
    let user = support::create_user(&pool, Some(company), UserRole::RegularUser, "Str0ng&Pass!word").await;
    let lead = support::create_user(&pool, Some(company), UserRole::TeamLead, "Str0ng&Pass!word").await;
    let team = support::create_team(&pool, company, lead.id).await;
    let project = support::create_project(&pool, team).await;
    let token = support::access_token(&state, &user);

    let (status, started) = support::send_request(
        &router,
        "POST",
        "/time/start",
        Some(&token),
        Some(json!({ "project_id": project, "description": "deep work" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["is_running"], json!(true));

    // Presence reflects the running timer immediately after the commit.
    let (status, active) =
        support::send_request(&router, "GET", "/time/active", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(active
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t["user_id"] == json!(user.id)));

    // A second start conflicts while the first is running.
    let (status, conflict) =
        support::send_request(&router, "POST", "/time/start", Some(&token), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["code"], "TIMER_ALREADY_RUNNING");

    let (status, stopped) =
        support::send_request(&router, "POST", "/time/stop", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["is_running"], json!(false));
    assert!(stopped["duration_seconds"].as_i64().unwrap_or(-1) >= 0);

    let (_, active_after) =
        support::send_request(&router, "GET", "/time/active", Some(&token), None).await;
    assert!(active_after
        .as_array()
        .unwrap()
        .iter()
        .all(|t| t["user_id"] != json!(user.id)));
}

#[tokio::test]
async fn active_timers_respect_tenant_boundaries() {
    let Some(pool) = support::db_pool().await else {
        return;
    };
    let state = support::test_state(pool.clone());
    let router = build_router(state.clone());

    let company_a = support::create_company(&pool, "tenant-a").await;
    let company_b = support::create_company(&pool, "tenant-b").await;
    let worker_a = support::create_user(&pool, Some(company_a), UserRole::RegularUser, "Str0ng&Pass!word").await;
    let admin_b = support::create_user(&pool, Some(company_b), UserRole::Admin, "Str0ng&Pass!word").await;

    let token_a = support::access_token(&state, &worker_a);
    let (status, _) =
        support::send_request(&router, "POST", "/time/start", Some(&token_a), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    // An admin of company B cannot see company A's presence.
    let token_b = support::access_token(&state, &admin_b);
    let (status, active) =
        support::send_request(&router, "GET", "/time/active", Some(&token_b), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(active
        .as_array()
        .unwrap()
        .iter()
        .all(|t| t["user_id"] != json!(worker_a.id)));

    // Nor can they stop or edit the foreign user's timer.
    let (status, _) = support::send_request(
        &router,
        "POST",
        "/time/stop",
        Some(&token_b),
        Some(json!({ "user_id": worker_a.id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_entries_warn_on_overlap_instead_of_failing() {
    let Some(pool) = support::db_pool().await else {
        return;
    };
    let state = support::test_state(pool.clone());
    let router = build_router(state.clone());

    let company = support::create_company(&pool, "acme").await;
    let user = support::create_user(&pool, Some(company), UserRole::RegularUser, "Str0ng&Pass!word").await;
    let token = support::access_token(&state, &user);

    let base = chrono::Utc::now() - chrono::Duration::days(2);
    let first = json!({
        "start": base,
        "end": base + chrono::Duration::hours(2),
        "description": "morning block"
    });
    let (status, created) =
        support::send_request(&router, "POST", "/time", Some(&token), Some(first)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["warnings"], json!([]));

    let second = json!({
        "start": base + chrono::Duration::hours(1),
        "end": base + chrono::Duration::hours(3),
        "description": "correction"
    });
    let (status, overlapping) =
        support::send_request(&router, "POST", "/time", Some(&token), Some(second)).await;
    assert_eq!(status, StatusCode::OK, "overlap is a warning, not an error");
    assert!(!overlapping["warnings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn deactivated_users_lose_access() {
    let Some(pool) = support::db_pool().await else {
        return;
    };
    let state = support::test_state(pool.clone());
    let router = build_router(state.clone());

    let company = support::create_company(&pool, "acme").await;
    let admin = support::create_user(&pool, Some(company), UserRole::CompanyAdmin, "Str0ng&Pass!word").await;
    let worker = support::create_user(&pool, Some(company), UserRole::RegularUser, "Str0ng&Pass!word").await;

    let admin_token = support::access_token(&state, &admin);
    let worker_token = support::access_token(&state, &worker);

    let (status, _) = support::send_request(
        &router,
        "PUT",
        &format!("/admin/users/{}/deactivate", worker.id),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) =
        support::send_request(&router, "GET", "/auth/me", Some(&worker_token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
