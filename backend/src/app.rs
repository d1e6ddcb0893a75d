//! Router assembly: route → guard wiring lives here so main stays thin and
//! tests can build the exact production router against their own state.

use axum::{
    http::{HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{admin, auth, time_entries, ws};
use crate::middleware;
use crate::state::AppState;

fn cors_layer(state: &AppState) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(24 * 60 * 60));

    if state.config.cors_allow_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_allow_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn build_router(state: AppState) -> Router {
    // Anonymous endpoints sit behind the tighter auth bucket.
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_rate_limit,
        ));

    let user_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/auth/sessions", get(auth::list_sessions))
        .route("/auth/sessions/{jti}", axum::routing::delete(auth::revoke_session))
        .route("/time/start", post(time_entries::start_timer))
        .route("/time/stop", post(time_entries::stop_timer))
        .route(
            "/time",
            post(time_entries::create_manual).get(time_entries::list_entries),
        )
        .route("/time/active", get(time_entries::active_timers))
        .route(
            "/time/{id}",
            put(time_entries::update_entry).delete(time_entries::delete_entry),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/users",
            get(admin::list_users).post(admin::create_user),
        )
        .route("/admin/users/{id}/deactivate", put(admin::deactivate_user))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_admin,
        ));

    // The realtime channel authenticates inside the upgrade handler (token in
    // the query string, not a header).
    let realtime_routes = Router::new().route("/ws", get(ws::ws_upgrade));

    let docs_routes = Router::new().route("/docs/openapi.json", get(crate::docs::openapi_json));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .merge(realtime_routes)
        .merge(docs_routes)
        .layer(
            ServiceBuilder::new()
                .layer(axum_middleware::from_fn(middleware::request_id))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state))
                .layer(axum_middleware::from_fn_with_state(
                    state.clone(),
                    middleware::general_rate_limit,
                )),
        )
        .with_state(state)
}
