//! Router assembly: versioned `/api/v1` prefix, JWT auth on every route
//! except `/health` and the auth endpoints themselves.

use crate::api::{balances, exchanges, health, jobs, notifications, orders, positions, strategies};
use crate::auth::{api as auth_api, auth_middleware};
use crate::middleware::request_logging_simple;
use crate::state::AppState;
use axum::http::HeaderValue;
use axum::middleware as axum_mw;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

fn cors_layer(state: &AppState) -> CorsLayer {
    if state.config.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = state.config.cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(tower_http::cors::Any).allow_headers(tower_http::cors::Any)
}

pub fn build_router(state: AppState) -> Router {
    let auth_router = Router::new()
        .route("/api/v1/auth/register", post(auth_api::register))
        .route("/api/v1/auth/login", post(auth_api::login))
        .with_state(state.auth_state());

    let protected_routes = Router::new()
        .route("/api/v1/strategies", post(strategies::create_strategy).get(strategies::list_strategies))
        .route("/api/v1/strategies/:id", get(strategies::get_strategy).put(strategies::update_strategy).delete(strategies::delete_strategy))
        .route("/api/v1/strategies/:id/check", post(strategies::check_strategy))
        .route("/api/v1/positions", get(positions::list_positions))
        .route("/api/v1/positions/one", get(positions::get_position))
        .route("/api/v1/positions/sync", post(positions::sync_position))
        .route("/api/v1/orders/buy", post(orders::buy))
        .route("/api/v1/orders/sell", post(orders::sell))
        .route("/api/v1/jobs/status", get(jobs::status))
        .route("/api/v1/jobs/control", post(jobs::control))
        .route("/api/v1/jobs/trigger/:job", post(jobs::trigger))
        .route("/api/v1/exchanges/catalog", get(exchanges::catalog))
        .route("/api/v1/exchanges", get(exchanges::list_linked))
        .route("/api/v1/exchanges/link", post(exchanges::link))
        .route("/api/v1/exchanges/connect", post(exchanges::link))
        .route("/api/v1/exchanges/unlink", delete(exchanges::unlink))
        .route("/api/v1/exchanges/disconnect", post(exchanges::disconnect))
        .route("/api/v1/exchanges/delete", delete(exchanges::unlink))
        .route("/api/v1/balances/latest", get(balances::latest))
        .route("/api/v1/balances/history", get(balances::history))
        .route("/api/v1/notifications", get(notifications::list))
        .route("/api/v1/notifications/:id/read", post(notifications::mark_read))
        .route_layer(axum_mw::from_fn_with_state(state.jwt_handler.clone(), auth_middleware))
        .with_state(state.clone());

    let public_routes = Router::new().route("/health", get(health::health)).with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(auth_router)
        .layer(cors_layer(&state))
        .layer(axum_mw::from_fn(request_logging_simple))
}
