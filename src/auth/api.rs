//! `/api/v1/auth/register` and `/api/v1/auth/login` handlers.

use crate::api::response::Envelope;
use crate::auth::{
    jwt::JwtHandler,
    models::{LoginRequest, LoginResponse, RegisterRequest, UserResponse},
    user_store::UserStore,
};
use crate::errors::AppError;
use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub jwt_handler: Arc<JwtHandler>,
}

pub async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<Envelope<UserResponse>>, AppError> {
    let user = state
        .user_store
        .register(&payload.email, &payload.password)
        .await
        .map_err(|e| AppError::Validation { fields: vec!["email".to_string(), "password".to_string()], message: e.to_string() })?;

    info!("registered user {}", user.email);
    Ok(Json(Envelope::ok(UserResponse::from_record(&user))))
}

pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Envelope<LoginResponse>>, AppError> {
    let user = state.user_store.authenticate(&payload.email, &payload.password).await.map_err(|_| {
        warn!("failed login attempt for {}", payload.email);
        AppError::Unauthorized
    })?;

    let (token, expires_in) = state.jwt_handler.generate_token(&user).map_err(AppError::Internal)?;

    Ok(Json(Envelope::ok(LoginResponse { token, expires_in, user: UserResponse::from_record(&user) })))
}
