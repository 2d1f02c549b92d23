//! Request/response bodies and JWT claims for the auth API.

use crate::db::users::UserRecord;
use crate::db::users::UserRole;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: UserRole,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: usize,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_record(user: &UserRecord) -> Self {
        Self { id: user.id.clone(), email: user.email.clone(), role: user.role, created_at: user.created_at.to_rfc3339() }
    }
}
