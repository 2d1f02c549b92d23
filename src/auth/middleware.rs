//! JWT auth middleware: validates the bearer token and attaches
//! `Claims` to the request so handlers can read the caller's identity.

use crate::auth::{jwt::JwtHandler, models::Claims};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub async fn auth_middleware(State(jwt_handler): State<Arc<JwtHandler>>, mut req: Request, next: Next) -> Result<Response, AuthError> {
    let token_from_query = req.uri().query().and_then(|query| {
        query
            .split('&')
            .find(|pair| pair.starts_with("token="))
            .and_then(|pair| pair.split('=').nth(1))
            .map(|t| t.to_string())
    });

    let token_from_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string());

    let token = token_from_query.or(token_from_header).ok_or(AuthError::MissingToken)?;
    let claims = jwt_handler.validate_token(&token).map_err(|_| AuthError::InvalidToken)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn extract_claims(req: &Request) -> Option<&Claims> {
    req.extensions().get::<Claims>()
}

/// The subject-vs-owner check every per-resource handler runs after
/// loading a row: a valid token from a *different* user is a 403, not
/// a 404 (404 would leak whether the resource exists at all).
pub fn require_owner(claims: &Claims, resource_user_id: &str) -> Result<(), AuthError> {
    if claims.sub == resource_user_id || claims.role == crate::db::users::UserRole::Admin {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid or expired token"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "not permitted to access this resource"),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users::UserRole;
    use axum::{body::Body, http::Request as HttpRequest};

    fn claims_for(sub: &str) -> Claims {
        Claims { sub: sub.to_string(), email: "a@example.com".to_string(), role: UserRole::User, exp: 9_999_999_999 }
    }

    #[test]
    fn auth_error_responses_carry_the_right_status() {
        assert_eq!(AuthError::MissingToken.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidToken.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::Forbidden.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn extract_claims_reads_back_what_was_inserted() {
        let mut req = HttpRequest::new(Body::empty());
        assert!(extract_claims(&req).is_none());

        req.extensions_mut().insert(claims_for("user-1"));
        let extracted = extract_claims(&req);
        assert_eq!(extracted.unwrap().sub, "user-1");
    }

    #[test]
    fn require_owner_allows_the_owner_and_admins_only() {
        let owner = claims_for("user-1");
        assert!(require_owner(&owner, "user-1").is_ok());
        assert!(require_owner(&owner, "user-2").is_err());

        let admin = Claims { role: UserRole::Admin, ..claims_for("admin-1") };
        assert!(require_owner(&admin, "user-2").is_ok());
    }
}
