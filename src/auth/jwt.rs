//! JWT token issuance and validation for the HTTP API.

use crate::auth::models::Claims;
use crate::db::users::{UserRecord, UserRole};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self { secret, expiration_hours: 24 }
    }

    pub fn generate_token(&self, user: &UserRecord) -> Result<(String, usize)> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .context("invalid timestamp")?
            .timestamp() as usize;
        let expires_in = (self.expiration_hours * 3600) as usize;

        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            exp: expiration,
        };

        debug!("issuing JWT for user {} ({}), expires in {}h", user.email, user.id, self.expiration_hours);

        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .context("failed to encode JWT")?;

        Ok((token, expires_in))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &Validation::default())
            .context("invalid or expired token")?;
        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(role: UserRole) -> UserRecord {
        UserRecord {
            id: "user-1".to_string(),
            email: "trader@example.com".to_string(),
            password_hash: "hash".to_string(),
            role,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn generation_and_validation_round_trip() {
        let handler = JwtHandler::new("test-secret-key".to_string());
        let user = test_user(UserRole::User);

        let (token, expires_in) = handler.generate_token(&user).unwrap();
        assert!(!token.is_empty());
        assert_eq!(expires_in, 24 * 3600);

        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, user.role);
    }

    #[test]
    fn malformed_token_is_rejected() {
        let handler = JwtHandler::new("test-secret-key".to_string());
        assert!(handler.validate_token("not.a.token").is_err());
    }

    #[test]
    fn tokens_do_not_validate_across_different_secrets() {
        let handler1 = JwtHandler::new("secret1".to_string());
        let handler2 = JwtHandler::new("secret2".to_string());
        let (token, _) = handler1.generate_token(&test_user(UserRole::User)).unwrap();
        assert!(handler2.validate_token(&token).is_err());
    }

    #[test]
    fn admin_role_round_trips() {
        let handler = JwtHandler::new("test-secret-key".to_string());
        let (token, _) = handler.generate_token(&test_user(UserRole::Admin)).unwrap();
        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.role, UserRole::Admin);
    }
}
