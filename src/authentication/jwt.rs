use chrono::Duration;
use chrono::Local;
use hmac::{Hmac, Mac};
use jwt::SignWithKey;
use jwt::VerifyWithKey;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;

use crate::constants::{SESSION_SECRET_ENV, SESSION_TTL_HOURS};
use crate::database::error::ApiError;
use crate::database::schema::{Id, User, UserRole};

use super::permissions::ActionType;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    pub user_id: Id,
    pub username: String,
    pub role: UserRole,
    iat: i64,
    exp: i64,
}

impl SessionClaims {
    pub fn new(id: Id, username: String, role: UserRole) -> Self {
        let now = Local::now();
        let iat = now.timestamp();
        let exp = (now + Duration::hours(SESSION_TTL_HOURS)).timestamp();

        Self {
            user_id: id,
            username,
            role,
            iat,
            exp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Session {
    pub user_id: Id,
    pub username: String,
    pub role: UserRole,
    pub is_admin: bool,
}

impl Session {
    pub fn authenticate(&self, action: ActionType) -> Result<(), ApiError> {
        if !action.authenticate(self) {
            return Err(ApiError::Unauthorized(
                "you don't have permission to perform this action".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<SessionClaims> for Session {
    fn from(claims: SessionClaims) -> Self {
        Session {
            user_id: claims.user_id,
            username: claims.username,
            is_admin: claims.role == UserRole::Admin,
            role: claims.role,
        }
    }
}

fn signing_key() -> Hmac<Sha256> {
    let secret =
        std::env::var(SESSION_SECRET_ENV).unwrap_or_else(|_| "insecure-dev-secret".to_string());
    Hmac::new_from_slice(secret.as_bytes()).unwrap()
}

pub fn generate_session_token(user: &User) -> String {
    let claims = SessionClaims::new(user.id, user.username.to_owned(), user.role.to_owned());

    claims.sign_with_key(&signing_key()).unwrap()
}

pub fn verify_session_token(token: &str) -> Result<SessionClaims, ApiError> {
    token
        .verify_with_key(&signing_key())
        .map_err(|_| ApiError::InvalidSession("invalid session token".to_string()))
        .map(|claims: SessionClaims| {
            let now = Local::now().timestamp();

            if (claims.exp - now).is_negative() {
                return Err(ApiError::InvalidSession("session expired".to_string()));
            }
            Ok(claims)
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 1,
            email: "cook@example.com".to_string(),
            username: "cook".to_string(),
            first_name: "Alex".to_string(),
            last_name: "Smith".to_string(),
            password: "hash".to_string(),
            avatar: None,
            role: UserRole::User,
        }
    }

    #[test]
    fn token_roundtrip() {
        let token = generate_session_token(&user());
        let claims = verify_session_token(&token).unwrap();
        assert_eq!(claims.user_id, 1);
        assert_eq!(claims.username, "cook");
        assert_eq!(claims.role, UserRole::User);
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut claims = SessionClaims::new(1, "cook".to_string(), UserRole::User);
        claims.exp = Local::now().timestamp() - 60;
        let token = claims.sign_with_key(&signing_key()).unwrap();

        assert!(matches!(
            verify_session_token(&token),
            Err(ApiError::InvalidSession(_))
        ));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(verify_session_token("not-a-token").is_err());
    }

    #[test]
    fn admin_claims_set_the_admin_flag() {
        let session: Session = SessionClaims::new(2, "root".to_string(), UserRole::Admin).into();
        assert!(session.is_admin);
    }
}
