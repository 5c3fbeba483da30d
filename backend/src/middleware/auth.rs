//! Authentication middleware
//!
//! JWT bearer authentication and admin gating

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub email: String,
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

/// Authenticated user information extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub is_admin: bool,
}

impl AuthUser {
    /// Fail with 403 unless the user is a site administrator
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "Administrator access is required".to_string(),
            ))
        }
    }

    /// Whether the user may modify a record authored by `author_id`
    pub fn can_modify(&self, author_id: Uuid) -> bool {
        self.is_admin || self.user_id == author_id
    }
}

/// Decode and validate a JWT access token
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::InvalidToken,
    })
}

#[derive(sqlx::FromRow)]
struct AccountState {
    email: String,
    is_admin: bool,
    is_active: bool,
}

/// Authentication middleware that validates JWT tokens.
///
/// The account is re-read on every request so deactivation and admin
/// changes take effect before the token expires.
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
            .into_response();
    };

    let claims = match decode_jwt(bearer.token(), &state.config.jwt.secret) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    let user_id = match Uuid::parse_str(&claims.sub) {
        Ok(id) => id,
        Err(_) => return AppError::InvalidToken.into_response(),
    };

    let account = sqlx::query_as::<_, AccountState>(
        "SELECT email, is_admin, is_active FROM users WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await;

    let account = match account {
        Ok(Some(account)) if account.is_active => account,
        Ok(_) => {
            return AppError::Unauthorized("Account is disabled".to_string()).into_response();
        }
        Err(e) => return AppError::from(e).into_response(),
    };

    request.extensions_mut().insert(AuthUser {
        user_id,
        email: account.email,
        is_admin: account.is_admin,
    });

    next.run(request).await
}

/// Extractor for authenticated user
/// Use this in handlers to get the current user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";

    fn token(exp_offset: i64, secret: &str) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            email: "walker@shelter.org".to_string(),
            is_admin: false,
            exp: (now + Duration::seconds(exp_offset)).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_valid_token() {
        let claims = decode_jwt(&token(600, SECRET), SECRET).unwrap();
        assert_eq!(claims.email, "walker@shelter.org");
        assert!(!claims.is_admin);
    }

    #[test]
    fn test_expired_token_is_reported() {
        let err = decode_jwt(&token(-3600, SECRET), SECRET).unwrap_err();
        assert!(matches!(err, AppError::TokenExpired));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let err = decode_jwt(&token(600, "another-secret"), SECRET).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[test]
    fn test_admin_gate() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            email: "a@b.org".to_string(),
            is_admin: false,
        };
        assert!(user.require_admin().is_err());
        assert!(user.can_modify(user.user_id));
        assert!(!user.can_modify(Uuid::new_v4()));

        let admin = AuthUser { is_admin: true, ..user };
        assert!(admin.require_admin().is_ok());
        assert!(admin.can_modify(Uuid::new_v4()));
    }
}
