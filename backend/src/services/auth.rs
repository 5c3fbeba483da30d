//! Authentication service for login, token management and password resets

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use shared::{normalize_email, validate_email, validate_password, RegisterInput};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::middleware::Claims;
use crate::services::notification::NotificationService;
use crate::services::settings::SettingsService;

type HmacSha256 = Hmac<Sha256>;

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    db: PgPool,
    jwt_secret: String,
    access_token_expiry: i64,
    refresh_token_expiry: i64,
    reset_token_expiry: i64,
    frontend_url: String,
}

/// Authentication tokens
#[derive(Debug, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// User info from database
#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub is_admin: bool,
    pub is_active: bool,
}

/// Group membership as seen by the member
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MembershipSummary {
    pub group_id: Uuid,
    pub group_name: String,
    pub is_group_admin: bool,
}

/// The signed-in user's own profile
#[derive(Debug, Serialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub is_admin: bool,
    pub email_notifications: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub groups: Vec<MembershipSummary>,
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    email: String,
    name: String,
    phone: Option<String>,
    is_admin: bool,
    email_notifications: bool,
    last_login_at: Option<DateTime<Utc>>,
}

impl AuthService {
    /// Create a new AuthService instance
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            db,
            jwt_secret: config.jwt.secret.clone(),
            access_token_expiry: config.jwt.access_token_expiry,
            refresh_token_expiry: config.jwt.refresh_token_expiry,
            reset_token_expiry: config.jwt.reset_token_expiry,
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
        }
    }

    /// Authenticate user with email and password
    pub async fn login(&self, email: &str, password: &str) -> AppResult<AuthTokens> {
        let user = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, password_hash, name, is_admin, is_active
            FROM users
            WHERE LOWER(email) = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

        let valid = verify(password, &user.password_hash)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))?;

        if !valid {
            tracing::info!(user_id = %user.id, "Login failed: bad password");
            return Err(AppError::InvalidCredentials);
        }

        if !user.is_active {
            return Err(AppError::Unauthorized("Account is disabled".to_string()));
        }

        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(user.id)
            .execute(&self.db)
            .await?;

        let tokens = self.generate_tokens(user.id, &user.email, user.is_admin)?;
        self.store_refresh_token(user.id, &tokens.refresh_token).await?;

        tracing::info!(user_id = %user.id, "User logged in");
        Ok(tokens)
    }

    /// Self-register a volunteer account when the site allows it
    pub async fn register(
        &self,
        settings: &SettingsService,
        input: RegisterInput,
    ) -> AppResult<AuthTokens> {
        if !settings.allow_self_registration().await? {
            return Err(AppError::Forbidden(
                "Self registration is disabled".to_string(),
            ));
        }

        input.validate()?;
        validate_email(&input.email).map_err(|m| AppError::validation("email", m))?;
        validate_password(&input.password).map_err(|m| AppError::validation("password", m))?;

        let email = normalize_email(&input.email);
        let password_hash = hash(&input.password, DEFAULT_COST)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

        let mut tx = self.db.begin().await?;

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE LOWER(email) = $1",
        )
        .bind(&email)
        .fetch_one(&mut *tx)
        .await?;

        if existing > 0 {
            return Err(AppError::conflict("email", "A record with this email already exists"));
        }

        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO users (email, name, password_hash, phone)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&email)
        .bind(input.name.trim())
        .bind(&password_hash)
        .bind(&input.phone)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(group_id) = settings.default_group_id().await? {
            sqlx::query(
                r#"
                INSERT INTO user_groups (user_id, group_id)
                SELECT $1, id FROM groups WHERE id = $2 AND deleted_at IS NULL
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let tokens = self.generate_tokens(user_id, &email, false)?;
        self.store_refresh_token(user_id, &tokens.refresh_token).await?;

        tracing::info!(%user_id, "Volunteer self-registered");
        Ok(tokens)
    }

    /// Refresh access token using refresh token; the old token is revoked
    pub async fn refresh_token(&self, refresh_token: &str) -> AppResult<AuthTokens> {
        let token_hash = Self::hash_token(refresh_token);

        let mut tx = self.db.begin().await?;

        let record = sqlx::query_as::<_, (Uuid, String, bool)>(
            r#"
            UPDATE refresh_tokens rt
            SET revoked_at = NOW()
            FROM users u
            WHERE rt.token_hash = $1
              AND u.id = rt.user_id
              AND rt.expires_at > NOW()
              AND rt.revoked_at IS NULL
              AND u.is_active = true
              AND u.deleted_at IS NULL
            RETURNING u.id, u.email, u.is_admin
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired refresh token".to_string()))?;

        let (user_id, email, is_admin) = record;
        let tokens = self.generate_tokens(user_id, &email, is_admin)?;

        let expires_at = Utc::now() + Duration::seconds(self.refresh_token_expiry);
        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(Self::hash_token(&tokens.refresh_token))
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(tokens)
    }

    /// Revoke a refresh token; unknown tokens are ignored
    pub async fn logout(&self, refresh_token: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = NOW() WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(Self::hash_token(refresh_token))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Profile of the signed-in user with their groups
    pub async fn me(&self, user_id: Uuid) -> AppResult<Profile> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, email, name, phone, is_admin, email_notifications, last_login_at
            FROM users
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        let groups = sqlx::query_as::<_, MembershipSummary>(
            r#"
            SELECT g.id AS group_id, g.name AS group_name, ug.is_group_admin
            FROM user_groups ug
            JOIN groups g ON g.id = ug.group_id
            WHERE ug.user_id = $1 AND g.deleted_at IS NULL
            ORDER BY g.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(Profile {
            id: row.id,
            email: row.email,
            name: row.name,
            phone: row.phone,
            is_admin: row.is_admin,
            email_notifications: row.email_notifications,
            last_login_at: row.last_login_at,
            groups,
        })
    }

    /// Change the password after confirming the current one.
    /// Other sessions are signed out.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let current_hash = sqlx::query_scalar::<_, String>(
            "SELECT password_hash FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        let valid = verify(current_password, &current_hash)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))?;
        if !valid {
            return Err(AppError::validation(
                "current_password",
                "Current password is incorrect",
            ));
        }

        self.set_password(user_id, new_password).await
    }

    /// Email a password reset link. Unknown addresses succeed silently.
    pub async fn request_password_reset(
        &self,
        notifier: &NotificationService,
        email: &str,
    ) -> AppResult<()> {
        let user = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, password_hash, name, is_admin, is_active
            FROM users
            WHERE LOWER(email) = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await?;

        let Some(user) = user.filter(|u| u.is_active) else {
            tracing::info!("Password reset requested for unknown or inactive account");
            return Ok(());
        };

        let expires_at = Utc::now().timestamp() + self.reset_token_expiry;
        let token = sign_reset_token(&self.jwt_secret, user.id, expires_at, &user.password_hash)?;
        let link = format!("{}/reset-password?token={}", self.frontend_url, token);

        match notifier
            .send_password_reset(&user.email, &user.name, &link)
            .await
        {
            Ok(()) => tracing::info!(user_id = %user.id, "Password reset email sent"),
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Password reset email failed")
            }
        }
        Ok(())
    }

    /// Complete a password reset with a token from `request_password_reset`
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AppResult<()> {
        let parsed = parse_reset_token(token).ok_or(AppError::InvalidToken)?;

        if parsed.expires_at < Utc::now().timestamp() {
            return Err(AppError::TokenExpired);
        }

        let password_hash = sqlx::query_scalar::<_, String>(
            "SELECT password_hash FROM users WHERE id = $1 AND deleted_at IS NULL AND is_active",
        )
        .bind(parsed.user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::InvalidToken)?;

        if !verify_reset_signature(&self.jwt_secret, &parsed, &password_hash) {
            return Err(AppError::InvalidToken);
        }

        self.set_password(parsed.user_id, new_password).await?;
        tracing::info!(user_id = %parsed.user_id, "Password reset completed");
        Ok(())
    }

    async fn set_password(&self, user_id: Uuid, new_password: &str) -> AppResult<()> {
        validate_password(new_password).map_err(|m| AppError::validation("new_password", m))?;

        let new_hash = hash(new_password, DEFAULT_COST)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(&new_hash)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Generate access and refresh tokens
    fn generate_tokens(&self, user_id: Uuid, email: &str, is_admin: bool) -> AppResult<AuthTokens> {
        let now = Utc::now();
        let access_exp = now + Duration::seconds(self.access_token_expiry);

        let access_claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            is_admin,
            exp: access_exp.timestamp(),
            iat: now.timestamp(),
        };

        let access_token = encode(
            &Header::default(),
            &access_claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        // Refresh token is opaque; only its hash is stored
        let refresh_token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());

        Ok(AuthTokens {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry,
        })
    }

    /// Store refresh token in database
    async fn store_refresh_token(&self, user_id: Uuid, token: &str) -> AppResult<()> {
        let expires_at = Utc::now() + Duration::seconds(self.refresh_token_expiry);

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(Self::hash_token(token))
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// SHA-256 hex digest of a token for storage
    pub(crate) fn hash_token(token: &str) -> String {
        format!("{:x}", Sha256::digest(token.as_bytes()))
    }
}

// ============================================================================
// Password Reset Tokens
// ============================================================================

/// Decoded, not yet verified, reset token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetToken {
    pub user_id: Uuid,
    pub expires_at: i64,
    pub signature: Vec<u8>,
}

fn reset_mac(secret: &str, payload: &str, password_hash: &str) -> AppResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("HMAC key error: {}", e)))?;
    mac.update(payload.as_bytes());
    mac.update(b".");
    // Binding the current hash makes the token single-use
    mac.update(password_hash.as_bytes());
    Ok(mac)
}

/// Build `base64(user_id.expires_at).base64(hmac)`
pub fn sign_reset_token(
    secret: &str,
    user_id: Uuid,
    expires_at: i64,
    password_hash: &str,
) -> AppResult<String> {
    let payload = format!("{}.{}", user_id, expires_at);
    let signature = reset_mac(secret, &payload, password_hash)?
        .finalize()
        .into_bytes();
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(payload.as_bytes()),
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

pub fn parse_reset_token(token: &str) -> Option<ResetToken> {
    let (payload_b64, signature_b64) = token.trim().split_once('.')?;
    let payload = String::from_utf8(URL_SAFE_NO_PAD.decode(payload_b64).ok()?).ok()?;
    let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
    let (user_id, expires_at) = payload.split_once('.')?;
    Some(ResetToken {
        user_id: Uuid::parse_str(user_id).ok()?,
        expires_at: expires_at.parse().ok()?,
        signature,
    })
}

pub fn verify_reset_signature(secret: &str, token: &ResetToken, password_hash: &str) -> bool {
    let payload = format!("{}.{}", token.user_id, token.expires_at);
    match reset_mac(secret, &payload, password_hash) {
        Ok(mac) => mac.verify_slice(&token.signature).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "reset-secret";
    const HASH: &str = "$2b$12$abcdefghijklmnopqrstuv";

    #[test]
    fn test_reset_token_verifies() {
        let user_id = Uuid::new_v4();
        let token = sign_reset_token(SECRET, user_id, 1_900_000_000, HASH).unwrap();
        let parsed = parse_reset_token(&token).unwrap();
        assert_eq!(parsed.user_id, user_id);
        assert_eq!(parsed.expires_at, 1_900_000_000);
        assert!(verify_reset_signature(SECRET, &parsed, HASH));
    }

    #[test]
    fn test_reset_token_is_single_use() {
        let token = sign_reset_token(SECRET, Uuid::new_v4(), 1_900_000_000, HASH).unwrap();
        let parsed = parse_reset_token(&token).unwrap();
        assert!(!verify_reset_signature(SECRET, &parsed, "$2b$12$changed-after-reset"));
    }

    #[test]
    fn test_tampered_reset_token_fails() {
        let user_id = Uuid::new_v4();
        let token = sign_reset_token(SECRET, user_id, 1_900_000_000, HASH).unwrap();
        let mut parsed = parse_reset_token(&token).unwrap();
        parsed.expires_at += 86_400;
        assert!(!verify_reset_signature(SECRET, &parsed, HASH));

        let parsed = parse_reset_token(&token).unwrap();
        assert!(!verify_reset_signature("other-secret", &parsed, HASH));
    }

    #[test]
    fn test_malformed_reset_tokens() {
        assert!(parse_reset_token("").is_none());
        assert!(parse_reset_token("no-dot").is_none());
        assert!(parse_reset_token("!!!.???").is_none());
        let payload = URL_SAFE_NO_PAD.encode(b"not-a-uuid.123");
        assert!(parse_reset_token(&format!("{}.AAAA", payload)).is_none());
    }

    #[test]
    fn test_token_hash_is_stable_sha256() {
        let a = AuthService::hash_token("refresh-token");
        assert_eq!(a.len(), 64);
        assert_eq!(a, AuthService::hash_token("refresh-token"));
        assert_ne!(a, AuthService::hash_token("refresh-token2"));
    }
}
