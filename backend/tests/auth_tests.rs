//! Authentication and authorization tests
//!
//! Property-based and unit tests for:
//! - Password reset tokens (signing, parsing, single use)
//! - Access token decoding
//! - Site admin and author permission checks

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use proptest::prelude::*;
use uuid::Uuid;

use svp_server::error::AppError;
use svp_server::middleware::{decode_jwt, AuthUser, Claims};
use svp_server::services::auth::{parse_reset_token, sign_reset_token, verify_reset_signature};

const SECRET: &str = "integration-test-secret-0123456789";

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Bcrypt-looking password hashes
fn password_hash_strategy() -> impl Strategy<Value = String> {
    "\\$2b\\$12\\$[A-Za-z0-9./]{53}"
}

fn uuid_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

fn expiry_strategy() -> impl Strategy<Value = i64> {
    1_600_000_000i64..2_500_000_000i64
}

// ============================================================================
// Reset Token Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A freshly signed token parses back to the same user and expiry and verifies
    #[test]
    fn prop_reset_token_verifies(
        user_id in uuid_strategy(),
        expires_at in expiry_strategy(),
        hash in password_hash_strategy(),
    ) {
        let token = sign_reset_token(SECRET, user_id, expires_at, &hash).unwrap();
        let parsed = parse_reset_token(&token).unwrap();
        prop_assert_eq!(parsed.user_id, user_id);
        prop_assert_eq!(parsed.expires_at, expires_at);
        prop_assert!(verify_reset_signature(SECRET, &parsed, &hash));
    }

    /// Once the password changes, an old reset link stops working
    #[test]
    fn prop_reset_token_bound_to_password(
        user_id in uuid_strategy(),
        expires_at in expiry_strategy(),
        old_hash in password_hash_strategy(),
        new_hash in password_hash_strategy(),
    ) {
        prop_assume!(old_hash != new_hash);
        let token = sign_reset_token(SECRET, user_id, expires_at, &old_hash).unwrap();
        let parsed = parse_reset_token(&token).unwrap();
        prop_assert!(!verify_reset_signature(SECRET, &parsed, &new_hash));
    }

    /// Tokens signed with another secret never verify
    #[test]
    fn prop_reset_token_bound_to_secret(
        user_id in uuid_strategy(),
        expires_at in expiry_strategy(),
        hash in password_hash_strategy(),
    ) {
        let token = sign_reset_token("some-other-secret-value-xyz", user_id, expires_at, &hash).unwrap();
        let parsed = parse_reset_token(&token).unwrap();
        prop_assert!(!verify_reset_signature(SECRET, &parsed, &hash));
    }

    /// Arbitrary strings are rejected without panicking
    #[test]
    fn prop_parse_reset_token_never_panics(token in ".{0,200}") {
        let _ = parse_reset_token(&token);
    }
}

#[test]
fn test_tampered_expiry_fails_verification() {
    let user_id = Uuid::new_v4();
    let hash = "$2b$12$abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXY0";
    let token = sign_reset_token(SECRET, user_id, 1_700_000_000, hash).unwrap();
    let mut parsed = parse_reset_token(&token).unwrap();
    parsed.expires_at += 86_400;
    assert!(!verify_reset_signature(SECRET, &parsed, hash));
}

#[test]
fn test_reset_token_is_url_safe() {
    let token = sign_reset_token(SECRET, Uuid::new_v4(), 1_700_000_000, "hash").unwrap();
    assert!(token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')));
}

// ============================================================================
// Access Tokens
// ============================================================================

fn access_token(user_id: Uuid, is_admin: bool, exp_offset: Duration) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        email: "coordinator@example.org".to_string(),
        is_admin,
        exp: (now + exp_offset).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

#[test]
fn test_decode_jwt_round_trip_claims() {
    let user_id = Uuid::new_v4();
    let claims = decode_jwt(&access_token(user_id, true, Duration::hours(1)), SECRET).unwrap();
    assert_eq!(claims.sub, user_id.to_string());
    assert!(claims.is_admin);
}

#[test]
fn test_decode_jwt_expired() {
    let token = access_token(Uuid::new_v4(), false, Duration::hours(-2));
    assert!(matches!(decode_jwt(&token, SECRET), Err(AppError::TokenExpired)));
}

#[test]
fn test_decode_jwt_wrong_secret() {
    let token = access_token(Uuid::new_v4(), false, Duration::hours(1));
    assert!(matches!(
        decode_jwt(&token, "not-the-signing-secret"),
        Err(AppError::InvalidToken)
    ));
}

// ============================================================================
// Permissions
// ============================================================================

fn user(is_admin: bool) -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        email: "walker@example.org".to_string(),
        is_admin,
    }
}

#[test]
fn test_require_admin() {
    assert!(user(true).require_admin().is_ok());
    assert!(matches!(
        user(false).require_admin(),
        Err(AppError::Forbidden(_))
    ));
}

proptest! {
    /// Volunteers may only modify their own records; admins may modify any
    #[test]
    fn prop_can_modify(author in uuid_strategy(), is_admin in any::<bool>()) {
        let volunteer = user(is_admin);
        prop_assert_eq!(volunteer.can_modify(author), is_admin || author == volunteer.user_id);
        prop_assert!(volunteer.can_modify(volunteer.user_id));
    }
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_refresh_token_rotation_revokes_old_token() {
    use svp_server::{services::AuthService, Config};

    let url = std::env::var("DATABASE_URL").unwrap();
    let db = sqlx::PgPool::connect(&url).await.unwrap();
    let mut config = Config::for_tests();
    config.bootstrap.admin_email = Some("rotation-admin@example.org".to_string());
    config.bootstrap.admin_password = Some("Rotation-pass-123".to_string());
    svp_server::services::schema::prepare_database(&db, &config.bootstrap)
        .await
        .unwrap();

    let auth = AuthService::new(db, &config);
    let first = auth
        .login("Rotation-Admin@example.org", "Rotation-pass-123")
        .await
        .unwrap();
    let second = auth.refresh_token(&first.refresh_token).await.unwrap();
    assert_ne!(first.refresh_token, second.refresh_token);
    assert!(auth.refresh_token(&first.refresh_token).await.is_err());
}

struct FailingSender;

#[async_trait::async_trait]
impl svp_server::services::notification::EmailSender for FailingSender {
    fn provider(&self) -> &'static str {
        "failing"
    }

    async fn send(
        &self,
        _message: &svp_server::services::notification::EmailMessage,
    ) -> Result<(), AppError> {
        Err(AppError::Internal("SMTP connection refused".to_string()))
    }
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_password_reset_succeeds_when_mailer_fails() {
    use std::sync::Arc;
    use svp_server::services::notification::GroupMeClient;
    use svp_server::services::{AuthService, NotificationService};
    use svp_server::Config;

    let url = std::env::var("DATABASE_URL").unwrap();
    let db = sqlx::PgPool::connect(&url).await.unwrap();
    let mut config = Config::for_tests();
    config.bootstrap.admin_email = Some("reset-admin@example.org".to_string());
    config.bootstrap.admin_password = Some("Reset-pass-123".to_string());
    svp_server::services::schema::prepare_database(&db, &config.bootstrap)
        .await
        .unwrap();

    let notifier = NotificationService::new(
        db.clone(),
        Arc::new(FailingSender),
        GroupMeClient::new(&config.groupme),
        &config.frontend_url,
    );
    let auth = AuthService::new(db.clone(), &config);
    auth.request_password_reset(&notifier, "Reset-Admin@example.org")
        .await
        .unwrap();

    let failures = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notification_log WHERE recipient = $1 AND status = 'failed'",
    )
    .bind("reset-admin@example.org")
    .fetch_one(&db)
    .await
    .unwrap();
    assert!(failures >= 1);
}
