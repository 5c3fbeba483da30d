//! Authentication handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use shared::RegisterInput;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::auth::{AuthTokens, Profile};
use crate::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

/// Login endpoint handler
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthTokens>, AppError> {
    let tokens = state
        .auth_service()
        .login(&body.email, &body.password)
        .await?;
    Ok(Json(tokens))
}

/// Self-registration, when the site allows it
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterInput>,
) -> Result<(StatusCode, Json<AuthTokens>), AppError> {
    let settings = state.settings_service();
    let tokens = state.auth_service().register(&settings, body).await?;
    Ok((StatusCode::CREATED, Json(tokens)))
}

/// Token refresh endpoint handler
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<AuthTokens>, AppError> {
    let tokens = state.auth_service().refresh_token(&body.refresh_token).await?;
    Ok(Json(tokens))
}

pub async fn logout(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<StatusCode, AppError> {
    state.auth_service().logout(&body.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Profile>, AppError> {
    let profile = state.auth_service().me(user.user_id).await?;
    Ok(Json(profile))
}

pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<StatusCode, AppError> {
    state
        .auth_service()
        .change_password(user.user_id, &body.current_password, &body.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Always answers the same way so addresses cannot be enumerated
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let notifier = state.notification_service();
    state
        .auth_service()
        .request_password_reset(&notifier, &body.email)
        .await?;
    Ok(MessageResponse::new(
        "If that address has an account, a reset link is on its way",
    ))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .auth_service()
        .reset_password(&body.token, &body.password)
        .await?;
    Ok(MessageResponse::new("Password updated"))
}
