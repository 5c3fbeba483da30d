//! Notification log and delivery test handlers (site admins)

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use shared::{PaginatedResponse, Pagination};

use crate::error::AppResult;
use crate::handlers::auth::MessageResponse;
use crate::middleware::CurrentUser;
use crate::services::notification::{NotificationLogEntry, NotificationLogFilter};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TestEmailRequest {
    /// Defaults to the requesting admin's address
    pub to: Option<String>,
}

pub async fn list_notification_log(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<NotificationLogFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<NotificationLogEntry>>> {
    user.require_admin()?;
    let log = state
        .notification_service()
        .list_log(filter, pagination)
        .await?;
    Ok(Json(log))
}

pub async fn send_test_email(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<TestEmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    user.require_admin()?;
    let to = body.to.unwrap_or_else(|| user.email.clone());
    state.notification_service().send_test_email(&to).await?;
    Ok(MessageResponse::new(format!("Test email sent to {}", to)))
}
