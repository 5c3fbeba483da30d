//! Site settings handlers

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::settings::SiteSetting;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub value: Value,
}

/// Every known setting with descriptions (site admins)
pub async fn list_settings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<SiteSetting>>> {
    user.require_admin()?;
    let settings = state.settings_service().get_all().await?;
    Ok(Json(settings))
}

/// Settings the login page needs before anyone signs in
pub async fn public_settings(
    State(state): State<AppState>,
) -> AppResult<Json<HashMap<String, Value>>> {
    let settings = state.settings_service().get_public().await?;
    Ok(Json(settings))
}

pub async fn update_setting(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(key): Path<String>,
    Json(body): Json<UpdateSettingRequest>,
) -> AppResult<Json<SiteSetting>> {
    user.require_admin()?;
    let setting = state
        .settings_service()
        .update(&key, body.value, user.user_id)
        .await?;
    Ok(Json(setting))
}
