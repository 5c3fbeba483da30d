//! Protocol document handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::handlers::read_upload;
use crate::middleware::CurrentUser;
use crate::services::protocol::{Protocol, UpdateProtocolInput, UploadProtocolInput};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// Ask the browser to save the file instead of rendering it
    #[serde(default)]
    pub attachment: bool,
}

pub async fn list_protocols(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<Vec<Protocol>>> {
    let protocols = state
        .protocol_service()
        .list_protocols(&user, group_id)
        .await?;
    Ok(Json(protocols))
}

/// Multipart upload with `file`, `title` and optional `description` and `sort_order`
pub async fn upload_protocol(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Protocol>)> {
    let form = read_upload(multipart).await?;

    let sort_order = match form.field("sort_order") {
        Some(value) => Some(
            value
                .parse::<i32>()
                .map_err(|_| AppError::validation("sort_order", "Must be a whole number"))?,
        ),
        None => None,
    };
    // Untitled uploads take their title from the file name
    let title = form
        .field("title")
        .map(str::to_string)
        .or_else(|| form.file_name.as_deref().map(strip_extension))
        .unwrap_or_default();
    let input = UploadProtocolInput {
        title,
        description: form.field("description").map(str::to_string),
        sort_order,
    };

    let (file_name, bytes) = form.into_file()?;
    let protocol = state
        .protocol_service()
        .upload_protocol(&user, group_id, input, &file_name, bytes)
        .await?;
    Ok((StatusCode::CREATED, Json(protocol)))
}

fn strip_extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}

pub async fn get_protocol(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(protocol_id): Path<Uuid>,
) -> AppResult<Json<Protocol>> {
    let protocol = state
        .protocol_service()
        .get_protocol(&user, protocol_id)
        .await?;
    Ok(Json(protocol))
}

/// Raw document bytes for the in-browser viewer
pub async fn download_protocol(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(protocol_id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> AppResult<impl IntoResponse> {
    let download = state
        .protocol_service()
        .download_protocol(&user, protocol_id)
        .await?;
    let disposition = download.content_disposition(!query.attachment);
    Ok((
        [
            (header::CONTENT_TYPE, download.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.bytes,
    ))
}

pub async fn update_protocol(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(protocol_id): Path<Uuid>,
    Json(input): Json<UpdateProtocolInput>,
) -> AppResult<Json<Protocol>> {
    let protocol = state
        .protocol_service()
        .update_protocol(&user, protocol_id, input)
        .await?;
    Ok(Json(protocol))
}

pub async fn delete_protocol(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(protocol_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state
        .protocol_service()
        .delete_protocol(&user, protocol_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
