//! Animal photo handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use shared::ImageVariant;

use crate::error::AppResult;
use crate::handlers::read_upload;
use crate::middleware::CurrentUser;
use crate::services::image::AnimalImage;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    #[serde(default)]
    pub variant: ImageVariant,
}

#[derive(Debug, Deserialize)]
pub struct ProfileImageRequest {
    pub image_id: Uuid,
}

pub async fn list_images(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(animal_id): Path<Uuid>,
) -> AppResult<Json<Vec<AnimalImage>>> {
    let images = state.image_service().list_images(&user, animal_id).await?;
    Ok(Json(images))
}

pub async fn upload_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(animal_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<AnimalImage>)> {
    let (file_name, bytes) = read_upload(multipart).await?.into_file()?;
    let image = state
        .image_service()
        .upload_image(&user, animal_id, &file_name, bytes)
        .await?;
    Ok((StatusCode::CREATED, Json(image)))
}

/// Serve image bytes; `?variant=thumbnail` returns the small rendition
pub async fn get_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(image_id): Path<Uuid>,
    Query(query): Query<ImageQuery>,
) -> AppResult<impl IntoResponse> {
    let (content_type, bytes) = state
        .image_service()
        .get_image_bytes(&user, image_id, query.variant)
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, max-age=86400".to_string()),
        ],
        bytes,
    ))
}

pub async fn delete_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(image_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.image_service().delete_image(&user, image_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_profile_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(animal_id): Path<Uuid>,
    Json(body): Json<ProfileImageRequest>,
) -> AppResult<Json<AnimalImage>> {
    let image = state
        .image_service()
        .set_profile_image(&user, animal_id, body.image_id)
        .await?;
    Ok(Json(image))
}
