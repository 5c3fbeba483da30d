//! Animal profile, animal tag and roster CSV handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use shared::{CreateAnimalInput, PaginatedResponse, Pagination, TagInput, UpdateAnimalInput};

use crate::error::AppResult;
use crate::handlers::read_upload;
use crate::middleware::CurrentUser;
use crate::services::animal::{Animal, AnimalFilter};
use crate::services::csv_io::ImportSummary;
use crate::services::tag::Tag;
use crate::services::{AnimalService, CsvService};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SetTagsRequest {
    pub tag_ids: Vec<Uuid>,
}

pub async fn list_animals(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
    Query(filter): Query<AnimalFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<Animal>>> {
    let animals = AnimalService::new(state.db.clone())
        .list_animals(&user, group_id, filter, pagination)
        .await?;
    Ok(Json(animals))
}

pub async fn create_animal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
    Json(input): Json<CreateAnimalInput>,
) -> AppResult<(StatusCode, Json<Animal>)> {
    let animal = AnimalService::new(state.db.clone())
        .create_animal(&user, group_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(animal)))
}

pub async fn get_animal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(animal_id): Path<Uuid>,
) -> AppResult<Json<Animal>> {
    let animal = AnimalService::new(state.db.clone())
        .get_animal(&user, animal_id)
        .await?;
    Ok(Json(animal))
}

pub async fn update_animal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(animal_id): Path<Uuid>,
    Json(input): Json<UpdateAnimalInput>,
) -> AppResult<Json<Animal>> {
    let animal = AnimalService::new(state.db.clone())
        .update_animal(&user, animal_id, input)
        .await?;
    Ok(Json(animal))
}

pub async fn delete_animal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(animal_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    AnimalService::new(state.db.clone())
        .delete_animal(&user, animal_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restore_animal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(animal_id): Path<Uuid>,
) -> AppResult<Json<Animal>> {
    let animal = AnimalService::new(state.db.clone())
        .restore_animal(&user, animal_id)
        .await?;
    Ok(Json(animal))
}

pub async fn set_animal_tags(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(animal_id): Path<Uuid>,
    Json(body): Json<SetTagsRequest>,
) -> AppResult<Json<Animal>> {
    let animal = AnimalService::new(state.db.clone())
        .set_animal_tags(&user, animal_id, body.tag_ids)
        .await?;
    Ok(Json(animal))
}

pub async fn export_animals(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let csv = CsvService::new(state.db.clone())
        .export_animals(&user, group_id)
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"animals.csv\""),
        ],
        csv,
    ))
}

pub async fn import_animals(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Json<ImportSummary>> {
    let (_, bytes) = read_upload(multipart).await?.into_file()?;
    let summary = CsvService::new(state.db.clone())
        .import_animals(&user, group_id, &bytes)
        .await?;
    Ok(Json(summary))
}

pub async fn list_animal_tags(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<Vec<Tag>>> {
    let tags = AnimalService::new(state.db.clone())
        .list_animal_tags(&user, group_id)
        .await?;
    Ok(Json(tags))
}

pub async fn create_animal_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
    Json(input): Json<TagInput>,
) -> AppResult<(StatusCode, Json<Tag>)> {
    let tag = AnimalService::new(state.db.clone())
        .create_animal_tag(&user, group_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

pub async fn update_animal_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((group_id, tag_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<TagInput>,
) -> AppResult<Json<Tag>> {
    let tag = AnimalService::new(state.db.clone())
        .update_animal_tag(&user, group_id, tag_id, input)
        .await?;
    Ok(Json(tag))
}

pub async fn delete_animal_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((group_id, tag_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    AnimalService::new(state.db.clone())
        .delete_animal_tag(&user, group_id, tag_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
