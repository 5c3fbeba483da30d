//! Comment, session note and comment tag handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use shared::{CreateCommentInput, PaginatedResponse, Pagination, TagInput, UpdateCommentInput};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::comment::{Comment, CommentFilter};
use crate::services::tag::Tag;
use crate::AppState;

pub async fn list_comments(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(animal_id): Path<Uuid>,
    Query(filter): Query<CommentFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<Comment>>> {
    let comments = state
        .comment_service()
        .list_comments(&user, animal_id, filter, pagination)
        .await?;
    Ok(Json(comments))
}

/// Latest comments across every animal in a group
pub async fn group_feed(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<Comment>>> {
    let feed = state
        .comment_service()
        .list_group_feed(&user, group_id, pagination)
        .await?;
    Ok(Json(feed))
}

pub async fn create_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(animal_id): Path<Uuid>,
    Json(input): Json<CreateCommentInput>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let comment = state
        .comment_service()
        .create_comment(&user, animal_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn update_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(comment_id): Path<Uuid>,
    Json(input): Json<UpdateCommentInput>,
) -> AppResult<Json<Comment>> {
    let comment = state
        .comment_service()
        .update_comment(&user, comment_id, input)
        .await?;
    Ok(Json(comment))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(comment_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state
        .comment_service()
        .delete_comment(&user, comment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_comment_tags(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<Vec<Tag>>> {
    let tags = state
        .comment_service()
        .list_comment_tags(&user, group_id)
        .await?;
    Ok(Json(tags))
}

pub async fn create_comment_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
    Json(input): Json<TagInput>,
) -> AppResult<(StatusCode, Json<Tag>)> {
    let tag = state
        .comment_service()
        .create_comment_tag(&user, group_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

pub async fn update_comment_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((group_id, tag_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<TagInput>,
) -> AppResult<Json<Tag>> {
    let tag = state
        .comment_service()
        .update_comment_tag(&user, group_id, tag_id, input)
        .await?;
    Ok(Json(tag))
}

pub async fn delete_comment_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((group_id, tag_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    state
        .comment_service()
        .delete_comment_tag(&user, group_id, tag_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
