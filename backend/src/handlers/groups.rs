//! Group and membership handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use shared::{CreateGroupInput, UpdateGroupInput};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::group::{AddMemberInput, Group, GroupMember, UpdateMemberInput};
use crate::services::GroupService;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DeleteGroupQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn list_groups(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<Group>>> {
    let groups = GroupService::new(state.db.clone()).list_groups(&user).await?;
    Ok(Json(groups))
}

pub async fn get_group(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<Group>> {
    let group = GroupService::new(state.db.clone())
        .get_group(&user, group_id)
        .await?;
    Ok(Json(group))
}

pub async fn create_group(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateGroupInput>,
) -> AppResult<(StatusCode, Json<Group>)> {
    let group = GroupService::new(state.db.clone())
        .create_group(&user, input)
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn update_group(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
    Json(input): Json<UpdateGroupInput>,
) -> AppResult<Json<Group>> {
    let group = GroupService::new(state.db.clone())
        .update_group(&user, group_id, input)
        .await?;
    Ok(Json(group))
}

pub async fn delete_group(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
    Query(query): Query<DeleteGroupQuery>,
) -> AppResult<StatusCode> {
    GroupService::new(state.db.clone())
        .delete_group(&user, group_id, query.force)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<Vec<GroupMember>>> {
    let members = GroupService::new(state.db.clone())
        .list_members(&user, group_id)
        .await?;
    Ok(Json(members))
}

pub async fn add_member(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(group_id): Path<Uuid>,
    Json(input): Json<AddMemberInput>,
) -> AppResult<(StatusCode, Json<Vec<GroupMember>>)> {
    let service = GroupService::new(state.db.clone());
    service.add_member(&user, group_id, input).await?;
    let members = service.list_members(&user, group_id).await?;
    Ok((StatusCode::CREATED, Json(members)))
}

pub async fn update_member(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((group_id, member_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateMemberInput>,
) -> AppResult<Json<Vec<GroupMember>>> {
    let service = GroupService::new(state.db.clone());
    service
        .set_group_admin(&user, group_id, member_id, input.is_group_admin)
        .await?;
    let members = service.list_members(&user, group_id).await?;
    Ok(Json(members))
}

pub async fn remove_member(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((group_id, member_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    GroupService::new(state.db.clone())
        .remove_member(&user, group_id, member_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
