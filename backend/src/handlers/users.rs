//! User administration handlers (site admins only)

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use shared::{CreateUserInput, GroupMembershipInput, PaginatedResponse, Pagination, UpdateUserInput};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::user::{User, UserDetail, UserFilter};
use crate::services::UserService;
use crate::AppState;

pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<UserFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<User>>> {
    user.require_admin()?;
    let users = UserService::new(state.db.clone())
        .list_users(filter, pagination)
        .await?;
    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserDetail>> {
    user.require_admin()?;
    let detail = UserService::new(state.db.clone()).get_user(user_id).await?;
    Ok(Json(detail))
}

pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateUserInput>,
) -> AppResult<(StatusCode, Json<UserDetail>)> {
    user.require_admin()?;
    let created = UserService::new(state.db.clone()).create_user(input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
    Json(input): Json<UpdateUserInput>,
) -> AppResult<Json<UserDetail>> {
    user.require_admin()?;
    let updated = UserService::new(state.db.clone())
        .update_user(&user, user_id, input)
        .await?;
    Ok(Json(updated))
}

pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    UserService::new(state.db.clone())
        .delete_user(&user, user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restore_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserDetail>> {
    user.require_admin()?;
    let restored = UserService::new(state.db.clone()).restore_user(user_id).await?;
    Ok(Json(restored))
}

pub async fn set_user_groups(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
    Json(memberships): Json<Vec<GroupMembershipInput>>,
) -> AppResult<Json<UserDetail>> {
    user.require_admin()?;
    let detail = UserService::new(state.db.clone())
        .set_user_groups(user_id, memberships)
        .await?;
    Ok(Json(detail))
}

pub async fn export_users(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<impl IntoResponse> {
    user.require_admin()?;
    let csv = UserService::new(state.db.clone()).export_users_csv().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"users.csv\""),
        ],
        csv,
    ))
}
