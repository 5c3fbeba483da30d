//! Volunteer group service: groups, memberships and access checks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use shared::{
    validate_group_name, CreateGroupInput, UpdateGroupInput, DEFAULT_ANIMAL_TAGS,
    DEFAULT_COMMENT_TAGS,
};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;

/// Group service
#[derive(Clone)]
pub struct GroupService {
    db: PgPool,
}

/// Group with activity counts
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub groupme_bot_id: Option<String>,
    pub image_url: Option<String>,
    pub member_count: i64,
    pub animal_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A member of a group
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct GroupMember {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub is_group_admin: bool,
    pub joined_at: DateTime<Utc>,
}

/// Input for adding a member
#[derive(Debug, Deserialize)]
pub struct AddMemberInput {
    pub user_id: Uuid,
    #[serde(default)]
    pub is_group_admin: bool,
}

/// Input for changing a member's role
#[derive(Debug, Deserialize)]
pub struct UpdateMemberInput {
    pub is_group_admin: bool,
}

const GROUP_COLUMNS: &str = r#"
    g.id, g.name, g.description, g.groupme_bot_id, g.image_url,
    (SELECT COUNT(*) FROM user_groups ug
        JOIN users u ON u.id = ug.user_id
        WHERE ug.group_id = g.id AND u.deleted_at IS NULL) AS member_count,
    (SELECT COUNT(*) FROM animals a
        WHERE a.group_id = g.id AND a.deleted_at IS NULL) AS animal_count,
    g.created_at, g.updated_at
"#;

/// Fail unless the group exists and the caller is a site admin or a member
pub async fn ensure_group_access(db: &PgPool, auth: &AuthUser, group_id: Uuid) -> AppResult<()> {
    let membership = sqlx::query_as::<_, (bool, Option<bool>)>(
        r#"
        SELECT TRUE, ug.is_group_admin
        FROM groups g
        LEFT JOIN user_groups ug ON ug.group_id = g.id AND ug.user_id = $2
        WHERE g.id = $1 AND g.deleted_at IS NULL
        "#,
    )
    .bind(group_id)
    .bind(auth.user_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::NotFound("Group".to_string()))?;

    if auth.is_admin || membership.1.is_some() {
        Ok(())
    } else {
        Err(AppError::Forbidden("You are not a member of this group".to_string()))
    }
}

/// Fail unless the caller is a site admin or an admin of the group
pub async fn ensure_group_admin(db: &PgPool, auth: &AuthUser, group_id: Uuid) -> AppResult<()> {
    let membership = sqlx::query_as::<_, (bool, Option<bool>)>(
        r#"
        SELECT TRUE, ug.is_group_admin
        FROM groups g
        LEFT JOIN user_groups ug ON ug.group_id = g.id AND ug.user_id = $2
        WHERE g.id = $1 AND g.deleted_at IS NULL
        "#,
    )
    .bind(group_id)
    .bind(auth.user_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::NotFound("Group".to_string()))?;

    if auth.is_admin || membership.1 == Some(true) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Group admin access required".to_string()))
    }
}

impl GroupService {
    /// Create a new GroupService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Admins see every group; volunteers see the groups they belong to
    pub async fn list_groups(&self, auth: &AuthUser) -> AppResult<Vec<Group>> {
        let groups = sqlx::query_as::<_, Group>(&format!(
            r#"
            SELECT {GROUP_COLUMNS}
            FROM groups g
            WHERE g.deleted_at IS NULL
              AND ($1 OR EXISTS (
                  SELECT 1 FROM user_groups ug WHERE ug.group_id = g.id AND ug.user_id = $2
              ))
            ORDER BY g.name
            "#
        ))
        .bind(auth.is_admin)
        .bind(auth.user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(groups)
    }

    pub async fn get_group(&self, auth: &AuthUser, group_id: Uuid) -> AppResult<Group> {
        ensure_group_access(&self.db, auth, group_id).await?;
        self.fetch(group_id).await
    }

    async fn fetch(&self, group_id: Uuid) -> AppResult<Group> {
        sqlx::query_as::<_, Group>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups g WHERE g.id = $1 AND g.deleted_at IS NULL"
        ))
        .bind(group_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Group".to_string()))
    }

    /// Create a group with the default tag vocabularies (site admin only)
    pub async fn create_group(&self, auth: &AuthUser, input: CreateGroupInput) -> AppResult<Group> {
        auth.require_admin()?;
        input.validate()?;
        let name = input.name.trim();
        validate_group_name(name).map_err(|m| AppError::validation("name", m))?;

        let mut tx = self.db.begin().await?;

        let group_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO groups (name, description, groupme_bot_id, image_url)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(&input.description)
        .bind(&input.groupme_bot_id)
        .bind(&input.image_url)
        .fetch_one(&mut *tx)
        .await?;

        for (tag, color) in DEFAULT_COMMENT_TAGS {
            sqlx::query(
                "INSERT INTO comment_tags (group_id, name, color) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(group_id)
            .bind(tag)
            .bind(color)
            .execute(&mut *tx)
            .await?;
        }
        for (tag, color) in DEFAULT_ANIMAL_TAGS {
            sqlx::query(
                "INSERT INTO animal_tags (group_id, name, color) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(group_id)
            .bind(tag)
            .bind(color)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(%group_id, created_by = %auth.user_id, "Group created");

        self.fetch(group_id).await
    }

    pub async fn update_group(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        input: UpdateGroupInput,
    ) -> AppResult<Group> {
        ensure_group_admin(&self.db, auth, group_id).await?;
        input.validate()?;
        let name = input.name.as_deref().map(str::trim);
        if let Some(name) = name {
            validate_group_name(name).map_err(|m| AppError::validation("name", m))?;
        }

        sqlx::query(
            r#"
            UPDATE groups SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                groupme_bot_id = COALESCE($4, groupme_bot_id),
                image_url = COALESCE($5, image_url)
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(group_id)
        .bind(name)
        .bind(&input.description)
        .bind(&input.groupme_bot_id)
        .bind(&input.image_url)
        .execute(&self.db)
        .await?;

        self.fetch(group_id).await
    }

    /// Soft-delete a group. Refuses while it still holds animals unless forced.
    pub async fn delete_group(&self, auth: &AuthUser, group_id: Uuid, force: bool) -> AppResult<()> {
        auth.require_admin()?;
        let group = self.fetch(group_id).await?;

        if group.animal_count > 0 && !force {
            return Err(AppError::conflict(
                "group",
                format!(
                    "Group still has {} animals; move them or delete with force",
                    group.animal_count
                ),
            ));
        }

        let mut tx = self.db.begin().await?;
        if force {
            sqlx::query(
                "UPDATE animals SET deleted_at = NOW() WHERE group_id = $1 AND deleted_at IS NULL",
            )
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("UPDATE groups SET deleted_at = NOW() WHERE id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(%group_id, force, "Group deleted");
        Ok(())
    }

    pub async fn list_members(&self, auth: &AuthUser, group_id: Uuid) -> AppResult<Vec<GroupMember>> {
        ensure_group_access(&self.db, auth, group_id).await?;

        let members = sqlx::query_as::<_, GroupMember>(
            r#"
            SELECT u.id AS user_id, u.name, u.email, ug.is_group_admin, ug.created_at AS joined_at
            FROM user_groups ug
            JOIN users u ON u.id = ug.user_id
            WHERE ug.group_id = $1 AND u.deleted_at IS NULL
            ORDER BY u.name
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;
        Ok(members)
    }

    pub async fn add_member(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        input: AddMemberInput,
    ) -> AppResult<()> {
        ensure_group_admin(&self.db, auth, group_id).await?;

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(input.user_id)
        .fetch_one(&self.db)
        .await?;
        if exists == 0 {
            return Err(AppError::NotFound("User".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO user_groups (user_id, group_id, is_group_admin)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, group_id) DO UPDATE SET is_group_admin = EXCLUDED.is_group_admin
            "#,
        )
        .bind(input.user_id)
        .bind(group_id)
        .bind(input.is_group_admin)
        .execute(&self.db)
        .await?;

        tracing::info!(%group_id, user_id = %input.user_id, "Group member added");
        Ok(())
    }

    pub async fn remove_member(&self, auth: &AuthUser, group_id: Uuid, user_id: Uuid) -> AppResult<()> {
        ensure_group_admin(&self.db, auth, group_id).await?;

        let result = sqlx::query("DELETE FROM user_groups WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Group member".to_string()));
        }
        Ok(())
    }

    pub async fn set_group_admin(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        user_id: Uuid,
        is_group_admin: bool,
    ) -> AppResult<()> {
        ensure_group_admin(&self.db, auth, group_id).await?;

        let result = sqlx::query(
            "UPDATE user_groups SET is_group_admin = $3 WHERE group_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(is_group_admin)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Group member".to_string()));
        }
        Ok(())
    }
}
