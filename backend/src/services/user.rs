//! User administration service

use bcrypt::{hash, DEFAULT_COST};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use shared::{
    normalize_email, validate_email, validate_password, CreateUserInput, GroupMembershipInput,
    PaginatedResponse, Pagination, UpdateUserInput,
};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::auth::MembershipSummary;
use crate::services::csv_io::write_csv;
use crate::services::search_pattern;

/// User service
#[derive(Clone)]
pub struct UserService {
    db: PgPool,
}

/// User account as shown to administrators
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
    pub email_notifications: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// User with memberships
#[derive(Debug, Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    pub groups: Vec<MembershipSummary>,
}

/// Filter for the user list
#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub search: Option<String>,
    pub group_id: Option<Uuid>,
    #[serde(default)]
    pub include_deleted: bool,
}

/// Row in the user CSV export
#[derive(Debug, Serialize, FromRow)]
pub struct UserExportRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
    pub groups: String,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const USER_COLUMNS: &str = "u.id, u.email, u.name, u.phone, u.is_admin, u.is_active, \
     u.email_notifications, u.last_login_at, u.created_at, u.updated_at, u.deleted_at";

impl UserService {
    /// Create a new UserService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_users(
        &self,
        filter: UserFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<User>> {
        let pattern = search_pattern(filter.search.as_deref());
        let where_clause = r#"
            WHERE ($1 OR u.deleted_at IS NULL)
              AND ($2::text IS NULL OR u.name ILIKE $2 OR u.email ILIKE $2)
              AND ($3::uuid IS NULL OR EXISTS (
                  SELECT 1 FROM user_groups ug WHERE ug.user_id = u.id AND ug.group_id = $3
              ))
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM users u {where_clause}"
        ))
        .bind(filter.include_deleted)
        .bind(&pattern)
        .bind(filter.group_id)
        .fetch_one(&self.db)
        .await?;

        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users u {where_clause} ORDER BY u.name, u.email LIMIT $4 OFFSET $5"
        ))
        .bind(filter.include_deleted)
        .bind(&pattern)
        .bind(filter.group_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(users, pagination, total))
    }

    pub async fn get_user(&self, user_id: Uuid) -> AppResult<UserDetail> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        let groups = sqlx::query_as::<_, MembershipSummary>(
            r#"
            SELECT g.id AS group_id, g.name AS group_name, ug.is_group_admin
            FROM user_groups ug
            JOIN groups g ON g.id = ug.group_id
            WHERE ug.user_id = $1 AND g.deleted_at IS NULL
            ORDER BY g.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(UserDetail { user, groups })
    }

    pub async fn create_user(&self, input: CreateUserInput) -> AppResult<UserDetail> {
        input.validate()?;
        validate_email(&input.email).map_err(|m| AppError::validation("email", m))?;
        validate_password(&input.password).map_err(|m| AppError::validation("password", m))?;

        let password_hash = hash(&input.password, DEFAULT_COST)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

        let mut tx = self.db.begin().await?;

        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO users (email, name, password_hash, phone, is_admin, email_notifications)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(normalize_email(&input.email))
        .bind(input.name.trim())
        .bind(&password_hash)
        .bind(&input.phone)
        .bind(input.is_admin)
        .bind(input.email_notifications)
        .fetch_one(&mut *tx)
        .await?;

        for group_id in &input.group_ids {
            sqlx::query("INSERT INTO user_groups (user_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(user_id)
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::info!(%user_id, "User created");

        self.get_user(user_id).await
    }

    pub async fn update_user(
        &self,
        auth: &AuthUser,
        user_id: Uuid,
        input: UpdateUserInput,
    ) -> AppResult<UserDetail> {
        input.validate()?;

        if user_id == auth.user_id
            && (input.is_admin == Some(false) || input.is_active == Some(false))
        {
            return Err(AppError::validation(
                "is_admin",
                "You cannot remove your own admin access or deactivate yourself",
            ));
        }

        let email = match input.email.as_deref() {
            Some(email) => {
                validate_email(email).map_err(|m| AppError::validation("email", m))?;
                Some(normalize_email(email))
            }
            None => None,
        };

        let password_hash = match input.password.as_deref() {
            Some(password) => {
                validate_password(password).map_err(|m| AppError::validation("password", m))?;
                Some(
                    hash(password, DEFAULT_COST)
                        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?,
                )
            }
            None => None,
        };

        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                name = COALESCE($3, name),
                phone = COALESCE($4, phone),
                is_admin = COALESCE($5, is_admin),
                is_active = COALESCE($6, is_active),
                email_notifications = COALESCE($7, email_notifications),
                password_hash = COALESCE($8, password_hash)
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(&email)
        .bind(input.name.as_deref().map(str::trim))
        .bind(&input.phone)
        .bind(input.is_admin)
        .bind(input.is_active)
        .bind(input.email_notifications)
        .bind(&password_hash)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User".to_string()));
        }

        // Deactivation or a new password ends existing sessions
        if password_hash.is_some() || input.is_active == Some(false) {
            sqlx::query(
                "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.get_user(user_id).await
    }

    /// Soft-delete a user and revoke their sessions
    pub async fn delete_user(&self, auth: &AuthUser, user_id: Uuid) -> AppResult<()> {
        if auth.user_id == user_id {
            return Err(AppError::BadRequest("You cannot delete your own account".to_string()));
        }

        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "UPDATE users SET deleted_at = NOW(), is_active = FALSE WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User".to_string()));
        }

        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(%user_id, deleted_by = %auth.user_id, "User deleted");
        Ok(())
    }

    pub async fn restore_user(&self, user_id: Uuid) -> AppResult<UserDetail> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = NULL, is_active = TRUE WHERE id = $1 AND deleted_at IS NOT NULL",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Deleted user".to_string()));
        }
        tracing::info!(%user_id, "User restored");
        self.get_user(user_id).await
    }

    /// Replace all of a user's group memberships
    pub async fn set_user_groups(
        &self,
        user_id: Uuid,
        memberships: Vec<GroupMembershipInput>,
    ) -> AppResult<UserDetail> {
        let mut tx = self.db.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if exists == 0 {
            return Err(AppError::NotFound("User".to_string()));
        }

        sqlx::query("DELETE FROM user_groups WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for membership in &memberships {
            sqlx::query(
                r#"
                INSERT INTO user_groups (user_id, group_id, is_group_admin)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id, group_id) DO UPDATE SET is_group_admin = EXCLUDED.is_group_admin
                "#,
            )
            .bind(user_id)
            .bind(membership.group_id)
            .bind(membership.is_group_admin)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.get_user(user_id).await
    }

    /// All active accounts as CSV
    pub async fn export_users_csv(&self) -> AppResult<String> {
        let rows = sqlx::query_as::<_, UserExportRow>(
            r#"
            SELECT u.id, u.email, u.name, u.phone, u.is_admin, u.is_active,
                   COALESCE(string_agg(g.name, ';' ORDER BY g.name), '') AS groups,
                   u.last_login_at, u.created_at
            FROM users u
            LEFT JOIN user_groups ug ON ug.user_id = u.id
            LEFT JOIN groups g ON g.id = ug.group_id AND g.deleted_at IS NULL
            WHERE u.deleted_at IS NULL
            GROUP BY u.id
            ORDER BY u.name, u.email
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        write_csv(&rows)
    }
}
