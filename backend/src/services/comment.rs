//! Comment and session-note service

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use shared::{
    validate_session_note, CommentKind, CreateCommentInput, PaginatedResponse, Pagination,
    SessionNote, TagInput, UpdateCommentInput,
};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::animal::AnimalService;
use crate::services::group::{ensure_group_access, ensure_group_admin};
use crate::services::notification::{CommentNotice, NotificationService};
use crate::services::settings::SettingsService;
use crate::services::tag::{ensure_tags_in_group, Tag, TagKind, TagRef, TagService};

/// Comment service
#[derive(Clone)]
pub struct CommentService {
    db: PgPool,
    settings: SettingsService,
    notifier: NotificationService,
}

#[derive(Debug, Clone, FromRow)]
struct CommentRow {
    id: Uuid,
    animal_id: Uuid,
    animal_name: String,
    group_id: Uuid,
    user_id: Uuid,
    author_name: String,
    content: String,
    kind: String,
    session_goal: Option<String>,
    session_outcome: Option<String>,
    session_rating: Option<i32>,
    behavior_notes: Option<String>,
    image_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Comment author
#[derive(Debug, Clone, Serialize)]
pub struct CommentAuthor {
    pub id: Uuid,
    pub name: String,
}

/// A comment with its session details and tags
#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: Uuid,
    pub animal_id: Uuid,
    pub animal_name: String,
    pub author: CommentAuthor,
    pub content: String,
    pub kind: CommentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionNote>,
    pub image_id: Option<Uuid>,
    pub tags: Vec<TagRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Query filter for comment listings
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CommentFilter {
    pub tag_id: Option<Uuid>,
    pub kind: Option<CommentKind>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, FromRow)]
struct AssignedTag {
    comment_id: Uuid,
    id: Uuid,
    name: String,
    color: String,
}

const COMMENT_SELECT: &str = r#"
    SELECT c.id, c.animal_id, a.name AS animal_name, a.group_id, c.user_id,
           u.name AS author_name, c.content, c.kind, c.session_goal, c.session_outcome,
           c.session_rating, c.behavior_notes, c.image_id, c.created_at, c.updated_at
    FROM animal_comments c
    JOIN animals a ON a.id = c.animal_id
    JOIN users u ON u.id = c.user_id
"#;

impl CommentRow {
    fn into_comment(self, tags: Vec<TagRef>) -> Comment {
        let kind: CommentKind = self.kind.parse().unwrap_or_default();
        let session = match kind {
            CommentKind::Session => Some(SessionNote {
                goal: self.session_goal,
                outcome: self.session_outcome,
                rating: self.session_rating,
                behavior_notes: self.behavior_notes,
            }),
            CommentKind::Note => None,
        };
        Comment {
            id: self.id,
            animal_id: self.animal_id,
            animal_name: self.animal_name,
            author: CommentAuthor {
                id: self.user_id,
                name: self.author_name,
            },
            content: self.content,
            kind,
            session,
            image_id: self.image_id,
            tags,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Check whether `auth` may edit a comment written at `created_at`.
/// Admins may always edit; authors only inside the window.
pub fn check_edit_window(
    auth: &AuthUser,
    author_id: Uuid,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Duration,
) -> AppResult<()> {
    if auth.is_admin {
        return Ok(());
    }
    if auth.user_id != author_id {
        return Err(AppError::Forbidden(
            "Only the author can edit this comment".to_string(),
        ));
    }
    if now - created_at > window {
        return Err(AppError::Forbidden(
            "The edit window for this comment has passed".to_string(),
        ));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CommentService {
    pub fn new(db: PgPool, settings: SettingsService, notifier: NotificationService) -> Self {
        Self {
            db,
            settings,
            notifier,
        }
    }

    fn tags(&self) -> TagService {
        TagService::new(self.db.clone())
    }

    async fn attach_tags(&self, rows: Vec<CommentRow>) -> AppResult<Vec<Comment>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let assigned = sqlx::query_as::<_, AssignedTag>(
            r#"
            SELECT cta.comment_id, t.id, t.name, t.color
            FROM comment_tag_assignments cta
            JOIN comment_tags t ON t.id = cta.tag_id
            WHERE cta.comment_id = ANY($1)
            ORDER BY t.name
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        let mut by_comment: HashMap<Uuid, Vec<TagRef>> = HashMap::new();
        for tag in assigned {
            by_comment.entry(tag.comment_id).or_default().push(TagRef {
                id: tag.id,
                name: tag.name,
                color: tag.color,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let tags = by_comment.remove(&row.id).unwrap_or_default();
                row.into_comment(tags)
            })
            .collect())
    }

    async fn fetch_row(&self, comment_id: Uuid) -> AppResult<CommentRow> {
        sqlx::query_as::<_, CommentRow>(&format!(
            "{COMMENT_SELECT} WHERE c.id = $1 AND c.deleted_at IS NULL AND a.deleted_at IS NULL"
        ))
        .bind(comment_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment".to_string()))
    }

    async fn fetch(&self, comment_id: Uuid) -> AppResult<Comment> {
        let row = self.fetch_row(comment_id).await?;
        let mut comments = self.attach_tags(vec![row]).await?;
        comments
            .pop()
            .ok_or_else(|| AppError::NotFound("Comment".to_string()))
    }

    /// Comments on an animal, newest first
    pub async fn list_comments(
        &self,
        auth: &AuthUser,
        animal_id: Uuid,
        filter: CommentFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Comment>> {
        AnimalService::new(self.db.clone())
            .group_of(auth, animal_id)
            .await?;

        let kind = filter.kind.map(|k| k.as_str());
        let where_clause = r#"
            WHERE c.animal_id = $1
              AND c.deleted_at IS NULL
              AND ($2::uuid IS NULL OR EXISTS (
                  SELECT 1 FROM comment_tag_assignments cta
                  WHERE cta.comment_id = c.id AND cta.tag_id = $2
              ))
              AND ($3::text IS NULL OR c.kind = $3)
              AND ($4::uuid IS NULL OR c.user_id = $4)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM animal_comments c {where_clause}"
        ))
        .bind(animal_id)
        .bind(filter.tag_id)
        .bind(kind)
        .bind(filter.user_id)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, CommentRow>(&format!(
            "{COMMENT_SELECT} {where_clause} ORDER BY c.created_at DESC, c.id LIMIT $5 OFFSET $6"
        ))
        .bind(animal_id)
        .bind(filter.tag_id)
        .bind(kind)
        .bind(filter.user_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let comments = self.attach_tags(rows).await?;
        Ok(PaginatedResponse::new(comments, pagination, total))
    }

    /// Recent comments across every active animal in a group
    pub async fn list_group_feed(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Comment>> {
        ensure_group_access(&self.db, auth, group_id).await?;

        let where_clause =
            "WHERE a.group_id = $1 AND a.deleted_at IS NULL AND c.deleted_at IS NULL";

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM animal_comments c JOIN animals a ON a.id = c.animal_id {where_clause}"
        ))
        .bind(group_id)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, CommentRow>(&format!(
            "{COMMENT_SELECT} {where_clause} ORDER BY c.created_at DESC, c.id LIMIT $2 OFFSET $3"
        ))
        .bind(group_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let comments = self.attach_tags(rows).await?;
        Ok(PaginatedResponse::new(comments, pagination, total))
    }

    /// Log a comment and notify the group in the background
    pub async fn create_comment(
        &self,
        auth: &AuthUser,
        animal_id: Uuid,
        input: CreateCommentInput,
    ) -> AppResult<Comment> {
        let group_id = AnimalService::new(self.db.clone())
            .group_of(auth, animal_id)
            .await?;
        input.validate()?;
        validate_session_note(input.kind, input.session.as_ref())?;

        let session = input.session.unwrap_or_default();
        let mut tx = self.db.begin().await?;

        ensure_tags_in_group(&mut *tx, TagKind::Comment, group_id, &input.tag_ids).await?;

        if let Some(image_id) = input.image_id {
            let matches = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM animal_images WHERE id = $1 AND animal_id = $2",
            )
            .bind(image_id)
            .bind(animal_id)
            .fetch_one(&mut *tx)
            .await?;
            if matches == 0 {
                return Err(AppError::validation(
                    "image_id",
                    "Image does not belong to this animal",
                ));
            }
        }

        let (comment_id, created_at) = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            INSERT INTO animal_comments
                (animal_id, user_id, content, kind, session_goal, session_outcome,
                 session_rating, behavior_notes, image_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, created_at
            "#,
        )
        .bind(animal_id)
        .bind(auth.user_id)
        .bind(input.content.trim())
        .bind(input.kind.as_str())
        .bind(non_blank(session.goal))
        .bind(non_blank(session.outcome))
        .bind(session.rating)
        .bind(non_blank(session.behavior_notes))
        .bind(input.image_id)
        .fetch_one(&mut *tx)
        .await?;

        for tag_id in &input.tag_ids {
            sqlx::query(
                "INSERT INTO comment_tag_assignments (comment_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(comment_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE animals SET last_comment_at = GREATEST(COALESCE(last_comment_at, $2), $2) WHERE id = $1",
        )
        .bind(animal_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let comment = self.fetch(comment_id).await?;
        tracing::info!(%comment_id, %animal_id, kind = comment.kind.as_str(), "Comment created");

        let notice = CommentNotice {
            comment_id,
            animal_id,
            animal_name: comment.animal_name.clone(),
            group_id,
            author_id: auth.user_id,
            author_name: comment.author.name.clone(),
            kind: comment.kind,
            rating: comment.session.as_ref().and_then(|s| s.rating),
            content: comment.content.clone(),
        };
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_new_comment(&notice).await {
                tracing::warn!(comment_id = %notice.comment_id, error = %e, "Comment notification failed");
            }
        });

        Ok(comment)
    }

    /// Edit a comment. Authors may edit inside the configured window; admins always.
    pub async fn update_comment(
        &self,
        auth: &AuthUser,
        comment_id: Uuid,
        input: UpdateCommentInput,
    ) -> AppResult<Comment> {
        input.validate()?;
        let row = self.fetch_row(comment_id).await?;
        ensure_group_access(&self.db, auth, row.group_id).await?;

        let window = self.settings.comment_edit_window().await?;
        check_edit_window(auth, row.user_id, row.created_at, Utc::now(), window)?;

        let kind: CommentKind = row.kind.parse().unwrap_or_default();
        if let Some(session) = &input.session {
            validate_session_note(kind, Some(session))?;
        }

        let mut tx = self.db.begin().await?;

        if let Some(tag_ids) = &input.tag_ids {
            ensure_tags_in_group(&mut *tx, TagKind::Comment, row.group_id, tag_ids).await?;
        }

        let session = input.session.clone().unwrap_or_default();
        let replace_session = input.session.is_some();

        sqlx::query(
            r#"
            UPDATE animal_comments SET
                content = COALESCE($2, content),
                session_goal = CASE WHEN $3 THEN $4 ELSE session_goal END,
                session_outcome = CASE WHEN $3 THEN $5 ELSE session_outcome END,
                session_rating = CASE WHEN $3 THEN $6 ELSE session_rating END,
                behavior_notes = CASE WHEN $3 THEN $7 ELSE behavior_notes END
            WHERE id = $1
            "#,
        )
        .bind(comment_id)
        .bind(input.content.as_deref().map(str::trim))
        .bind(replace_session)
        .bind(non_blank(session.goal))
        .bind(non_blank(session.outcome))
        .bind(session.rating)
        .bind(non_blank(session.behavior_notes))
        .execute(&mut *tx)
        .await?;

        if let Some(tag_ids) = &input.tag_ids {
            sqlx::query("DELETE FROM comment_tag_assignments WHERE comment_id = $1")
                .bind(comment_id)
                .execute(&mut *tx)
                .await?;
            for tag_id in tag_ids {
                sqlx::query(
                    "INSERT INTO comment_tag_assignments (comment_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(comment_id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        self.fetch(comment_id).await
    }

    /// Soft-delete a comment (author or admin)
    pub async fn delete_comment(&self, auth: &AuthUser, comment_id: Uuid) -> AppResult<()> {
        let row = self.fetch_row(comment_id).await?;
        ensure_group_access(&self.db, auth, row.group_id).await?;
        if !auth.can_modify(row.user_id) {
            return Err(AppError::Forbidden(
                "Only the author can delete this comment".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE animal_comments SET deleted_at = NOW() WHERE id = $1")
            .bind(comment_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            UPDATE animals SET last_comment_at = (
                SELECT MAX(created_at) FROM animal_comments
                WHERE animal_id = $1 AND deleted_at IS NULL
            )
            WHERE id = $1
            "#,
        )
        .bind(row.animal_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(%comment_id, deleted_by = %auth.user_id, "Comment deleted");
        Ok(())
    }

    // ========================================================================
    // Comment Tags
    // ========================================================================

    pub async fn list_comment_tags(&self, auth: &AuthUser, group_id: Uuid) -> AppResult<Vec<Tag>> {
        ensure_group_access(&self.db, auth, group_id).await?;
        self.tags().list(TagKind::Comment, group_id).await
    }

    pub async fn create_comment_tag(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        input: TagInput,
    ) -> AppResult<Tag> {
        ensure_group_admin(&self.db, auth, group_id).await?;
        self.tags().create(TagKind::Comment, group_id, input).await
    }

    pub async fn update_comment_tag(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        tag_id: Uuid,
        input: TagInput,
    ) -> AppResult<Tag> {
        ensure_group_admin(&self.db, auth, group_id).await?;
        self.tags().update(TagKind::Comment, group_id, tag_id, input).await
    }

    pub async fn delete_comment_tag(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        tag_id: Uuid,
    ) -> AppResult<()> {
        ensure_group_admin(&self.db, auth, group_id).await?;
        self.tags().delete(TagKind::Comment, group_id, tag_id).await
    }
}
