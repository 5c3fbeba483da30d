//! Per-group tag vocabularies for animals and comments

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use shared::{validate_tag_color, TagInput, DEFAULT_TAG_COLOR};

use crate::error::{AppError, AppResult};

/// Which tag vocabulary an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Animal,
    Comment,
}

impl TagKind {
    fn table(&self) -> &'static str {
        match self {
            TagKind::Animal => "animal_tags",
            TagKind::Comment => "comment_tags",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TagKind::Animal => "Animal tag",
            TagKind::Comment => "Comment tag",
        }
    }
}

/// A tag definition
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Tag {
    pub id: Uuid,
    pub group_id: Uuid,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

/// Tag as attached to an animal or comment
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TagRef {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

/// Tag service
#[derive(Clone)]
pub struct TagService {
    db: PgPool,
}

fn checked_color(color: Option<&str>) -> AppResult<String> {
    match color.map(str::trim).filter(|c| !c.is_empty()) {
        Some(color) => {
            validate_tag_color(color).map_err(|m| AppError::validation("color", m))?;
            Ok(color.to_ascii_uppercase())
        }
        None => Ok(DEFAULT_TAG_COLOR.to_string()),
    }
}

impl TagService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list(&self, kind: TagKind, group_id: Uuid) -> AppResult<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>(&format!(
            "SELECT id, group_id, name, color, created_at FROM {} WHERE group_id = $1 ORDER BY name",
            kind.table()
        ))
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;
        Ok(tags)
    }

    pub async fn create(&self, kind: TagKind, group_id: Uuid, input: TagInput) -> AppResult<Tag> {
        input.validate()?;
        let color = checked_color(input.color.as_deref())?;

        let tag = sqlx::query_as::<_, Tag>(&format!(
            r#"
            INSERT INTO {} (group_id, name, color)
            VALUES ($1, $2, $3)
            RETURNING id, group_id, name, color, created_at
            "#,
            kind.table()
        ))
        .bind(group_id)
        .bind(input.name.trim())
        .bind(&color)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(tag_id = %tag.id, %group_id, kind = kind.table(), "Tag created");
        Ok(tag)
    }

    pub async fn update(
        &self,
        kind: TagKind,
        group_id: Uuid,
        tag_id: Uuid,
        input: TagInput,
    ) -> AppResult<Tag> {
        input.validate()?;
        let color = checked_color(input.color.as_deref())?;

        sqlx::query_as::<_, Tag>(&format!(
            r#"
            UPDATE {} SET name = $3, color = $4
            WHERE id = $1 AND group_id = $2
            RETURNING id, group_id, name, color, created_at
            "#,
            kind.table()
        ))
        .bind(tag_id)
        .bind(group_id)
        .bind(input.name.trim())
        .bind(&color)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(kind.label().to_string()))
    }

    /// Delete a tag; its assignments cascade
    pub async fn delete(&self, kind: TagKind, group_id: Uuid, tag_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE id = $1 AND group_id = $2",
            kind.table()
        ))
        .bind(tag_id)
        .bind(group_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(kind.label().to_string()));
        }
        Ok(())
    }
}

/// Reject tag ids that do not belong to the group
pub async fn ensure_tags_in_group(
    conn: &mut PgConnection,
    kind: TagKind,
    group_id: Uuid,
    tag_ids: &[Uuid],
) -> AppResult<()> {
    if tag_ids.is_empty() {
        return Ok(());
    }
    let mut unique = tag_ids.to_vec();
    unique.sort();
    unique.dedup();

    let found = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {} WHERE group_id = $1 AND id = ANY($2)",
        kind.table()
    ))
    .bind(group_id)
    .bind(&unique)
    .fetch_one(&mut *conn)
    .await?;

    if found != unique.len() as i64 {
        return Err(AppError::validation(
            "tag_ids",
            "Tags must belong to the animal's group",
        ));
    }
    Ok(())
}

/// Look up a tag by case-insensitive name, creating it when missing
pub async fn find_or_create_tag(
    conn: &mut PgConnection,
    kind: TagKind,
    group_id: Uuid,
    name: &str,
    color: Option<&str>,
) -> AppResult<Uuid> {
    let name = name.trim();
    let color = checked_color(color)?;
    let id = sqlx::query_scalar::<_, Uuid>(&format!(
        r#"
        INSERT INTO {table} (group_id, name, color)
        VALUES ($1, $2, $3)
        ON CONFLICT (group_id, LOWER(name)) DO UPDATE SET name = {table}.name
        RETURNING id
        "#,
        table = kind.table()
    ))
    .bind(group_id)
    .bind(name)
    .bind(&color)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}
