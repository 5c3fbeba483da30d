//! Animal profile service with filtering, tags and soft delete

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use shared::{
    validate_weight, AnimalSort, AnimalStatus, CreateAnimalInput, PaginatedResponse, Pagination,
    SortOrder, TagInput, UpdateAnimalInput,
};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::group::{ensure_group_access, ensure_group_admin};
use crate::services::search_pattern;
use crate::services::tag::{ensure_tags_in_group, Tag, TagKind, TagRef, TagService};

/// Animal service
#[derive(Clone)]
pub struct AnimalService {
    db: PgPool,
}

/// Stored animal profile
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AnimalRecord {
    pub id: Uuid,
    pub group_id: Uuid,
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
    pub sex: String,
    pub birth_date: Option<NaiveDate>,
    pub status: String,
    pub kennel: Option<String>,
    pub description: Option<String>,
    pub weight_lbs: Option<Decimal>,
    pub profile_image_id: Option<Uuid>,
    pub last_comment_at: Option<DateTime<Utc>>,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Animal with its tags
#[derive(Debug, Clone, Serialize)]
pub struct Animal {
    #[serde(flatten)]
    pub record: AnimalRecord,
    pub tags: Vec<TagRef>,
}

/// Query filter for animal listings
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AnimalFilter {
    pub search: Option<String>,
    pub status: Option<AnimalStatus>,
    pub species: Option<String>,
    pub tag_id: Option<Uuid>,
    #[serde(default)]
    pub sort: AnimalSort,
    pub order: Option<SortOrder>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, FromRow)]
struct AssignedTag {
    animal_id: Uuid,
    id: Uuid,
    name: String,
    color: String,
}

const ANIMAL_COLUMNS: &str = r#"
    a.id, a.group_id, a.name, a.species, a.breed, a.sex, a.birth_date, a.status,
    a.kennel, a.description, a.weight_lbs, a.profile_image_id, a.last_comment_at,
    (SELECT COUNT(*) FROM animal_comments c
        WHERE c.animal_id = a.id AND c.deleted_at IS NULL) AS comment_count,
    a.created_at, a.updated_at, a.deleted_at
"#;

/// ORDER BY clause for a sort key. Names sort ascending by default,
/// timestamps newest first; unset timestamps always sort last.
pub fn order_clause(sort: AnimalSort, order: Option<SortOrder>) -> String {
    let order = order.unwrap_or(match sort {
        AnimalSort::Name => SortOrder::Asc,
        AnimalSort::Updated | AnimalSort::LastComment => SortOrder::Desc,
    });
    match sort {
        AnimalSort::Name => format!("LOWER(a.name) {}, a.id", order.as_sql()),
        _ => format!(
            "{} {} NULLS LAST, LOWER(a.name) ASC, a.id",
            sort.column(),
            order.as_sql()
        ),
    }
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl AnimalService {
    /// Create a new AnimalService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn tags(&self) -> TagService {
        TagService::new(self.db.clone())
    }

    pub async fn list_animals(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        filter: AnimalFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Animal>> {
        ensure_group_access(&self.db, auth, group_id).await?;

        let include_deleted = filter.include_deleted && auth.is_admin;
        let pattern = search_pattern(filter.search.as_deref());
        let species = trimmed(&filter.species).map(str::to_lowercase);
        let status = filter.status.map(|s| s.as_str());

        let where_clause = r#"
            WHERE a.group_id = $1
              AND ($2 OR a.deleted_at IS NULL)
              AND ($3::text IS NULL OR a.name ILIKE $3 OR a.breed ILIKE $3 OR a.kennel ILIKE $3)
              AND ($4::text IS NULL OR a.status = $4)
              AND ($5::text IS NULL OR LOWER(a.species) = $5)
              AND ($6::uuid IS NULL OR EXISTS (
                  SELECT 1 FROM animal_tag_assignments ata
                  WHERE ata.animal_id = a.id AND ata.tag_id = $6
              ))
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM animals a {where_clause}"
        ))
        .bind(group_id)
        .bind(include_deleted)
        .bind(&pattern)
        .bind(status)
        .bind(&species)
        .bind(filter.tag_id)
        .fetch_one(&self.db)
        .await?;

        let records = sqlx::query_as::<_, AnimalRecord>(&format!(
            "SELECT {ANIMAL_COLUMNS} FROM animals a {where_clause} ORDER BY {} LIMIT $7 OFFSET $8",
            order_clause(filter.sort, filter.order)
        ))
        .bind(group_id)
        .bind(include_deleted)
        .bind(&pattern)
        .bind(status)
        .bind(&species)
        .bind(filter.tag_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let animals = self.attach_tags(records).await?;
        Ok(PaginatedResponse::new(animals, pagination, total))
    }

    async fn attach_tags(&self, records: Vec<AnimalRecord>) -> AppResult<Vec<Animal>> {
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let assigned = sqlx::query_as::<_, AssignedTag>(
            r#"
            SELECT ata.animal_id, t.id, t.name, t.color
            FROM animal_tag_assignments ata
            JOIN animal_tags t ON t.id = ata.tag_id
            WHERE ata.animal_id = ANY($1)
            ORDER BY t.name
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        let mut by_animal: HashMap<Uuid, Vec<TagRef>> = HashMap::new();
        for tag in assigned {
            by_animal.entry(tag.animal_id).or_default().push(TagRef {
                id: tag.id,
                name: tag.name,
                color: tag.color,
            });
        }

        Ok(records
            .into_iter()
            .map(|record| {
                let tags = by_animal.remove(&record.id).unwrap_or_default();
                Animal { record, tags }
            })
            .collect())
    }

    async fn fetch(&self, animal_id: Uuid) -> AppResult<Animal> {
        let record = sqlx::query_as::<_, AnimalRecord>(&format!(
            "SELECT {ANIMAL_COLUMNS} FROM animals a WHERE a.id = $1"
        ))
        .bind(animal_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Animal".to_string()))?;

        let mut animals = self.attach_tags(vec![record]).await?;
        animals
            .pop()
            .ok_or_else(|| AppError::NotFound("Animal".to_string()))
    }

    /// Group of an animal; soft-deleted animals are only visible to admins
    pub(crate) async fn group_of(&self, auth: &AuthUser, animal_id: Uuid) -> AppResult<Uuid> {
        let (group_id, deleted_at) = sqlx::query_as::<_, (Uuid, Option<DateTime<Utc>>)>(
            "SELECT group_id, deleted_at FROM animals WHERE id = $1",
        )
        .bind(animal_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Animal".to_string()))?;

        if deleted_at.is_some() && !auth.is_admin {
            return Err(AppError::NotFound("Animal".to_string()));
        }
        ensure_group_access(&self.db, auth, group_id).await?;
        Ok(group_id)
    }

    pub async fn get_animal(&self, auth: &AuthUser, animal_id: Uuid) -> AppResult<Animal> {
        self.group_of(auth, animal_id).await?;
        self.fetch(animal_id).await
    }

    /// Any group member may add an animal
    pub async fn create_animal(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        input: CreateAnimalInput,
    ) -> AppResult<Animal> {
        ensure_group_access(&self.db, auth, group_id).await?;
        input.validate()?;
        if let Some(weight) = input.weight_lbs {
            validate_weight(weight).map_err(|e| AppError::validation("weight_lbs", e))?;
        }

        let mut tx = self.db.begin().await?;
        ensure_tags_in_group(&mut *tx, TagKind::Animal, group_id, &input.tag_ids).await?;

        let animal_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO animals
                (group_id, name, species, breed, sex, birth_date, status, kennel, description, weight_lbs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(group_id)
        .bind(input.name.trim())
        .bind(input.species.trim().to_lowercase())
        .bind(trimmed(&input.breed))
        .bind(input.sex.as_str())
        .bind(input.birth_date)
        .bind(input.status.as_str())
        .bind(trimmed(&input.kennel))
        .bind(&input.description)
        .bind(input.weight_lbs)
        .fetch_one(&mut *tx)
        .await?;

        for tag_id in &input.tag_ids {
            sqlx::query(
                "INSERT INTO animal_tag_assignments (animal_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(animal_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(%animal_id, %group_id, created_by = %auth.user_id, "Animal created");

        self.fetch(animal_id).await
    }

    /// Update profile fields. Moving to another group needs admin rights
    /// in both groups and drops tags from the old group.
    pub async fn update_animal(
        &self,
        auth: &AuthUser,
        animal_id: Uuid,
        input: UpdateAnimalInput,
    ) -> AppResult<Animal> {
        let group_id = self.group_of(auth, animal_id).await?;
        input.validate()?;
        if let Some(weight) = input.weight_lbs {
            validate_weight(weight).map_err(|e| AppError::validation("weight_lbs", e))?;
        }

        let target_group = input.group_id.filter(|g| *g != group_id);
        if let Some(target) = target_group {
            ensure_group_admin(&self.db, auth, group_id).await?;
            ensure_group_admin(&self.db, auth, target).await?;
        }

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            UPDATE animals SET
                name = COALESCE($2, name),
                species = COALESCE($3, species),
                breed = COALESCE($4, breed),
                sex = COALESCE($5, sex),
                birth_date = COALESCE($6, birth_date),
                status = COALESCE($7, status),
                kennel = COALESCE($8, kennel),
                description = COALESCE($9, description),
                weight_lbs = COALESCE($10, weight_lbs),
                group_id = COALESCE($11, group_id)
            WHERE id = $1
            "#,
        )
        .bind(animal_id)
        .bind(input.name.as_deref().map(str::trim))
        .bind(input.species.as_deref().map(|s| s.trim().to_lowercase()))
        .bind(input.breed.as_deref().map(str::trim))
        .bind(input.sex.map(|s| s.as_str()))
        .bind(input.birth_date)
        .bind(input.status.map(|s| s.as_str()))
        .bind(input.kennel.as_deref().map(str::trim))
        .bind(&input.description)
        .bind(input.weight_lbs)
        .bind(target_group)
        .execute(&mut *tx)
        .await?;

        if target_group.is_some() {
            sqlx::query("DELETE FROM animal_tag_assignments WHERE animal_id = $1")
                .bind(animal_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.fetch(animal_id).await
    }

    /// Soft delete (group admins)
    pub async fn delete_animal(&self, auth: &AuthUser, animal_id: Uuid) -> AppResult<()> {
        let group_id = self.group_of(auth, animal_id).await?;
        ensure_group_admin(&self.db, auth, group_id).await?;

        let result = sqlx::query(
            "UPDATE animals SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(animal_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Animal".to_string()));
        }

        tracing::info!(%animal_id, deleted_by = %auth.user_id, "Animal deleted");
        Ok(())
    }

    /// Undo a soft delete (site admins)
    pub async fn restore_animal(&self, auth: &AuthUser, animal_id: Uuid) -> AppResult<Animal> {
        auth.require_admin()?;

        let result = sqlx::query(
            r#"
            UPDATE animals a SET deleted_at = NULL
            FROM groups g
            WHERE a.id = $1 AND a.deleted_at IS NOT NULL
              AND g.id = a.group_id AND g.deleted_at IS NULL
            "#,
        )
        .bind(animal_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Deleted animal".to_string()));
        }

        tracing::info!(%animal_id, "Animal restored");
        self.fetch(animal_id).await
    }

    /// Replace the animal's tags
    pub async fn set_animal_tags(
        &self,
        auth: &AuthUser,
        animal_id: Uuid,
        tag_ids: Vec<Uuid>,
    ) -> AppResult<Animal> {
        let group_id = self.group_of(auth, animal_id).await?;

        let mut tx = self.db.begin().await?;
        ensure_tags_in_group(&mut *tx, TagKind::Animal, group_id, &tag_ids).await?;

        sqlx::query("DELETE FROM animal_tag_assignments WHERE animal_id = $1")
            .bind(animal_id)
            .execute(&mut *tx)
            .await?;
        for tag_id in &tag_ids {
            sqlx::query(
                "INSERT INTO animal_tag_assignments (animal_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(animal_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("UPDATE animals SET updated_at = NOW() WHERE id = $1")
            .bind(animal_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.fetch(animal_id).await
    }

    // ========================================================================
    // Animal Tags
    // ========================================================================

    pub async fn list_animal_tags(&self, auth: &AuthUser, group_id: Uuid) -> AppResult<Vec<Tag>> {
        ensure_group_access(&self.db, auth, group_id).await?;
        self.tags().list(TagKind::Animal, group_id).await
    }

    pub async fn create_animal_tag(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        input: TagInput,
    ) -> AppResult<Tag> {
        ensure_group_admin(&self.db, auth, group_id).await?;
        self.tags().create(TagKind::Animal, group_id, input).await
    }

    pub async fn update_animal_tag(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        tag_id: Uuid,
        input: TagInput,
    ) -> AppResult<Tag> {
        ensure_group_admin(&self.db, auth, group_id).await?;
        self.tags().update(TagKind::Animal, group_id, tag_id, input).await
    }

    pub async fn delete_animal_tag(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        tag_id: Uuid,
    ) -> AppResult<()> {
        ensure_group_admin(&self.db, auth, group_id).await?;
        self.tags().delete(TagKind::Animal, group_id, tag_id).await
    }
}
