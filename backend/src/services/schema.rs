//! Startup database preparation: legacy column repair, migrations, data
//! fixes and seed data
//!
//! Databases created by older deployments were not always built from the
//! migration history. Missing columns are added before the baseline
//! migration runs, since its indexes refer to them; the data fixes run
//! afterwards. Every statement here is idempotent.

use bcrypt::{hash, DEFAULT_COST};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use shared::{
    normalize_email, setting_definitions, validate_email, validate_password,
    DEFAULT_ANIMAL_TAGS, DEFAULT_COMMENT_TAGS, DEFAULT_GROUPS,
};

use crate::config::BootstrapConfig;
use crate::error::{AppError, AppResult};

/// Columns added after the first deployments (table, column, definition)
const DRIFT_COLUMNS: &[(&str, &str, &str)] = &[
    ("users", "phone", "TEXT"),
    ("users", "email_notifications", "BOOLEAN NOT NULL DEFAULT TRUE"),
    ("users", "last_login_at", "TIMESTAMPTZ"),
    ("users", "updated_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
    ("users", "deleted_at", "TIMESTAMPTZ"),
    ("groups", "groupme_bot_id", "TEXT"),
    ("groups", "image_url", "TEXT"),
    ("groups", "updated_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
    ("groups", "deleted_at", "TIMESTAMPTZ"),
    ("animals", "kennel", "TEXT"),
    ("animals", "weight_lbs", "NUMERIC(6, 2)"),
    ("animals", "profile_image_id", "UUID"),
    ("animals", "last_comment_at", "TIMESTAMPTZ"),
    ("animals", "updated_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
    ("animals", "deleted_at", "TIMESTAMPTZ"),
    ("animal_images", "storage_backend", "TEXT NOT NULL DEFAULT 'postgres'"),
    ("animal_images", "thumbnail", "BYTEA"),
    ("animal_comments", "kind", "TEXT NOT NULL DEFAULT 'note'"),
    ("animal_comments", "session_goal", "TEXT"),
    ("animal_comments", "session_outcome", "TEXT"),
    ("animal_comments", "session_rating", "INTEGER"),
    ("animal_comments", "behavior_notes", "TEXT"),
    ("animal_comments", "image_id", "UUID"),
    ("animal_comments", "created_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
    ("animal_comments", "updated_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
    ("animal_comments", "deleted_at", "TIMESTAMPTZ"),
    ("protocols", "document_kind", "TEXT NOT NULL DEFAULT 'pdf'"),
    ("protocols", "sort_order", "INTEGER NOT NULL DEFAULT 0"),
    ("protocols", "updated_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
];

const DRIFT_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS animals_group_idx ON animals (group_id) WHERE deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS animal_images_animal_idx ON animal_images (animal_id)",
    "CREATE INDEX IF NOT EXISTS animal_comments_animal_idx ON animal_comments (animal_id, created_at DESC) WHERE deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS user_groups_group_idx ON user_groups (group_id)",
    "CREATE INDEX IF NOT EXISTS protocols_group_idx ON protocols (group_id, sort_order)",
    "CREATE INDEX IF NOT EXISTS refresh_tokens_user_idx ON refresh_tokens (user_id)",
    "CREATE INDEX IF NOT EXISTS notification_log_created_idx ON notification_log (created_at DESC)",
];

/// What the startup pass changed
#[derive(Debug, Default, Serialize)]
pub struct SchemaReport {
    pub columns_checked: usize,
    pub indexes_checked: usize,
    pub last_comment_backfilled: u64,
    pub emails_normalized: u64,
    pub sessions_downgraded: u64,
    pub settings_seeded: u64,
    pub groups_seeded: usize,
    pub admin_created: bool,
}

/// Add columns older deployments lack. Tables that do not exist yet are
/// left for the baseline migration to create.
pub async fn repair_legacy_columns(db: &PgPool, report: &mut SchemaReport) -> AppResult<()> {
    let mut tx = db.begin().await?;
    for (table, column, definition) in DRIFT_COLUMNS {
        sqlx::query(&format!(
            "ALTER TABLE IF EXISTS {table} ADD COLUMN IF NOT EXISTS {column} {definition}"
        ))
        .execute(&mut *tx)
        .await?;
        report.columns_checked += 1;
    }
    tx.commit().await?;
    Ok(())
}

/// Apply the embedded migrations
pub async fn run_migrations(db: &PgPool) -> AppResult<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;
    tracing::info!("Migrations completed");
    Ok(())
}

/// Fix data left inconsistent by older deployments
pub async fn repair_schema_drift(db: &PgPool, report: &mut SchemaReport) -> AppResult<()> {
    let mut tx = db.begin().await?;

    for statement in DRIFT_INDEXES {
        sqlx::query(statement).execute(&mut *tx).await?;
        report.indexes_checked += 1;
    }

    report.last_comment_backfilled = sqlx::query(
        r#"
        UPDATE animals a SET last_comment_at = latest.created_at
        FROM (
            SELECT animal_id, MAX(created_at) AS created_at
            FROM animal_comments
            WHERE deleted_at IS NULL
            GROUP BY animal_id
        ) latest
        WHERE latest.animal_id = a.id
          AND a.last_comment_at IS DISTINCT FROM latest.created_at
        "#,
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();

    // Skip addresses that would collide with another account once trimmed
    report.emails_normalized = sqlx::query(
        r#"
        UPDATE users u SET email = LOWER(TRIM(u.email))
        WHERE u.email <> LOWER(TRIM(u.email))
          AND NOT EXISTS (
              SELECT 1 FROM users o
              WHERE o.id <> u.id AND LOWER(o.email) = LOWER(TRIM(u.email))
          )
        "#,
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();

    report.sessions_downgraded = sqlx::query(
        "UPDATE animal_comments SET kind = 'note' WHERE kind = 'session' AND session_rating IS NULL",
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(())
}

/// Insert default settings, groups, tags and the bootstrap admin
pub async fn seed_defaults(
    db: &PgPool,
    bootstrap: &BootstrapConfig,
    report: &mut SchemaReport,
) -> AppResult<()> {
    let mut tx = db.begin().await?;

    for definition in setting_definitions() {
        report.settings_seeded += sqlx::query(
            "INSERT INTO site_settings (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING",
        )
        .bind(definition.key)
        .bind(&definition.default)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    for group in DEFAULT_GROUPS {
        let created = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO groups (name, description)
            SELECT $1, $2
            WHERE NOT EXISTS (SELECT 1 FROM groups WHERE LOWER(name) = LOWER($1))
            RETURNING id
            "#,
        )
        .bind(group.name)
        .bind(group.description)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(group_id) = created else {
            continue;
        };
        report.groups_seeded += 1;

        for (table, tags) in [
            ("comment_tags", DEFAULT_COMMENT_TAGS),
            ("animal_tags", DEFAULT_ANIMAL_TAGS),
        ] {
            for (name, color) in tags {
                sqlx::query(&format!(
                    "INSERT INTO {table} (group_id, name, color) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING"
                ))
                .bind(group_id)
                .bind(name)
                .bind(color)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    tx.commit().await?;

    report.admin_created = ensure_bootstrap_admin(db, bootstrap).await?;
    Ok(())
}

/// Create the configured admin account unless it already exists
async fn ensure_bootstrap_admin(db: &PgPool, bootstrap: &BootstrapConfig) -> AppResult<bool> {
    let (Some(email), Some(password)) = (&bootstrap.admin_email, &bootstrap.admin_password) else {
        return Ok(false);
    };

    validate_email(email).map_err(|m| AppError::Configuration(format!("bootstrap admin: {}", m)))?;
    validate_password(password)
        .map_err(|m| AppError::Configuration(format!("bootstrap admin: {}", m)))?;

    let email = normalize_email(email);
    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE LOWER(email) = $1")
        .bind(&email)
        .fetch_one(db)
        .await?;
    if exists > 0 {
        return Ok(false);
    }

    let password_hash = hash(password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;
    let name = bootstrap
        .admin_name
        .clone()
        .unwrap_or_else(|| "Administrator".to_string());

    let mut tx = db.begin().await?;
    let user_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO users (email, name, password_hash, is_admin)
        VALUES ($1, $2, $3, TRUE)
        RETURNING id
        "#,
    )
    .bind(&email)
    .bind(&name)
    .bind(&password_hash)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO user_groups (user_id, group_id, is_group_admin)
        SELECT $1, id, TRUE FROM groups WHERE deleted_at IS NULL
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(%user_id, %email, "Bootstrap admin created");
    Ok(true)
}

/// Bring the database to the current schema, seed it and log the outcome
pub async fn prepare_database(db: &PgPool, bootstrap: &BootstrapConfig) -> AppResult<SchemaReport> {
    let mut report = SchemaReport::default();
    repair_legacy_columns(db, &mut report).await?;
    run_migrations(db).await?;
    repair_schema_drift(db, &mut report).await?;
    seed_defaults(db, bootstrap, &mut report).await?;

    tracing::info!(
        columns_checked = report.columns_checked,
        indexes_checked = report.indexes_checked,
        last_comment_backfilled = report.last_comment_backfilled,
        emails_normalized = report.emails_normalized,
        sessions_downgraded = report.sessions_downgraded,
        settings_seeded = report.settings_seeded,
        groups_seeded = report.groups_seeded,
        admin_created = report.admin_created,
        "Database prepared"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_columns_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for (table, column, _) in DRIFT_COLUMNS {
            assert!(seen.insert((table, column)), "{}.{} listed twice", table, column);
        }
    }

    #[test]
    fn test_drift_indexes_are_idempotent() {
        assert!(DRIFT_INDEXES.iter().all(|s| s.contains("IF NOT EXISTS")));
    }

    #[tokio::test]
    #[ignore] // Requires database connection
    async fn test_prepare_database_twice_is_stable() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let db = PgPool::connect(&url).await.unwrap();

        prepare_database(&db, &BootstrapConfig::default()).await.unwrap();
        let second = prepare_database(&db, &BootstrapConfig::default()).await.unwrap();
        assert_eq!(second.settings_seeded, 0);
        assert_eq!(second.groups_seeded, 0);
        assert!(!second.admin_created);
    }

    #[tokio::test]
    #[ignore] // Requires database connection
    async fn test_legacy_database_is_upgraded() {
        use std::str::FromStr;

        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

        let url = std::env::var("DATABASE_URL").unwrap();
        let admin = PgPool::connect(&url).await.unwrap();
        let schema = format!("legacy_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .unwrap();

        let options = PgConnectOptions::from_str(&url)
            .unwrap()
            .options([("search_path", schema.as_str())]);
        let db = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap();

        // Shape of the users table before soft deletes and profiles existed
        sqlx::query(
            r#"
            CREATE TABLE users (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                email TEXT NOT NULL,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                is_admin BOOLEAN NOT NULL DEFAULT FALSE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&db)
        .await
        .unwrap();
        sqlx::query("INSERT INTO users (email, name, password_hash) VALUES ('  Walker@Example.ORG ', 'Walker', 'x')")
            .execute(&db)
            .await
            .unwrap();

        let report = prepare_database(&db, &BootstrapConfig::default()).await.unwrap();
        assert_eq!(report.emails_normalized, 1);
        assert_eq!(report.groups_seeded, DEFAULT_GROUPS.len());

        let (email, deleted_at, notify) = sqlx::query_as::<_, (String, Option<chrono::DateTime<chrono::Utc>>, bool)>(
            "SELECT email, deleted_at, email_notifications FROM users",
        )
        .fetch_one(&db)
        .await
        .unwrap();
        assert_eq!(email, "walker@example.org");
        assert!(deleted_at.is_none());
        assert!(notify);

        db.close().await;
        sqlx::query(&format!("DROP SCHEMA {schema} CASCADE"))
            .execute(&admin)
            .await
            .unwrap();
    }
}
