//! Site settings service with a read-through TTL cache

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared::{
    find_setting, setting_definitions, setting_value_matches, SETTING_ALLOW_SELF_REGISTRATION,
    MAX_COMMENT_EDIT_WINDOW_MINUTES, SETTING_COMMENT_EDIT_WINDOW_MINUTES, SETTING_DEFAULT_GROUP_ID,
};

use crate::error::{AppError, AppResult};

type SettingsMap = HashMap<String, Value>;

struct CachedSettings {
    values: Arc<SettingsMap>,
    loaded_at: Instant,
}

/// Read-through cache over the `site_settings` table.
///
/// Readers share the cached snapshot until it is older than the TTL; the
/// first reader after expiry reloads it while holding the write lock so
/// concurrent readers do not all hit the database.
pub struct SettingsCache {
    ttl: Duration,
    inner: RwLock<Option<CachedSettings>>,
}

impl SettingsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(None),
        }
    }

    /// Return the cached settings, loading them with `load` when stale
    pub async fn get_or_load<F, Fut>(&self, load: F) -> AppResult<Arc<SettingsMap>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AppResult<SettingsMap>>,
    {
        {
            let guard = self.inner.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.loaded_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&cached.values));
                }
            }
        }

        let mut guard = self.inner.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(cached) = guard.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.values));
            }
        }

        let values = Arc::new(load().await?);
        *guard = Some(CachedSettings {
            values: Arc::clone(&values),
            loaded_at: Instant::now(),
        });
        tracing::debug!(count = values.len(), "Site settings cache refreshed");
        Ok(values)
    }

    /// Drop the cached snapshot so the next read reloads
    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}

/// A stored setting with its metadata
#[derive(Debug, Clone, Serialize)]
pub struct SiteSetting {
    pub key: String,
    pub value: Value,
    pub description: String,
    pub public: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct SettingRow {
    key: String,
    value: Value,
}

/// Edit window for a stored setting value. Rows written before the
/// upper bound existed are clamped rather than trusted.
pub fn edit_window_from_value(value: &Value) -> chrono::Duration {
    let minutes = value
        .as_i64()
        .unwrap_or(0)
        .clamp(0, MAX_COMMENT_EDIT_WINDOW_MINUTES);
    chrono::Duration::minutes(minutes)
}

/// Settings service
#[derive(Clone)]
pub struct SettingsService {
    db: PgPool,
    cache: Arc<SettingsCache>,
}

impl SettingsService {
    pub fn new(db: PgPool, cache: Arc<SettingsCache>) -> Self {
        Self { db, cache }
    }

    async fn load(db: PgPool) -> AppResult<SettingsMap> {
        let rows = sqlx::query_as::<_, SettingRow>("SELECT key, value FROM site_settings")
            .fetch_all(&db)
            .await?;

        // Defaults fill gaps so a missing row never breaks a reader
        let mut values: SettingsMap = setting_definitions()
            .into_iter()
            .map(|d| (d.key.to_string(), d.default))
            .collect();
        for row in rows {
            values.insert(row.key, row.value);
        }
        Ok(values)
    }

    async fn snapshot(&self) -> AppResult<Arc<SettingsMap>> {
        let db = self.db.clone();
        self.cache.get_or_load(|| Self::load(db)).await
    }

    /// All known settings with their current values
    pub async fn get_all(&self) -> AppResult<Vec<SiteSetting>> {
        let values = self.snapshot().await?;
        Ok(setting_definitions()
            .into_iter()
            .map(|d| SiteSetting {
                key: d.key.to_string(),
                value: values.get(d.key).cloned().unwrap_or(d.default),
                description: d.description.to_string(),
                public: d.public,
            })
            .collect())
    }

    /// Settings safe to expose without authentication
    pub async fn get_public(&self) -> AppResult<HashMap<String, Value>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|s| s.public)
            .map(|s| (s.key, s.value))
            .collect())
    }

    pub async fn get(&self, key: &str) -> AppResult<Value> {
        let definition =
            find_setting(key).ok_or_else(|| AppError::NotFound(format!("Setting '{}'", key)))?;
        let values = self.snapshot().await?;
        Ok(values.get(key).cloned().unwrap_or(definition.default))
    }

    /// Store a new value for a known setting
    pub async fn update(&self, key: &str, value: Value, updated_by: Uuid) -> AppResult<SiteSetting> {
        let definition =
            find_setting(key).ok_or_else(|| AppError::NotFound(format!("Setting '{}'", key)))?;

        if !setting_value_matches(&definition, &value) {
            return Err(AppError::validation(
                "value",
                format!("Value has the wrong type for setting '{}'", key),
            ));
        }

        if key == SETTING_DEFAULT_GROUP_ID {
            if let Value::String(raw) = &value {
                let group_id = Uuid::parse_str(raw)
                    .map_err(|_| AppError::validation("value", "Expected a group id"))?;
                let exists = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM groups WHERE id = $1 AND deleted_at IS NULL",
                )
                .bind(group_id)
                .fetch_one(&self.db)
                .await?;
                if exists == 0 {
                    return Err(AppError::NotFound("Group".to_string()));
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO site_settings (key, value, updated_by, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value,
                    updated_by = EXCLUDED.updated_by,
                    updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(updated_by)
        .execute(&self.db)
        .await?;

        self.cache.invalidate().await;
        tracing::info!(key, %updated_by, "Site setting updated");

        Ok(SiteSetting {
            key: key.to_string(),
            value,
            description: definition.description.to_string(),
            public: definition.public,
        })
    }

    pub async fn allow_self_registration(&self) -> AppResult<bool> {
        Ok(self
            .get(SETTING_ALLOW_SELF_REGISTRATION)
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    /// How long after posting an author may still edit a comment
    pub async fn comment_edit_window(&self) -> AppResult<chrono::Duration> {
        let value = self.get(SETTING_COMMENT_EDIT_WINDOW_MINUTES).await?;
        Ok(edit_window_from_value(&value))
    }

    pub async fn default_group_id(&self) -> AppResult<Option<Uuid>> {
        Ok(self
            .get(SETTING_DEFAULT_GROUP_ID)
            .await?
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn map_with(key: &str, value: Value) -> SettingsMap {
        let mut map = SettingsMap::new();
        map.insert(key.to_string(), value);
        map
    }

    #[tokio::test]
    async fn test_cache_serves_fresh_snapshot() {
        let cache = SettingsCache::new(Duration::from_secs(60));
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let values = cache
                .get_or_load(|| async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(map_with("site_name", Value::from("Shelter")))
                })
                .await
                .unwrap();
            assert_eq!(values.get("site_name"), Some(&Value::from("Shelter")));
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_reloads_after_ttl() {
        let cache = SettingsCache::new(Duration::from_millis(0));
        let loads = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_load(|| async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(SettingsMap::new())
                })
                .await
                .unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let cache = SettingsCache::new(Duration::from_secs(60));
        cache
            .get_or_load(|| async { Ok(map_with("announcement", Value::from("old"))) })
            .await
            .unwrap();
        cache.invalidate().await;
        let values = cache
            .get_or_load(|| async { Ok(map_with("announcement", Value::from("new"))) })
            .await
            .unwrap();
        assert_eq!(values.get("announcement"), Some(&Value::from("new")));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache = SettingsCache::new(Duration::from_secs(60));
        let result = cache
            .get_or_load(|| async { Err(AppError::Internal("db down".to_string())) })
            .await;
        assert!(result.is_err());

        let values = cache
            .get_or_load(|| async { Ok(map_with("site_name", Value::from("ok"))) })
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_edit_window_is_clamped() {
        assert_eq!(edit_window_from_value(&Value::from(30)), chrono::Duration::minutes(30));
        assert_eq!(edit_window_from_value(&Value::from(-5)), chrono::Duration::zero());
        assert_eq!(edit_window_from_value(&Value::Null), chrono::Duration::zero());
        assert_eq!(
            edit_window_from_value(&Value::from(1_000_000_000_000_000i64)),
            chrono::Duration::minutes(MAX_COMMENT_EDIT_WINDOW_MINUTES)
        );
    }
}
