//! Animal photo service: resize on upload, thumbnails and pluggable storage

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::{detect_image_type, fit_within, sanitize_file_name, ImageVariant, StorageBackend};

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::animal::AnimalService;
use crate::services::group::ensure_group_admin;

/// JPEG quality for stored renditions
const JPEG_QUALITY: u8 = 85;

// ============================================================================
// Storage Backends
// ============================================================================

/// Where image bytes are kept
#[async_trait]
pub trait ImageStore: Send + Sync {
    fn backend(&self) -> StorageBackend;

    async fn put(&self, key: &str, variant: ImageVariant, bytes: Vec<u8>) -> AppResult<()>;

    async fn get(&self, key: &str, variant: ImageVariant) -> AppResult<Vec<u8>>;

    async fn delete(&self, key: &str) -> AppResult<()>;
}

/// Stores bytes in the `animal_images` row itself
#[derive(Clone)]
pub struct PostgresImageStore {
    db: PgPool,
}

impl PostgresImageStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ImageStore for PostgresImageStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Postgres
    }

    async fn put(&self, key: &str, variant: ImageVariant, bytes: Vec<u8>) -> AppResult<()> {
        let column = match variant {
            ImageVariant::Full => "data",
            ImageVariant::Thumbnail => "thumbnail",
        };
        sqlx::query(&format!(
            "UPDATE animal_images SET {} = $2 WHERE storage_key = $1",
            column
        ))
        .bind(key)
        .bind(bytes)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str, variant: ImageVariant) -> AppResult<Vec<u8>> {
        let column = match variant {
            ImageVariant::Full => "data",
            ImageVariant::Thumbnail => "COALESCE(thumbnail, data)",
        };
        sqlx::query_scalar::<_, Option<Vec<u8>>>(&format!(
            "SELECT {} FROM animal_images WHERE storage_key = $1",
            column
        ))
        .bind(key)
        .fetch_optional(&self.db)
        .await?
        .flatten()
        .ok_or_else(|| AppError::NotFound("Image data".to_string()))
    }

    async fn delete(&self, _key: &str) -> AppResult<()> {
        // Bytes go away with the row
        Ok(())
    }
}

/// Azure Blob Storage through the REST API with a SAS token
#[derive(Clone)]
pub struct AzureBlobStore {
    account: String,
    container: String,
    sas_token: String,
    http_client: reqwest::Client,
}

impl AzureBlobStore {
    pub fn new(config: &StorageConfig) -> AppResult<Self> {
        let account = config.azure_account.clone().ok_or_else(|| {
            AppError::Configuration("storage.azure_account is not set".to_string())
        })?;
        let container = config.azure_container.clone().ok_or_else(|| {
            AppError::Configuration("storage.azure_container is not set".to_string())
        })?;
        Ok(Self {
            account,
            container,
            sas_token: config
                .azure_sas_token
                .clone()
                .unwrap_or_default()
                .trim_start_matches('?')
                .to_string(),
            http_client: reqwest::Client::new(),
        })
    }

    /// Blob URL for one rendition of an image
    pub fn blob_url(&self, key: &str, variant: ImageVariant) -> String {
        let blob = match variant {
            ImageVariant::Full => key.to_string(),
            ImageVariant::Thumbnail => format!("{}.thumb", key),
        };
        let mut url = format!(
            "https://{}.blob.core.windows.net/{}/{}",
            self.account, self.container, blob
        );
        if !self.sas_token.is_empty() {
            url.push('?');
            url.push_str(&self.sas_token);
        }
        url
    }
}

#[async_trait]
impl ImageStore for AzureBlobStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Azure
    }

    async fn put(&self, key: &str, variant: ImageVariant, bytes: Vec<u8>) -> AppResult<()> {
        let response = self
            .http_client
            .put(self.blob_url(key, variant))
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Type", "image/jpeg")
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::StorageError(format!(
                "Blob upload returned {}",
                response.status()
            )))
        }
    }

    async fn get(&self, key: &str, variant: ImageVariant) -> AppResult<Vec<u8>> {
        let response = self
            .http_client
            .get(self.blob_url(key, variant))
            .send()
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(response
                .bytes()
                .await
                .map_err(|e| AppError::StorageError(e.to_string()))?
                .to_vec()),
            reqwest::StatusCode::NOT_FOUND => Err(AppError::NotFound("Image data".to_string())),
            s => Err(AppError::StorageError(format!("Blob download returned {}", s))),
        }
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        for variant in [ImageVariant::Full, ImageVariant::Thumbnail] {
            let response = self
                .http_client
                .delete(self.blob_url(key, variant))
                .send()
                .await
                .map_err(|e| AppError::StorageError(e.to_string()))?;
            let status = response.status();
            if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
                return Err(AppError::StorageError(format!(
                    "Blob delete returned {}",
                    status
                )));
            }
        }
        Ok(())
    }
}

/// Build the store selected by `storage.backend`
pub fn build_image_store(db: PgPool, config: &StorageConfig) -> AppResult<Arc<dyn ImageStore>> {
    let store: Arc<dyn ImageStore> = match config.backend {
        StorageBackend::Postgres => Arc::new(PostgresImageStore::new(db)),
        StorageBackend::Azure => Arc::new(AzureBlobStore::new(config)?),
    };
    tracing::info!(backend = store.backend().as_str(), "Image store configured");
    Ok(store)
}

// ============================================================================
// Processing
// ============================================================================

/// Renditions produced from one upload
#[derive(Debug)]
pub struct ProcessedImage {
    pub full: Vec<u8>,
    pub thumbnail: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

fn encode_jpeg(image: &DynamicImage) -> AppResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| AppError::Internal(format!("JPEG encoding failed: {}", e)))?;
    Ok(buf.into_inner())
}

/// Decode, downsize to `max_dimension`, build a thumbnail and re-encode both as JPEG
pub fn process_image(
    bytes: &[u8],
    max_dimension: u32,
    thumbnail_dimension: u32,
) -> AppResult<ProcessedImage> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AppError::validation("file", format!("Image could not be decoded: {}", e)))?;

    let (width, height) = fit_within(decoded.width(), decoded.height(), max_dimension);
    let full = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Lanczos3)
    };

    let (tw, th) = fit_within(full.width(), full.height(), thumbnail_dimension);
    let thumbnail = full.thumbnail_exact(tw, th);

    Ok(ProcessedImage {
        full: encode_jpeg(&full)?,
        thumbnail: encode_jpeg(&thumbnail)?,
        width: full.width(),
        height: full.height(),
    })
}

// ============================================================================
// Image Service
// ============================================================================

/// Image metadata
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AnimalImage {
    pub id: Uuid,
    pub animal_id: Uuid,
    pub uploaded_by: Option<Uuid>,
    pub storage_backend: String,
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub original_file_name: Option<String>,
    pub content_type: String,
    pub width: i32,
    pub height: i32,
    pub byte_size: i64,
    pub is_profile: bool,
    pub created_at: DateTime<Utc>,
}

const IMAGE_SELECT: &str = r#"
    SELECT i.id, i.animal_id, i.uploaded_by, i.storage_backend, i.storage_key,
           i.original_file_name, i.content_type, i.width, i.height, i.byte_size,
           (a.profile_image_id IS NOT DISTINCT FROM i.id) AS is_profile, i.created_at
    FROM animal_images i
    JOIN animals a ON a.id = i.animal_id
"#;

/// Image service
#[derive(Clone)]
pub struct ImageService {
    db: PgPool,
    store: Arc<dyn ImageStore>,
    config: StorageConfig,
}

impl ImageService {
    pub fn new(db: PgPool, store: Arc<dyn ImageStore>, config: StorageConfig) -> Self {
        Self { db, store, config }
    }

    fn animals(&self) -> AnimalService {
        AnimalService::new(self.db.clone())
    }

    /// Images written under a different backend stay readable from Postgres
    fn store_for(&self, backend: &str) -> AppResult<Arc<dyn ImageStore>> {
        if backend == self.store.backend().as_str() {
            Ok(Arc::clone(&self.store))
        } else if backend == StorageBackend::Postgres.as_str() {
            Ok(Arc::new(PostgresImageStore::new(self.db.clone())))
        } else {
            Err(AppError::StorageError(format!(
                "Image is stored in the unavailable '{}' backend",
                backend
            )))
        }
    }

    async fn fetch(&self, image_id: Uuid) -> AppResult<AnimalImage> {
        sqlx::query_as::<_, AnimalImage>(&format!("{IMAGE_SELECT} WHERE i.id = $1"))
            .bind(image_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Image".to_string()))
    }

    /// Upload a photo; the first photo of an animal becomes its profile image
    pub async fn upload_image(
        &self,
        auth: &AuthUser,
        animal_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> AppResult<AnimalImage> {
        self.animals().group_of(auth, animal_id).await?;

        if bytes.len() > self.config.max_image_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Images may be at most {} MB",
                self.config.max_image_bytes / (1024 * 1024)
            )));
        }
        if detect_image_type(&bytes).is_none() {
            return Err(AppError::UnsupportedMediaType(
                "Upload a JPEG, PNG, WebP or GIF image".to_string(),
            ));
        }

        let max_dimension = self.config.image_max_dimension;
        let thumbnail_dimension = self.config.thumbnail_dimension;
        let processed = tokio::task::spawn_blocking(move || {
            process_image(&bytes, max_dimension, thumbnail_dimension)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Image processing task failed: {}", e)))??;

        let ProcessedImage {
            full,
            thumbnail,
            width,
            height,
        } = processed;

        let image_id = Uuid::new_v4();
        let storage_key = format!("animals/{}/{}.jpg", animal_id, image_id);

        sqlx::query(
            r#"
            INSERT INTO animal_images
                (id, animal_id, uploaded_by, storage_backend, storage_key, original_file_name,
                 content_type, width, height, byte_size)
            VALUES ($1, $2, $3, $4, $5, $6, 'image/jpeg', $7, $8, $9)
            "#,
        )
        .bind(image_id)
        .bind(animal_id)
        .bind(auth.user_id)
        .bind(self.store.backend().as_str())
        .bind(&storage_key)
        .bind(sanitize_file_name(file_name))
        .bind(width as i32)
        .bind(height as i32)
        .bind(full.len() as i64)
        .execute(&self.db)
        .await?;

        let stored = async {
            self.store
                .put(&storage_key, ImageVariant::Full, full)
                .await?;
            self.store
                .put(&storage_key, ImageVariant::Thumbnail, thumbnail)
                .await
        }
        .await;

        if let Err(e) = stored {
            tracing::error!(%image_id, error = %e, "Image storage failed; removing record");
            sqlx::query("DELETE FROM animal_images WHERE id = $1")
                .bind(image_id)
                .execute(&self.db)
                .await?;
            return Err(e);
        }

        sqlx::query(
            "UPDATE animals SET profile_image_id = $2 WHERE id = $1 AND profile_image_id IS NULL",
        )
        .bind(animal_id)
        .bind(image_id)
        .execute(&self.db)
        .await?;

        tracing::info!(%image_id, %animal_id, width, height, "Image uploaded");
        self.fetch(image_id).await
    }

    pub async fn list_images(&self, auth: &AuthUser, animal_id: Uuid) -> AppResult<Vec<AnimalImage>> {
        self.animals().group_of(auth, animal_id).await?;

        let images = sqlx::query_as::<_, AnimalImage>(&format!(
            "{IMAGE_SELECT} WHERE i.animal_id = $1 ORDER BY i.created_at DESC"
        ))
        .bind(animal_id)
        .fetch_all(&self.db)
        .await?;
        Ok(images)
    }

    /// Bytes and content type of one rendition
    pub async fn get_image_bytes(
        &self,
        auth: &AuthUser,
        image_id: Uuid,
        variant: ImageVariant,
    ) -> AppResult<(String, Vec<u8>)> {
        let image = self.fetch(image_id).await?;
        self.animals().group_of(auth, image.animal_id).await?;

        let bytes = self
            .store_for(&image.storage_backend)?
            .get(&image.storage_key, variant)
            .await?;
        Ok((image.content_type, bytes))
    }

    /// Delete a photo (uploader or group admin)
    pub async fn delete_image(&self, auth: &AuthUser, image_id: Uuid) -> AppResult<()> {
        let image = self.fetch(image_id).await?;
        let group_id = self.animals().group_of(auth, image.animal_id).await?;
        if image.uploaded_by != Some(auth.user_id) {
            ensure_group_admin(&self.db, auth, group_id).await?;
        }

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE animals SET profile_image_id = NULL WHERE profile_image_id = $1")
            .bind(image_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE animal_comments SET image_id = NULL WHERE image_id = $1")
            .bind(image_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM animal_images WHERE id = $1")
            .bind(image_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if let Err(e) = self
            .store_for(&image.storage_backend)?
            .delete(&image.storage_key)
            .await
        {
            tracing::warn!(%image_id, error = %e, "Stored image bytes could not be removed");
        }

        tracing::info!(%image_id, deleted_by = %auth.user_id, "Image deleted");
        Ok(())
    }

    pub async fn set_profile_image(
        &self,
        auth: &AuthUser,
        animal_id: Uuid,
        image_id: Uuid,
    ) -> AppResult<AnimalImage> {
        self.animals().group_of(auth, animal_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE animals SET profile_image_id = $2
            WHERE id = $1 AND EXISTS (
                SELECT 1 FROM animal_images WHERE id = $2 AND animal_id = $1
            )
            "#,
        )
        .bind(animal_id)
        .bind(image_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Image".to_string()));
        }
        self.fetch(image_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 80, 40]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_large_image_is_downsized_with_aspect() {
        let processed = process_image(&png_bytes(800, 400), 200, 50).unwrap();
        assert_eq!((processed.width, processed.height), (200, 100));

        let thumb = image::load_from_memory(&processed.thumbnail).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (50, 25));
        assert!(processed.full.starts_with(&[0xFF, 0xD8, 0xFF]));
    }

    #[test]
    fn test_small_image_keeps_size() {
        let processed = process_image(&png_bytes(120, 90), 1600, 320).unwrap();
        assert_eq!((processed.width, processed.height), (120, 90));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = process_image(b"definitely not an image", 100, 10).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_azure_blob_url() {
        let mut config = crate::config::Config::for_tests().storage;
        config.azure_account = Some("shelter".to_string());
        config.azure_container = Some("photos".to_string());
        config.azure_sas_token = Some("?sv=2024&sig=abc".to_string());
        let store = AzureBlobStore::new(&config).unwrap();
        assert_eq!(
            store.blob_url("animals/a/b.jpg", ImageVariant::Full),
            "https://shelter.blob.core.windows.net/photos/animals/a/b.jpg?sv=2024&sig=abc"
        );
        assert_eq!(
            store.blob_url("animals/a/b.jpg", ImageVariant::Thumbnail),
            "https://shelter.blob.core.windows.net/photos/animals/a/b.jpg.thumb?sv=2024&sig=abc"
        );
    }
}
