//! Protocol document service (PDF and DOCX SOPs per group)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use shared::{detect_document_kind, sanitize_file_name};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::group::{ensure_group_access, ensure_group_admin};

/// Protocol service
#[derive(Clone)]
pub struct ProtocolService {
    db: PgPool,
    max_document_bytes: usize,
}

/// Protocol metadata; the document bytes are served separately
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Protocol {
    pub id: Uuid,
    pub group_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub document_kind: String,
    pub byte_size: i64,
    pub sort_order: i32,
    pub uploaded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields sent alongside an uploaded document
#[derive(Debug, Clone, Default, Validate)]
pub struct UploadProtocolInput {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub sort_order: Option<i32>,
}

/// Input for updating protocol metadata
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateProtocolInput {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub sort_order: Option<i32>,
}

/// A document ready to stream to the client
#[derive(Debug)]
pub struct ProtocolDownload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ProtocolDownload {
    /// `inline` lets the browser viewer render it; otherwise it downloads
    pub fn content_disposition(&self, inline: bool) -> String {
        let escaped = self.file_name.replace('"', "");
        format!(
            "{}; filename=\"{}\"",
            if inline { "inline" } else { "attachment" },
            escaped
        )
    }
}

const PROTOCOL_COLUMNS: &str = "id, group_id, title, description, file_name, content_type, \
     document_kind, byte_size, sort_order, uploaded_by, created_at, updated_at";

impl ProtocolService {
    pub fn new(db: PgPool, max_document_bytes: usize) -> Self {
        Self {
            db,
            max_document_bytes,
        }
    }

    async fn fetch(&self, protocol_id: Uuid) -> AppResult<Protocol> {
        sqlx::query_as::<_, Protocol>(&format!(
            "SELECT {PROTOCOL_COLUMNS} FROM protocols WHERE id = $1"
        ))
        .bind(protocol_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Protocol".to_string()))
    }

    pub async fn list_protocols(&self, auth: &AuthUser, group_id: Uuid) -> AppResult<Vec<Protocol>> {
        ensure_group_access(&self.db, auth, group_id).await?;

        let protocols = sqlx::query_as::<_, Protocol>(&format!(
            "SELECT {PROTOCOL_COLUMNS} FROM protocols WHERE group_id = $1 ORDER BY sort_order, LOWER(title)"
        ))
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;
        Ok(protocols)
    }

    /// Store a PDF or DOCX document for a group (group admins)
    pub async fn upload_protocol(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        input: UploadProtocolInput,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> AppResult<Protocol> {
        ensure_group_admin(&self.db, auth, group_id).await?;
        input.validate()?;

        if bytes.is_empty() {
            return Err(AppError::validation("file", "The uploaded file is empty"));
        }
        if bytes.len() > self.max_document_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Documents may be at most {} MB",
                self.max_document_bytes / (1024 * 1024)
            )));
        }

        let kind = detect_document_kind(file_name, &bytes).ok_or_else(|| {
            AppError::UnsupportedMediaType("Protocols must be PDF or DOCX documents".to_string())
        })?;

        // Keep the user's name but make the extension match the content
        let mut stored_name = sanitize_file_name(file_name);
        let extension = format!(".{}", kind.extension());
        if !stored_name.to_ascii_lowercase().ends_with(&extension) {
            stored_name.push_str(&extension);
        }

        let sort_order = match input.sort_order {
            Some(order) => order,
            None => {
                sqlx::query_scalar::<_, i32>(
                    "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM protocols WHERE group_id = $1",
                )
                .bind(group_id)
                .fetch_one(&self.db)
                .await?
            }
        };

        let protocol = sqlx::query_as::<_, Protocol>(&format!(
            r#"
            INSERT INTO protocols
                (group_id, title, description, file_name, content_type, document_kind,
                 byte_size, data, sort_order, uploaded_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {PROTOCOL_COLUMNS}
            "#
        ))
        .bind(group_id)
        .bind(input.title.trim())
        .bind(&input.description)
        .bind(&stored_name)
        .bind(kind.content_type())
        .bind(kind.as_str())
        .bind(bytes.len() as i64)
        .bind(&bytes)
        .bind(sort_order)
        .bind(auth.user_id)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(protocol_id = %protocol.id, %group_id, kind = kind.as_str(), "Protocol uploaded");
        Ok(protocol)
    }

    pub async fn get_protocol(&self, auth: &AuthUser, protocol_id: Uuid) -> AppResult<Protocol> {
        let protocol = self.fetch(protocol_id).await?;
        ensure_group_access(&self.db, auth, protocol.group_id).await?;
        Ok(protocol)
    }

    pub async fn download_protocol(
        &self,
        auth: &AuthUser,
        protocol_id: Uuid,
    ) -> AppResult<ProtocolDownload> {
        let protocol = self.get_protocol(auth, protocol_id).await?;

        let bytes = sqlx::query_scalar::<_, Vec<u8>>("SELECT data FROM protocols WHERE id = $1")
            .bind(protocol_id)
            .fetch_one(&self.db)
            .await?;

        Ok(ProtocolDownload {
            file_name: protocol.file_name,
            content_type: protocol.content_type,
            bytes,
        })
    }

    pub async fn update_protocol(
        &self,
        auth: &AuthUser,
        protocol_id: Uuid,
        input: UpdateProtocolInput,
    ) -> AppResult<Protocol> {
        let protocol = self.fetch(protocol_id).await?;
        ensure_group_admin(&self.db, auth, protocol.group_id).await?;
        input.validate()?;

        let updated = sqlx::query_as::<_, Protocol>(&format!(
            r#"
            UPDATE protocols SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                sort_order = COALESCE($4, sort_order)
            WHERE id = $1
            RETURNING {PROTOCOL_COLUMNS}
            "#
        ))
        .bind(protocol_id)
        .bind(input.title.as_deref().map(str::trim))
        .bind(&input.description)
        .bind(input.sort_order)
        .fetch_one(&self.db)
        .await?;
        Ok(updated)
    }

    pub async fn delete_protocol(&self, auth: &AuthUser, protocol_id: Uuid) -> AppResult<()> {
        let protocol = self.fetch(protocol_id).await?;
        ensure_group_admin(&self.db, auth, protocol.group_id).await?;

        sqlx::query("DELETE FROM protocols WHERE id = $1")
            .bind(protocol_id)
            .execute(&self.db)
            .await?;

        tracing::info!(%protocol_id, deleted_by = %auth.user_id, "Protocol deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition() {
        let download = ProtocolDownload {
            file_name: "Leash \"Reactive\" SOP.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: Vec::new(),
        };
        assert_eq!(
            download.content_disposition(true),
            "inline; filename=\"Leash Reactive SOP.pdf\""
        );
        assert!(download.content_disposition(false).starts_with("attachment;"));
    }

    #[test]
    fn test_upload_input_requires_title() {
        let input = UploadProtocolInput {
            title: String::new(),
            ..Default::default()
        };
        assert!(input.validate().is_err());
    }
}
