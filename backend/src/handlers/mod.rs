//! HTTP handlers

pub mod animals;
pub mod auth;
pub mod comments;
pub mod groups;
pub mod health;
pub mod images;
pub mod notifications;
pub mod protocols;
pub mod settings;
pub mod users;

pub use animals::*;
pub use auth::*;
pub use comments::*;
pub use groups::*;
pub use health::*;
pub use images::*;
pub use notifications::*;
pub use protocols::*;
pub use settings::*;
pub use users::*;

use axum::extract::Multipart;

use crate::error::{AppError, AppResult};

/// An uploaded file plus any plain text fields sent with it
#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    pub file_name: Option<String>,
    pub bytes: Option<Vec<u8>>,
    pub fields: Vec<(String, String)>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// The `file` part, or a validation error when it is missing
    pub fn into_file(self) -> AppResult<(String, Vec<u8>)> {
        match self.bytes {
            Some(bytes) => Ok((self.file_name.unwrap_or_else(|| "upload".to_string()), bytes)),
            None => Err(AppError::validation("file", "A file is required")),
        }
    }
}

/// Read a multipart body whose file part is named `file`
pub(crate) async fn read_upload(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            form.file_name = field.file_name().map(|s| s.to_string());
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Could not read upload: {}", e)))?;
            form.bytes = Some(data.to_vec());
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(format!("Could not read field '{}': {}", name, e)))?;
            form.fields.push((name, value));
        }
    }

    Ok(form)
}
