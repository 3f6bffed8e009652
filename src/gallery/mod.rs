//! Template, image and generation flows over the collaborator traits.
//!
//! Every operation takes an authenticated `Principal` and returns `ApiError`
//! values ready for the HTTP layer.

mod generation;
mod images;
mod templates;

pub use generation::{GenerateInput, GenerationResult, ProcessingPage, ProcessingQuery};
pub use templates::TemplateInput;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{Backends, ObjectStore, Principal, UserImage};
use crate::config::StorageConfig;
use crate::error::ApiError;

/// A file taken from a multipart form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl Upload {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Lowercased extension of the original file name.
    fn extension(&self) -> String {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| "jpg".to_string())
    }
}

/// Image entry as listed in the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryImage {
    pub id: String,
    pub name: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl From<&UserImage> for GalleryImage {
    fn from(image: &UserImage) -> Self {
        Self {
            id: image.id.clone(),
            name: image.file_name.clone(),
            url: image.public_url.clone(),
            uploaded_at: image.uploaded_at,
            size: image.file_size,
            content_type: image.content_type.clone(),
            template_id: None,
        }
    }
}

/// Service facade shared by the HTTP handlers.
#[derive(Clone)]
pub struct Gallery {
    backends: Backends,
    max_upload_bytes: usize,
}

impl Gallery {
    pub fn new(backends: Backends, storage: &StorageConfig) -> Self {
        Self {
            backends,
            max_upload_bytes: storage.max_upload_bytes,
        }
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Resolve a bearer token. Missing or unknown tokens are 401.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Principal, ApiError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))?;

        match self.backends.identity.principal(token).await {
            Ok(Some(principal)) => Ok(principal),
            Ok(None) => Err(ApiError::Unauthorized("Unauthorized".to_string())),
            Err(e) => {
                tracing::warn!(error = %e, "Identity lookup failed");
                Err(ApiError::Unauthorized("Unauthorized".to_string()))
            }
        }
    }

    fn check_size(&self, upload: &Upload, message: String) -> Result<(), ApiError> {
        if upload.data.len() > self.max_upload_bytes {
            return Err(ApiError::Validation(message));
        }
        Ok(())
    }

    fn max_upload_mb(&self) -> usize {
        self.max_upload_bytes / (1024 * 1024)
    }
}

/// Remove stored objects, logging instead of failing.
async fn remove_best_effort(storage: &dyn ObjectStore, bucket: &str, paths: Vec<String>) {
    if paths.is_empty() {
        return;
    }
    if let Err(e) = storage.remove(bucket, &paths).await {
        tracing::warn!(bucket, paths = ?paths, error = %e, "Storage cleanup failed");
    }
}
