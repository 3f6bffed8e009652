//! Rows kept by the record store.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub id: String,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A reusable generation prompt with optional reference images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub prompt: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub template_images: Vec<TemplateImage>,
}

/// Editable fields of a template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDraft {
    pub name: String,
    pub description: Option<String>,
    pub prompt: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateImage {
    pub id: String,
    pub template_id: String,
    pub user_id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub public_url: String,
    pub uploaded_at: DateTime<Utc>,
}

/// An uploaded or generated image owned by one principal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserImage {
    pub id: String,
    pub user_id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub public_url: String,
    pub uploaded_at: DateTime<Utc>,
}

impl UserImage {
    /// Whether the object lives under the owner's `generated/` folder.
    pub fn is_generated(&self) -> bool {
        self.file_path
            .strip_prefix(self.user_id.as_str())
            .map_or(false, |rest| rest.starts_with("/generated/"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

/// Audit row written for every generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingRecord {
    pub id: String,
    pub user_id: String,
    pub template_id: String,
    pub user_image_ids: Vec<String>,
    pub prompt: String,
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub full_response_text: String,
    pub generated_image_id: Option<String>,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(user: &str, path: &str) -> UserImage {
        UserImage {
            id: "1".into(),
            user_id: user.into(),
            file_path: path.into(),
            file_name: "a.png".into(),
            file_size: 1,
            content_type: "image/png".into(),
            public_url: String::new(),
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_generated() {
        assert!(image("u1", "u1/generated/generated-1.png").is_generated());
        assert!(!image("u1", "u1/abc.png").is_generated());
        assert!(!image("u1", "u2/generated/x.png").is_generated());
        assert!(!image("u1", "u1generated/x.png").is_generated());
    }

    #[test]
    fn test_template_serializes_type() {
        let now = Utc::now();
        let template = Template {
            id: "t".into(),
            user_id: "u".into(),
            name: "n".into(),
            description: None,
            prompt: "p".into(),
            kind: "custom".into(),
            created_at: now,
            updated_at: now,
            template_images: vec![],
        };
        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["type"], "custom");
        assert!(value.get("kind").is_none());
    }
}
