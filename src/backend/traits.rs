//! Collaborator trait definitions.

use async_trait::async_trait;
use bytes::Bytes;

use super::records::{
    Principal, ProcessingRecord, Template, TemplateDraft, TemplateImage, UserImage,
};
use crate::error::BackendError;

/// Bucket for uploaded and generated user images.
pub const USER_IMAGES_BUCKET: &str = "user-images";

/// Bucket for template reference images.
pub const TEMPLATE_IMAGES_BUCKET: &str = "template-images";

/// Resolves bearer tokens to principals.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` for unknown tokens.
    async fn principal(&self, token: &str) -> Result<Option<Principal>, BackendError>;
}

/// Blob storage addressed by bucket and path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store `data`. Fails if the path is already taken.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), BackendError>;

    async fn download(&self, bucket: &str, path: &str) -> Result<Bytes, BackendError>;

    /// URL the object is served from. Does not check existence.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Remove every path. Missing paths are not an error.
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError>;

    /// Paths under `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BackendError>;
}

/// Relational records. Reads scoped by `owner` return `NotFound` for rows
/// owned by someone else.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Newest first, images attached.
    async fn list_templates(&self, owner: &str) -> Result<Vec<Template>, BackendError>;
    async fn get_template(&self, owner: &str, id: &str) -> Result<Template, BackendError>;
    async fn insert_template(&self, template: Template) -> Result<Template, BackendError>;
    async fn update_template(
        &self,
        owner: &str,
        id: &str,
        draft: TemplateDraft,
    ) -> Result<Template, BackendError>;
    /// Removes the template and its image rows.
    async fn delete_template(&self, owner: &str, id: &str) -> Result<(), BackendError>;

    async fn insert_template_image(
        &self,
        image: TemplateImage,
    ) -> Result<TemplateImage, BackendError>;
    async fn get_template_image(
        &self,
        owner: &str,
        template_id: &str,
        id: &str,
    ) -> Result<TemplateImage, BackendError>;
    async fn delete_template_image(
        &self,
        owner: &str,
        template_id: &str,
        id: &str,
    ) -> Result<(), BackendError>;

    async fn insert_user_image(&self, image: UserImage) -> Result<UserImage, BackendError>;
    /// Unscoped lookup; callers check ownership themselves.
    async fn get_user_image(&self, id: &str) -> Result<UserImage, BackendError>;
    /// Newest first.
    async fn list_user_images(&self, owner: &str) -> Result<Vec<UserImage>, BackendError>;
    async fn delete_user_image(&self, id: &str) -> Result<(), BackendError>;

    async fn insert_processing_record(
        &self,
        record: ProcessingRecord,
    ) -> Result<(), BackendError>;
    /// Newest first.
    async fn list_processing_records(
        &self,
        owner: &str,
    ) -> Result<Vec<ProcessingRecord>, BackendError>;
    async fn get_processing_record(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<ProcessingRecord, BackendError>;
}

/// Image payload passed to or returned from a generator.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub content_type: String,
    pub data: Bytes,
}

/// Prompt plus reference images, template images first.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub images: Vec<InlineImage>,
}

/// Everything the provider sent back.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    pub text: String,
    pub image: Option<InlineImage>,
}

/// Image-generation provider. A content-policy finish reason is reported as
/// `BackendError::ContentPolicy` carrying the provider's text.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: GenerationRequest)
        -> Result<GenerationOutput, BackendError>;
}
