use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use super::{remove_best_effort, Gallery, GalleryImage};
use crate::backend::{
    GenerationRequest, InlineImage, Principal, ProcessingRecord, ProcessingStatus, Template,
    UserImage, TEMPLATE_IMAGES_BUCKET, USER_IMAGES_BUCKET,
};
use crate::error::{ApiError, BackendError, CONTENT_POLICY_CODE};

/// Body of a generation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateInput {
    pub template_id: Option<String>,
    pub user_image_ids: Option<Vec<String>>,
}

/// A successful generation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub image: GalleryImage,
    pub processing_id: String,
    pub full_response: String,
    pub template_used: String,
    pub processing_time_ms: u64,
}

/// Paging and filtering for the processing history.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingQuery {
    pub limit: usize,
    pub offset: usize,
    pub status: Option<String>,
}

impl Default for ProcessingQuery {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
            status: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingPage {
    pub records: Vec<ProcessingRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Audit record under construction. Every exit path of `generate` after
/// validation goes through `fail` or `complete`, so exactly one row is written.
struct Attempt {
    record: ProcessingRecord,
    started: Instant,
}

impl Attempt {
    fn new(principal: &Principal, template_id: &str, user_image_ids: &[String]) -> Self {
        Self {
            record: ProcessingRecord {
                id: Uuid::new_v4().to_string(),
                user_id: principal.id.clone(),
                template_id: template_id.to_string(),
                user_image_ids: user_image_ids.to_vec(),
                prompt: String::new(),
                status: ProcessingStatus::Failed,
                error_message: None,
                error_code: None,
                full_response_text: String::new(),
                generated_image_id: None,
                processing_time_ms: 0,
                created_at: Utc::now(),
            },
            started: Instant::now(),
        }
    }

    async fn fail(
        mut self,
        gallery: &Gallery,
        code: &str,
        message: impl Into<String>,
        error: ApiError,
    ) -> ApiError {
        self.record.status = ProcessingStatus::Failed;
        self.record.error_code = Some(code.to_string());
        self.record.error_message = Some(message.into());
        tracing::warn!(
            processing_id = %self.record.id,
            user = %self.record.user_id,
            code,
            "Generation failed"
        );
        self.save(gallery).await;
        error
    }

    async fn complete(mut self, gallery: &Gallery, image_id: &str) -> ProcessingRecord {
        self.record.status = ProcessingStatus::Completed;
        self.record.generated_image_id = Some(image_id.to_string());
        self.save(gallery).await;
        self.record
    }

    async fn save(&mut self, gallery: &Gallery) {
        self.record.processing_time_ms = self.started.elapsed().as_millis() as u64;
        if let Err(e) = gallery
            .backends
            .records
            .insert_processing_record(self.record.clone())
            .await
        {
            tracing::error!(processing_id = %self.record.id, error = %e, "Failed to save processing record");
        }
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

impl Gallery {
    /// Render an owned template against owned images.
    ///
    /// Writes one processing record per attempt that passes input
    /// validation, whatever the outcome.
    pub async fn generate(
        &self,
        principal: &Principal,
        input: GenerateInput,
    ) -> Result<GenerationResult, ApiError> {
        let (template_id, image_ids) = match (input.template_id, input.user_image_ids) {
            (Some(t), Some(ids)) if !t.is_empty() && !ids.is_empty() => (t, ids),
            _ => {
                return Err(ApiError::Validation(
                    "Template ID and at least one user image ID are required".to_string(),
                ))
            }
        };

        let mut attempt = Attempt::new(principal, &template_id, &image_ids);

        let template = match self
            .backends
            .records
            .get_template(&principal.id, &template_id)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                let error = ApiError::from_backend(e, "Template not found");
                return Err(attempt
                    .fail(self, "TEMPLATE_NOT_FOUND", "Template not found", error)
                    .await);
            }
        };
        attempt.record.prompt = template.prompt.clone();

        let user_images = match self.owned_images(principal, &image_ids).await {
            Ok(images) => images,
            Err(error) => {
                return Err(attempt
                    .fail(self, "USER_IMAGES_NOT_FOUND", "User images not found", error)
                    .await)
            }
        };

        let images = match self.reference_images(&template, &user_images).await {
            Ok(images) => images,
            Err(e) => {
                let message = format!("Failed to fetch reference images: {}", e);
                let error = ApiError::from_backend(e, "Failed to fetch reference images");
                return Err(attempt.fail(self, "IMAGE_FETCH_ERROR", message, error).await);
            }
        };

        tracing::info!(
            processing_id = %attempt.record.id,
            template_id = %template.id,
            template_images = template.template_images.len(),
            user_images = user_images.len(),
            generator = self.backends.generator.name(),
            "Generating image"
        );

        let output = match self
            .backends
            .generator
            .generate(GenerationRequest {
                prompt: template.prompt.clone(),
                images,
            })
            .await
        {
            Ok(output) => output,
            Err(BackendError::ContentPolicy(details)) => {
                attempt.record.full_response_text = details.clone();
                let error = ApiError::ContentPolicy { details };
                return Err(attempt
                    .fail(self, CONTENT_POLICY_CODE, "Content violates the provider's policies", error)
                    .await);
            }
            Err(e) => {
                let message = e.to_string();
                let error = ApiError::from_backend(e, "Image generation failed");
                return Err(attempt.fail(self, "GENERATION_ERROR", message, error).await);
            }
        };
        attempt.record.full_response_text = output.text.clone();

        let Some(generated) = output.image else {
            let error = ApiError::Upstream("Image Generation Failed".to_string());
            return Err(attempt
                .fail(self, "NO_IMAGE_DATA", "No image data generated", error)
                .await);
        };

        let saved = match self.store_generated(principal, generated).await {
            Ok(saved) => saved,
            Err((code, message, error)) => {
                return Err(attempt.fail(self, code, message, error).await);
            }
        };

        let record = attempt.complete(self, &saved.id).await;
        tracing::info!(
            processing_id = %record.id,
            image_id = %saved.id,
            size = saved.file_size,
            duration_ms = record.processing_time_ms,
            "Image generated"
        );

        Ok(GenerationResult {
            image: GalleryImage::from(&saved),
            processing_id: record.id,
            full_response: record.full_response_text,
            template_used: template.name,
            processing_time_ms: record.processing_time_ms,
        })
    }

    async fn owned_images(
        &self,
        principal: &Principal,
        ids: &[String],
    ) -> Result<Vec<UserImage>, ApiError> {
        let mut images = Vec::with_capacity(ids.len());
        for id in ids {
            match self.backends.records.get_user_image(id).await {
                Ok(image) if image.user_id == principal.id => images.push(image),
                Ok(_) | Err(BackendError::NotFound) => {
                    return Err(ApiError::NotFound("User images not found".to_string()))
                }
                Err(e) => return Err(ApiError::from_backend(e, "Failed to fetch user images")),
            }
        }
        Ok(images)
    }

    /// Template images first, then the caller's images.
    async fn reference_images(
        &self,
        template: &Template,
        user_images: &[UserImage],
    ) -> Result<Vec<InlineImage>, BackendError> {
        let storage = self.backends.storage.as_ref();
        let mut out = Vec::with_capacity(template.template_images.len() + user_images.len());

        for img in &template.template_images {
            out.push(InlineImage {
                content_type: img.content_type.clone(),
                data: storage.download(TEMPLATE_IMAGES_BUCKET, &img.file_path).await?,
            });
        }
        for img in user_images {
            out.push(InlineImage {
                content_type: img.content_type.clone(),
                data: storage.download(USER_IMAGES_BUCKET, &img.file_path).await?,
            });
        }
        Ok(out)
    }

    async fn store_generated(
        &self,
        principal: &Principal,
        generated: InlineImage,
    ) -> Result<UserImage, (&'static str, String, ApiError)> {
        let file_name = format!(
            "generated-{}-{}.{}",
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..8],
            extension_for(&generated.content_type)
        );
        let path = format!("{}/generated/{}", principal.id, file_name);
        let storage = self.backends.storage.as_ref();

        if let Err(e) = storage
            .upload(USER_IMAGES_BUCKET, &path, generated.data.clone(), &generated.content_type)
            .await
        {
            return Err((
                "STORAGE_UPLOAD_ERROR",
                format!("Storage upload failed: {}", e),
                ApiError::from_backend(e, "Failed to save generated image"),
            ));
        }

        let image = UserImage {
            id: Uuid::new_v4().to_string(),
            user_id: principal.id.clone(),
            public_url: storage.public_url(USER_IMAGES_BUCKET, &path),
            file_path: path.clone(),
            file_name,
            file_size: generated.data.len() as u64,
            content_type: generated.content_type,
            uploaded_at: Utc::now(),
        };

        match self.backends.records.insert_user_image(image).await {
            Ok(saved) => Ok(saved),
            Err(e) => {
                remove_best_effort(storage, USER_IMAGES_BUCKET, vec![path]).await;
                Err((
                    "DATABASE_SAVE_ERROR",
                    format!("Database save failed: {}", e),
                    ApiError::from_backend(e, "Failed to save image metadata"),
                ))
            }
        }
    }

    /// Caller's processing history, newest first.
    pub async fn list_processing(
        &self,
        principal: &Principal,
        query: ProcessingQuery,
    ) -> Result<ProcessingPage, ApiError> {
        let records = self
            .backends
            .records
            .list_processing_records(&principal.id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Failed to fetch processing history"))?;

        let matching: Vec<ProcessingRecord> = records
            .into_iter()
            .filter(|r| query.status.as_deref().map_or(true, |s| r.status.as_str() == s))
            .collect();
        let total = matching.len();

        Ok(ProcessingPage {
            records: matching
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .collect(),
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    /// One processing record plus its generated image, if still present.
    pub async fn get_processing(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<(ProcessingRecord, Option<GalleryImage>), ApiError> {
        let record = self
            .backends
            .records
            .get_processing_record(&principal.id, id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Processing record not found"))?;

        let image = match record.generated_image_id.as_deref() {
            Some(image_id) => match self.backends.records.get_user_image(image_id).await {
                Ok(image) => Some(GalleryImage::from(&image)),
                Err(BackendError::NotFound) => None,
                Err(e) => return Err(ApiError::from_backend(e, "Failed to fetch generated image")),
            },
            None => None,
        };

        Ok((record, image))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::TemplateInput;
    use super::*;
    use crate::backend::ObjectStore;

    async fn setup(f: &Fixture, prompt: &str) -> (Template, UserImage) {
        let template = f
            .gallery
            .create_template(
                &f.alice,
                TemplateInput {
                    name: Some("Poster".into()),
                    prompt: Some(prompt.into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let image = f.gallery.upload_image(&f.alice, png("me.png")).await.unwrap();
        (template, image)
    }

    fn input(template: &Template, ids: &[&str]) -> GenerateInput {
        GenerateInput {
            template_id: Some(template.id.clone()),
            user_image_ids: Some(ids.iter().map(|s| s.to_string()).collect()),
        }
    }

    async fn history(f: &Fixture) -> Vec<ProcessingRecord> {
        f.gallery
            .list_processing(&f.alice, ProcessingQuery::default())
            .await
            .unwrap()
            .records
    }

    #[tokio::test]
    async fn test_requires_template_and_images() {
        let f = fixture();
        let (template, _) = setup(&f, "p").await;

        let err = f.gallery.generate(&f.alice, input(&template, &[])).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        let err = f
            .gallery
            .generate(&f.alice, GenerateInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(history(&f).await.is_empty());
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let f = fixture();
        let (template, image) = setup(&f, "studio portrait").await;

        let result = f
            .gallery
            .generate(&f.alice, input(&template, &[&image.id]))
            .await
            .unwrap();
        assert_eq!(result.template_used, "Poster");

        let records = history(&f).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ProcessingStatus::Completed);
        assert_eq!(records[0].prompt, "studio portrait");
        assert_eq!(records[0].generated_image_id.as_deref(), Some(result.image.id.as_str()));

        let generated = f.storage.list(USER_IMAGES_BUCKET, "alice/generated/").await.unwrap();
        assert_eq!(generated.len(), 1);

        // Uploads view hides it, generated view shows it.
        let uploads = f.gallery.list_uploads(&f.alice).await.unwrap();
        assert_eq!(uploads.len(), 1);
        let outputs = f.gallery.list_generated(&f.alice).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].template_id.as_deref(), Some(template.id.as_str()));
    }

    #[tokio::test]
    async fn test_content_policy() {
        let f = fixture();
        let (template, image) = setup(&f, "something forbidden").await;

        let err = f
            .gallery
            .generate(&f.alice, input(&template, &[&image.id]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ContentPolicy { .. }));

        let records = history(&f).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ProcessingStatus::Failed);
        assert_eq!(records[0].error_code.as_deref(), Some(CONTENT_POLICY_CODE));
        assert!(!records[0].full_response_text.is_empty());
    }

    #[tokio::test]
    async fn test_missing_template_is_recorded() {
        let f = fixture();
        let (_, image) = setup(&f, "p").await;

        let err = f
            .gallery
            .generate(
                &f.alice,
                GenerateInput {
                    template_id: Some("nope".into()),
                    user_image_ids: Some(vec![image.id.clone()]),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::NotFound("Template not found".into()));
        assert_eq!(
            history(&f).await[0].error_code.as_deref(),
            Some("TEMPLATE_NOT_FOUND")
        );
    }

    #[tokio::test]
    async fn test_foreign_images_rejected() {
        let f = fixture();
        let (template, _) = setup(&f, "p").await;
        let theirs = f.gallery.upload_image(&f.bob, png("bob.png")).await.unwrap();

        let err = f
            .gallery
            .generate(&f.alice, input(&template, &[&theirs.id]))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::NotFound("User images not found".into()));
        assert_eq!(
            history(&f).await[0].error_code.as_deref(),
            Some("USER_IMAGES_NOT_FOUND")
        );
    }

    #[tokio::test]
    async fn test_processing_paging_and_detail() {
        let f = fixture();
        let (template, image) = setup(&f, "p").await;
        for _ in 0..3 {
            f.gallery
                .generate(&f.alice, input(&template, &[&image.id]))
                .await
                .unwrap();
        }
        let _ = f.gallery.generate(&f.alice, input(&template, &["missing"])).await;

        let page = f
            .gallery
            .list_processing(
                &f.alice,
                ProcessingQuery {
                    limit: 2,
                    offset: 1,
                    status: Some("completed".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.records.len(), 2);

        let records = history(&f).await;
        assert_eq!(records[0].status, ProcessingStatus::Failed);

        let completed = &records[1];
        let (record, generated) = f.gallery.get_processing(&f.alice, &completed.id).await.unwrap();
        assert_eq!(record.id, completed.id);
        assert!(generated.is_some());

        assert!(matches!(
            f.gallery.get_processing(&f.bob, &completed.id).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
