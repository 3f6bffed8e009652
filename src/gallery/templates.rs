use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::{remove_best_effort, Gallery, Upload};
use crate::backend::{Principal, Template, TemplateDraft, TemplateImage, TEMPLATE_IMAGES_BUCKET};
use crate::error::{ApiError, BackendError};

const TEMPLATE_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Create/update body for a template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub prompt: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl TemplateInput {
    fn into_draft(self) -> Result<TemplateDraft, ApiError> {
        let required = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        match (required(self.name), required(self.prompt)) {
            (Some(name), Some(prompt)) => Ok(TemplateDraft {
                name,
                description: self.description,
                prompt,
                kind: self
                    .kind
                    .filter(|k| !k.is_empty())
                    .unwrap_or_else(|| "custom".to_string()),
            }),
            _ => Err(ApiError::Validation(
                "Name and prompt are required".to_string(),
            )),
        }
    }
}

fn template_lookup(err: BackendError) -> ApiError {
    ApiError::from_backend(err, "Template not found")
}

impl Gallery {
    pub async fn list_templates(&self, principal: &Principal) -> Result<Vec<Template>, ApiError> {
        self.backends
            .records
            .list_templates(&principal.id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Failed to fetch templates"))
    }

    pub async fn create_template(
        &self,
        principal: &Principal,
        input: TemplateInput,
    ) -> Result<Template, ApiError> {
        let draft = input.into_draft()?;
        let now = Utc::now();
        let template = Template {
            id: Uuid::new_v4().to_string(),
            user_id: principal.id.clone(),
            name: draft.name,
            description: draft.description,
            prompt: draft.prompt,
            kind: draft.kind,
            created_at: now,
            updated_at: now,
            template_images: Vec::new(),
        };

        let created = self
            .backends
            .records
            .insert_template(template)
            .await
            .map_err(|e| ApiError::from_backend(e, "Failed to create template"))?;

        tracing::info!(user = %principal.id, template_id = %created.id, "Template created");
        Ok(created)
    }

    pub async fn get_template(&self, principal: &Principal, id: &str) -> Result<Template, ApiError> {
        self.backends
            .records
            .get_template(&principal.id, id)
            .await
            .map_err(template_lookup)
    }

    pub async fn update_template(
        &self,
        principal: &Principal,
        id: &str,
        input: TemplateInput,
    ) -> Result<Template, ApiError> {
        let draft = input.into_draft()?;
        self.backends
            .records
            .update_template(&principal.id, id, draft)
            .await
            .map_err(|e| match e {
                BackendError::NotFound => template_lookup(e),
                other => ApiError::from_backend(other, "Failed to update template"),
            })
    }

    /// Delete a template. Its stored images are removed first; a storage
    /// failure there does not stop the row deletion.
    pub async fn delete_template(&self, principal: &Principal, id: &str) -> Result<(), ApiError> {
        let template = self.get_template(principal, id).await?;

        let paths = template
            .template_images
            .iter()
            .map(|img| img.file_path.clone())
            .collect();
        remove_best_effort(self.backends.storage.as_ref(), TEMPLATE_IMAGES_BUCKET, paths).await;

        self.backends
            .records
            .delete_template(&principal.id, id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Failed to delete template"))?;

        tracing::info!(user = %principal.id, template_id = %id, "Template deleted");
        Ok(())
    }

    /// Attach a reference image to an owned template.
    pub async fn add_template_image(
        &self,
        principal: &Principal,
        template_id: &str,
        upload: Upload,
    ) -> Result<TemplateImage, ApiError> {
        self.backends
            .records
            .get_template(&principal.id, template_id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Template not found or access denied"))?;

        self.check_size(
            &upload,
            format!("File size too large (max {}MB)", self.max_upload_mb()),
        )?;
        if !TEMPLATE_IMAGE_TYPES.contains(&upload.content_type.as_str()) {
            return Err(ApiError::Validation(
                "Invalid file type. Only images are allowed.".to_string(),
            ));
        }

        let path = format!(
            "{}/{}/{}.{}",
            principal.id,
            template_id,
            Uuid::new_v4(),
            upload.extension()
        );
        let storage = self.backends.storage.as_ref();

        storage
            .upload(TEMPLATE_IMAGES_BUCKET, &path, upload.data.clone(), &upload.content_type)
            .await
            .map_err(|e| ApiError::from_backend(e, "Failed to upload file"))?;

        let image = TemplateImage {
            id: Uuid::new_v4().to_string(),
            template_id: template_id.to_string(),
            user_id: principal.id.clone(),
            public_url: storage.public_url(TEMPLATE_IMAGES_BUCKET, &path),
            file_path: path.clone(),
            file_name: upload.file_name.clone(),
            file_size: upload.size(),
            content_type: upload.content_type.clone(),
            uploaded_at: Utc::now(),
        };

        match self.backends.records.insert_template_image(image).await {
            Ok(saved) => Ok(saved),
            Err(e) => {
                remove_best_effort(storage, TEMPLATE_IMAGES_BUCKET, vec![path]).await;
                Err(ApiError::from_backend(e, "Failed to save image record"))
            }
        }
    }

    pub async fn delete_template_image(
        &self,
        principal: &Principal,
        template_id: &str,
        image_id: &str,
    ) -> Result<(), ApiError> {
        let image = self
            .backends
            .records
            .get_template_image(&principal.id, template_id, image_id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Image not found or access denied"))?;

        remove_best_effort(
            self.backends.storage.as_ref(),
            TEMPLATE_IMAGES_BUCKET,
            vec![image.file_path],
        )
        .await;

        self.backends
            .records
            .delete_template_image(&principal.id, template_id, image_id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Failed to delete image record"))
    }
}
