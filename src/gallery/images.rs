use chrono::Utc;
use uuid::Uuid;

use super::{remove_best_effort, Gallery, GalleryImage, Upload};
use crate::backend::{Principal, UserImage, USER_IMAGES_BUCKET};
use crate::error::{ApiError, BackendError};

impl Gallery {
    /// Store an uploaded image under `<principal>/<uuid>.<ext>` and record it.
    ///
    /// If the record cannot be written the stored object is removed again.
    pub async fn upload_image(
        &self,
        principal: &Principal,
        upload: Upload,
    ) -> Result<UserImage, ApiError> {
        if !upload.content_type.starts_with("image/") {
            return Err(ApiError::Validation("File must be an image".to_string()));
        }
        self.check_size(
            &upload,
            format!("File size must be less than {}MB", self.max_upload_mb()),
        )?;

        let path = format!("{}/{}.{}", principal.id, Uuid::new_v4(), upload.extension());
        let storage = self.backends.storage.as_ref();

        storage
            .upload(USER_IMAGES_BUCKET, &path, upload.data.clone(), &upload.content_type)
            .await
            .map_err(|e| ApiError::from_backend(e, "Failed to upload image"))?;

        let image = UserImage {
            id: Uuid::new_v4().to_string(),
            user_id: principal.id.clone(),
            public_url: storage.public_url(USER_IMAGES_BUCKET, &path),
            file_path: path.clone(),
            file_name: upload.file_name,
            file_size: upload.data.len() as u64,
            content_type: upload.content_type,
            uploaded_at: Utc::now(),
        };

        match self.backends.records.insert_user_image(image).await {
            Ok(saved) => {
                tracing::info!(
                    user = %principal.id,
                    image_id = %saved.id,
                    size = saved.file_size,
                    "Image uploaded"
                );
                Ok(saved)
            }
            Err(e) => {
                remove_best_effort(storage, USER_IMAGES_BUCKET, vec![path]).await;
                Err(ApiError::from_backend(e, "Failed to save image metadata"))
            }
        }
    }

    /// Caller's uploads, newest first, generated images excluded.
    pub async fn list_uploads(&self, principal: &Principal) -> Result<Vec<GalleryImage>, ApiError> {
        let images = self
            .backends
            .records
            .list_user_images(&principal.id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Failed to fetch images"))?;

        Ok(images
            .iter()
            .filter(|img| !img.is_generated())
            .map(GalleryImage::from)
            .collect())
    }

    /// Caller's generated images, newest generation first, tagged with the
    /// template that produced them.
    pub async fn list_generated(
        &self,
        principal: &Principal,
    ) -> Result<Vec<GalleryImage>, ApiError> {
        let records = self
            .backends
            .records
            .list_processing_records(&principal.id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Failed to fetch generated images"))?;

        let mut images = Vec::new();
        for record in records {
            let Some(image_id) = record.generated_image_id.as_deref() else {
                continue;
            };
            match self.backends.records.get_user_image(image_id).await {
                Ok(image) if image.user_id == principal.id => {
                    let mut entry = GalleryImage::from(&image);
                    entry.template_id = Some(record.template_id.clone());
                    images.push(entry);
                }
                // Image deleted since generation.
                Ok(_) | Err(BackendError::NotFound) => {}
                Err(e) => return Err(ApiError::from_backend(e, "Failed to fetch generated images")),
            }
        }
        Ok(images)
    }

    /// Delete an owned image. A storage failure is logged and the record is
    /// deleted anyway.
    pub async fn delete_image(&self, principal: &Principal, id: &str) -> Result<(), ApiError> {
        let image = self
            .backends
            .records
            .get_user_image(id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Image not found"))?;

        if image.user_id != principal.id {
            tracing::warn!(user = %principal.id, image_id = %id, "Refusing to delete foreign image");
            return Err(ApiError::Forbidden("Unauthorized".to_string()));
        }

        remove_best_effort(
            self.backends.storage.as_ref(),
            USER_IMAGES_BUCKET,
            vec![image.file_path],
        )
        .await;

        self.backends
            .records
            .delete_user_image(id)
            .await
            .map_err(|e| ApiError::from_backend(e, "Failed to delete image metadata"))?;

        tracing::info!(user = %principal.id, image_id = %id, "Image deleted");
        Ok(())
    }
}
