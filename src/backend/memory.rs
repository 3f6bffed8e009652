//! In-memory collaborators.
//!
//! Back the server when no external services are configured, and the tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::records::{
    Principal, ProcessingRecord, Template, TemplateDraft, TemplateImage, UserImage,
};
use super::traits::{
    GenerationOutput, GenerationRequest, IdentityProvider, ImageGenerator, ObjectStore,
    RecordStore,
};
use crate::error::BackendError;

/// Identity provider backed by a fixed token table.
pub struct StaticTokenIdentity {
    tokens: HashMap<String, String>,
}

impl StaticTokenIdentity {
    /// `tokens` maps bearer token to principal id.
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentity {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn principal(&self, token: &str) -> Result<Option<Principal>, BackendError> {
        Ok(self.tokens.get(token).map(|id| Principal::new(id.as_str())))
    }
}

struct StoredObject {
    data: Bytes,
    content_type: String,
}

/// Object store holding blobs in a map keyed by bucket and path.
pub struct MemoryObjectStore {
    public_base_url: String,
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn exists(&self, bucket: &str, path: &str) -> bool {
        self.objects
            .read()
            .await
            .contains_key(&(bucket.to_string(), path.to_string()))
    }

    /// Content type recorded at upload.
    pub async fn content_type(&self, bucket: &str, path: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), BackendError> {
        let mut objects = self.objects.write().await;
        let key = (bucket.to_string(), path.to_string());
        if objects.contains_key(&key) {
            return Err(BackendError::Storage(format!(
                "Object already exists: {}/{}",
                bucket, path
            )));
        }
        objects.insert(
            key,
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Bytes, BackendError> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| o.data.clone())
            .ok_or(BackendError::NotFound)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_base_url.trim_end_matches('/'),
            bucket,
            path
        )
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        let mut objects = self.objects.write().await;
        for path in paths {
            objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|(b, p)| b == bucket && p.starts_with(prefix))
            .map(|(_, p)| p.clone())
            .collect())
    }
}

#[derive(Default)]
struct Tables {
    templates: Vec<Template>,
    template_images: Vec<TemplateImage>,
    user_images: Vec<UserImage>,
    processing: Vec<ProcessingRecord>,
}

impl Tables {
    fn with_images(&self, mut template: Template) -> Template {
        template.template_images = self
            .template_images
            .iter()
            .filter(|img| img.template_id == template.id)
            .cloned()
            .collect();
        template
    }

    fn template_index(&self, owner: &str, id: &str) -> Result<usize, BackendError> {
        self.templates
            .iter()
            .position(|t| t.id == id && t.user_id == owner)
            .ok_or(BackendError::NotFound)
    }
}

/// Newest first; ties keep the most recently inserted first.
fn newest_first<T: Clone>(
    rows: &[T],
    keep: impl Fn(&T) -> bool,
    key: impl Fn(&T) -> chrono::DateTime<Utc>,
) -> Vec<T> {
    let mut out: Vec<T> = rows.iter().rev().filter(|r| keep(*r)).cloned().collect();
    out.sort_by(|a, b| key(b).cmp(&key(a)));
    out
}

/// Record store holding every table in memory.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_templates(&self, owner: &str) -> Result<Vec<Template>, BackendError> {
        let tables = self.tables.read().await;
        Ok(newest_first(&tables.templates, |t| t.user_id == owner, |t| t.created_at)
            .into_iter()
            .map(|t| tables.with_images(t))
            .collect())
    }

    async fn get_template(&self, owner: &str, id: &str) -> Result<Template, BackendError> {
        let tables = self.tables.read().await;
        let index = tables.template_index(owner, id)?;
        Ok(tables.with_images(tables.templates[index].clone()))
    }

    async fn insert_template(&self, template: Template) -> Result<Template, BackendError> {
        let mut tables = self.tables.write().await;
        if tables.templates.iter().any(|t| t.id == template.id) {
            return Err(BackendError::Database(format!(
                "Duplicate template id: {}",
                template.id
            )));
        }
        tables.templates.push(template.clone());
        Ok(tables.with_images(template))
    }

    async fn update_template(
        &self,
        owner: &str,
        id: &str,
        draft: TemplateDraft,
    ) -> Result<Template, BackendError> {
        let mut tables = self.tables.write().await;
        let index = tables.template_index(owner, id)?;
        let row = &mut tables.templates[index];
        row.name = draft.name;
        row.description = draft.description;
        row.prompt = draft.prompt;
        row.kind = draft.kind;
        row.updated_at = Utc::now();
        let updated = row.clone();
        Ok(tables.with_images(updated))
    }

    async fn delete_template(&self, owner: &str, id: &str) -> Result<(), BackendError> {
        let mut tables = self.tables.write().await;
        let index = tables.template_index(owner, id)?;
        tables.templates.remove(index);
        tables.template_images.retain(|img| img.template_id != id);
        Ok(())
    }

    async fn insert_template_image(
        &self,
        image: TemplateImage,
    ) -> Result<TemplateImage, BackendError> {
        let mut tables = self.tables.write().await;
        tables.template_index(&image.user_id, &image.template_id)?;
        tables.template_images.push(image.clone());
        Ok(image)
    }

    async fn get_template_image(
        &self,
        owner: &str,
        template_id: &str,
        id: &str,
    ) -> Result<TemplateImage, BackendError> {
        self.tables
            .read()
            .await
            .template_images
            .iter()
            .find(|img| img.id == id && img.template_id == template_id && img.user_id == owner)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn delete_template_image(
        &self,
        owner: &str,
        template_id: &str,
        id: &str,
    ) -> Result<(), BackendError> {
        let mut tables = self.tables.write().await;
        let before = tables.template_images.len();
        tables.template_images.retain(|img| {
            !(img.id == id && img.template_id == template_id && img.user_id == owner)
        });
        if tables.template_images.len() == before {
            return Err(BackendError::NotFound);
        }
        Ok(())
    }

    async fn insert_user_image(&self, image: UserImage) -> Result<UserImage, BackendError> {
        let mut tables = self.tables.write().await;
        if tables.user_images.iter().any(|i| i.id == image.id) {
            return Err(BackendError::Database(format!(
                "Duplicate image id: {}",
                image.id
            )));
        }
        tables.user_images.push(image.clone());
        Ok(image)
    }

    async fn get_user_image(&self, id: &str) -> Result<UserImage, BackendError> {
        self.tables
            .read()
            .await
            .user_images
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn list_user_images(&self, owner: &str) -> Result<Vec<UserImage>, BackendError> {
        let tables = self.tables.read().await;
        Ok(newest_first(&tables.user_images, |i| i.user_id == owner, |i| i.uploaded_at))
    }

    async fn delete_user_image(&self, id: &str) -> Result<(), BackendError> {
        let mut tables = self.tables.write().await;
        let before = tables.user_images.len();
        tables.user_images.retain(|i| i.id != id);
        if tables.user_images.len() == before {
            return Err(BackendError::NotFound);
        }
        Ok(())
    }

    async fn insert_processing_record(
        &self,
        record: ProcessingRecord,
    ) -> Result<(), BackendError> {
        self.tables.write().await.processing.push(record);
        Ok(())
    }

    async fn list_processing_records(
        &self,
        owner: &str,
    ) -> Result<Vec<ProcessingRecord>, BackendError> {
        let tables = self.tables.read().await;
        Ok(newest_first(&tables.processing, |r| r.user_id == owner, |r| r.created_at))
    }

    async fn get_processing_record(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<ProcessingRecord, BackendError> {
        self.tables
            .read()
            .await
            .processing
            .iter()
            .find(|r| r.id == id && r.user_id == owner)
            .cloned()
            .ok_or(BackendError::NotFound)
    }
}

/// Generator that hands back the last reference image.
///
/// Prompts containing a blocked term are rejected the way a provider reports
/// a prohibited-content finish reason.
#[derive(Default)]
pub struct MockImageGenerator {
    blocked_terms: Vec<String>,
}

impl MockImageGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocked_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked_terms: terms
                .into_iter()
                .map(|t| t.into().to_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, BackendError> {
        let prompt = request.prompt.to_lowercase();
        if let Some(term) = self.blocked_terms.iter().find(|t| prompt.contains(t.as_str())) {
            return Err(BackendError::ContentPolicy(format!(
                "Request blocked: prompt mentions \"{}\"",
                term
            )));
        }

        Ok(GenerationOutput {
            text: format!("Rendered with {} reference image(s)", request.images.len()),
            image: request.images.last().cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InlineImage;

    fn template(id: &str, owner: &str, minutes_ago: i64) -> Template {
        let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        Template {
            id: id.into(),
            user_id: owner.into(),
            name: format!("template {}", id),
            description: None,
            prompt: "draw".into(),
            kind: "custom".into(),
            created_at: at,
            updated_at: at,
            template_images: vec![],
        }
    }

    #[tokio::test]
    async fn test_static_tokens() {
        let mut tokens = HashMap::new();
        tokens.insert("secret".to_string(), "alice".to_string());
        let identity = StaticTokenIdentity::new(tokens);

        assert_eq!(
            identity.principal("secret").await.unwrap(),
            Some(Principal::new("alice"))
        );
        assert_eq!(identity.principal("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_object_store() {
        let store = MemoryObjectStore::new("http://cdn.test/storage/");
        store
            .upload("b", "u1/a.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();

        assert!(store
            .upload("b", "u1/a.png", Bytes::from_static(b"again"), "image/png")
            .await
            .is_err());
        assert_eq!(store.public_url("b", "u1/a.png"), "http://cdn.test/storage/b/u1/a.png");
        assert_eq!(store.list("b", "u1/").await.unwrap(), vec!["u1/a.png"]);
        assert_eq!(store.download("b", "u1/a.png").await.unwrap(), "png");

        store.remove("b", &["u1/a.png".to_string(), "missing".to_string()]).await.unwrap();
        assert!(!store.exists("b", "u1/a.png").await);
        assert_eq!(store.download("b", "u1/a.png").await, Err(BackendError::NotFound));
    }

    #[tokio::test]
    async fn test_templates_scoped_and_ordered() {
        let records = MemoryRecordStore::new();
        records.insert_template(template("old", "alice", 10)).await.unwrap();
        records.insert_template(template("new", "alice", 1)).await.unwrap();
        records.insert_template(template("other", "bob", 0)).await.unwrap();

        let ids: Vec<String> = records
            .list_templates("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);

        assert_eq!(
            records.get_template("alice", "other").await,
            Err(BackendError::NotFound)
        );
        assert_eq!(
            records.delete_template("alice", "other").await,
            Err(BackendError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_delete_template_drops_images() {
        let records = MemoryRecordStore::new();
        records.insert_template(template("t1", "alice", 0)).await.unwrap();
        records
            .insert_template_image(TemplateImage {
                id: "img".into(),
                template_id: "t1".into(),
                user_id: "alice".into(),
                file_path: "alice/t1/x.png".into(),
                file_name: "x.png".into(),
                file_size: 3,
                content_type: "image/png".into(),
                public_url: String::new(),
                uploaded_at: Utc::now(),
            })
            .await
            .unwrap();

        let fetched = records.get_template("alice", "t1").await.unwrap();
        assert_eq!(fetched.template_images.len(), 1);

        records.delete_template("alice", "t1").await.unwrap();
        assert_eq!(
            records.get_template_image("alice", "t1", "img").await,
            Err(BackendError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_mock_generator() {
        let generator = MockImageGenerator::with_blocked_terms(["Forbidden"]);
        let image = InlineImage {
            content_type: "image/png".into(),
            data: Bytes::from_static(b"png"),
        };

        let output = generator
            .generate(GenerationRequest {
                prompt: "a cat".into(),
                images: vec![image.clone()],
            })
            .await
            .unwrap();
        assert_eq!(output.image, Some(image));

        let err = generator
            .generate(GenerationRequest {
                prompt: "something FORBIDDEN".into(),
                images: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ContentPolicy(_)));
    }
}
