//! External collaborators: identity, object storage, records and image
//! generation.

mod memory;
mod records;
mod traits;

pub use memory::{MemoryObjectStore, MemoryRecordStore, MockImageGenerator, StaticTokenIdentity};
pub use records::{
    Principal, ProcessingRecord, ProcessingStatus, Template, TemplateDraft, TemplateImage,
    UserImage,
};
pub use traits::{
    GenerationOutput, GenerationRequest, IdentityProvider, ImageGenerator, InlineImage,
    ObjectStore, RecordStore, TEMPLATE_IMAGES_BUCKET, USER_IMAGES_BUCKET,
};

use std::sync::Arc;

use crate::config::Config;

/// The set of collaborators a server runs against.
#[derive(Clone)]
pub struct Backends {
    pub identity: Arc<dyn IdentityProvider>,
    pub storage: Arc<dyn ObjectStore>,
    pub records: Arc<dyn RecordStore>,
    pub generator: Arc<dyn ImageGenerator>,
}

/// Create the in-memory collaborators from configuration.
pub fn create_backends(config: &Config) -> Backends {
    let backends = Backends {
        identity: Arc::new(StaticTokenIdentity::new(config.auth.tokens.clone())),
        storage: Arc::new(MemoryObjectStore::new(config.storage.public_base_url.clone())),
        records: Arc::new(MemoryRecordStore::new()),
        generator: Arc::new(MockImageGenerator::new()),
    };

    tracing::info!(
        identity = backends.identity.name(),
        storage = backends.storage.name(),
        records = backends.records.name(),
        generator = backends.generator.name(),
        tokens = config.auth.tokens.len(),
        "Backends created"
    );

    backends
}
