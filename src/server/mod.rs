//! HTTP surface: router, handlers and the TCP accept loop.

mod chat;
mod images;
mod listener;

pub use listener::HttpListener;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::backend::Backends;
use crate::config::Config;
use crate::error::AppError;
use crate::gallery::Gallery;
use crate::responses::ResponseTable;
use crate::session::create_id_generator;
use crate::shutdown::ShutdownCoordinator;
use crate::streaming::{ChatProducer, Pacing, Timer};

/// Frames buffered between a session task and its response body.
const FRAME_BUFFER: usize = 16;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub producer: ChatProducer,
    pub gallery: Gallery,
    pub shutdown: ShutdownCoordinator,
    pub write_timeout: Duration,
}

impl AppState {
    pub fn new(
        config: &Config,
        backends: Backends,
        timer: Arc<dyn Timer>,
        shutdown: ShutdownCoordinator,
    ) -> Result<Self, AppError> {
        let ids = create_id_generator(&config.stream.id_generator)?;
        let producer = ChatProducer::new(
            Arc::new(ResponseTable::default()),
            ids,
            timer,
            Pacing::from_config(&config.stream),
        );

        Ok(Self {
            producer,
            gallery: Gallery::new(backends, &config.storage),
            shutdown,
            write_timeout: config.stream.write_timeout(),
        })
    }
}

/// Build the application router.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(chat::health))
        .route("/api/chat", post(chat::chat))
        .route(
            "/api/image/templates",
            get(images::list_templates).post(images::create_template),
        )
        .route(
            "/api/image/templates/:id",
            get(images::get_template)
                .put(images::update_template)
                .delete(images::delete_template),
        )
        .route(
            "/api/image/templates/:id/images",
            post(images::add_template_image),
        )
        .route(
            "/api/image/templates/:id/images/:image_id",
            delete(images::delete_template_image),
        )
        .route("/api/image/upload", post(images::upload))
        .route("/api/image/gallery", get(images::gallery))
        .route("/api/image/gallery/generated", get(images::generated))
        .route("/api/image/generate", post(images::generate))
        .route("/api/image/processing", get(images::processing))
        .route("/api/image/processing/:id", get(images::processing_detail))
        .route("/api/image/:id", delete(images::delete_image))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}
