//! Image template, upload and generation endpoints. All require a bearer
//! token.

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequestParts, Multipart, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::AppState;
use crate::backend::Principal;
use crate::error::ApiError;
use crate::gallery::{GenerateInput, ProcessingQuery, TemplateInput, Upload};

/// Caller resolved from `Authorization: Bearer <token>`.
pub struct Authenticated(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        state.gallery.authenticate(token).await.map(Authenticated)
    }
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::Validation("Invalid JSON body".to_string()))
}

/// Pull the `file` field out of a multipart form.
async fn read_file(multipart: Result<Multipart, MultipartRejection>) -> Result<Upload, ApiError> {
    let mut multipart =
        multipart.map_err(|e| ApiError::Validation(format!("Invalid form data: {}", e.body_text())))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Invalid form data: {}", e.body_text())))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("Invalid form data: {}", e.body_text())))?;

        return Ok(Upload {
            file_name,
            content_type,
            data,
        });
    }

    Err(ApiError::Validation("No file provided".to_string()))
}

pub async fn list_templates(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> Result<Json<serde_json::Value>, ApiError> {
    let templates = state.gallery.list_templates(&principal).await?;
    Ok(Json(json!({ "templates": templates })))
}

pub async fn create_template(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    body: Bytes,
) -> Result<Response, ApiError> {
    let input: TemplateInput = parse_json(&body)?;
    let template = state.gallery.create_template(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "template": template }))).into_response())
}

pub async fn get_template(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let template = state.gallery.get_template(&principal, &id).await?;
    Ok(Json(json!({ "template": template })))
}

pub async fn update_template(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let input: TemplateInput = parse_json(&body)?;
    let template = state.gallery.update_template(&principal, &id, input).await?;
    Ok(Json(json!({ "template": template })))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.gallery.delete_template(&principal, &id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn add_template_image(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let upload = read_file(multipart).await?;
    let image = state.gallery.add_template_image(&principal, &id, upload).await?;
    Ok((StatusCode::CREATED, Json(json!({ "image": image }))).into_response())
}

pub async fn delete_template_image(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path((id, image_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .gallery
        .delete_template_image(&principal, &id, &image_id)
        .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn upload(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let upload = read_file(multipart).await?;
    let image = state.gallery.upload_image(&principal, upload).await?;
    Ok(Json(json!({
        "success": true,
        "image": {
            "id": image.id,
            "fileName": image.file_name,
            "url": image.public_url,
            "uploadedAt": image.uploaded_at,
        },
    })))
}

pub async fn gallery(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> Result<Json<serde_json::Value>, ApiError> {
    let images = state.gallery.list_uploads(&principal).await?;
    Ok(Json(json!({ "success": true, "images": images })))
}

pub async fn generated(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> Result<Json<serde_json::Value>, ApiError> {
    let images = state.gallery.list_generated(&principal).await?;
    Ok(Json(json!({ "success": true, "images": images })))
}

pub async fn delete_image(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.gallery.delete_image(&principal, &id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Image deleted successfully",
    })))
}

pub async fn generate(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let input: GenerateInput = parse_json(&body)?;
    let result = state.gallery.generate(&principal, input).await?;
    Ok(Json(json!({
        "success": true,
        "image": result.image,
        "processingId": result.processing_id,
        "fullResponse": result.full_response,
        "summary": {
            "templateUsed": result.template_used,
            "processingTime": result.processing_time_ms,
            "imageSize": result.image.size,
            "fileName": result.image.name,
        },
    })))
}

pub async fn processing(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    query: Result<Query<ProcessingQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) =
        query.map_err(|e| ApiError::Validation(format!("Invalid query: {}", e.body_text())))?;
    let page = state.gallery.list_processing(&principal, query).await?;
    Ok(Json(json!({
        "success": true,
        "records": page.records,
        "pagination": {
            "total": page.total,
            "limit": page.limit,
            "offset": page.offset,
        },
    })))
}

pub async fn processing_detail(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (record, generated_image) = state.gallery.get_processing(&principal, &id).await?;
    Ok(Json(json!({
        "success": true,
        "record": record,
        "generatedImage": generated_image,
    })))
}
