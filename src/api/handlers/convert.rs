use crate::AppState;
use crate::api::error::AppError;
use crate::models::{Artifact, Quality, StagedUpload};
use crate::services::store::StoreError;
use crate::utils::validation::{parse_flag, sanitize_filename};
use axum::{
    body::Body,
    extract::{Multipart, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::Response,
};
use futures::TryStreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use tokio_util::io::{ReaderStream, StreamReader};
use utoipa::ToSchema;

/// Multipart form accepted by `/jpg_to_pdf`
#[derive(Serialize, ToSchema)]
pub struct AssembleForm {
    /// Images, paginated in upload order
    #[schema(value_type = Vec<String>, format = Binary)]
    pub files: Vec<String>,
    /// `low`, `medium`, `high`, `veryhigh` or a scale percentage `0`-`100` (default `veryhigh`)
    pub quality: Option<String>,
    /// `false` returns one PDF per image bundled as a ZIP (default `true`)
    pub merge_after: Option<bool>,
}

/// Multipart form accepted by `/pdf_to_jpg`
#[derive(Serialize, ToSchema)]
pub struct SplitForm {
    #[schema(value_type = String, format = Binary)]
    pub file: String,
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

/// A part that fails mid-stream surfaces as an I/O error from the store;
/// recover the multipart cause so an oversized body is still a 413.
fn staging_error(e: StoreError) -> AppError {
    if let StoreError::Io(io) = &e {
        if let Some(cause) = io.get_ref().and_then(|c| c.downcast_ref::<MultipartError>()) {
            return if cause.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::PayloadTooLarge(
                    "Request body exceeds the maximum allowed limit".to_string(),
                )
            } else {
                AppError::BadRequest(cause.body_text())
            };
        }
    }
    e.into()
}

/// Drain what is left of a rejected request so the client sees our error
/// instead of a connection reset.
async fn consume_remaining(multipart: &mut Multipart) {
    while let Ok(Some(mut field)) = multipart.next_field().await {
        while let Ok(Some(_)) = field.chunk().await {}
    }
}

async fn discard_inputs(state: &AppState, inputs: &[StagedUpload]) {
    for input in inputs {
        state.store.discard(&input.file.key).await;
    }
}

fn maybe_sweep(state: &AppState) {
    if state.config.sweep_after_conversion {
        let store = state.store.clone();
        let ttl = state.config.ttl();
        tokio::spawn(async move {
            store.sweep(ttl).await;
        });
    }
}

/// Stream a staged artifact back as an attachment.
async fn artifact_response(state: &AppState, artifact: Artifact) -> Result<Response, AppError> {
    let file = state.store.open(&artifact.file.key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let content_disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        artifact.download_name,
        utf8_percent_encode(&artifact.download_name, NON_ALPHANUMERIC)
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.kind.mime_type())
        .header(header::CONTENT_LENGTH, artifact.file.size)
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .header(header::CACHE_CONTROL, "no-store")
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

#[utoipa::path(
    post,
    path = "/jpg_to_pdf",
    request_body(content = AssembleForm, content_type = "multipart/form-data", description = "Images to paginate"),
    responses(
        (status = 200, description = "Assembled PDF (or ZIP of PDFs when merge_after=false)"),
        (status = 400, description = "No files, unknown quality or an undecodable image"),
        (status = 413, description = "Request body too large"),
        (status = 500, description = "Conversion failed")
    ),
    tag = "convert"
)]
pub async fn jpg_to_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let _user = state.counters.enter();
    let mut staged: Vec<StagedUpload> = Vec::new();

    let result: Result<Response, AppError> = async {
        let mut quality = Quality::default();
        let mut merge_after = true;

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();

            match name.as_str() {
                "files" | "file" => {
                    let original_filename = field.file_name().unwrap_or_default().to_string();
                    // Browsers send an empty part when nothing was picked
                    let Some(filename) = sanitize_filename(&original_filename) else {
                        continue;
                    };

                    let reader = StreamReader::new(field.map_err(std::io::Error::other));
                    let file = state
                        .store
                        .put_stream(Some(&filename), reader)
                        .await
                        .map_err(staging_error)?;
                    staged.push(StagedUpload {
                        original_name: filename,
                        file,
                    });
                }
                "quality" => {
                    let text = field.text().await.map_err(multipart_error)?;
                    if !text.trim().is_empty() {
                        quality = Quality::parse(&text).ok_or_else(|| {
                            AppError::BadRequest(format!("Unknown quality '{}'", text.trim()))
                        })?;
                    }
                }
                "merge_after" => {
                    let text = field.text().await.map_err(multipart_error)?;
                    merge_after = text.trim().is_empty() || parse_flag(&text);
                }
                _ => {}
            }
        }

        if staged.is_empty() {
            return Err(AppError::BadRequest("No files uploaded".to_string()));
        }

        let artifact = state
            .pipeline
            .assemble(&staged, quality, merge_after)
            .await?;
        artifact_response(&state, artifact).await
    }
    .await;

    discard_inputs(&state, &staged).await;

    match result {
        Ok(response) => {
            maybe_sweep(&state);
            Ok(response)
        }
        Err(e) => {
            tracing::warn!("Assemble failed: {}. Consuming remaining stream...", e);
            consume_remaining(&mut multipart).await;
            Err(e)
        }
    }
}

#[utoipa::path(
    post,
    path = "/pdf_to_jpg",
    request_body(content = SplitForm, content_type = "multipart/form-data", description = "PDF to split"),
    responses(
        (status = 200, description = "ZIP archive with one JPEG per page"),
        (status = 400, description = "No file or an unreadable PDF"),
        (status = 413, description = "Request body too large"),
        (status = 500, description = "A page failed to rasterize")
    ),
    tag = "convert"
)]
pub async fn pdf_to_jpg(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let _user = state.counters.enter();
    let mut staged: Option<StagedUpload> = None;

    let result: Result<Response, AppError> = async {
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some("file") || staged.is_some() {
                continue;
            }

            let original_filename = field.file_name().unwrap_or_default().to_string();
            let Some(filename) = sanitize_filename(&original_filename) else {
                continue;
            };

            let reader = StreamReader::new(field.map_err(std::io::Error::other));
            let file = state
                .store
                .put_stream(Some(&filename), reader)
                .await
                .map_err(staging_error)?;
            staged = Some(StagedUpload {
                original_name: filename,
                file,
            });
        }

        let input = staged
            .as_ref()
            .ok_or_else(|| AppError::BadRequest("No file uploaded".to_string()))?;

        let artifact = state.pipeline.split(input).await?;
        artifact_response(&state, artifact).await
    }
    .await;

    if let Some(input) = &staged {
        discard_inputs(&state, std::slice::from_ref(input)).await;
    }

    match result {
        Ok(response) => {
            maybe_sweep(&state);
            Ok(response)
        }
        Err(e) => {
            tracing::warn!("Split failed: {}. Consuming remaining stream...", e);
            consume_remaining(&mut multipart).await;
            Err(e)
        }
    }
}
