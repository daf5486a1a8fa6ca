//! Assemble (images to PDF) and split (PDF to images) conversions.
//!
//! Each conversion reads its staged inputs, does the CPU-bound codec work on
//! tokio's blocking pool and stages exactly one artifact. The
//! `active_conversions` slot is held by a [`ConversionGuard`] for the whole
//! call, and the conversion is only counted once the artifact is staged.

mod assemble;
mod split;

use crate::models::{Artifact, ConversionJob, Direction, StagedUpload, UploadedPayload};
use crate::services::codec::{CodecError, PageRenderer};
use crate::services::store::{EphemeralStore, StoreError};
use crate::services::usage::{ConversionGuard, UsageCounters};
use crate::utils::validation::sanitize_filename;
use std::sync::Arc;
use thiserror::Error;

pub use assemble::{MERGED_DOWNLOAD_NAME, SEPARATE_DOWNLOAD_NAME};
pub use split::{SPLIT_DOWNLOAD_NAME, page_entry_name};

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid image file: {filename}")]
    InvalidImage { filename: String },

    #[error("Invalid PDF file: {filename}")]
    InvalidDocument { filename: String, detail: String },

    #[error("Failed to rasterize page {page}: {detail}")]
    Rasterize { page: usize, detail: String },

    #[error("Failed to encode output: {0}")]
    Encode(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConversionError {
    /// Whether the caller is at fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidImage { .. } | Self::InvalidDocument { .. }
        )
    }
}

impl From<CodecError> for ConversionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Rasterize { page, detail } => Self::Rasterize { page, detail },
            CodecError::Encode(msg) => Self::Encode(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

pub struct ConversionPipeline {
    store: Arc<EphemeralStore>,
    counters: Arc<UsageCounters>,
    renderer: Arc<dyn PageRenderer>,
    jpeg_quality: u8,
}

impl ConversionPipeline {
    pub fn new(
        store: Arc<EphemeralStore>,
        counters: Arc<UsageCounters>,
        renderer: Arc<dyn PageRenderer>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            store,
            counters,
            renderer,
            jpeg_quality,
        }
    }

    pub fn store(&self) -> &Arc<EphemeralStore> {
        &self.store
    }

    pub fn renderer_name(&self) -> &'static str {
        self.renderer.name()
    }

    /// Write an in-memory payload to the store under its sanitized name.
    pub async fn stage(&self, payload: UploadedPayload) -> Result<StagedUpload, ConversionError> {
        let original_name = sanitize_filename(&payload.filename)
            .ok_or_else(|| ConversionError::Validation("Missing filename".to_string()))?;
        let file = self.store.put(Some(&original_name), &payload.data).await?;
        tracing::debug!(
            "Staged {} received at {}",
            original_name,
            payload.received_at.to_rfc3339()
        );
        Ok(StagedUpload {
            original_name,
            file,
        })
    }

    pub async fn run(&self, job: ConversionJob) -> Result<Artifact, ConversionError> {
        match job.direction {
            Direction::Assemble => {
                self.assemble(&job.inputs, job.quality, job.merge_after)
                    .await
            }
            Direction::Split => {
                let input = match job.inputs.as_slice() {
                    [input] => input,
                    [] => return Err(ConversionError::Validation("No file uploaded".to_string())),
                    _ => {
                        return Err(ConversionError::Validation(
                            "Exactly one PDF file is expected".to_string(),
                        ));
                    }
                };
                self.split(input).await
            }
        }
    }

    fn begin(&self) -> ConversionGuard {
        self.counters.begin_conversion()
    }

    async fn read_input(&self, input: &StagedUpload) -> Result<Vec<u8>, ConversionError> {
        Ok(self.store.read(&input.file.key).await?)
    }
}

/// Run blocking codec work off the async workers.
async fn run_blocking<T, F>(task: F) -> Result<T, ConversionError>
where
    F: FnOnce() -> Result<T, ConversionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ConversionError::Internal(format!("Conversion task failed: {}", e)))?
}
