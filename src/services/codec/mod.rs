//! Codec capabilities consumed by the conversion pipeline.
//!
//! Raster decode/encode lives in [`raster`], PDF writing and embedded-image
//! rasterization in [`pdf`], and the poppler-backed renderer in
//! [`pdftocairo`]. All functions here are blocking and are expected to run on
//! tokio's blocking pool.

pub mod pdf;
pub mod pdftocairo;
pub mod raster;

use crate::config::RendererKind;
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode output: {0}")]
    Encode(String),

    #[error("Unreadable document: {0}")]
    Unreadable(String),

    #[error("Failed to rasterize page {page}: {detail}")]
    Rasterize { page: usize, detail: String },

    #[error("Codec I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opened paginated document whose pages can be rendered one by one.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Render a page, numbered from 1, at the document's native resolution.
    fn render(&mut self, page: usize) -> Result<DynamicImage, CodecError>;
}

/// Opens PDF bytes for rasterization.
pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fails with [`CodecError::Unreadable`] when the bytes are not a usable PDF.
    fn open(&self, container: Vec<u8>) -> Result<Box<dyn PageSource>, CodecError>;
}

/// Build the configured renderer.
///
/// `pdftocairo` falls back to embedded-image extraction when poppler is not
/// installed, so text and vector pages only render on hosts that have it.
pub fn renderer_for(kind: RendererKind) -> Arc<dyn PageRenderer> {
    match kind {
        RendererKind::Embedded => Arc::new(pdf::EmbeddedImageRenderer),
        RendererKind::Pdftocairo => {
            let renderer = pdftocairo::PdftocairoRenderer::default();
            if renderer.is_available() {
                Arc::new(renderer)
            } else {
                tracing::warn!(
                    "⚠️  pdftocairo not found, falling back to embedded-image rasterization"
                );
                Arc::new(pdf::EmbeddedImageRenderer)
            }
        }
    }
}
