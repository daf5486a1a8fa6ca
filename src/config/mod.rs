use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Rasterization backend used when splitting a PDF into images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    /// Render each page with poppler's `pdftocairo`
    Pdftocairo,
    /// Extract the raster image embedded in each page (lopdf). Only handles
    /// scanned pages; text and vector pages fail to rasterize.
    Embedded,
}

impl RendererKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "embedded" | "lopdf" => Some(Self::Embedded),
            "pdftocairo" | "poppler" => Some(Self::Pdftocairo),
            _ => None,
        }
    }
}

/// Service configuration for conversions and staging
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Staging directory for uploads and artifacts (default: /tmp/uploads)
    pub upload_folder: PathBuf,

    /// Maximum request body size in bytes (default: 512 MB)
    pub max_content_length: usize,

    /// Age after which a staged file is reaped, in seconds (default: 300)
    pub cleanup_age_seconds: u64,

    /// Interval between reaper sweeps, in seconds (default: 60)
    pub cleanup_interval_seconds: u64,

    /// JPEG encoder quality for re-encoded pages, 1-100 (default: 90)
    pub jpeg_quality: u8,

    /// Page rasterizer used by the split pipeline (default: pdftocairo)
    pub renderer: RendererKind,

    /// Run a sweep right after every conversion in addition to the reaper
    pub sweep_after_conversion: bool,

    /// Interface to bind (default: 0.0.0.0)
    pub host: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            upload_folder: PathBuf::from("/tmp/uploads"),
            max_content_length: 512 * 1024 * 1024, // 512 MB
            cleanup_age_seconds: 300,
            cleanup_interval_seconds: 60,
            jpeg_quality: 90,
            renderer: RendererKind::Pdftocairo,
            sweep_after_conversion: false,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            upload_folder: env::var("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(default.upload_folder),

            max_content_length: env::var("MAX_CONTENT_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_content_length),

            cleanup_age_seconds: env::var("CLEANUP_AGE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.cleanup_age_seconds),

            cleanup_interval_seconds: env::var("CLEANUP_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default.cleanup_interval_seconds),

            jpeg_quality: env::var("JPEG_QUALITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| (1..=100).contains(v))
                .unwrap_or(default.jpeg_quality),

            renderer: env::var("PDF_RENDERER")
                .ok()
                .and_then(|v| RendererKind::parse(&v))
                .unwrap_or(default.renderer),

            sweep_after_conversion: env::var("SWEEP_AFTER_CONVERSION")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.sweep_after_conversion),

            host: env::var("HOST").unwrap_or(default.host),
        }
    }

    /// Configuration for tests and local runs against a given staging directory
    pub fn development(upload_folder: impl Into<PathBuf>) -> Self {
        Self {
            upload_folder: upload_folder.into(),
            max_content_length: 64 * 1024 * 1024,
            cleanup_age_seconds: 120,
            cleanup_interval_seconds: 30,
            ..Self::default()
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cleanup_age_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}
