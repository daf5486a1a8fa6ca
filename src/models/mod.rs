use crate::services::store::StagedFile;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Quality tier applied to every page of an assembled PDF.
///
/// Tiers resize the image by a fixed linear factor before it is paginated;
/// `Scale(n)` is an explicit percentage of the original dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    Low,
    Medium,
    High,
    #[default]
    VeryHigh,
    Scale(u8),
}

impl Quality {
    /// Parse a form value: a tier name or a percentage in `0..=100`.
    /// `0` shrinks pages to the 1px minimum.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_lowercase();
        match value.as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "veryhigh" | "very_high" | "very-high" => Some(Self::VeryHigh),
            other => other
                .parse::<u8>()
                .ok()
                .filter(|n| *n <= 100)
                .map(Self::Scale),
        }
    }

    /// Linear scale as a percentage of the original dimensions.
    pub fn scale_percent(&self) -> u32 {
        match self {
            Self::Low => 40,
            Self::Medium => 70,
            Self::High => 90,
            Self::VeryHigh => 100,
            Self::Scale(percent) => u32::from(*percent),
        }
    }

    /// Dimensions of a `width`x`height` image after applying this tier.
    pub fn scaled_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let percent = u64::from(self.scale_percent());
        if percent >= 100 {
            return (width, height);
        }
        let w = (u64::from(width) * percent / 100) as u32;
        let h = (u64::from(height) * percent / 100) as u32;
        (w.max(1), h.max(1))
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::VeryHigh => write!(f, "veryhigh"),
            Self::Scale(percent) => write!(f, "{}%", percent),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Images to a paginated document
    Assemble,
    /// Paginated document to images
    Split,
}

/// A file as received from a client, before it is staged.
#[derive(Debug, Clone)]
pub struct UploadedPayload {
    pub filename: String,
    pub data: Bytes,
    pub received_at: DateTime<Utc>,
}

impl UploadedPayload {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
            received_at: Utc::now(),
        }
    }
}

/// An upload that has been written to the ephemeral store.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    /// Sanitized client filename, used in error messages
    pub original_name: String,
    pub file: StagedFile,
}

/// One pipeline invocation. Lives only for the duration of the conversion.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub direction: Direction,
    pub inputs: Vec<StagedUpload>,
    pub quality: Quality,
    pub merge_after: bool,
}

impl ConversionJob {
    pub fn assemble(inputs: Vec<StagedUpload>, quality: Quality, merge_after: bool) -> Self {
        Self {
            direction: Direction::Assemble,
            inputs,
            quality,
            merge_after,
        }
    }

    pub fn split(input: StagedUpload) -> Self {
        Self {
            direction: Direction::Split,
            inputs: vec![input],
            quality: Quality::VeryHigh,
            merge_after: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Pdf,
    Zip,
}

impl ArtifactKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Zip => "application/zip",
        }
    }
}

/// Pipeline output staged for a single download.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file: StagedFile,
    pub download_name: String,
    pub kind: ArtifactKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsageSnapshot {
    pub active_users: u64,
    pub active_conversions: u64,
    pub total_conversions: u64,
    pub uptime_seconds: u64,
}
