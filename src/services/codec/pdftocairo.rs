use super::pdf::load_document;
use super::{CodecError, PageRenderer, PageSource};
use image::DynamicImage;
use std::io::Write;
use std::process::{Command, Stdio};
use tempfile::{NamedTempFile, TempDir};
use tracing::error;

/// Rendering resolution; 72 DPI maps one PDF point to one pixel
const NATIVE_DPI: u32 = 72;

/// Renders arbitrary (vector) PDF pages with poppler's `pdftocairo`.
#[derive(Debug, Clone)]
pub struct PdftocairoRenderer {
    binary: String,
}

impl Default for PdftocairoRenderer {
    fn default() -> Self {
        Self {
            binary: "pdftocairo".to_string(),
        }
    }
}

impl PdftocairoRenderer {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Whether the binary can be spawned at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-v")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }
}

impl PageRenderer for PdftocairoRenderer {
    fn name(&self) -> &'static str {
        "pdftocairo"
    }

    fn open(&self, container: Vec<u8>) -> Result<Box<dyn PageSource>, CodecError> {
        // Page count and validity come from lopdf; poppler only rasterizes
        let page_count = load_document(&container)?.get_pages().len();

        let mut input = NamedTempFile::with_suffix(".pdf")?;
        input.write_all(&container)?;
        input.flush()?;

        Ok(Box::new(PdftocairoPages {
            binary: self.binary.clone(),
            input,
            workdir: TempDir::new()?,
            page_count,
        }))
    }
}

struct PdftocairoPages {
    binary: String,
    input: NamedTempFile,
    workdir: TempDir,
    page_count: usize,
}

impl PageSource for PdftocairoPages {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn render(&mut self, page: usize) -> Result<DynamicImage, CodecError> {
        if page == 0 || page > self.page_count {
            return Err(CodecError::Rasterize {
                page,
                detail: "page out of range".to_string(),
            });
        }

        let output_base = self.workdir.path().join(format!("page_{}", page));

        // PNG keeps the intermediate lossless before JPEG re-encoding
        let output = Command::new(&self.binary)
            .arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(NATIVE_DPI.to_string())
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg(self.input.path().as_os_str())
            .arg(output_base.as_os_str())
            .output()
            .map_err(|e| CodecError::Rasterize {
                page,
                detail: format!("failed to run {}: {}", self.binary, e),
            })?;

        if !output.status.success() {
            let err_msg = String::from_utf8_lossy(&output.stderr);
            error!("pdftocairo failed on page {}: {}", page, err_msg);
            return Err(CodecError::Rasterize {
                page,
                detail: err_msg.trim().to_string(),
            });
        }

        let png_path = output_base.with_extension("png");
        let png_data = std::fs::read(&png_path)?;
        let _ = std::fs::remove_file(&png_path);

        image::load_from_memory(&png_data).map_err(|e| CodecError::Rasterize {
            page,
            detail: format!("unreadable pdftocairo output: {}", e),
        })
    }
}
