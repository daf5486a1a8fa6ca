use super::{ConversionError, ConversionPipeline, run_blocking};
use crate::models::{Artifact, ArtifactKind, Quality, StagedUpload};
use crate::services::codec::pdf::{JpegPage, write_document};
use crate::services::codec::raster::{decode_image, encode_jpeg, prepare_page};
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::{info, warn};
use zip::CompressionMethod;
use zip::write::FileOptions;

pub const MERGED_DOWNLOAD_NAME: &str = "converted.pdf";
pub const SEPARATE_DOWNLOAD_NAME: &str = "converted_pdfs.zip";

struct SourceImage {
    filename: String,
    bytes: Vec<u8>,
}

impl ConversionPipeline {
    /// Paginate `inputs`, in order, into one PDF.
    ///
    /// With `merge_after == false` every image becomes its own single-page PDF
    /// and the PDFs are bundled into a ZIP instead. Any undecodable input fails
    /// the whole conversion before an artifact is written.
    pub async fn assemble(
        &self,
        inputs: &[StagedUpload],
        quality: Quality,
        merge_after: bool,
    ) -> Result<Artifact, ConversionError> {
        if inputs.is_empty() {
            return Err(ConversionError::Validation("No files uploaded".to_string()));
        }

        let mut guard = self.begin();

        let mut sources = Vec::with_capacity(inputs.len());
        for input in inputs {
            sources.push(SourceImage {
                filename: input.original_name.clone(),
                bytes: self.read_input(input).await?,
            });
        }

        let page_count = sources.len();
        let jpeg_quality = self.jpeg_quality;
        let (bytes, download_name, kind) = run_blocking(move || {
            let pages = encode_pages(sources, quality, jpeg_quality)?;
            if merge_after {
                let pdf = write_document(
                    &pages.into_iter().map(|(_, page)| page).collect::<Vec<_>>(),
                )?;
                Ok((pdf, MERGED_DOWNLOAD_NAME, ArtifactKind::Pdf))
            } else {
                Ok((bundle_separate(pages)?, SEPARATE_DOWNLOAD_NAME, ArtifactKind::Zip))
            }
        })
        .await?;

        let file = self.store.put(Some(download_name), &bytes).await?;
        guard.succeed();

        info!(
            "📄 Assembled {} image(s) into {} ({} bytes, quality={})",
            page_count, file.key, file.size, quality
        );

        Ok(Artifact {
            file,
            download_name: download_name.to_string(),
            kind,
        })
    }
}

/// Decode, normalize, resize and re-encode every source in order.
fn encode_pages(
    sources: Vec<SourceImage>,
    quality: Quality,
    jpeg_quality: u8,
) -> Result<Vec<(String, JpegPage)>, ConversionError> {
    let mut pages = Vec::with_capacity(sources.len());
    for source in sources {
        let image = decode_image(&source.bytes).map_err(|e| {
            warn!("Rejecting {}: {}", source.filename, e);
            ConversionError::InvalidImage {
                filename: source.filename.clone(),
            }
        })?;

        let rgb = prepare_page(image, quality);
        let (width, height) = rgb.dimensions();
        let data = encode_jpeg(&rgb, jpeg_quality)?;
        pages.push((
            source.filename,
            JpegPage {
                width,
                height,
                data,
            },
        ));
    }
    Ok(pages)
}

fn bundle_separate(pages: Vec<(String, JpegPage)>) -> Result<Vec<u8>, ConversionError> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let zip_err = |e: zip::result::ZipError| ConversionError::Encode(format!("ZIP: {}", e));

    for (index, (filename, page)) in pages.into_iter().enumerate() {
        let stem = Path::new(&filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let pdf = write_document(std::slice::from_ref(&page))?;
        zip.start_file(format!("{}_{}.pdf", index + 1, stem), options)
            .map_err(zip_err)?;
        zip.write_all(&pdf)
            .map_err(|e| ConversionError::Encode(format!("ZIP: {}", e)))?;
    }

    Ok(zip.finish().map_err(zip_err)?.into_inner())
}
