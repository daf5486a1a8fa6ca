use super::{ConversionError, ConversionPipeline, run_blocking};
use crate::models::{Artifact, ArtifactKind, StagedUpload};
use crate::services::codec::raster::encode_jpeg;
use crate::services::codec::{CodecError, PageRenderer};
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use zip::CompressionMethod;
use zip::write::FileOptions;

pub const SPLIT_DOWNLOAD_NAME: &str = "converted_images.zip";

/// Archive member (and intermediate) name for a 1-indexed page.
pub fn page_entry_name(page: usize) -> String {
    format!("page_{}.jpg", page)
}

impl ConversionPipeline {
    /// Rasterize every page of `input` and bundle the JPEGs, in page order,
    /// into one ZIP. A page that fails to render fails the whole conversion.
    pub async fn split(&self, input: &StagedUpload) -> Result<Artifact, ConversionError> {
        let mut guard = self.begin();

        let container = self.read_input(input).await?;
        let renderer = Arc::clone(&self.renderer);
        let filename = input.original_name.clone();
        let jpeg_quality = self.jpeg_quality;
        let pages = run_blocking(move || render_pages(renderer, container, filename, jpeg_quality))
            .await?;
        let page_count = pages.len();

        let mut intermediates = Vec::with_capacity(page_count);
        let staged = async {
            for (index, jpeg) in pages.iter().enumerate() {
                intermediates.push(
                    self.store
                        .put(Some(&page_entry_name(index + 1)), jpeg)
                        .await?,
                );
            }
            drop(pages);

            let members: Vec<(String, PathBuf)> = intermediates
                .iter()
                .enumerate()
                .map(|(index, file)| (page_entry_name(index + 1), file.path.clone()))
                .collect();
            let archive = run_blocking(move || bundle_pages(&members)).await?;

            Ok::<_, ConversionError>(
                self.store
                    .put_stream(Some(SPLIT_DOWNLOAD_NAME), tokio::fs::File::from_std(archive))
                    .await?,
            )
        }
        .await;

        // Intermediates only need to outlive the bundling step
        for file in &intermediates {
            self.store.discard(&file.key).await;
        }

        let file = staged?;
        guard.succeed();

        info!(
            "🖼️  Split {} into {} page image(s) ({} bytes, renderer={})",
            input.original_name,
            page_count,
            file.size,
            self.renderer.name()
        );

        Ok(Artifact {
            file,
            download_name: SPLIT_DOWNLOAD_NAME.to_string(),
            kind: ArtifactKind::Zip,
        })
    }
}

fn render_pages(
    renderer: Arc<dyn PageRenderer>,
    container: Vec<u8>,
    filename: String,
    jpeg_quality: u8,
) -> Result<Vec<Vec<u8>>, ConversionError> {
    let mut source = renderer.open(container).map_err(|e| match e {
        CodecError::Unreadable(detail) => ConversionError::InvalidDocument {
            filename: filename.clone(),
            detail,
        },
        other => other.into(),
    })?;

    let page_count = source.page_count();
    let mut pages = Vec::with_capacity(page_count);
    for page in 1..=page_count {
        let rgb = source.render(page)?.into_rgb8();
        pages.push(encode_jpeg(&rgb, jpeg_quality)?);
    }
    Ok(pages)
}

/// Write the page files into an anonymous temporary ZIP, rewound for reading.
fn bundle_pages(members: &[(String, PathBuf)]) -> Result<std::fs::File, ConversionError> {
    let zip_err = |e: zip::result::ZipError| ConversionError::Encode(format!("ZIP: {}", e));
    let io_err = |e: std::io::Error| ConversionError::Internal(format!("Archive I/O: {}", e));

    let mut zip = zip::ZipWriter::new(tempfile::tempfile().map_err(io_err)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, path) in members {
        zip.start_file(name.as_str(), options).map_err(zip_err)?;
        let mut page = std::fs::File::open(path).map_err(io_err)?;
        std::io::copy(&mut page, &mut zip).map_err(io_err)?;
    }

    let mut archive = zip.finish().map_err(zip_err)?;
    archive.seek(SeekFrom::Start(0)).map_err(io_err)?;
    Ok(archive)
}
