use super::{CodecError, PageRenderer, PageSource};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

/// Name of the page image inside each page's XObject resources
const PAGE_IMAGE_NAME: &str = "Im0";

/// Guard against cyclic `Parent` chains in malformed page trees
const MAX_TREE_DEPTH: usize = 32;

/// A JPEG-encoded page ready to be paginated.
#[derive(Debug, Clone)]
pub struct JpegPage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Build a PDF with one page per image, in order.
///
/// Each page's MediaBox equals the image's pixel dimensions (one point per
/// pixel) and the JPEG is embedded as-is with `DCTDecode`.
pub fn write_document(pages: &[JpegPage]) -> Result<Vec<u8>, CodecError> {
    if pages.is_empty() {
        return Err(CodecError::Encode("a PDF needs at least one page".to_string()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for page in pages {
        let width = i64::from(page.width);
        let height = i64::from(page.height);

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            page.data.clone(),
        ));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Integer(width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(height),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(PAGE_IMAGE_NAME.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| CodecError::Encode(format!("page content: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(width),
                Object::Integer(height),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    PAGE_IMAGE_NAME => image_id,
                },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let info_id = doc.add_object(dictionary! {
        "Producer" => Object::string_literal(concat!("rust-convert-backend ", env!("CARGO_PKG_VERSION"))),
    });
    doc.trailer.set("Info", info_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| CodecError::Encode(format!("PDF: {}", e)))?;
    Ok(out)
}

/// Open PDF bytes with lopdf, rejecting anything without pages.
pub fn load_document(container: &[u8]) -> Result<Document, CodecError> {
    let doc = Document::load_mem(container).map_err(|e| CodecError::Unreadable(e.to_string()))?;
    if doc.get_pages().is_empty() {
        return Err(CodecError::Unreadable("document has no pages".to_string()));
    }
    Ok(doc)
}

/// Rasterizes pages by extracting the image each page draws.
///
/// Handles the scanned-document shape this service produces: one raster
/// XObject per page. Pages with several images yield the largest one; pages
/// with only vector content fail to rasterize.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedImageRenderer;

impl PageRenderer for EmbeddedImageRenderer {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn open(&self, container: Vec<u8>) -> Result<Box<dyn PageSource>, CodecError> {
        let doc = load_document(&container)?;
        let pages = doc.get_pages().into_values().collect();
        Ok(Box::new(EmbeddedPages { doc, pages }))
    }
}

struct EmbeddedPages {
    doc: Document,
    pages: Vec<ObjectId>,
}

impl PageSource for EmbeddedPages {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn render(&mut self, page: usize) -> Result<DynamicImage, CodecError> {
        let fail = |detail: String| CodecError::Rasterize { page, detail };

        let page_id = page
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .copied()
            .ok_or_else(|| fail("page out of range".to_string()))?;

        let stream = largest_page_image(&self.doc, page_id).map_err(fail)?;
        decode_image_stream(&self.doc, stream).map_err(fail)
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Result<&'a Object, String> {
    match object {
        Object::Reference(id) => doc.get_object(*id).map_err(|e| e.to_string()),
        other => Ok(other),
    }
}

/// Resources for a page, falling back to those inherited from the page tree.
fn page_resources(doc: &Document, page_id: ObjectId) -> Result<&Dictionary, String> {
    let mut node = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| e.to_string())?;

    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources)?
                .as_dict()
                .map_err(|e| e.to_string());
        }
        let parent = node
            .get(b"Parent")
            .map_err(|_| "page has no resources".to_string())?;
        node = resolve(doc, parent)?.as_dict().map_err(|e| e.to_string())?;
    }
    Err("page tree too deep".to_string())
}

fn dimension(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).and_then(Object::as_i64).ok()
}

/// A positive pixel count that fits in `u32`.
fn pixel_dimension(dict: &Dictionary, key: &[u8]) -> Result<u32, String> {
    let name = String::from_utf8_lossy(key);
    let value = dimension(dict, key).ok_or_else(|| format!("image has no {}", name))?;
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| format!("image {} out of range: {}", name, value))
}

fn largest_page_image(doc: &Document, page_id: ObjectId) -> Result<&Stream, String> {
    let resources = page_resources(doc, page_id)?;
    let xobjects = resources
        .get(b"XObject")
        .map_err(|_| "page has no raster content".to_string())
        .and_then(|o| resolve(doc, o))?
        .as_dict()
        .map_err(|e| e.to_string())?;

    let mut best: Option<(i64, &Stream)> = None;
    for (_, object) in xobjects.iter() {
        let Ok(stream) = resolve(doc, object).and_then(|o| o.as_stream().map_err(|e| e.to_string()))
        else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|name| name == b"Image")
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        let area = dimension(&stream.dict, b"Width")
            .unwrap_or(0)
            .checked_mul(dimension(&stream.dict, b"Height").unwrap_or(0))
            .ok_or_else(|| "image dimensions overflow".to_string())?;
        if best.is_none_or(|(best_area, _)| area > best_area) {
            best = Some((area, stream));
        }
    }

    best.map(|(_, stream)| stream)
        .ok_or_else(|| "page has no raster content".to_string())
}

fn stream_filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Number of color components for the image's color space.
fn color_components(doc: &Document, dict: &Dictionary) -> Result<usize, String> {
    let space = dict
        .get(b"ColorSpace")
        .map_err(|_| "image has no color space".to_string())
        .and_then(|o| resolve(doc, o))?;

    match space {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" => Ok(1),
            b"DeviceRGB" | b"CalRGB" => Ok(3),
            b"DeviceCMYK" => Ok(4),
            other => Err(format!(
                "unsupported color space {}",
                String::from_utf8_lossy(other)
            )),
        },
        Object::Array(items) => {
            let family = items.first().and_then(|o| o.as_name().ok());
            match family {
                Some(b"ICCBased") => {
                    let profile = items
                        .get(1)
                        .ok_or_else(|| "ICCBased color space without profile".to_string())
                        .and_then(|o| resolve(doc, o))?
                        .as_stream()
                        .map_err(|e| e.to_string())?;
                    dimension(&profile.dict, b"N")
                        .map(|n| n as usize)
                        .ok_or_else(|| "ICC profile without component count".to_string())
                }
                Some(b"CalRGB") => Ok(3),
                Some(b"CalGray") => Ok(1),
                _ => Err("unsupported color space array".to_string()),
            }
        }
        _ => Err("malformed color space".to_string()),
    }
}

fn decode_image_stream(doc: &Document, stream: &Stream) -> Result<DynamicImage, String> {
    let filters = stream_filters(&stream.dict);

    if filters.last().map(Vec::as_slice) == Some(b"DCTDecode".as_slice()) {
        let jpeg = if filters.len() == 1 {
            stream.content.clone()
        } else {
            // Outer Flate wrapper around the JPEG
            stream.decompressed_content().map_err(|e| e.to_string())?
        };
        return image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .map_err(|e| format!("embedded JPEG: {}", e));
    }

    let samples = match filters.as_slice() {
        [] => stream.content.clone(),
        [only] if only == b"FlateDecode" => {
            stream.decompressed_content().map_err(|e| e.to_string())?
        }
        _ => {
            let names: Vec<String> = filters
                .iter()
                .map(|f| String::from_utf8_lossy(f).into_owned())
                .collect();
            return Err(format!("unsupported image filters {:?}", names));
        }
    };

    let width = pixel_dimension(&stream.dict, b"Width")?;
    let height = pixel_dimension(&stream.dict, b"Height")?;
    let bits = dimension(&stream.dict, b"BitsPerComponent").unwrap_or(8);
    if bits != 8 {
        return Err(format!("unsupported bits per component {}", bits));
    }

    let components = color_components(doc, &stream.dict)?;
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(components))
        .ok_or_else(|| format!("image too large ({}x{})", width, height))?;
    if samples.len() < expected {
        return Err(format!(
            "image data truncated ({} of {} bytes)",
            samples.len(),
            expected
        ));
    }
    let mut samples = samples;
    samples.truncate(expected);

    let image = match components {
        1 => GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8),
        4 => RgbImage::from_raw(width, height, cmyk_to_rgb(&samples))
            .map(DynamicImage::ImageRgb8),
        n => return Err(format!("unsupported component count {}", n)),
    };
    image.ok_or_else(|| "image buffer size mismatch".to_string())
}

fn cmyk_to_rgb(samples: &[u8]) -> Vec<u8> {
    samples
        .chunks_exact(4)
        .flat_map(|px| {
            let k = 255 - u16::from(px[3]);
            [px[0], px[1], px[2]].map(|c| ((255 - u16::from(c)) * k / 255) as u8)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::codec::raster::encode_jpeg;

    fn jpeg_page(width: u32, height: u32) -> JpegPage {
        let img = RgbImage::from_pixel(width, height, image::Rgb([0, 128, 255]));
        JpegPage {
            width,
            height,
            data: encode_jpeg(&img, 90).unwrap(),
        }
    }

    #[test]
    fn test_write_document_page_boxes() {
        let bytes = write_document(&[jpeg_page(40, 30), jpeg_page(12, 90)]).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        assert_eq!(pages.len(), 2);

        let media_box = |id: ObjectId| -> Vec<i64> {
            doc.get_object(id)
                .unwrap()
                .as_dict()
                .unwrap()
                .get(b"MediaBox")
                .unwrap()
                .as_array()
                .unwrap()
                .iter()
                .map(|o| o.as_i64().unwrap())
                .collect()
        };
        assert_eq!(media_box(pages[0]), vec![0, 0, 40, 30]);
        assert_eq!(media_box(pages[1]), vec![0, 0, 12, 90]);
    }

    #[test]
    fn test_write_document_requires_pages() {
        assert!(matches!(write_document(&[]), Err(CodecError::Encode(_))));
    }

    #[test]
    fn test_embedded_renderer_round_trip() {
        let bytes = write_document(&[jpeg_page(20, 10), jpeg_page(7, 9)]).unwrap();
        let mut source = EmbeddedImageRenderer.open(bytes).unwrap();
        assert_eq!(source.page_count(), 2);

        let first = source.render(1).unwrap();
        assert_eq!((first.width(), first.height()), (20, 10));
        let second = source.render(2).unwrap();
        assert_eq!((second.width(), second.height()), (7, 9));

        assert!(matches!(
            source.render(3),
            Err(CodecError::Rasterize { page: 3, .. })
        ));
    }

    #[test]
    fn test_embedded_renderer_rejects_garbage() {
        assert!(matches!(
            EmbeddedImageRenderer.open(b"%PDF-1.4 nonsense".to_vec()),
            Err(CodecError::Unreadable(_))
        ));
    }

    #[test]
    fn test_decode_raw_gray_and_cmyk_samples() {
        let doc = Document::with_version("1.5");

        let gray = Stream::new(
            dictionary! {
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0, 255],
        );
        let image = decode_image_stream(&doc, &gray).unwrap();
        assert_eq!(image.to_luma8().into_raw(), vec![0, 255]);

        let cmyk = Stream::new(
            dictionary! {
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceCMYK",
                "BitsPerComponent" => 8,
            },
            vec![255, 0, 0, 0],
        );
        let image = decode_image_stream(&doc, &cmyk).unwrap();
        assert_eq!(image.to_rgb8().into_raw(), vec![0, 255, 255]);
    }

    /// One-page PDF drawing `content`, with `image` as XObject `Im0` when given.
    fn one_page_pdf(image: Option<Stream>, content: &[u8]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.to_vec()));
        let mut resources = dictionary! {};
        if let Some(image) = image {
            let image_id = doc.add_object(image);
            resources.set("XObject", dictionary! { "Im0" => image_id });
        }
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(10),
                Object::Integer(10),
            ],
            "Contents" => content_id,
            "Resources" => resources,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_vector_only_page_fails_to_rasterize() {
        let bytes = one_page_pdf(None, b"0 0 m 10 10 l S");
        let mut source = EmbeddedImageRenderer.open(bytes).unwrap();
        assert!(matches!(
            source.render(1),
            Err(CodecError::Rasterize { page: 1, .. })
        ));
    }

    #[test]
    fn test_oversized_image_dimensions_are_rejected() {
        let cases = [
            // Area overflows i64
            (4_294_967_295i64, 4_294_967_295i64),
            // Does not fit u32
            (4_294_967_296, 1),
            (-5, 10),
            // Fits, but the sample buffer is nowhere near that large
            (4_294_967_295, 1),
        ];
        for (width, height) in cases {
            let image = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width,
                    "Height" => height,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                },
                vec![0; 12],
            );
            let bytes = one_page_pdf(Some(image), b"q 10 0 0 10 0 0 cm /Im0 Do Q");
            let mut source = EmbeddedImageRenderer.open(bytes).unwrap();
            assert!(
                matches!(source.render(1), Err(CodecError::Rasterize { page: 1, .. })),
                "{}x{} was not rejected",
                width,
                height
            );
        }
    }
}
