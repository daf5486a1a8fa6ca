use super::CodecError;
use crate::models::Quality;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, RgbImage};

/// Decode any supported raster format, sniffing the format from the bytes.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, CodecError> {
    image::io::Reader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CodecError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| {
            let detected = infer::get(bytes)
                .map(|k| k.mime_type())
                .unwrap_or("unknown");
            tracing::debug!("Image decode failed (detected type: {}): {}", detected, e);
            CodecError::Decode(e.to_string())
        })
}

/// Normalize to 8-bit RGB and apply the tier's linear resize.
pub fn prepare_page(image: DynamicImage, quality: Quality) -> RgbImage {
    // Alpha is dropped, 16-bit and float sources are narrowed to 8-bit
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    let (target_w, target_h) = quality.scaled_dimensions(width, height);
    if (target_w, target_h) == (width, height) {
        return rgb;
    }
    image::imageops::resize(&rgb, target_w, target_h, FilterType::Lanczos3)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ColorType::Rgb8,
        )
        .map_err(|e| CodecError::Encode(format!("JPEG: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Rgba, RgbaImage};

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_prepare_page_normalizes_color() {
        let rgba = RgbaImage::from_pixel(8, 4, Rgba([10, 20, 30, 128]));
        let page = prepare_page(DynamicImage::ImageRgba8(rgba), Quality::VeryHigh);
        assert_eq!(page.dimensions(), (8, 4));
        assert_eq!(page.get_pixel(0, 0).0, [10, 20, 30]);

        let gray = GrayImage::from_pixel(5, 5, image::Luma([200]));
        let page = prepare_page(DynamicImage::ImageLuma8(gray), Quality::VeryHigh);
        assert_eq!(page.get_pixel(2, 2).0, [200, 200, 200]);
    }

    #[test]
    fn test_prepare_page_resizes_by_tier() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        assert_eq!(prepare_page(img.clone(), Quality::Low).dimensions(), (80, 40));
        assert_eq!(prepare_page(img.clone(), Quality::Medium).dimensions(), (140, 70));
        assert_eq!(prepare_page(img, Quality::High).dimensions(), (180, 90));
    }

    #[test]
    fn test_encode_jpeg_round_trip_dimensions() {
        let img = RgbImage::from_pixel(33, 17, image::Rgb([255, 0, 0]));
        let jpeg = encode_jpeg(&img, 85).unwrap();
        let decoded = decode_image(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (33, 17));
    }
}
