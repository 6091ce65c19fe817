//! Lossless image recompression.
//!
//! PNGs are decoded and re-encoded at maximum compression with adaptive
//! filtering; the result is kept only when it is smaller. Other formats are
//! copied through untouched.

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageFormat};

use super::{AssetFile, TransformContext, TransformError};
use crate::cache::TransformCache;

const STEP: &str = "optimize-images";

pub(super) fn optimize(
    mut file: AssetFile,
    fingerprint: &str,
    ctx: &TransformContext<'_>,
) -> Result<AssetFile, TransformError> {
    if image::guess_format(&file.contents).ok() != Some(ImageFormat::Png) {
        return Ok(file);
    }

    let key = TransformCache::key(&[fingerprint.as_bytes(), &file.contents]);
    let optimized = ctx.cache.get_or_insert_with(&key, || recompress_png(&file))?;
    if optimized.len() < file.contents.len() {
        tracing::debug!(
            "{}: {} -> {} bytes",
            file.path.display(),
            file.contents.len(),
            optimized.len()
        );
        file.contents = optimized;
    }
    Ok(file)
}

fn recompress_png(file: &AssetFile) -> Result<Vec<u8>, TransformError> {
    let fail = |message: String| TransformError::new(STEP, message).with_file(&file.source);

    let img = image::load_from_memory_with_format(&file.contents, ImageFormat::Png)
        .map_err(|e| fail(e.to_string()))?;

    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive)
        .write_image(img.as_bytes(), img.width(), img.height(), img.color())
        .map_err(|e| fail(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::BuildMode;
    use image::{Rgba, RgbaImage};
    use std::path::Path;

    fn ctx(cache: &TransformCache) -> TransformContext<'_> {
        TransformContext {
            mode: BuildMode::Production,
            source_maps: false,
            project_root: Path::new("/project"),
            cache,
        }
    }

    /// A flat-colored image written with the fastest, unfiltered settings.
    fn bloated_png() -> Vec<u8> {
        let img = RgbaImage::from_pixel(64, 64, Rgba([10, 120, 200, 255]));
        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::NoFilter)
            .write_image(img.as_raw(), 64, 64, image::ColorType::Rgba8)
            .unwrap();
        out
    }

    #[test]
    fn test_png_is_never_larger() {
        let original = bloated_png();
        let cache = TransformCache::disabled();
        let file = AssetFile::new("/project/src/img/logo.png", "logo.png", original.clone());

        let out = optimize(file, "fp", &ctx(&cache)).unwrap();
        assert!(out.contents.len() <= original.len());

        let decoded = image::load_from_memory(&out.contents).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(5, 5), &Rgba([10, 120, 200, 255]));
    }

    #[test]
    fn test_non_png_passes_through() {
        let cache = TransformCache::disabled();
        let svg = b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>".to_vec();
        let file = AssetFile::new("/project/src/img/icon.svg", "icon.svg", svg.clone());

        let out = optimize(file, "fp", &ctx(&cache)).unwrap();
        assert_eq!(out.contents, svg);
    }

    #[test]
    fn test_corrupt_png_is_transform_error() {
        let cache = TransformCache::disabled();
        let mut bytes = bloated_png();
        bytes.truncate(40);
        let file = AssetFile::new("/project/src/img/broken.png", "broken.png", bytes);

        let err = optimize(file, "fp", &ctx(&cache)).unwrap_err();
        assert_eq!(err.step, STEP);
    }
}
