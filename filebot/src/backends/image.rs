//! JPEG re-encoding and downscaling.

use super::BackendResult;
use ::image::codecs::jpeg::JpegEncoder;
use ::image::imageops::FilterType;
use ::image::{DynamicImage, ImageReader};
use std::path::Path;

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 95;

/// Quality used when only the dimensions change.
pub const RESIZE_QUALITY: u8 = 95;

/// Acceptable distance from the requested size, in KB.
const SIZE_TOLERANCE_KB: f64 = 1.0;

/// A JPEG produced by the quality search.
#[derive(Debug, Clone)]
pub struct SizedJpeg {
    pub bytes: Vec<u8>,
    pub quality: u8,
    /// Width of the quality interval when the search stopped
    pub interval_width: u8,
}

impl SizedJpeg {
    pub fn size_kb(&self) -> f64 {
        self.bytes.len() as f64 / 1024.0
    }
}

/// Decode an image, sniffing the format from its content rather than its
/// extension.
pub fn open(path: &Path) -> BackendResult<DynamicImage> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

/// Encode as baseline JPEG at the given quality.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> BackendResult<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(out)
}

/// Binary search the JPEG quality in `1..=95` for an encoding close to
/// `target_kb`.
///
/// Stops when the size is within 1 KB of the target or the remaining
/// interval is at most one step wide, and returns the encoding made at that
/// step. Every step either stops or leaves a non-empty interval, so the
/// search always ends with a result; only encoder errors fail it.
pub fn shrink_to_file_size(img: &DynamicImage, target_kb: f64) -> BackendResult<SizedJpeg> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut low = MIN_QUALITY;
    let mut high = MAX_QUALITY;

    loop {
        let quality = low + (high - low) / 2;
        let bytes = encode_jpeg(&rgb, quality)?;
        let size_kb = bytes.len() as f64 / 1024.0;
        let width = high - low;

        if (size_kb - target_kb).abs() < SIZE_TOLERANCE_KB || width <= 1 {
            return Ok(SizedJpeg {
                bytes,
                quality,
                interval_width: width,
            });
        }

        // width >= 2 puts `quality` strictly inside the interval.
        if size_kb > target_kb {
            high = quality - 1;
        } else {
            low = quality + 1;
        }
    }
}

/// Downscale to fit inside `max_width` x `max_height`, keeping the aspect
/// ratio. Never upscales.
pub fn fit_within(img: &DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if img.width() <= max_width && img.height() <= max_height {
        return img.clone();
    }
    img.resize(max_width, max_height, FilterType::Lanczos3)
}
