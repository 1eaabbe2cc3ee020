use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageReader, Limits};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::config::CompressionConfig;
use crate::error::{AppError, ErrorKind};

/// Smallest edge the compressor will shrink to while chasing the byte budget.
const MIN_EDGE: u32 = 64;
const MAX_ALLOC_BYTES: u64 = 512 * 1024 * 1024;
const MAX_DECODE_DIMENSION: u32 = 15_000;

#[derive(Debug, Error)]
pub enum ImageProcessingError {
    #[error("failed to decode image: {source}")]
    Decode {
        #[from]
        source: image::ImageError,
    },

    #[error("jpeg encoding failed: width={width}, height={height}, reason={reason}")]
    Encode {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("image too large: {width}x{height} = {pixels} pixels, max {max_pixels}")]
    ImageTooLarge {
        width: u32,
        height: u32,
        pixels: u64,
        max_pixels: u64,
    },

    #[error("input bytes empty")]
    EmptyInput,

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("compression worker failed")]
    WorkerFailed,
}

impl From<ImageProcessingError> for AppError {
    fn from(e: ImageProcessingError) -> Self {
        let kind = match e {
            ImageProcessingError::UnsupportedFormat => ErrorKind::UnsupportedFileType,
            ImageProcessingError::WorkerFailed => ErrorKind::Internal,
            _ => ErrorKind::ImageProcessing,
        };
        AppError::new(kind, e.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

impl CompressedImage {
    pub const CONTENT_TYPE: &'static str = "image/jpeg";
}

/// Resizes and re-encodes photos to JPEG within a dimension and byte budget.
/// Decoding and encoding run on the blocking pool.
pub struct ImageCompressor {
    config: CompressionConfig,
    semaphore: Arc<Semaphore>,
}

impl ImageCompressor {
    pub fn new(config: CompressionConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_ops.max(1)));
        Self { config, semaphore }
    }

    pub fn with_defaults() -> Self {
        Self::new(CompressionConfig::default())
    }

    #[instrument(skip(self, raw_bytes), fields(input_size = raw_bytes.len()))]
    pub async fn compress(&self, raw_bytes: Bytes) -> Result<CompressedImage, ImageProcessingError> {
        let start = Instant::now();

        // Queue behind other photos of the same save rather than rejecting.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ImageProcessingError::WorkerFailed)?;

        let config = self.config.clone();
        let result = tokio::task::spawn_blocking(move || compress_sync(&config, &raw_bytes))
            .await
            .map_err(|_| ImageProcessingError::WorkerFailed)?;

        match &result {
            Ok(img) => debug!(
                output_size = img.data.len(),
                width = img.width,
                height = img.height,
                quality = img.quality,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "image compressed"
            ),
            Err(e) => warn!(error = %e, "compress failed"),
        }

        result
    }
}

fn compress_sync(
    config: &CompressionConfig,
    raw_bytes: &[u8],
) -> Result<CompressedImage, ImageProcessingError> {
    let img = decode_image(config, raw_bytes)?;
    let (w, h) = img.dimensions();
    let (mut target_w, mut target_h) = fit_within(w, h, config.max_dimension);

    loop {
        let resized = if (target_w, target_h) == (w, h) {
            img.clone()
        } else {
            img.resize(target_w, target_h, image::imageops::FilterType::Triangle)
        };
        let (rw, rh) = resized.dimensions();

        let mut quality = config.initial_quality;
        loop {
            let data = encode_jpeg(&resized, quality)?;
            if data.len() <= config.max_output_bytes {
                return Ok(CompressedImage {
                    data: Bytes::from(data),
                    width: rw,
                    height: rh,
                    quality,
                });
            }
            let next = quality.saturating_sub(config.quality_step);
            if next < config.min_quality || next == quality {
                break;
            }
            quality = next;
        }

        // Quality floor reached: shrink and try again, until too small to matter.
        let (next_w, next_h) = shrink(rw, rh);
        if next_w.max(next_h) < MIN_EDGE || (next_w, next_h) == (rw, rh) {
            let data = encode_jpeg(&resized, config.min_quality)?;
            warn!(
                output_size = data.len(),
                budget = config.max_output_bytes,
                "could not meet compression budget"
            );
            return Ok(CompressedImage {
                data: Bytes::from(data),
                width: rw,
                height: rh,
                quality: config.min_quality,
            });
        }
        target_w = next_w;
        target_h = next_h;
    }
}

/// Scales `(w, h)` down so the longest edge is at most `max_edge`, keeping
/// the aspect ratio. Never upscales; never returns a zero edge.
pub fn fit_within(w: u32, h: u32, max_edge: u32) -> (u32, u32) {
    let longest = w.max(h);
    if longest <= max_edge || longest == 0 {
        return (w, h);
    }
    let scale = f64::from(max_edge) / f64::from(longest);
    let nw = ((f64::from(w) * scale).round() as u32).clamp(1, max_edge);
    let nh = ((f64::from(h) * scale).round() as u32).clamp(1, max_edge);
    (nw, nh)
}

fn shrink(w: u32, h: u32) -> (u32, u32) {
    ((w * 3 / 4).max(1), (h * 3 / 4).max(1))
}

fn decode_image(
    config: &CompressionConfig,
    raw_bytes: &[u8],
) -> Result<DynamicImage, ImageProcessingError> {
    if raw_bytes.is_empty() {
        return Err(ImageProcessingError::EmptyInput);
    }

    let mut reader = ImageReader::new(Cursor::new(raw_bytes))
        .with_guessed_format()
        .map_err(|e| ImageProcessingError::Decode { source: e.into() })?;

    if reader.format().is_none() {
        return Err(ImageProcessingError::UnsupportedFormat);
    }

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_DIMENSION);
    limits.max_image_height = Some(MAX_DECODE_DIMENSION);
    limits.max_alloc = Some(MAX_ALLOC_BYTES);
    reader.limits(limits);

    let img = reader.decode()?;
    let (w, h) = img.dimensions();
    let pixels = u64::from(w) * u64::from(h);

    if pixels > config.max_input_pixels {
        return Err(ImageProcessingError::ImageTooLarge {
            width: w,
            height: h,
            pixels,
            max_pixels: config.max_input_pixels,
        });
    }

    Ok(img)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageProcessingError> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    if width == 0 || height == 0 {
        return Err(ImageProcessingError::Encode {
            width,
            height,
            reason: "zero dimension".into(),
        });
    }

    let mut buffer = Vec::with_capacity((width as usize * height as usize) / 4);
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);

    encoder
        .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|e| ImageProcessingError::Encode {
            width,
            height,
            reason: e.to_string(),
        })?;

    if buffer.len() < 2 || buffer[0..2] != [0xFF, 0xD8] {
        return Err(ImageProcessingError::Encode {
            width,
            height,
            reason: "invalid jpeg magic bytes".into(),
        });
    }

    Ok(buffer)
}
