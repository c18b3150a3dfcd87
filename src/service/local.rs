//! In-process transcoding with the `image` crate.
//!
//! | Step | Crate / function |
//! |---|---|
//! | Decode (PNG, JPEG, WebP) | `image::load_from_memory` (format sniffed from content) |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode → PNG | `PngEncoder`, effort 0-6 mapped to fast/default/best compression |
//! | Encode → JPEG | `JpegEncoder`, quality 1-100 (default 75) |
//! | Encode → WebP | `WebPEncoder` (lossless; quality and effort are not used) |
//!
//! The result is labelled with [`describe_saving`] so placement treats it
//! exactly like a result from the web UI.

use super::saving::{describe_saving, format_size};
use super::session::{ServiceError, Session, TranscodeResult, TranscodingService};
use super::OptionSet;
use crate::rules::ImageKind;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::{Path, PathBuf};

const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Stateless service; every session works on its own file.
#[derive(Debug, Default)]
pub struct LocalService;

impl LocalService {
    pub fn new() -> Self {
        Self
    }
}

impl TranscodingService for LocalService {
    fn new_session(&self) -> Result<Box<dyn Session + '_>, ServiceError> {
        Ok(Box::new(LocalSession::default()))
    }
}

#[derive(Debug, Default)]
struct LocalSession {
    source: Option<PathBuf>,
    options: Option<OptionSet>,
}

impl Session for LocalSession {
    fn submit(&mut self, path: &Path, _kind: ImageKind) -> Result<(), ServiceError> {
        if !path.is_file() {
            return Err(ServiceError::Failed(format!(
                "{} is not a file",
                path.display()
            )));
        }
        self.source = Some(path.to_path_buf());
        Ok(())
    }

    fn apply_options(&mut self, options: &OptionSet) -> Result<(), ServiceError> {
        if self.source.is_none() {
            return Err(ServiceError::Protocol(
                "options applied before a file was submitted".to_string(),
            ));
        }
        self.options = Some(options.clone());
        Ok(())
    }

    fn await_result(&mut self, expected: ImageKind) -> Result<TranscodeResult, ServiceError> {
        let (Some(source), Some(options)) = (&self.source, &self.options) else {
            return Err(ServiceError::Protocol(
                "result awaited before submit and options".to_string(),
            ));
        };
        if options.output != expected {
            return Err(ServiceError::Protocol(format!(
                "expected {expected} but options ask for {}",
                options.output
            )));
        }

        let original = std::fs::read(source)?;
        let img = image::load_from_memory(&original).map_err(|e| {
            ServiceError::Failed(format!("Failed to decode {}: {}", source.display(), e))
        })?;
        let img = match options.resize {
            Some(resize) => img.resize_exact(resize.width, resize.height, FilterType::Lanczos3),
            None => img,
        };
        let buffer = encode(&img, options)?;

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(TranscodeResult {
            suggested_filename: format!("{stem}.{}", expected.extension()),
            original_size_label: format_size(original.len() as u64),
            saving_label: describe_saving(original.len() as u64, buffer.len() as u64),
            buffer,
        })
    }

    fn close(&mut self) -> Result<(), ServiceError> {
        self.source = None;
        self.options = None;
        Ok(())
    }
}

/// Encode `img` in the kind and with the knobs of `options`.
fn encode(img: &DynamicImage, options: &OptionSet) -> Result<Vec<u8>, ServiceError> {
    let mut buffer = Vec::new();
    let result = match options.output {
        ImageKind::Png => {
            let compression = match options.effort {
                Some(0..=1) => CompressionType::Fast,
                Some(5..) => CompressionType::Best,
                _ => CompressionType::Default,
            };
            let encoder = PngEncoder::new_with_quality(&mut buffer, compression, PngFilter::Adaptive);
            to_8bit(img).write_with_encoder(encoder)
        }
        ImageKind::Jpeg => {
            let quality = options.quality.unwrap_or(DEFAULT_JPEG_QUALITY).clamp(1, 100);
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)
        }
        ImageKind::Webp => {
            let encoder = WebPEncoder::new_lossless(&mut buffer);
            to_8bit(img).write_with_encoder(encoder)
        }
    };
    result.map_err(|e| ServiceError::Failed(format!("Failed to encode {}: {e}", options.output)))?;
    Ok(buffer)
}

/// RGB or RGBA with 8 bits per channel, which every encoder accepts.
fn to_8bit(img: &DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}
