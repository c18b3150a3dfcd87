//! Per-job option sets.
//!
//! An [`OptionSet`] describes *what* the service should produce for one job:
//! the output kind, the encoder knobs that apply to that kind, and an optional
//! resize. The knobs are opaque: they are passed through exactly as
//! configured and unset knobs leave the service default alone.

use crate::catalog::ImageFile;
use crate::config::{EncodeParams, ResizePolicy};
use crate::rules::{ImageKind, TransformRule};
use serde::Serialize;

/// Target dimensions for a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionSet {
    pub output: ImageKind,
    /// PNG/WebP effort (0-6).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<u8>,
    /// JPEG/WebP quality (0-100).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize: Option<Resize>,
}

impl OptionSet {
    /// Options for transcoding `file` with `rule`.
    pub fn for_job(
        encode: &EncodeParams,
        resize: &ResizePolicy,
        file: &ImageFile,
        rule: &TransformRule,
    ) -> Self {
        let (effort, quality) = match rule.output {
            ImageKind::Png => (encode.png_effort, None),
            ImageKind::Jpeg => (None, encode.jpeg_quality),
            ImageKind::Webp => (encode.webp_effort, encode.webp_quality),
        };
        Self {
            output: rule.output,
            effort,
            quality,
            resize: resize
                .dimensions_for(file.width, file.height)
                .map(|(width, height)| Resize { width, height }),
        }
    }
}
