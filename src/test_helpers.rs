//! Shared test utilities for the squash test suite.
//!
//! Synthetic images are generated with the `image` crate so tests never
//! depend on binary fixtures.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_image(&tmp.path().join("a.png"), 64, 48);
//! let settings = settings_for(tmp.path(), &[("ALL_TO", "webp")]);
//! ```

use crate::config::Settings;
use image::{ImageEncoder, RgbImage};
use std::collections::HashMap;
use std::path::Path;

pub use tempfile::TempDir;

// =========================================================================
// Synthetic images
// =========================================================================

/// Write a gradient image; the encoding follows the path's extension.
pub fn write_image(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => image::codecs::jpeg::JpegEncoder::new_with_quality(writer, 90)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap(),
        "webp" => image::codecs::webp::WebPEncoder::new_lossless(writer)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap(),
        _ => image::codecs::png::PngEncoder::new(writer)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap(),
    }
}

/// Input tree with five images, one of them inside `.git`:
///
/// ```text
/// input/
///   a.png          40x30
///   b.jpg          40x30
///   c.webp         40x30
///   sub/d.png      20x20
///   .git/e.png     20x20   (excluded by default)
/// ```
pub fn setup_input_tree(root: &Path) {
    write_image(&root.join("a.png"), 40, 30);
    write_image(&root.join("b.jpg"), 40, 30);
    write_image(&root.join("c.webp"), 40, 30);
    write_image(&root.join("sub/d.png"), 20, 20);
    write_image(&root.join(".git/e.png"), 20, 20);
}

// =========================================================================
// Settings
// =========================================================================

/// Settings rooted at `tmp/input` and `tmp/output`, with `pairs` on top.
pub fn settings_for(tmp: &Path, pairs: &[(&str, &str)]) -> Settings {
    let mut raw: HashMap<String, String> = HashMap::new();
    raw.insert("HOST".into(), "http://localhost:5000".into());
    raw.insert("INPUT_DIR".into(), tmp.join("input").to_string_lossy().into_owned());
    raw.insert("OUTPUT_DIR".into(), tmp.join("output").to_string_lossy().into_owned());
    for (key, value) in pairs {
        raw.insert(key.to_string(), value.to_string());
    }
    Settings::resolve(&raw).unwrap()
}

/// Relative paths of every file under `root`, sorted.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}
