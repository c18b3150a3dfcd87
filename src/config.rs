//! Run configuration.
//!
//! Settings come from a flat map of named strings. The map is layered: the
//! process environment first, then `.env`, then `.env.local` (later layers
//! win). [`Settings::resolve`] turns that map into a typed, validated
//! [`Settings`] that is shared read-only by every job of the run.
//!
//! ## Keys
//!
//! ```text
//! HOST=https://squoosh.app        # transcoding service endpoint (required)
//! INPUT_DIR=./images              # input root (required)
//! OUTPUT_DIR=./compressed         # output root (required)
//! PROXY=http://127.0.0.1:8080     # proxy for the browser backend
//! BACKEND=local                   # local | browser
//! EXCLUDE_DIRS=node_modules,.git  # directory names never descended into
//! EXCLUDE_FILES=^draft-,\.min\.   # file name regexes to skip
//! MAX_CONCURRENCY=4               # 1-10 jobs in flight
//! PNG_EFFORT=                     # 0-6
//! JPEG_QUALITY=                   # 0-100
//! WEBP_EFFORT=                    # 0-6
//! WEBP_QUALITY=                   # 0-100
//! RESIZE_WIDTH=                   # target width in px, wins over the preset
//! RESIZE_PRESET=100%              # 25% 33.33% 50% 100% 200% 300% 400%
//! SCALE_UP=false
//! OVERWRITE=false
//! KEEP_PATH=false                 # mirror input sub-directories
//! SUFFIX=                         # e.g. "-min" → photo-min.webp
//! ABORT_SLIGHT=false
//! ABORT_BIGGER=false
//! FURTHER_ABORT=false
//! FURTHER_ABORT_SIZE=0            # KB
//! CUSTOM_RULES=png->webp,->jpeg
//! FOLLOW_TYPE=false
//! ALL_TO=jpeg
//! ```
//!
//! ## Normalization
//!
//! - Ranged numbers are clamped into range, never rejected. Non-numbers are errors.
//! - Booleans are `true` only for the literal `"true"`.
//! - Lists split on commas, drop empty items, and fall back to their default when empty.
//! - Enumerations must match exactly; an empty value means the default.
//!
//! Unknown keys are ignored: the map usually is the whole process environment.

use crate::rules::{self, ImageKind, RuleError, RuleSet};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("{key} must be one of {expected}, got \"{value}\"")]
    NotInSet {
        key: &'static str,
        value: String,
        expected: String,
    },
    #[error("{key} must be a number, got \"{value}\"")]
    NotANumber { key: &'static str, value: String },
    #[error("EXCLUDE_FILES pattern \"{pattern}\" is invalid: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("CUSTOM_RULES: {0}")]
    Rule(#[from] RuleError),
    #[error("Failed to read {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

const DEFAULT_EXCLUDE_DIRS: &[&str] = &["node_modules", ".git"];
const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Which [`TranscodingService`](crate::service::TranscodingService) runs the jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// In-process encoder built on the `image` crate.
    #[default]
    Local,
    /// Squoosh web UI at `HOST`, driven through headless Chrome.
    Browser,
}

impl Backend {
    const ALL: [(&'static str, Backend); 2] = [("local", Backend::Local), ("browser", Backend::Browser)];
}

/// Opaque encoder knobs, passed through to the service untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeParams {
    pub png_effort: Option<u8>,
    pub jpeg_quality: Option<u8>,
    pub webp_effort: Option<u8>,
    pub webp_quality: Option<u8>,
}

/// Relative resize presets offered by the service UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizePreset {
    Quarter,
    Third,
    Half,
    #[default]
    Full,
    Double,
    Triple,
    Quadruple,
}

impl ResizePreset {
    const ALL: [ResizePreset; 7] = [
        ResizePreset::Quarter,
        ResizePreset::Third,
        ResizePreset::Half,
        ResizePreset::Full,
        ResizePreset::Double,
        ResizePreset::Triple,
        ResizePreset::Quadruple,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ResizePreset::Quarter => "25%",
            ResizePreset::Third => "33.33%",
            ResizePreset::Half => "50%",
            ResizePreset::Full => "100%",
            ResizePreset::Double => "200%",
            ResizePreset::Triple => "300%",
            ResizePreset::Quadruple => "400%",
        }
    }

    pub fn factor(self) -> f64 {
        match self {
            ResizePreset::Quarter => 0.25,
            ResizePreset::Third => 0.3333,
            ResizePreset::Half => 0.5,
            ResizePreset::Full => 1.0,
            ResizePreset::Double => 2.0,
            ResizePreset::Triple => 3.0,
            ResizePreset::Quadruple => 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeTarget {
    /// Absolute width in pixels.
    Width(u32),
    Preset(ResizePreset),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePolicy {
    pub target: ResizeTarget,
    pub scale_up: bool,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self {
            target: ResizeTarget::Preset(ResizePreset::Full),
            scale_up: false,
        }
    }
}

impl ResizePolicy {
    /// Width the policy asks for, given the source width.
    pub fn target_width(&self, width: u32) -> u32 {
        match self.target {
            ResizeTarget::Width(w) => w,
            ResizeTarget::Preset(preset) => ((width as f64 * preset.factor()).round() as u32).max(1),
        }
    }

    /// Output dimensions, or `None` when the image keeps its size.
    ///
    /// Resizing happens only when the target differs from the source width and
    /// either scaling up is allowed or the target is smaller. Height follows the
    /// source aspect ratio.
    pub fn dimensions_for(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let target = self.target_width(width);
        if target == width || (target > width && !self.scale_up) || width == 0 {
            return None;
        }
        let scaled = (height as f64 * target as f64 / width as f64).round() as u32;
        Some((target, scaled.max(1)))
    }
}

/// Where and whether results are written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlacementPolicy {
    pub overwrite: bool,
    /// Mirror the source's sub-directory (relative to the input root).
    pub keep_path: bool,
    /// Inserted right before the output file extension.
    pub suffix: String,
    pub abort_slight: bool,
    pub abort_bigger: bool,
    /// With `overwrite`, keep the existing file unless the new one saves
    /// more than `further_abort_kb`.
    pub further_abort: bool,
    pub further_abort_kb: u64,
}

/// Validated configuration for a run. Never mutated after [`Settings::resolve`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub proxy: Option<String>,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub backend: Backend,
    pub exclude_dirs: Vec<String>,
    pub exclude_files: Vec<Regex>,
    pub max_concurrency: usize,
    pub encode: EncodeParams,
    pub resize: ResizePolicy,
    pub placement: PlacementPolicy,
    /// Catch-all output kind (`ALL_TO`).
    pub default_kind: ImageKind,
    pub rules: RuleSet,
}

impl Settings {
    /// Resolve a raw key/value map into validated settings.
    pub fn resolve(raw: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let raw = Raw(raw);

        let host = raw.required("HOST")?;
        let input_dir = PathBuf::from(raw.required("INPUT_DIR")?);
        let output_dir = PathBuf::from(raw.required("OUTPUT_DIR")?);

        let backend = raw.choice("BACKEND", &Backend::ALL, Backend::Local)?;

        let exclude_dirs = raw.list("EXCLUDE_DIRS", DEFAULT_EXCLUDE_DIRS);
        let exclude_files = raw
            .list("EXCLUDE_FILES", &[])
            .into_iter()
            .map(|pattern| {
                Regex::new(&pattern).map_err(|source| ConfigError::Pattern { pattern, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let max_concurrency = raw
            .ranged("MAX_CONCURRENCY", 1, 10)?
            .map_or(DEFAULT_MAX_CONCURRENCY, |n| n as usize);

        let encode = EncodeParams {
            png_effort: raw.ranged("PNG_EFFORT", 0, 6)?.map(|n| n as u8),
            jpeg_quality: raw.ranged("JPEG_QUALITY", 0, 100)?.map(|n| n as u8),
            webp_effort: raw.ranged("WEBP_EFFORT", 0, 6)?.map(|n| n as u8),
            webp_quality: raw.ranged("WEBP_QUALITY", 0, 100)?.map(|n| n as u8),
        };

        let presets = ResizePreset::ALL.map(|p| (p.label(), p));
        let preset = raw.choice("RESIZE_PRESET", &presets, ResizePreset::Full)?;
        let target = match raw.ranged("RESIZE_WIDTH", 1, 16384)? {
            Some(width) => ResizeTarget::Width(width as u32),
            None => ResizeTarget::Preset(preset),
        };
        let resize = ResizePolicy {
            target,
            scale_up: raw.flag("SCALE_UP"),
        };

        let placement = PlacementPolicy {
            overwrite: raw.flag("OVERWRITE"),
            keep_path: raw.flag("KEEP_PATH"),
            suffix: raw.get("SUFFIX").unwrap_or_default().to_string(),
            abort_slight: raw.flag("ABORT_SLIGHT"),
            abort_bigger: raw.flag("ABORT_BIGGER"),
            further_abort: raw.flag("FURTHER_ABORT"),
            further_abort_kb: raw
                .ranged("FURTHER_ABORT_SIZE", 0, 1_048_576)?
                .unwrap_or(0) as u64,
        };

        let kinds = ImageKind::ALL.map(|k| (k.name(), k));
        let default_kind = raw.choice("ALL_TO", &kinds, ImageKind::Jpeg)?;
        let rules = rules::compile(
            &raw.list("CUSTOM_RULES", &[]),
            raw.flag("FOLLOW_TYPE"),
            default_kind,
        )?;

        Ok(Self {
            host,
            proxy: raw.get("PROXY").map(str::to_string),
            input_dir,
            output_dir,
            backend,
            exclude_dirs,
            exclude_files,
            max_concurrency,
            encode,
            resize,
            placement,
            default_kind,
            rules,
        })
    }
}

/// Typed accessors over the raw map.
struct Raw<'a>(&'a HashMap<String, String>);

impl Raw<'_> {
    /// Trimmed value, `None` when unset or blank.
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key)
            .map(str::to_string)
            .ok_or(ConfigError::Missing(key))
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    fn list(&self, key: &str, default: &[&str]) -> Vec<String> {
        let items: Vec<String> = self
            .get(key)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
        if items.is_empty() {
            default.iter().map(|s| s.to_string()).collect()
        } else {
            items
        }
    }

    fn choice<T: Copy>(
        &self,
        key: &'static str,
        options: &[(&str, T)],
        default: T,
    ) -> Result<T, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        options
            .iter()
            .find(|(name, _)| *name == value)
            .map(|(_, option)| *option)
            .ok_or_else(|| ConfigError::NotInSet {
                key,
                value: value.to_string(),
                expected: options
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    fn ranged(&self, key: &'static str, min: i64, max: i64) -> Result<Option<i64>, ConfigError> {
        self.get(key)
            .map(|value| clamp_integer(value, min, max).ok_or_else(|| ConfigError::NotANumber {
                key,
                value: value.to_string(),
            }))
            .transpose()
    }
}

/// Parse an integer and clamp it into `[min, max]`.
///
/// Integers too large for `i64` saturate to the matching bound. Returns
/// `None` for anything that is not an integer.
pub fn clamp_integer(value: &str, min: i64, max: i64) -> Option<i64> {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let parsed = value.parse::<i64>().unwrap_or(if value.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    });
    Some(parsed.clamp(min, max))
}

// =============================================================================
// Raw map loading
// =============================================================================

/// Build the raw map: process environment overlaid with each existing env file.
///
/// Missing files are skipped; unreadable or malformed ones are errors.
pub fn load_raw(env_files: &[PathBuf]) -> Result<HashMap<String, String>, ConfigError> {
    let mut raw: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect();
    for path in env_files {
        overlay_env_file(&mut raw, path)?;
    }
    Ok(raw)
}

/// Overlay the entries of a dotenv file on top of `raw`.
///
/// Returns `Ok(false)` when the file does not exist.
pub fn overlay_env_file(
    raw: &mut HashMap<String, String>,
    path: &Path,
) -> Result<bool, ConfigError> {
    if !path.exists() {
        return Ok(false);
    }
    let env_error = |source| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    };
    for item in dotenvy::from_path_iter(path).map_err(env_error)? {
        let (key, value) = item.map_err(env_error)?;
        raw.insert(key, value);
    }
    Ok(true)
}

/// Resolve settings from the process environment plus `env_files`.
pub fn load_settings(env_files: &[PathBuf]) -> Result<Settings, ConfigError> {
    Settings::resolve(&load_raw(env_files)?)
}

/// A documented `.env` with every key, for `squash gen-config`.
pub fn stock_env_template() -> &'static str {
    r#"# squash configuration
#
# Values here override the process environment; `.env.local` overrides
# this file. Empty values fall back to the documented default.

# Transcoding service endpoint (required).
HOST=https://squoosh.app
# Directory to read images from (required).
INPUT_DIR=./images
# Directory to write results to (required).
OUTPUT_DIR=./compressed
# Proxy passed to the browser backend, e.g. http://127.0.0.1:8080
PROXY=
# Service implementation: local | browser
BACKEND=local

# Comma-separated directory names that are never descended into.
EXCLUDE_DIRS=node_modules,.git
# Comma-separated regular expressions matched against file names.
EXCLUDE_FILES=

# Jobs in flight at the same time (1-10).
MAX_CONCURRENCY=4

# Encoder knobs; unset keeps the service default.
# PNG effort (0-6)
PNG_EFFORT=
# MozJPEG quality (0-100)
JPEG_QUALITY=
# WebP effort (0-6)
WEBP_EFFORT=
# WebP quality (0-100)
WEBP_QUALITY=

# Target width in pixels; takes precedence over RESIZE_PRESET.
RESIZE_WIDTH=
# One of 25%, 33.33%, 50%, 100%, 200%, 300%, 400%
RESIZE_PRESET=100%
# Allow results wider than the source.
SCALE_UP=false

# Replace existing files instead of writing "name (1).ext".
OVERWRITE=false
# Recreate the input sub-directory layout under OUTPUT_DIR.
KEEP_PATH=false
# Appended to the file name before the extension.
SUFFIX=
# Skip results the service labels "slightly smaller/bigger".
ABORT_SLIGHT=false
# Skip results bigger than the source.
ABORT_BIGGER=false
# With OVERWRITE, keep the existing file unless the new one saves more
# than FURTHER_ABORT_SIZE kilobytes.
FURTHER_ABORT=false
FURTHER_ABORT_SIZE=0

# Comma-separated `input->output` rules; `->kind` is the catch-all.
CUSTOM_RULES=
# Without CUSTOM_RULES, keep every image in its own kind.
FOLLOW_TYPE=false
# Output kind for everything else: png | jpeg | webp
ALL_TO=jpeg
"#
}
