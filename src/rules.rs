//! Image kinds and transform rules.
//!
//! A rule maps an optional input kind to a required output kind and is written
//! `input->output` in configuration:
//!
//! ```text
//! png->webp      # every PNG becomes a WebP
//! jpeg->jpeg     # recompress JPEGs in place
//! ->jpeg         # wildcard: anything no concrete rule claimed becomes a JPEG
//! ```
//!
//! ## Compilation
//!
//! [`compile`] turns the raw entries into a [`RuleSet`]:
//!
//! 1. Parse every entry; duplicates (same input and output) collapse to the
//!    first occurrence.
//! 2. Reject a second, different wildcard.
//! 3. Stable-sort: concrete rules before the wildcard, and among concrete rules
//!    the ones that *change* kind before the ones whose output is the default
//!    transcode kind.
//! 4. Fall back to identity rules (`follow_type`) or a single `->default`
//!    wildcard when nothing was configured.
//!
//! ## Matching
//!
//! [`RuleSet::matching`] walks the compiled list in order. Concrete rules match
//! their own input kind; the wildcard only matches when nothing matched before
//! it. Because the wildcard always sorts last, it applies exactly to the kinds
//! no concrete rule targets. A kind can match several concrete rules and is
//! then transcoded once per rule.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("unknown image kind \"{0}\" (expected png, jpeg or webp)")]
    UnknownKind(String),
    #[error("malformed rule \"{0}\": expected `input->output`")]
    Malformed(String),
    #[error("rule \"{0}\" has no output kind")]
    MissingOutput(String),
    #[error("more than one wildcard rule: \"{first}\" and \"{second}\"")]
    DuplicateWildcard { first: String, second: String },
}

/// Supported image encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
    Webp,
}

impl ImageKind {
    pub const ALL: [ImageKind; 3] = [ImageKind::Png, ImageKind::Jpeg, ImageKind::Webp];

    /// Classify a file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageKind::Png),
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Configuration name.
    pub fn name(self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpeg",
            ImageKind::Webp => "webp",
        }
    }

    /// Extension used for files written in this kind.
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
            ImageKind::Webp => "webp",
        }
    }

    /// Encoder identifier understood by the Squoosh UI.
    pub fn encoder(self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "mozjpeg",
            ImageKind::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImageKind {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| RuleError::UnknownKind(s.to_string()))
    }
}

/// Mapping from an optional input kind to an output kind.
///
/// `input: None` is the wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransformRule {
    pub input: Option<ImageKind>,
    pub output: ImageKind,
}

impl TransformRule {
    pub fn new(input: ImageKind, output: ImageKind) -> Self {
        Self {
            input: Some(input),
            output,
        }
    }

    pub fn wildcard(output: ImageKind) -> Self {
        Self {
            input: None,
            output,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.input.is_none()
    }

    /// Parse a single `input->output` entry.
    ///
    /// - `"png->webp"` → concrete rule
    /// - `"->jpeg"` → wildcard
    /// - `"png"`, `"png->webp->jpeg"` → [`RuleError::Malformed`]
    /// - `"png->"` → [`RuleError::MissingOutput`]
    pub fn parse(entry: &str) -> Result<Self, RuleError> {
        let mut parts = entry.split("->");
        let (Some(input), Some(output), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(RuleError::Malformed(entry.to_string()));
        };
        let (input, output) = (input.trim(), output.trim());
        if output.is_empty() {
            return Err(RuleError::MissingOutput(entry.to_string()));
        }
        let input = if input.is_empty() {
            None
        } else {
            Some(input.parse()?)
        };
        Ok(Self {
            input,
            output: output.parse()?,
        })
    }
}

impl fmt::Display for TransformRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.input {
            Some(input) => write!(f, "{input}->{}", self.output),
            None => write!(f, "->{}", self.output),
        }
    }
}

/// Compiled, ordered rule list.
///
/// Carries what compilation learned (wildcard present, accepted input kinds)
/// so later stages never recompute it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<TransformRule>,
    accepts_any: bool,
    accepted: Vec<ImageKind>,
}

impl RuleSet {
    fn from_ordered(rules: Vec<TransformRule>) -> Self {
        let accepts_any = rules.iter().any(TransformRule::is_wildcard);
        let mut accepted: Vec<ImageKind> = rules.iter().filter_map(|r| r.input).collect();
        accepted.sort();
        accepted.dedup();
        Self {
            rules,
            accepts_any,
            accepted,
        }
    }

    pub fn rules(&self) -> &[TransformRule] {
        &self.rules
    }

    /// Whether any rule takes files of `kind` as input.
    pub fn accepts(&self, kind: ImageKind) -> bool {
        self.accepts_any || self.accepted.contains(&kind)
    }

    /// Rules that apply to a file of `kind`, in compiled order.
    pub fn matching(&self, kind: ImageKind) -> Vec<TransformRule> {
        let mut matched = Vec::new();
        for rule in &self.rules {
            match rule.input {
                Some(input) if input == kind => matched.push(*rule),
                Some(_) => {}
                None if matched.is_empty() => matched.push(*rule),
                None => {}
            }
        }
        matched
    }
}

/// Compile raw rule entries into a [`RuleSet`].
///
/// `default_kind` is the catch-all output kind; it decides the ordering of
/// pass-through rules and the fallback wildcard.
pub fn compile(
    entries: &[String],
    follow_type: bool,
    default_kind: ImageKind,
) -> Result<RuleSet, RuleError> {
    let mut seen = HashSet::new();
    let mut wildcard: Option<TransformRule> = None;
    let mut rules = Vec::new();

    for entry in entries {
        let rule = TransformRule::parse(entry)?;
        if !seen.insert(rule) {
            continue;
        }
        if rule.is_wildcard() {
            if let Some(first) = wildcard {
                return Err(RuleError::DuplicateWildcard {
                    first: first.to_string(),
                    second: rule.to_string(),
                });
            }
            wildcard = Some(rule);
        }
        rules.push(rule);
    }

    rules.sort_by_key(|rule| (rule.is_wildcard(), rule.output == default_kind));

    if rules.is_empty() && follow_type {
        rules = ImageKind::ALL
            .into_iter()
            .map(|kind| TransformRule::new(kind, kind))
            .collect();
    }
    if rules.is_empty() {
        rules.push(TransformRule::wildcard(default_kind));
    }

    Ok(RuleSet::from_ordered(rules))
}
