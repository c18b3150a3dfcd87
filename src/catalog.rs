//! Input discovery.
//!
//! Walks the input root lazily and yields every file the run can work on,
//! measured once:
//!
//! ```text
//! images/                  # root
//! ├── cover.png            # yielded (png accepted by the rules)
//! ├── notes.txt            # skipped: unknown extension
//! ├── draft-cover.png      # skipped: matches EXCLUDE_FILES
//! ├── node_modules/        # pruned: never descended
//! └── trips/
//!     └── beach.JPG        # yielded as jpeg
//! ```
//!
//! Entries are visited in file-name order so runs are reproducible. Files
//! are classified by extension but measured by content. A file whose
//! dimensions cannot be read yields a [`DiscoveryError`] and the walk moves
//! on.

use crate::rules::{ImageKind, RuleSet};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Failed to read dimensions of {path}: {source}")]
    Dimensions {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl DiscoveryError {
    pub fn path(&self) -> &Path {
        match self {
            DiscoveryError::Walk { path, .. } | DiscoveryError::Dimensions { path, .. } => path,
        }
    }
}

/// An eligible input file with its pixel dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageFile {
    pub path: PathBuf,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
}

/// Lazy, single-pass sequence of discovered files.
pub struct Catalog<'a> {
    root: PathBuf,
    walker: Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + 'a>,
    exclude_files: &'a [Regex],
    rules: &'a RuleSet,
}

/// Start enumerating `root`.
///
/// Directories named in `exclude_dirs` are pruned; files whose name matches
/// any of `exclude_files` are skipped, as are kinds `rules` does not accept.
pub fn enumerate<'a>(
    root: &Path,
    exclude_dirs: &'a [String],
    exclude_files: &'a [Regex],
    rules: &'a RuleSet,
) -> Catalog<'a> {
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| !is_excluded_dir(entry, exclude_dirs));
    Catalog {
        root: root.to_path_buf(),
        walker: Box::new(walker),
        exclude_files,
        rules,
    }
}

fn is_excluded_dir(entry: &DirEntry, exclude_dirs: &[String]) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && exclude_dirs
            .iter()
            .any(|name| entry.file_name() == name.as_str())
}

impl Iterator for Catalog<'_> {
    type Item = Result<ImageFile, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(source) => {
                    let path = source
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    return Some(Err(DiscoveryError::Walk { path, source }));
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if self.exclude_files.iter().any(|re| re.is_match(&name)) {
                tracing::debug!("excluded by pattern: {}", entry.path().display());
                continue;
            }
            let Some(kind) = ImageKind::from_path(entry.path()) else {
                continue;
            };
            if !self.rules.accepts(kind) {
                tracing::debug!("no rule takes {kind}: {}", entry.path().display());
                continue;
            }

            let path = entry.into_path();
            return Some(match measure(&path) {
                Ok((width, height)) => Ok(ImageFile {
                    path,
                    kind,
                    width,
                    height,
                }),
                Err(source) => Err(DiscoveryError::Dimensions { path, source }),
            });
        }
    }
}

/// Read the header of `path`, trusting its content over its extension.
fn measure(path: &Path) -> Result<(u32, u32), image::ImageError> {
    Ok(image::ImageReader::open(path)?
        .with_guessed_format()?
        .into_dimensions()?)
}
