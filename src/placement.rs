//! Output placement: where a result goes and whether it is written at all.
//!
//! Three decisions, in order:
//!
//! 1. [`evaluate`]: abort heuristics on the service's saving label.
//! 2. [`destination`]: output root + mirrored sub-directory + suffixed name.
//! 3. [`place`]: collision handling and the write itself.
//!
//! Without `OVERWRITE`, an occupied destination is never replaced. The first
//! free name in `photo.jpg`, `photo (1).jpg`, `photo (2).jpg`, ... is claimed
//! with an exclusive create, so two jobs racing for the same name always end
//! up in different files. With `OVERWRITE` and `FURTHER_ABORT`, an existing
//! file is only replaced when the new result is smaller by more than the
//! configured threshold. Nothing is ever deleted.

use crate::config::{PlacementPolicy, Settings};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The name was claimed but the write failed; whatever landed stays there.
    #[error("Failed to write {path}, incomplete file left in place: {source}")]
    Incomplete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a transcoded result was discarded before placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    NoChange,
    SlightChange,
    Bigger,
}

/// Why placement kept the existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The new result is larger than the file already there.
    NotSmaller { existing: u64, candidate: u64 },
    /// The new result saves no more than `threshold_kb`.
    BelowThreshold { saved: u64, threshold_kb: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Written(PathBuf),
    Skipped(SkipReason),
}

/// Decide from the saving label whether the result is discarded.
///
/// Checked in order on the trimmed, lowercased label: `no change` always
/// aborts, a label starting with `slightly` aborts with `abort_slight`, a
/// label ending with `bigger` aborts with `abort_bigger`. How the amount is
/// written (`12.5%`, `2.5x`, `1,234%`) does not matter.
pub fn evaluate(label: &str, policy: &PlacementPolicy) -> Option<AbortReason> {
    let label = label.trim().to_lowercase();
    if label == "no change" {
        return Some(AbortReason::NoChange);
    }
    if label.starts_with("slightly") && policy.abort_slight {
        return Some(AbortReason::SlightChange);
    }
    if label.ends_with("bigger") && policy.abort_bigger {
        return Some(AbortReason::Bigger);
    }
    None
}

/// Insert `suffix` before the last extension of `filename`.
///
/// `("photo.webp", "-min")` → `photo-min.webp`; names without an extension get
/// the suffix appended.
pub fn with_suffix(filename: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return filename.to_string();
    }
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}{suffix}.{ext}"),
        _ => format!("{filename}{suffix}"),
    }
}

/// `photo.jpg` with `n = 2` → `photo (2).jpg`.
fn numbered(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem} ({n}).{}", ext.to_string_lossy()),
        None => format!("{stem} ({n})"),
    };
    path.with_file_name(name)
}

/// Target path for the result of transcoding `source`.
///
/// The suggested name comes from the service; only its file-name component
/// is used.
pub fn destination(settings: &Settings, source: &Path, suggested: &str) -> PathBuf {
    let mut dir = settings.output_dir.clone();
    if settings.placement.keep_path {
        if let Some(relative) = source
            .parent()
            .and_then(|parent| parent.strip_prefix(&settings.input_dir).ok())
        {
            dir.push(relative);
        }
    }
    let name = Path::new(suggested)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| suggested.to_string());
    dir.join(with_suffix(&name, &settings.placement.suffix))
}

/// Write `buffer` at or next to `dest` according to `policy`.
pub fn place(
    policy: &PlacementPolicy,
    dest: &Path,
    buffer: &[u8],
) -> Result<Placement, PlacementError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|source| PlacementError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    if !policy.overwrite {
        return write_new(dest, buffer).map(Placement::Written);
    }

    if policy.further_abort {
        if let Ok(meta) = fs::metadata(dest) {
            let existing = meta.len();
            let candidate = buffer.len() as u64;
            if candidate > existing {
                return Ok(Placement::Skipped(SkipReason::NotSmaller {
                    existing,
                    candidate,
                }));
            }
            let saved = existing - candidate;
            if saved <= policy.further_abort_kb * 1024 {
                return Ok(Placement::Skipped(SkipReason::BelowThreshold {
                    saved,
                    threshold_kb: policy.further_abort_kb,
                }));
            }
        }
    }

    fs::write(dest, buffer).map_err(|source| PlacementError::Write {
        path: dest.to_path_buf(),
        source,
    })?;
    Ok(Placement::Written(dest.to_path_buf()))
}

/// Claim the first free name derived from `dest` and write into it.
fn write_new(dest: &Path, buffer: &[u8]) -> Result<PathBuf, PlacementError> {
    let mut candidate = dest.to_path_buf();
    let mut n = 0;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => {
                fill(file, &candidate, buffer)?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                n += 1;
                candidate = numbered(dest, n);
            }
            Err(source) => {
                return Err(PlacementError::Write {
                    path: candidate,
                    source,
                });
            }
        }
    }
}

/// Write `buffer` into a freshly claimed `path`.
fn fill(mut file: impl Write, path: &Path, buffer: &[u8]) -> Result<(), PlacementError> {
    file.write_all(buffer).map_err(|source| {
        tracing::warn!("incomplete file left at {}", path.display());
        PlacementError::Incomplete {
            path: path.to_path_buf(),
            source,
        }
    })
}
