//! Size-change labels in the service's wording.
//!
//! The Squoosh UI reports each result as a short phrase next to the download
//! button. Placement decisions key off this text (see
//! [`placement::evaluate`](crate::placement::evaluate)), so services that compute
//! their own result (like [`LocalService`](super::LocalService)) must phrase
//! it the same way:
//!
//! ```text
//! no change          # identical byte count
//! slightly smaller   # under 0.5% either way
//! 34% smaller
//! 12% bigger
//! ```
//!
//! The phrasing is observed UI copy, not a documented protocol.

/// Describe the change from `original` to `new` bytes.
pub fn describe_saving(original: u64, new: u64) -> String {
    if original == new {
        return "no change".to_string();
    }
    let direction = if new < original { "smaller" } else { "bigger" };
    if original == 0 {
        return format!("slightly {direction}");
    }
    let ratio = new as f64 / original as f64;
    let percent = ((1.0 - ratio).abs() * 100.0).round() as u64;
    if percent == 0 {
        format!("slightly {direction}")
    } else {
        format!("{percent}% {direction}")
    }
}

/// Human-readable byte count with decimal units (`512 B`, `12.3 kB`, `1.20 MB`).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = next;
    }
    if value < 10.0 {
        format!("{value:.2} {unit}")
    } else if value < 100.0 {
        format!("{value:.1} {unit}")
    } else {
        format!("{value:.0} {unit}")
    }
}
