//! CLI output formatting for runs and plans.
//!
//! Jobs finish in any order, so every event line names its source file and
//! rule. Details follow on indented lines:
//!
//! # Run
//!
//! ```text
//! Found images/cover.png (png 1200x800) → webp
//! Compressing images/cover.png (png->webp)
//! Written images/cover.png (png->webp) → compressed/cover.webp
//!     1.20 MB, 34% smaller
//! Aborted images/icon.png (->jpeg): no change
//! Kept compressed/hero.jpg for images/hero.png (->jpeg)
//!     existing file is smaller (12.3 kB vs 14.0 kB)
//! Failed images/bad.webp (->jpeg): Transcoding failed: ...
//!
//! Scheduled 5 jobs: 3 written, 1 aborted, 0 skipped, 1 failed
//! Peak in flight: 2 of 4
//! ```
//!
//! # Check
//!
//! ```text
//! Config
//!     Host: https://squoosh.app (local backend)
//!     Input: ./images
//!     Output: ./compressed
//!     Concurrency: 4
//! Rules
//!     png->webp
//!     ->jpeg
//! Jobs
//! 001 cover.png (png 1200x800) → webp
//! 002 trips/beach.jpg (jpeg 800x600) → jpeg
//!
//! 2 jobs
//! ```
//!
//! Each `format_*` function returns `Vec<String>` and does no I/O; the
//! `print_*` wrappers write to stdout.

use crate::config::{Backend, Settings};
use crate::placement::{AbortReason, SkipReason};
use crate::rules::TransformRule;
use crate::scheduler::{Job, JobEvent, RunSummary};
use crate::service::saving::format_size;
use std::path::Path;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn rule_outputs(rules: &[TransformRule]) -> String {
    if rules.is_empty() {
        return "(no rule)".to_string();
    }
    rules
        .iter()
        .map(|r| r.output.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn abort_text(reason: AbortReason) -> &'static str {
    match reason {
        AbortReason::NoChange => "no change",
        AbortReason::SlightChange => "only a slight change",
        AbortReason::Bigger => "result is bigger",
    }
}

fn skip_text(reason: &SkipReason) -> String {
    match reason {
        SkipReason::NotSmaller {
            existing,
            candidate,
        } => format!(
            "existing file is smaller ({} vs {})",
            format_size(*existing),
            format_size(*candidate)
        ),
        SkipReason::BelowThreshold {
            saved,
            threshold_kb,
        } => format!(
            "saves {} bytes, threshold is {} KB",
            saved, threshold_kb
        ),
    }
}

// ============================================================================
// Run output
// ============================================================================

/// Format a single job event as display lines.
pub fn format_job_event(event: &JobEvent) -> Vec<String> {
    match event {
        JobEvent::Discovered {
            path,
            kind,
            width,
            height,
            rules,
        } => vec![format!(
            "Found {} ({} {}x{}) \u{2192} {}",
            path.display(),
            kind,
            width,
            height,
            rule_outputs(rules)
        )],
        JobEvent::DiscoveryFailed { path, message } => {
            vec![format!("Unreadable {}: {}", path.display(), message)]
        }
        JobEvent::Compressing { path, rule } => {
            vec![format!("Compressing {} ({})", path.display(), rule)]
        }
        JobEvent::Written {
            path,
            rule,
            destination,
            original_size,
            saving,
        } => vec![
            format!(
                "Written {} ({}) \u{2192} {}",
                path.display(),
                rule,
                destination.display()
            ),
            format!("{}{}, {}", indent(1), original_size, saving),
        ],
        JobEvent::Aborted {
            path,
            rule,
            reason,
            saving,
        } => {
            let text = abort_text(*reason);
            if saving == text {
                vec![format!("Aborted {} ({}): {}", path.display(), rule, text)]
            } else {
                vec![format!(
                    "Aborted {} ({}): {} ({})",
                    path.display(),
                    rule,
                    text,
                    saving
                )]
            }
        }
        JobEvent::Skipped {
            path,
            rule,
            destination,
            reason,
        } => vec![
            format!(
                "Kept {} for {} ({})",
                destination.display(),
                path.display(),
                rule
            ),
            format!("{}{}", indent(1), skip_text(reason)),
        ],
        JobEvent::Failed {
            path,
            rule,
            message,
        } => vec![format!("Failed {} ({}): {}", path.display(), rule, message)],
    }
}

/// Format the end-of-run totals.
pub fn format_summary(summary: &RunSummary, max_concurrency: usize) -> Vec<String> {
    let noun = if summary.scheduled == 1 { "job" } else { "jobs" };
    vec![
        format!(
            "Scheduled {} {}: {} written, {} aborted, {} skipped, {} failed",
            summary.scheduled,
            noun,
            summary.written,
            summary.aborted,
            summary.skipped,
            summary.failed
        ),
        format!(
            "Peak in flight: {} of {}",
            summary.peak_in_flight, max_concurrency
        ),
    ]
}

pub fn print_summary(summary: &RunSummary, max_concurrency: usize) {
    println!();
    for line in format_summary(summary, max_concurrency) {
        println!("{}", line);
    }
}

// ============================================================================
// Check output
// ============================================================================

/// Show `path` relative to `root` when it lies below it.
fn relative<'a>(path: &'a Path, root: &Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}

/// Format the resolved configuration and the jobs a run would schedule.
pub fn format_plan(settings: &Settings, jobs: &[Job]) -> Vec<String> {
    let backend = match settings.backend {
        Backend::Local => "local",
        Backend::Browser => "browser",
    };
    let mut lines = vec![
        "Config".to_string(),
        format!("{}Host: {} ({} backend)", indent(1), settings.host, backend),
    ];
    if let Some(proxy) = &settings.proxy {
        lines.push(format!("{}Proxy: {}", indent(1), proxy));
    }
    lines.push(format!("{}Input: {}", indent(1), settings.input_dir.display()));
    lines.push(format!(
        "{}Output: {}",
        indent(1),
        settings.output_dir.display()
    ));
    lines.push(format!(
        "{}Concurrency: {}",
        indent(1),
        settings.max_concurrency
    ));

    lines.push("Rules".to_string());
    for rule in settings.rules.rules() {
        lines.push(format!("{}{}", indent(1), rule));
    }

    lines.push("Jobs".to_string());
    for (i, job) in jobs.iter().enumerate() {
        lines.push(format!(
            "{} {} ({} {}x{}) \u{2192} {}",
            format_index(i + 1),
            relative(&job.file.path, &settings.input_dir).display(),
            job.file.kind,
            job.file.width,
            job.file.height,
            job.rule.output
        ));
    }

    lines.push(String::new());
    let noun = if jobs.len() == 1 { "job" } else { "jobs" };
    lines.push(format!("{} {}", jobs.len(), noun));
    lines
}

pub fn print_plan(settings: &Settings, jobs: &[Job]) {
    for line in format_plan(settings, jobs) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ImageFile;
    use crate::rules::ImageKind;
    use crate::test_helpers::settings_for;
    use std::path::PathBuf;

    fn png_to_webp() -> TransformRule {
        TransformRule::new(ImageKind::Png, ImageKind::Webp)
    }

    #[test]
    fn index_is_zero_padded() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    // =========================================================================
    // Job events
    // =========================================================================

    #[test]
    fn discovered_lists_outputs() {
        let event = JobEvent::Discovered {
            path: PathBuf::from("in/cover.png"),
            kind: ImageKind::Png,
            width: 1200,
            height: 800,
            rules: vec![png_to_webp(), TransformRule::new(ImageKind::Png, ImageKind::Jpeg)],
        };
        assert_eq!(
            format_job_event(&event),
            vec!["Found in/cover.png (png 1200x800) \u{2192} webp, jpeg"]
        );
    }

    #[test]
    fn discovered_without_rules() {
        let event = JobEvent::Discovered {
            path: PathBuf::from("in/cover.png"),
            kind: ImageKind::Png,
            width: 1,
            height: 1,
            rules: vec![],
        };
        assert!(format_job_event(&event)[0].ends_with("(no rule)"));
    }

    #[test]
    fn compressing_names_rule() {
        let event = JobEvent::Compressing {
            path: PathBuf::from("in/a.jpg"),
            rule: TransformRule::wildcard(ImageKind::Jpeg),
        };
        assert_eq!(format_job_event(&event), vec!["Compressing in/a.jpg (->jpeg)"]);
    }

    #[test]
    fn written_has_size_line() {
        let event = JobEvent::Written {
            path: PathBuf::from("in/cover.png"),
            rule: png_to_webp(),
            destination: PathBuf::from("out/cover.webp"),
            original_size: "1.20 MB".to_string(),
            saving: "34% smaller".to_string(),
        };
        assert_eq!(
            format_job_event(&event),
            vec![
                "Written in/cover.png (png->webp) \u{2192} out/cover.webp",
                "    1.20 MB, 34% smaller",
            ]
        );
    }

    #[test]
    fn aborted_no_change_is_not_repeated() {
        let event = JobEvent::Aborted {
            path: PathBuf::from("in/icon.png"),
            rule: TransformRule::wildcard(ImageKind::Jpeg),
            reason: AbortReason::NoChange,
            saving: "no change".to_string(),
        };
        assert_eq!(
            format_job_event(&event),
            vec!["Aborted in/icon.png (->jpeg): no change"]
        );
    }

    #[test]
    fn aborted_bigger_shows_label() {
        let event = JobEvent::Aborted {
            path: PathBuf::from("in/icon.png"),
            rule: png_to_webp(),
            reason: AbortReason::Bigger,
            saving: "12% bigger".to_string(),
        };
        assert_eq!(
            format_job_event(&event),
            vec!["Aborted in/icon.png (png->webp): result is bigger (12% bigger)"]
        );
    }

    #[test]
    fn skipped_explains_reason() {
        let event = JobEvent::Skipped {
            path: PathBuf::from("in/hero.png"),
            rule: TransformRule::wildcard(ImageKind::Jpeg),
            destination: PathBuf::from("out/hero.jpg"),
            reason: SkipReason::NotSmaller {
                existing: 12_300,
                candidate: 14_000,
            },
        };
        assert_eq!(
            format_job_event(&event),
            vec![
                "Kept out/hero.jpg for in/hero.png (->jpeg)",
                "    existing file is smaller (12.3 kB vs 14.0 kB)",
            ]
        );

        let event = JobEvent::Skipped {
            path: PathBuf::from("in/hero.png"),
            rule: TransformRule::wildcard(ImageKind::Jpeg),
            destination: PathBuf::from("out/hero.jpg"),
            reason: SkipReason::BelowThreshold {
                saved: 300,
                threshold_kb: 1,
            },
        };
        assert_eq!(
            format_job_event(&event)[1],
            "    saves 300 bytes, threshold is 1 KB"
        );
    }

    #[test]
    fn failures_carry_message() {
        let event = JobEvent::Failed {
            path: PathBuf::from("in/bad.webp"),
            rule: TransformRule::wildcard(ImageKind::Jpeg),
            message: "Transcoding failed: boom".to_string(),
        };
        assert_eq!(
            format_job_event(&event),
            vec!["Failed in/bad.webp (->jpeg): Transcoding failed: boom"]
        );

        let event = JobEvent::DiscoveryFailed {
            path: PathBuf::from("in/broken.png"),
            message: "bad header".to_string(),
        };
        assert_eq!(
            format_job_event(&event),
            vec!["Unreadable in/broken.png: bad header"]
        );
    }

    // =========================================================================
    // Summary and plan
    // =========================================================================

    #[test]
    fn summary_lines() {
        let summary = RunSummary {
            scheduled: 5,
            written: 3,
            aborted: 1,
            skipped: 0,
            failed: 1,
            peak_in_flight: 2,
        };
        assert_eq!(
            format_summary(&summary, 4),
            vec![
                "Scheduled 5 jobs: 3 written, 1 aborted, 0 skipped, 1 failed",
                "Peak in flight: 2 of 4",
            ]
        );
    }

    #[test]
    fn summary_singular() {
        let summary = RunSummary {
            scheduled: 1,
            written: 1,
            ..RunSummary::default()
        };
        assert!(format_summary(&summary, 1)[0].starts_with("Scheduled 1 job:"));
    }

    #[test]
    fn plan_lists_config_rules_and_jobs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = settings_for(tmp.path(), &[("CUSTOM_RULES", "png->webp,->jpeg")]);
        let jobs = vec![Job {
            file: ImageFile {
                path: settings.input_dir.join("trips").join("beach.png"),
                kind: ImageKind::Png,
                width: 800,
                height: 600,
            },
            rule: png_to_webp(),
        }];

        let lines = format_plan(&settings, &jobs);
        assert_eq!(lines[0], "Config");
        assert_eq!(lines[1], "    Host: http://localhost:5000 (local backend)");
        assert!(lines.contains(&"Rules".to_string()));
        assert!(lines.contains(&"    png->webp".to_string()));
        assert!(lines.contains(&"    ->jpeg".to_string()));
        let job_line = format!(
            "001 {} (png 800x600) \u{2192} webp",
            Path::new("trips").join("beach.png").display()
        );
        assert!(lines.contains(&job_line));
        assert_eq!(lines.last().unwrap(), "1 job");
    }

    #[test]
    fn plan_shows_proxy_when_set() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = settings_for(tmp.path(), &[("PROXY", "http://127.0.0.1:8080")]);
        let lines = format_plan(&settings, &[]);
        assert!(lines.contains(&"    Proxy: http://127.0.0.1:8080".to_string()));
        assert_eq!(lines.last().unwrap(), "0 jobs");
    }
}
