//! Job scheduling and the per-job pipeline.
//!
//! Every (file, rule) pair from discovery becomes a [`Job`]. The scheduler
//! admits at most `MAX_CONCURRENCY` jobs at once through an [`AdmissionGate`]
//! and runs each admitted job on a rayon pool of the same size:
//!
//! ```text
//! caller thread          pool threads
//! ─────────────          ────────────
//! for job in jobs:
//!   gate.acquire() ──┐   (blocks while N jobs are in flight)
//!   spawn(job) ──────┼─▶ open session → submit → apply options
//!                    │   → await result → abort heuristics → place
//!                    └── permit dropped: next job admitted
//! ```
//!
//! A job ends in exactly one [`Outcome`] or a [`JobError`]. Neither stops
//! sibling jobs; both are reported as [`JobEvent`]s and counted in the
//! [`RunSummary`].

use crate::catalog::{DiscoveryError, ImageFile};
use crate::config::Settings;
use crate::placement::{self, AbortReason, Placement, PlacementError, SkipReason};
use crate::rules::{ImageKind, RuleSet, TransformRule};
use crate::service::{OptionSet, ServiceError, SessionGuard, TranscodingService};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Condvar, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Why a single job failed.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error("job panicked: {0}")]
    Panicked(String),
}

/// One file paired with one rule. Consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub file: ImageFile,
    pub rule: TransformRule,
}

/// How a job that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Written {
        destination: PathBuf,
        original_size: String,
        saving: String,
    },
    Aborted {
        reason: AbortReason,
        saving: String,
    },
    Skipped {
        destination: PathBuf,
        reason: SkipReason,
    },
}

/// Progress events, sent to the printer thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Discovered {
        path: PathBuf,
        kind: ImageKind,
        width: u32,
        height: u32,
        rules: Vec<TransformRule>,
    },
    DiscoveryFailed {
        path: PathBuf,
        message: String,
    },
    Compressing {
        path: PathBuf,
        rule: TransformRule,
    },
    Written {
        path: PathBuf,
        rule: TransformRule,
        destination: PathBuf,
        original_size: String,
        saving: String,
    },
    Aborted {
        path: PathBuf,
        rule: TransformRule,
        reason: AbortReason,
        saving: String,
    },
    Skipped {
        path: PathBuf,
        rule: TransformRule,
        destination: PathBuf,
        reason: SkipReason,
    },
    Failed {
        path: PathBuf,
        rule: TransformRule,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub scheduled: usize,
    pub written: usize,
    pub aborted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Highest number of jobs in flight at the same time.
    pub peak_in_flight: usize,
}

fn emit(events: Option<&Sender<JobEvent>>, event: JobEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Expand discovered files into jobs, one per matching rule.
///
/// Discovery errors are reported and dropped.
pub fn jobs<'a, I>(
    catalog: I,
    rules: &'a RuleSet,
    events: Option<&'a Sender<JobEvent>>,
) -> impl Iterator<Item = Job> + 'a
where
    I: IntoIterator<Item = Result<ImageFile, DiscoveryError>>,
    I::IntoIter: 'a,
{
    catalog.into_iter().flat_map(move |discovered| {
        let file = match discovered {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("{e}");
                emit(
                    events,
                    JobEvent::DiscoveryFailed {
                        path: e.path().to_path_buf(),
                        message: e.to_string(),
                    },
                );
                return Vec::new();
            }
        };
        let matched = rules.matching(file.kind);
        emit(
            events,
            JobEvent::Discovered {
                path: file.path.clone(),
                kind: file.kind,
                width: file.width,
                height: file.height,
                rules: matched.clone(),
            },
        );
        matched
            .into_iter()
            .map(|rule| Job {
                file: file.clone(),
                rule,
            })
            .collect()
    })
}

// =============================================================================
// Admission gate
// =============================================================================

/// Counting semaphore bounding the number of jobs in flight.
pub struct AdmissionGate {
    limit: usize,
    state: Mutex<GateState>,
    freed: Condvar,
}

#[derive(Default)]
struct GateState {
    in_flight: usize,
    peak: usize,
}

impl AdmissionGate {
    /// A gate admitting `limit` holders at once (at least one).
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            state: Mutex::new(GateState::default()),
            freed: Condvar::new(),
        }
    }

    /// Block until a slot is free, then take it.
    pub fn acquire(&self) -> Permit<'_> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.in_flight >= self.limit {
            state = self
                .freed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.in_flight += 1;
        state.peak = state.peak.max(state.in_flight);
        Permit { gate: self }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
    }

    pub fn peak(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peak
    }
}

/// A taken slot; released when dropped.
pub struct Permit<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut state = self
            .gate
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.in_flight -= 1;
        drop(state);
        self.gate.freed.notify_one();
    }
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Default)]
struct Counters {
    scheduled: AtomicUsize,
    written: AtomicUsize,
    aborted: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Scheduler<'a> {
    settings: &'a Settings,
    service: &'a dyn TranscodingService,
    gate: AdmissionGate,
}

impl<'a> Scheduler<'a> {
    pub fn new(settings: &'a Settings, service: &'a dyn TranscodingService) -> Self {
        Self {
            settings,
            service,
            gate: AdmissionGate::new(settings.max_concurrency),
        }
    }

    /// Run every job to completion and summarize.
    ///
    /// Jobs are pulled from `jobs` on the calling thread, one per free slot.
    /// Returns once all admitted jobs finished.
    pub fn run<I>(
        &self,
        jobs: I,
        events: Option<&Sender<JobEvent>>,
    ) -> Result<RunSummary, SchedulerError>
    where
        I: IntoIterator<Item = Job>,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.gate.limit())
            .thread_name(|i| format!("squash-job-{i}"))
            .build()?;
        let counters = Counters::default();

        pool.in_place_scope(|scope| {
            for job in jobs {
                let permit = self.gate.acquire();
                Counters::bump(&counters.scheduled);
                let counters = &counters;
                scope.spawn(move |_| {
                    let _permit = permit;
                    self.finish(&job, self.run_job(&job, events), counters, events);
                });
            }
        });

        Ok(RunSummary {
            scheduled: counters.scheduled.into_inner(),
            written: counters.written.into_inner(),
            aborted: counters.aborted.into_inner(),
            skipped: counters.skipped.into_inner(),
            failed: counters.failed.into_inner(),
            peak_in_flight: self.gate.peak(),
        })
    }

    /// Run one job; a panic inside the pipeline counts as a failure.
    fn run_job(&self, job: &Job, events: Option<&Sender<JobEvent>>) -> Result<Outcome, JobError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.process(job, events))).unwrap_or_else(
            |payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(JobError::Panicked(message))
            },
        )
    }

    fn finish(
        &self,
        job: &Job,
        result: Result<Outcome, JobError>,
        counters: &Counters,
        events: Option<&Sender<JobEvent>>,
    ) {
        let path = job.file.path.clone();
        let rule = job.rule;
        let event = match result {
            Ok(Outcome::Written {
                destination,
                original_size,
                saving,
            }) => {
                Counters::bump(&counters.written);
                JobEvent::Written {
                    path,
                    rule,
                    destination,
                    original_size,
                    saving,
                }
            }
            Ok(Outcome::Aborted { reason, saving }) => {
                Counters::bump(&counters.aborted);
                JobEvent::Aborted {
                    path,
                    rule,
                    reason,
                    saving,
                }
            }
            Ok(Outcome::Skipped {
                destination,
                reason,
            }) => {
                Counters::bump(&counters.skipped);
                JobEvent::Skipped {
                    path,
                    rule,
                    destination,
                    reason,
                }
            }
            Err(e) => {
                Counters::bump(&counters.failed);
                tracing::warn!("{} ({rule}): {e}", path.display());
                JobEvent::Failed {
                    path,
                    rule,
                    message: e.to_string(),
                }
            }
        };
        emit(events, event);
    }

    /// The per-job pipeline.
    fn process(&self, job: &Job, events: Option<&Sender<JobEvent>>) -> Result<Outcome, JobError> {
        let Job { file, rule } = job;
        emit(
            events,
            JobEvent::Compressing {
                path: file.path.clone(),
                rule: *rule,
            },
        );
        tracing::debug!(
            "{} ({rule}): admitted, {} in flight",
            file.path.display(),
            self.gate.in_flight()
        );

        let mut session = SessionGuard::open(self.service)?;
        session.submit(&file.path, file.kind)?;
        let options =
            OptionSet::for_job(&self.settings.encode, &self.settings.resize, file, rule);
        session.apply_options(&options)?;
        let result = session.await_result(rule.output)?;
        drop(session);

        if let Some(reason) = placement::evaluate(&result.saving_label, &self.settings.placement) {
            return Ok(Outcome::Aborted {
                reason,
                saving: result.saving_label,
            });
        }

        let destination =
            placement::destination(self.settings, &file.path, &result.suggested_filename);
        match placement::place(&self.settings.placement, &destination, &result.buffer)? {
            Placement::Written(path) => Ok(Outcome::Written {
                destination: path,
                original_size: result.original_size_label,
                saving: result.saving_label,
            }),
            Placement::Skipped(reason) => Ok(Outcome::Skipped {
                destination,
                reason,
            }),
        }
    }
}
