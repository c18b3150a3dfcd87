//! # squash
//!
//! Batch-compress a directory tree of images. Every eligible file is paired
//! with the transform rules that apply to its kind, each pairing is sent to a
//! transcoding service, and the result is written next to (or instead of)
//! earlier results according to a placement policy.
//!
//! # Pipeline
//!
//! ```text
//! .env / env vars ──▶ config::Settings
//!                          │
//! INPUT_DIR ──▶ catalog ──▶ rules ──▶ scheduler::jobs
//!                                          │
//!                          scheduler::Scheduler (≤ MAX_CONCURRENCY in flight)
//!                                          │  per job
//!                          service session ──▶ placement ──▶ OUTPUT_DIR
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Layered key/value loading (`.env`, `.env.local`) and validation into [`config::Settings`] |
//! | [`rules`] | Image kinds, `input->output` rule parsing, compilation and matching |
//! | [`catalog`] | Lazy walk of the input root yielding measured [`catalog::ImageFile`]s |
//! | [`service`] | Transcoding session boundary with a local and a headless-browser implementation |
//! | [`placement`] | Abort heuristics, destination paths, collision-free writes |
//! | [`scheduler`] | Admission gate, rayon worker pool, per-job pipeline, run summary |
//! | [`output`] | Pure formatting of job events, plans and summaries |
//!
//! # Design Decisions
//!
//! ## Services Behind a Session Trait
//!
//! The core never touches pixels. A job opens a
//! [`Session`](service::Session), submits the file, applies options and waits
//! for the encoded bytes plus the service's own saving label. The default
//! [`LocalService`](service::LocalService) encodes in-process with the `image`
//! crate; the `browser` feature adds a service that drives a Squoosh web UI at
//! `HOST`. Tests use a recording mock.
//!
//! ## Blocking Gate, Not Polling
//!
//! Admission is a counting semaphore (`Mutex` + `Condvar`). The dispatching
//! loop blocks while `MAX_CONCURRENCY` jobs are in flight and wakes exactly
//! when one finishes.
//!
//! ## Never Clobber by Accident
//!
//! Without `OVERWRITE`, results are written with an exclusive create and get a
//! numbered name (`photo (1).jpg`) when the plain one is taken. Nothing is ever
//! deleted.

pub mod catalog;
pub mod config;
pub mod output;
pub mod placement;
pub mod rules;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod test_helpers;
