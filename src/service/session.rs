//! Service and session traits plus shared result types.
//!
//! A [`TranscodingService`] may be one shared resource (a browser hosting many
//! tabs), so it must be `Sync`. A [`Session`] belongs to exactly one job and
//! is never shared. Callers hold sessions through [`SessionGuard`], which
//! closes them on every exit path.

use crate::rules::ImageKind;
use crate::service::OptionSet;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transcoding failed: {0}")]
    Failed(String),
    #[error("Session used out of order: {0}")]
    Protocol(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// What the service hands back for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeResult {
    pub buffer: Vec<u8>,
    /// File name the service proposes, e.g. `photo.webp`.
    pub suggested_filename: String,
    /// Human-readable size of the source, e.g. `1.2 MB`.
    pub original_size_label: String,
    /// Free-text size classification, e.g. `34% smaller` or `no change`.
    pub saving_label: String,
}

/// A transcoding service that hands out independent sessions.
pub trait TranscodingService: Sync {
    fn new_session(&self) -> Result<Box<dyn Session + '_>, ServiceError>;
}

/// One job's conversation with the service.
///
/// Calls happen in order: `submit`, `apply_options`, `await_result`, `close`.
pub trait Session {
    fn submit(&mut self, path: &Path, kind: ImageKind) -> Result<(), ServiceError>;

    fn apply_options(&mut self, options: &OptionSet) -> Result<(), ServiceError>;

    /// Block until the service finished encoding `expected`. No timeout.
    fn await_result(&mut self, expected: ImageKind) -> Result<TranscodeResult, ServiceError>;

    fn close(&mut self) -> Result<(), ServiceError>;
}

/// Owns a session and closes it when dropped.
pub struct SessionGuard<'a> {
    session: Box<dyn Session + 'a>,
}

impl<'a> SessionGuard<'a> {
    pub fn open(service: &'a dyn TranscodingService) -> Result<Self, ServiceError> {
        Ok(Self {
            session: service.new_session()?,
        })
    }
}

impl<'a> Deref for SessionGuard<'a> {
    type Target = dyn Session + 'a;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.session.close() {
            tracing::warn!("failed to close service session: {e}");
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock service that records calls instead of transcoding.
    ///
    /// Results are canned: the buffer is fixed, the saving label comes from
    /// `labels` (keyed by source file name) or `default_label`. Uses Mutex and
    /// atomics so it is Sync and can be shared by concurrent jobs.
    pub struct MockService {
        pub buffer: Vec<u8>,
        pub default_label: String,
        pub labels: HashMap<String, String>,
        /// Source file names whose `await_result` fails.
        pub failing: Vec<String>,
        /// Source file names whose `await_result` panics.
        pub panicking: Vec<String>,
        /// Simulated service round trip.
        pub delay: Duration,
        pub calls: Mutex<Vec<RecordedCall>>,
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub active: AtomicUsize,
        pub peak_active: AtomicUsize,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedCall {
        Submit(PathBuf, ImageKind),
        Apply(OptionSet),
        Await(ImageKind),
    }

    impl Default for MockService {
        fn default() -> Self {
            Self {
                buffer: b"compressed".to_vec(),
                default_label: "40% smaller".to_string(),
                labels: HashMap::new(),
                failing: Vec::new(),
                panicking: Vec::new(),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak_active: AtomicUsize::new(0),
            }
        }
    }

    impl MockService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_label(label: &str) -> Self {
            Self {
                default_label: label.to_string(),
                ..Self::default()
            }
        }

        pub fn get_calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TranscodingService for MockService {
        fn new_session(&self) -> Result<Box<dyn Session + '_>, ServiceError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                service: self,
                source: None,
            }))
        }
    }

    struct MockSession<'a> {
        service: &'a MockService,
        source: Option<PathBuf>,
    }

    impl Session for MockSession<'_> {
        fn submit(&mut self, path: &Path, kind: ImageKind) -> Result<(), ServiceError> {
            let now = self.service.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.service.peak_active.fetch_max(now, Ordering::SeqCst);
            self.service
                .calls
                .lock()
                .unwrap()
                .push(RecordedCall::Submit(path.to_path_buf(), kind));
            self.source = Some(path.to_path_buf());
            Ok(())
        }

        fn apply_options(&mut self, options: &OptionSet) -> Result<(), ServiceError> {
            self.service
                .calls
                .lock()
                .unwrap()
                .push(RecordedCall::Apply(options.clone()));
            Ok(())
        }

        fn await_result(&mut self, expected: ImageKind) -> Result<TranscodeResult, ServiceError> {
            self.service
                .calls
                .lock()
                .unwrap()
                .push(RecordedCall::Await(expected));
            std::thread::sleep(self.service.delay);

            let source = self
                .source
                .as_ref()
                .ok_or_else(|| ServiceError::Protocol("nothing submitted".to_string()))?;
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.service.panicking.contains(&name) {
                panic!("mock panic for {name}");
            }
            if self.service.failing.contains(&name) {
                return Err(ServiceError::Failed(format!("mock failure for {name}")));
            }
            let stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(TranscodeResult {
                buffer: self.service.buffer.clone(),
                suggested_filename: format!("{stem}.{}", expected.extension()),
                original_size_label: "1.0 kB".to_string(),
                saving_label: self
                    .service
                    .labels
                    .get(&name)
                    .unwrap_or(&self.service.default_label)
                    .clone(),
            })
        }

        fn close(&mut self) -> Result<(), ServiceError> {
            if self.source.take().is_some() {
                self.service.active.fetch_sub(1, Ordering::SeqCst);
            }
            self.service.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn mock_records_session_calls() {
        let service = MockService::new();
        let mut session = SessionGuard::open(&service).unwrap();
        session
            .submit(Path::new("/in/cat.png"), ImageKind::Png)
            .unwrap();
        let result = session.await_result(ImageKind::Webp).unwrap();
        assert_eq!(result.suggested_filename, "cat.webp");
        assert_eq!(result.saving_label, "40% smaller");

        let calls = service.get_calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], RecordedCall::Submit(p, ImageKind::Png) if p == Path::new("/in/cat.png")));
        assert_eq!(calls[1], RecordedCall::Await(ImageKind::Webp));
    }

    #[test]
    fn guard_closes_session_on_drop() {
        let service = MockService::new();
        {
            let _session = SessionGuard::open(&service).unwrap();
        }
        assert_eq!(service.opened.load(Ordering::SeqCst), 1);
        assert_eq!(service.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_closes_session_after_failure() {
        let service = MockService {
            failing: vec!["bad.png".to_string()],
            ..MockService::default()
        };
        let outcome = (|| -> Result<TranscodeResult, ServiceError> {
            let mut session = SessionGuard::open(&service)?;
            session.submit(Path::new("bad.png"), ImageKind::Png)?;
            session.await_result(ImageKind::Png)
        })();
        assert!(matches!(outcome, Err(ServiceError::Failed(_))));
        assert_eq!(service.closed.load(Ordering::SeqCst), 1);
        assert_eq!(service.active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn await_before_submit_is_protocol_error() {
        let service = MockService::new();
        let mut session = SessionGuard::open(&service).unwrap();
        assert!(matches!(
            session.await_result(ImageKind::Png),
            Err(ServiceError::Protocol(_))
        ));
    }
}
