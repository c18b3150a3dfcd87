//! Transcoding service boundary.
//!
//! The core never compresses pixels itself. Each job opens a [`Session`] on a
//! [`TranscodingService`], submits the source file, applies an [`OptionSet`],
//! and waits for a [`TranscodeResult`].
//!
//! | Implementation | How it transcodes |
//! |---|---|
//! | [`LocalService`] | `image` crate in-process: decode, Lanczos3 resize, PNG/JPEG/WebP encode |
//! | `BrowserService` (feature `browser`) | Squoosh web UI at `HOST`, one headless Chrome tab per session |
//!
//! The module is split into:
//! - **Session**: [`TranscodingService`] / [`Session`] traits, [`SessionGuard`], [`TranscodeResult`]
//! - **Options**: [`OptionSet`] derived from settings for one job
//! - **Saving**: the service's size-change labels (`"12% smaller"`, `"no change"`)

#[cfg(feature = "browser")]
pub mod browser;
pub mod local;
pub mod options;
pub mod saving;
pub mod session;

#[cfg(feature = "browser")]
pub use browser::BrowserService;
pub use local::LocalService;
pub use options::{OptionSet, Resize};
pub use session::{ServiceError, Session, SessionGuard, TranscodeResult, TranscodingService};

use crate::config::{Backend, Settings};

/// Start the service selected by `BACKEND`.
pub fn connect(settings: &Settings) -> Result<Box<dyn TranscodingService>, ServiceError> {
    match settings.backend {
        Backend::Local => {
            tracing::info!("transcoding in-process");
            Ok(Box::new(LocalService::new()))
        }
        #[cfg(feature = "browser")]
        Backend::Browser => {
            tracing::info!("transcoding through {}", settings.host);
            Ok(Box::new(BrowserService::launch(
                &settings.host,
                settings.proxy.as_deref(),
            )?))
        }
        #[cfg(not(feature = "browser"))]
        Backend::Browser => Err(ServiceError::Unavailable(
            "BACKEND=browser needs squash built with `--features browser`".to_string(),
        )),
    }
}
