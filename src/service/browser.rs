//! Transcoding through a Squoosh web UI driven by headless Chrome.
//!
//! One browser is launched per run and shared by all jobs; each session owns
//! one tab:
//!
//! ```text
//! new_session    open tab
//! submit         navigate to HOST, hand the file to the drop zone
//! apply_options  pick the encoder, set effort/quality, resize
//! await_result   poll until the download link offers the expected kind
//!                and no encode runs (no timeout), then fetch the blob
//!                and read the saving label
//! close          close the tab
//! ```
//!
//! Selectors follow the Squoosh v1 markup. They are observed structure, not
//! an API, and are the first thing to check when a Squoosh release breaks
//! this service.

use super::saving::format_size;
use super::session::{ServiceError, Session, TranscodeResult, TranscodingService};
use super::OptionSet;
use crate::rules::ImageKind;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use std::ffi::{OsStr, OsString};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const FILE_INPUT: &str = "file-drop input[type=file]";
const TYPE_SELECT: &str = "file-drop > div > div:last-of-type > div:first-of-type > section select";
const EFFORT_OR_QUALITY_INPUT: &str =
    "file-drop > div > div:last-of-type > div:first-of-type form range-input";
const WEBP_EFFORT_INPUT: &str =
    "file-drop > div > div:last-of-type > div:first-of-type form > div > div:first-of-type range-input";
const WEBP_QUALITY_INPUT: &str =
    "file-drop > div > div:last-of-type > div:first-of-type form > div > div:nth-of-type(2) range-input";
const RESIZE_TOGGLE: &str =
    "file-drop > div > div:last-of-type > div:first-of-type > section input[type=checkbox]";
const RESIZE_WIDTH: &str = "file-drop input[name=width]";
const RESIZE_HEIGHT: &str = "file-drop input[name=height]";
const SAVING_SPAN: &str =
    "file-drop > div > div:last-of-type > div:last-of-type > div:first-of-type > span > span";
const DOWNLOAD_LINK: &str =
    "file-drop > div > div:last-of-type > div:last-of-type > div:last-of-type > a";
const LOADING_SPINNER: &str = "file-drop > div > div:last-of-type > div:last-of-type loading-spinner";

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn failed(e: impl Display) -> ServiceError {
    ServiceError::Failed(e.to_string())
}

/// One headless Chrome shared by every session.
pub struct BrowserService {
    browser: Browser,
    host: String,
}

impl BrowserService {
    /// Launch Chrome, routed through `proxy` when given.
    pub fn launch(host: &str, proxy: Option<&str>) -> Result<Self, ServiceError> {
        let proxy_arg = proxy.map(|p| OsString::from(format!("--proxy-server={p}")));
        let args: Vec<&OsStr> = proxy_arg.iter().map(OsString::as_os_str).collect();
        let browser = Browser::new(LaunchOptions {
            args,
            idle_browser_timeout: Duration::from_secs(24 * 60 * 60),
            ..Default::default()
        })
        .map_err(|e| ServiceError::Unavailable(format!("failed to launch Chrome: {e}")))?;
        Ok(Self {
            browser,
            host: host.to_string(),
        })
    }
}

impl TranscodingService for BrowserService {
    fn new_session(&self) -> Result<Box<dyn Session + '_>, ServiceError> {
        let tab = self.browser.new_tab().map_err(failed)?;
        Ok(Box::new(BrowserSession {
            tab,
            host: &self.host,
            source: None,
        }))
    }
}

struct BrowserSession<'a> {
    tab: Arc<Tab>,
    host: &'a str,
    source: Option<PathBuf>,
}

#[derive(Deserialize)]
struct DownloadInfo {
    filename: String,
    saving: String,
}

impl BrowserSession<'_> {
    fn eval(&self, js: &str) -> Result<serde_json::Value, ServiceError> {
        let remote = self.tab.evaluate(js, true).map_err(failed)?;
        Ok(remote.value.unwrap_or(serde_json::Value::Null))
    }

    /// Evaluate `js` until it returns `true`.
    fn wait_until(&self, js: &str) -> Result<(), ServiceError> {
        loop {
            if self.eval(js)?.as_bool() == Some(true) {
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Evaluate `js` and decode the JSON string it returns.
    fn eval_json<T: serde::de::DeserializeOwned>(&self, js: &str) -> Result<T, ServiceError> {
        let value = self.eval(js)?;
        let text = value
            .as_str()
            .ok_or_else(|| ServiceError::Protocol(format!("expected a JSON string, got {value}")))?;
        serde_json::from_str(text).map_err(|e| ServiceError::Protocol(e.to_string()))
    }

    fn set_control(&self, selector: &str, value: impl Display) -> Result<(), ServiceError> {
        if self.eval(&set_value_js(selector, value))?.as_bool() != Some(true) {
            tracing::warn!("control not found on {}: {selector}", self.host);
        }
        Ok(())
    }
}

impl Session for BrowserSession<'_> {
    fn submit(&mut self, path: &Path, _kind: ImageKind) -> Result<(), ServiceError> {
        let absolute = path.canonicalize()?;
        let file = absolute
            .to_str()
            .ok_or_else(|| ServiceError::Failed(format!("path is not UTF-8: {}", path.display())))?;

        self.tab
            .navigate_to(self.host)
            .map_err(failed)?
            .wait_until_navigated()
            .map_err(failed)?;
        self.tab
            .wait_for_element(FILE_INPUT)
            .map_err(failed)?
            .set_input_files(&[file])
            .map_err(failed)?;
        self.wait_until(&present_js(TYPE_SELECT))?;
        self.source = Some(absolute);
        Ok(())
    }

    fn apply_options(&mut self, options: &OptionSet) -> Result<(), ServiceError> {
        if self.source.is_none() {
            return Err(ServiceError::Protocol(
                "options applied before a file was submitted".to_string(),
            ));
        }
        if self.eval(&set_value_js(TYPE_SELECT, options.output.encoder()))?
            .as_bool()
            != Some(true)
        {
            return Err(ServiceError::Failed(format!(
                "encoder select not found on {}",
                self.host
            )));
        }

        match options.output {
            ImageKind::Png => {
                if let Some(effort) = options.effort {
                    self.set_control(EFFORT_OR_QUALITY_INPUT, effort)?;
                }
            }
            ImageKind::Jpeg => {
                if let Some(quality) = options.quality {
                    self.set_control(EFFORT_OR_QUALITY_INPUT, quality)?;
                }
            }
            ImageKind::Webp => {
                if let Some(effort) = options.effort {
                    self.set_control(WEBP_EFFORT_INPUT, effort)?;
                }
                if let Some(quality) = options.quality {
                    self.set_control(WEBP_QUALITY_INPUT, quality)?;
                }
            }
        }

        if let Some(resize) = options.resize {
            self.eval(&check_js(RESIZE_TOGGLE))?;
            self.set_control(RESIZE_WIDTH, resize.width)?;
            self.set_control(RESIZE_HEIGHT, resize.height)?;
        }
        Ok(())
    }

    fn await_result(&mut self, expected: ImageKind) -> Result<TranscodeResult, ServiceError> {
        let Some(source) = &self.source else {
            return Err(ServiceError::Protocol("nothing submitted".to_string()));
        };
        let original = std::fs::metadata(source)?.len();

        self.wait_until(&ready_js(expected))?;
        let info: DownloadInfo = self.eval_json(&download_info_js())?;
        let buffer: Vec<u8> = self.eval_json(&fetch_blob_js())?;
        tracing::debug!("{}: {} bytes from {}", info.filename, buffer.len(), self.host);

        Ok(TranscodeResult {
            buffer,
            suggested_filename: info.filename,
            original_size_label: format_size(original),
            saving_label: info.saving,
        })
    }

    fn close(&mut self) -> Result<(), ServiceError> {
        self.source = None;
        self.tab.close(true).map_err(failed)?;
        Ok(())
    }
}

// =============================================================================
// Page scripts
// =============================================================================

/// Quote `text` as a JavaScript string literal.
fn js_str(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}

fn present_js(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_str(selector))
}

fn set_value_js(selector: &str, value: impl Display) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) return false;
    el.value = {value};
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;
}})()"#,
        selector = js_str(selector),
        value = js_str(&value.to_string()),
    )
}

fn check_js(selector: &str) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) return false;
    if (!el.checked) el.click();
    return true;
}})()"#,
        selector = js_str(selector),
    )
}

/// True once the download link offers a file of `expected` kind and no
/// encode is running. A link left over from the previous encoder does not
/// count.
fn ready_js(expected: ImageKind) -> String {
    format!(
        r#"(() => {{
    const a = document.querySelector({link});
    return !!(a && a.href && a.download && a.download.toLowerCase().endsWith({ext}))
        && document.querySelector({spinner}) === null;
}})()"#,
        link = js_str(DOWNLOAD_LINK),
        ext = js_str(&format!(".{}", expected.extension())),
        spinner = js_str(LOADING_SPINNER),
    )
}

fn download_info_js() -> String {
    format!(
        r#"(() => {{
    const a = document.querySelector({link});
    const span = document.querySelector({saving});
    return JSON.stringify({{ filename: a.download, saving: span ? span.innerText : '' }});
}})()"#,
        link = js_str(DOWNLOAD_LINK),
        saving = js_str(SAVING_SPAN),
    )
}

fn fetch_blob_js() -> String {
    format!(
        r#"(async () => {{
    const a = document.querySelector({link});
    const response = await fetch(a.href);
    const bytes = new Uint8Array(await response.arrayBuffer());
    return JSON.stringify(Array.from(bytes));
}})()"#,
        link = js_str(DOWNLOAD_LINK),
    )
}
