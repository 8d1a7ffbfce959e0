//! Progress observers used by cube generation.
//!
//! [`ApiProgressCallbackObserver`] reports progress to the job API that
//! requested the cube, [`TerminalProgressCallbackObserver`] draws an
//! `indicatif` progress bar or plain progress lines. Both are usually wrapped in a
//! [`ThreadedProgressObserver`](xcube_core::progress::ThreadedProgressObserver).

use std::fmt;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use reqwest::blocking::Client;
use serde::Serialize;
use tracing::debug;
use xcube_core::progress::{require_state_stack, ProgressEvent, ProgressObserver, ProgressState};
use xcube_core::{XcubeError, XcubeResult};

use crate::config::CallbackConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BAR_WIDTH: usize = 40;
const BAR_TEMPLATE: &str = "{prefix}: {msg} [{bar:40}] {percent}% Completed ({elapsed})";

/// Snapshot of a state as sent to the job API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressCallbackState {
    pub label: String,
    pub total_work: f64,
    pub super_work: f64,
    pub super_work_ahead: f64,
    pub exc_info: Option<String>,
    pub progress: f64,
    pub elapsed: f64,
    pub errored: bool,
}

/// Body of a progress callback request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressCallback {
    pub sender: String,
    pub state: ProgressCallbackState,
}

impl ProgressCallback {
    /// Build the payload from the outermost state of `state_stack`.
    pub fn new(sender: &str, elapsed: f64, state_stack: &[ProgressState]) -> XcubeResult<Self> {
        let state = state_stack
            .first()
            .ok_or_else(|| XcubeError::invalid_argument("ProgressStates must be given"))?;
        Ok(Self {
            sender: sender.to_string(),
            state: ProgressCallbackState {
                label: state.label().to_string(),
                total_work: state.total_work(),
                super_work: state.super_work(),
                super_work_ahead: state.super_work_ahead(),
                exc_info: state.exc_info().map(str::to_string),
                progress: state.progress(),
                elapsed,
                errored: state.errored(),
            },
        })
    }
}

fn outermost_elapsed(state_stack: &[ProgressState]) -> f64 {
    state_stack
        .first()
        .map(|state| state.elapsed().as_secs_f64())
        .unwrap_or(0.0)
}

// ============================================================================
// Job API Observer
// ============================================================================

/// Sends every event as a `PUT` request to the job API.
pub struct ApiProgressCallbackObserver {
    client: Client,
    api_uri: String,
    access_token: String,
}

impl ApiProgressCallbackObserver {
    pub fn new(config: &CallbackConfig) -> XcubeResult<Self> {
        let (api_uri, access_token) = match (&config.api_uri, &config.access_token) {
            (Some(uri), Some(token)) if !uri.is_empty() && !token.is_empty() => {
                (uri.clone(), token.clone())
            }
            _ => {
                return Err(XcubeError::invalid_argument(
                    "Both, api_uri and access_token must be given.",
                ))
            }
        };

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| XcubeError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_uri,
            access_token,
        })
    }

    pub fn api_uri(&self) -> &str {
        &self.api_uri
    }

    /// Send one callback and return the payload that was sent.
    ///
    /// Must not be called from within an async runtime.
    pub fn callback(
        &self,
        sender: &str,
        elapsed: f64,
        state_stack: &[ProgressState],
    ) -> XcubeResult<ProgressCallback> {
        let payload = ProgressCallback::new(sender, elapsed, state_stack)?;

        let response = self
            .client
            .put(&self.api_uri)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .map_err(|e| XcubeError::Transport(format!("Progress callback failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(XcubeError::Transport(format!(
                "Progress callback to {} returned {}",
                self.api_uri, status
            )));
        }

        debug!(sender, progress = payload.state.progress, "Sent progress callback");
        Ok(payload)
    }

    fn send(&self, event: ProgressEvent, state_stack: &[ProgressState]) -> XcubeResult<()> {
        require_state_stack(state_stack)?;
        self.callback(event.as_str(), outermost_elapsed(state_stack), state_stack)
            .map(|_| ())
    }
}

impl ProgressObserver for ApiProgressCallbackObserver {
    fn on_begin(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        self.send(ProgressEvent::Begin, state_stack)
    }

    fn on_update(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        self.send(ProgressEvent::Update, state_stack)
    }

    fn on_end(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        self.send(ProgressEvent::End, state_stack)
    }
}

impl fmt::Debug for ApiProgressCallbackObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiProgressCallbackObserver")
            .field("api_uri", &self.api_uri)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Terminal Observer
// ============================================================================

/// Shows the outermost scope's progress, either as a live bar or as one
/// line per event.
pub struct TerminalProgressCallbackObserver {
    output: TerminalOutput,
}

enum TerminalOutput {
    Bar(ProgressBar),
    Lines(Mutex<Box<dyn Write + Send>>),
}

impl TerminalProgressCallbackObserver {
    /// Observer drawing a progress bar on stdout.
    pub fn new() -> Self {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#-");
        let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stdout());
        bar.set_style(style);
        Self {
            output: TerminalOutput::Bar(bar),
        }
    }

    /// Observer writing plain lines to `sink`.
    pub fn with_sink(sink: impl Write + Send + 'static) -> Self {
        Self {
            output: TerminalOutput::Lines(Mutex::new(Box::new(sink))),
        }
    }

    /// Render the line for `sender` and, if `print` is set, show it.
    pub fn callback(
        &self,
        sender: &str,
        elapsed: f64,
        state_stack: &[ProgressState],
        print: bool,
    ) -> XcubeResult<String> {
        let state = state_stack
            .first()
            .ok_or_else(|| XcubeError::invalid_argument("ProgressStates must be given"))?;
        let line = render_line(sender, state.label(), state.progress(), elapsed);
        if print {
            match &self.output {
                TerminalOutput::Bar(bar) => draw_bar(bar, sender, state, state_stack.len()),
                TerminalOutput::Lines(sink) => {
                    let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    writeln!(sink, "{}", line)?;
                    sink.flush()?;
                }
            }
        }
        Ok(line)
    }

    fn print(&self, event: ProgressEvent, state_stack: &[ProgressState]) -> XcubeResult<()> {
        require_state_stack(state_stack)?;
        self.callback(event.as_str(), outermost_elapsed(state_stack), state_stack, true)
            .map(|_| ())
    }
}

impl Default for TerminalProgressCallbackObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for TerminalProgressCallbackObserver {
    fn on_begin(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        self.print(ProgressEvent::Begin, state_stack)
    }

    fn on_update(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        self.print(ProgressEvent::Update, state_stack)
    }

    fn on_end(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        self.print(ProgressEvent::End, state_stack)
    }
}

impl fmt::Debug for TerminalProgressCallbackObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalProgressCallbackObserver")
            .finish_non_exhaustive()
    }
}

/// Move `bar` to the outermost `state`. A new outermost scope restarts it.
fn draw_bar(bar: &ProgressBar, sender: &str, state: &ProgressState, depth: usize) {
    if depth == 1 && sender == ProgressEvent::Begin.as_str() {
        bar.reset();
    }
    bar.set_prefix(sender.to_string());
    bar.set_message(state.label().to_string());
    bar.set_position((state.progress().clamp(0.0, 1.0) * 100.0).round() as u64);
    if depth == 1 && sender == ProgressEvent::End.as_str() {
        bar.finish();
    }
}

fn render_line(sender: &str, label: &str, progress: f64, elapsed: f64) -> String {
    let progress = progress.clamp(0.0, 1.0);
    let filled = (progress * BAR_WIDTH as f64).round() as usize;
    format!(
        "{}: {} [{}{}] {:.0}% Completed ({:.1}s)",
        sender,
        label,
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        progress * 100.0,
        elapsed
    )
}
