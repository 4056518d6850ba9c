//! Flash Stage state machine.
//!
//! ```text
//! IDLE -> CONNECTING -> HALTED -> ERASING -> WRITING -> VERIFYING -> RESETTING -> DONE
//!                  \-> FAILED (from any state, terminal)
//! ```
//!
//! The adapter tool is opaque; progress is inferred from the lines it prints.
//! Transitions only move forward and stop at the first terminal state.

use crate::error::PipelineError;

/// Where a Flash Stage run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlashState {
    /// Not started.
    Idle,
    /// Adapter session being opened.
    Connecting,
    /// Core halted.
    Halted,
    /// Flash region being erased.
    Erasing,
    /// Image being written.
    Writing,
    /// Written image being verified.
    Verifying,
    /// Core being reset into the new image.
    Resetting,
    /// Session closed, new firmware running.
    Done,
    /// Stage failed. Terminal.
    Failed,
}

impl FlashState {
    /// `Done` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, FlashState::Done | FlashState::Failed)
    }

    /// Upper-case state name, as operators see it.
    pub fn name(self) -> &'static str {
        match self {
            FlashState::Idle => "IDLE",
            FlashState::Connecting => "CONNECTING",
            FlashState::Halted => "HALTED",
            FlashState::Erasing => "ERASING",
            FlashState::Writing => "WRITING",
            FlashState::Verifying => "VERIFYING",
            FlashState::Resetting => "RESETTING",
            FlashState::Done => "DONE",
            FlashState::Failed => "FAILED",
        }
    }

    /// Error reported when the tool dies in this state without saying why.
    fn failure(self, detail: String) -> PipelineError {
        match self {
            FlashState::Idle | FlashState::Connecting => PipelineError::AdapterUnavailable(detail),
            FlashState::Halted => PipelineError::HaltFailure(detail),
            FlashState::Erasing => PipelineError::EraseFailure(detail),
            FlashState::Writing | FlashState::Verifying => {
                PipelineError::WriteVerifyMismatch(detail)
            }
            FlashState::Resetting | FlashState::Done | FlashState::Failed => {
                PipelineError::ResetFailure(detail)
            }
        }
    }
}

impl core::fmt::Display for FlashState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// One classified line of adapter tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Core reported halted.
    Halted,
    /// Programming started (erase comes first).
    Erasing,
    /// Image bytes written.
    Written,
    /// Verification started.
    Verifying,
    /// Verification passed.
    Verified,
    /// Core reset issued.
    Resetting,
    /// Tool is closing the session.
    Shutdown,
    /// A failure the tool reported.
    Failure(PipelineError),
}

const ADAPTER_ERRORS: &[&str] = &[
    "unable to open",
    "no device found",
    "open failed",
    "init failed",
    "error connecting dp",
    "no j-link device found",
    "unable to find a matching cmsis-dap device",
];
/// OpenOCD could not read the image it was asked to program.
const IMAGE_ERRORS: &[&str] = &["couldn't open", "error opening image"];
const HALT_ERRORS: &[&str] = &[
    "timed out while waiting for target halted",
    "target not halted",
    "unable to reset target",
    "failed to halt",
];
const ERASE_ERRORS: &[&str] = &["erase error", "failed erasing", "failed to erase", "erase failed"];
// "checksum mismatch" alone is not here: verify_image prints it before
// falling back to a binary compare, which reports the real outcome.
const WRITE_ERRORS: &[&str] = &[
    "programming failed",
    "verify failed",
    "contents differ",
    "write failed",
    "failed to write",
];
const RESET_ERRORS: &[&str] = &["reset failed", "failed to reset"];

/// Classify one line of OpenOCD output. Unrecognised lines yield `None`.
pub fn classify(line: &str) -> Option<Event> {
    let lower = line.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    let detail = || line.trim().to_string();

    // Failures first: several error texts contain progress words.
    if has(IMAGE_ERRORS) {
        return Some(Event::Failure(PipelineError::ArtifactMissing(detail())));
    }
    if has(ADAPTER_ERRORS) {
        return Some(Event::Failure(PipelineError::AdapterUnavailable(detail())));
    }
    if has(HALT_ERRORS) {
        return Some(Event::Failure(PipelineError::HaltFailure(detail())));
    }
    if has(ERASE_ERRORS) {
        return Some(Event::Failure(PipelineError::EraseFailure(detail())));
    }
    if has(WRITE_ERRORS) {
        return Some(Event::Failure(PipelineError::WriteVerifyMismatch(detail())));
    }
    if has(RESET_ERRORS) {
        return Some(Event::Failure(PipelineError::ResetFailure(detail())));
    }

    if has(&["target halted", "halted due to"]) {
        Some(Event::Halted)
    } else if has(&["programming started"]) {
        Some(Event::Erasing)
    } else if has(&["programming finished"])
        || (lower.trim_start().starts_with("wrote ") && lower.contains(" bytes"))
    {
        Some(Event::Written)
    } else if has(&["verify started"]) {
        Some(Event::Verifying)
    } else if has(&["verified ok"]) {
        Some(Event::Verified)
    } else if has(&["resetting target"]) {
        Some(Event::Resetting)
    } else if has(&["shutdown command invoked"]) {
        Some(Event::Shutdown)
    } else {
        None
    }
}

/// Tracks one Flash Stage run. Not reusable: create one per session.
#[derive(Debug, Clone)]
pub struct FlashProgress {
    state: FlashState,
    history: Vec<FlashState>,
    failed_in: Option<FlashState>,
    error: Option<PipelineError>,
}

impl Default for FlashProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashProgress {
    /// New tracker in `Idle`.
    pub fn new() -> Self {
        Self {
            state: FlashState::Idle,
            history: vec![FlashState::Idle],
            failed_in: None,
            error: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[FlashState] {
        &self.history
    }

    /// State the run was in when it failed.
    pub fn failed_in(&self) -> Option<FlashState> {
        self.failed_in
    }

    /// The failure, once in `Failed`.
    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    /// `Idle` → `Connecting`. No effect in any other state.
    pub fn start(&mut self) {
        if self.state == FlashState::Idle {
            self.enter(FlashState::Connecting);
        }
    }

    /// Feed one line of tool output. Returns the event it produced, if any.
    pub fn observe(&mut self, line: &str) -> Option<Event> {
        if self.state.is_terminal() {
            return None;
        }
        let event = classify(line)?;
        self.apply(event.clone());
        Some(event)
    }

    /// Apply an already classified event.
    pub fn apply(&mut self, event: Event) {
        if self.state.is_terminal() {
            return;
        }
        let next = match event {
            Event::Halted => FlashState::Halted,
            Event::Erasing => FlashState::Erasing,
            Event::Written => FlashState::Writing,
            Event::Verifying | Event::Verified => FlashState::Verifying,
            Event::Resetting => FlashState::Resetting,
            // Only a reset session may close cleanly; anything earlier is
            // left for `finish` to judge from the exit status.
            Event::Shutdown if self.state == FlashState::Resetting => FlashState::Done,
            Event::Shutdown => return,
            Event::Failure(error) => {
                self.fail(error);
                return;
            }
        };
        if next > self.state {
            self.enter(next);
        }
    }

    /// Resolve the run once the tool has exited.
    ///
    /// `Done` needs a clean exit after the run reached `Resetting`. Any other
    /// outcome with no classified error is attributed to the state the run
    /// was in, clean exit or not.
    ///
    /// # Errors
    ///
    /// The recorded or inferred failure.
    pub fn finish(&mut self, exited_cleanly: bool) -> Result<FlashState, PipelineError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if exited_cleanly && self.state >= FlashState::Resetting {
            if self.state != FlashState::Done {
                self.enter(FlashState::Done);
            }
            return Ok(FlashState::Done);
        }
        let detail = if exited_cleanly {
            format!("adapter tool exited while {} without resetting the target", self.state)
        } else {
            format!("adapter tool failed while {}", self.state)
        };
        let error = self.state.failure(detail);
        self.fail(error.clone());
        Err(error)
    }

    fn fail(&mut self, error: PipelineError) {
        self.failed_in = Some(self.state);
        self.error = Some(error);
        self.enter(FlashState::Failed);
    }

    fn enter(&mut self, next: FlashState) {
        tracing::debug!(from = %self.state, to = %next, "flash state");
        self.state = next;
        self.history.push(next);
    }
}
