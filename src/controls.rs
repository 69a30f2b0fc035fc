//! Label state for interactive controls inside rendered messages.
//!
//! The host owns one [`Control`] per bound button. A control runs
//! `Idle -> Busy -> {Success, Failure} -> Idle`; it is disabled everywhere
//! except `Idle`, so a second press while an action is in flight is refused.

use std::time::Duration;

use crate::config::ControlTimings;
use crate::error::WorkflowError;
use crate::workflow::WorkflowPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Idle,
    Busy,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLabels {
    pub idle: String,
    pub busy: String,
    pub success: String,
    pub failure: String,
}

impl ControlLabels {
    pub fn new(idle: &str, busy: &str, success: &str, failure: &str) -> Self {
        ControlLabels {
            idle: idle.to_string(),
            busy: busy.to_string(),
            success: success.to_string(),
            failure: failure.to_string(),
        }
    }

    /// Labels for a backend-provided button; `idle` is whatever text the
    /// button carried when it was rendered.
    pub fn action_button(idle: &str) -> Self {
        Self::new(idle, "Processing…", "Done", "Failed")
    }

    pub fn run_workflow() -> Self {
        Self::new("Run workflow", "Running…", "Run succeeded", "Run failed")
    }

    pub fn copy() -> Self {
        Self::new("Copy", "Copying…", "Copied", "Copy failed")
    }
}

#[derive(Debug, Clone)]
pub struct Control {
    state: ControlState,
    labels: ControlLabels,
    reset_after: Duration,
}

impl Control {
    pub fn new(labels: ControlLabels, reset_after: Duration) -> Self {
        Control {
            state: ControlState::Idle,
            labels,
            reset_after,
        }
    }

    pub fn action_button(idle: &str, timings: &ControlTimings) -> Self {
        Self::new(ControlLabels::action_button(idle), timings.action_reset())
    }

    pub fn run_workflow(timings: &ControlTimings) -> Self {
        Self::new(ControlLabels::run_workflow(), timings.action_reset())
    }

    pub fn copy(timings: &ControlTimings) -> Self {
        Self::new(ControlLabels::copy(), timings.copy_reset())
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ControlState::Idle
    }

    pub fn label(&self) -> &str {
        match self.state {
            ControlState::Idle => &self.labels.idle,
            ControlState::Busy => &self.labels.busy,
            ControlState::Success => &self.labels.success,
            ControlState::Failure => &self.labels.failure,
        }
    }

    /// Starts an action. Returns `false` when the control is not idle.
    pub fn press(&mut self) -> bool {
        if self.state != ControlState::Idle {
            return false;
        }
        self.state = ControlState::Busy;
        true
    }

    /// Records the outcome of the running action and returns how long the
    /// outcome label should stay up. `None` if nothing was running.
    pub fn finish(&mut self, ok: bool) -> Option<Duration> {
        if self.state != ControlState::Busy {
            return None;
        }
        self.state = if ok {
            ControlState::Success
        } else {
            ControlState::Failure
        };
        Some(self.reset_after)
    }

    pub fn complete<T, E>(&mut self, result: &Result<T, E>) -> Option<Duration> {
        self.finish(result.is_ok())
    }

    /// Returns to idle once the outcome has been shown.
    pub fn reset(&mut self) {
        if matches!(self.state, ControlState::Success | ControlState::Failure) {
            self.state = ControlState::Idle;
        }
    }

    /// Waits out the display delay, then resets.
    pub async fn settle(&mut self) {
        if matches!(self.state, ControlState::Success | ControlState::Failure) {
            tokio::time::sleep(self.reset_after).await;
            self.reset();
        }
    }
}

/// The "view JSON" toggle of a workflow segment.
#[derive(Debug, Clone, Default)]
pub struct JsonToggle {
    viewer_text: Option<String>,
}

impl JsonToggle {
    pub fn is_visible(&self) -> bool {
        self.viewer_text.is_some()
    }

    pub fn label(&self) -> &'static str {
        if self.is_visible() {
            "Hide JSON"
        } else {
            "View JSON"
        }
    }

    /// Text to place in the viewer region while it is shown.
    pub fn viewer_text(&self) -> Option<&str> {
        self.viewer_text.as_deref()
    }

    /// Shows the pretty-printed payload, or hides it if already shown. A
    /// payload that does not parse leaves the viewer hidden.
    pub fn toggle(&mut self, payload: Option<&str>) -> Result<bool, WorkflowError> {
        if self.viewer_text.take().is_some() {
            return Ok(false);
        }
        let text = payload.ok_or(WorkflowError::MissingPayload(crate::workflow::PAYLOAD_CLASS))?;
        let parsed = WorkflowPayload::parse(text)?;
        self.viewer_text = Some(parsed.pretty());
        Ok(true)
    }
}
