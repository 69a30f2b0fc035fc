use std::future::Future;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::controls::{Control, ControlState};
use crate::error::WorkflowError;
use crate::markdown::unescape_html;

/// Class of the element holding the workflow JSON inside a workflow container.
pub const PAYLOAD_CLASS: &str = "comfyui-workflow-json";

static PAYLOAD_OPEN_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"(?is)<([a-z0-9]+)\b[^>]*\bclass\s*=\s*["'][^"']*\bcomfyui-workflow-json\b[^"']*["'][^>]*>"#).ok()
});

static TAG_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"<[^>]*>").ok());

/// Returns the text content of the payload element, entities decoded.
pub fn extract_payload_text(markup: &str) -> Result<String, WorkflowError> {
    let missing = || WorkflowError::MissingPayload(PAYLOAD_CLASS);
    let open_re = PAYLOAD_OPEN_RE.as_ref().ok_or_else(missing)?;
    let caps = open_re.captures(markup).ok_or_else(missing)?;
    let (whole, name) = caps.get(0).zip(caps.get(1)).ok_or_else(missing)?;

    let body = &markup[whole.end()..];
    let close = format!("</{}", name.as_str().to_ascii_lowercase());
    let end = body.to_ascii_lowercase().find(&close).unwrap_or(body.len());
    let inner = &body[..end];

    let text = match TAG_RE.as_ref() {
        Some(re) => re.replace_all(inner, ""),
        None => inner.into(),
    };
    Ok(unescape_html(text.trim()))
}

/// A decoded workflow graph.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowPayload {
    value: Value,
}

impl WorkflowPayload {
    pub fn parse(text: &str) -> Result<Self, WorkflowError> {
        Ok(WorkflowPayload {
            value: serde_json::from_str(text)?,
        })
    }

    pub fn from_markup(markup: &str) -> Result<Self, WorkflowError> {
        Self::parse(&extract_payload_text(markup)?)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(&self.value).unwrap_or_else(|_| self.value.to_string())
    }
}

async fn queue_payload<F, Fut>(payload: Option<&str>, queue: F) -> anyhow::Result<()>
where
    F: FnOnce(Value) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let text = payload.ok_or(WorkflowError::MissingPayload(PAYLOAD_CLASS))?;
    let workflow = WorkflowPayload::parse(text)?;
    queue(workflow.into_value()).await
}

/// Drives the "run" control: parses the payload, hands it to `queue` and
/// records the outcome on `control`. Failures only show up in the state.
pub async fn run_workflow<F, Fut>(control: &mut Control, payload: Option<&str>, queue: F) -> ControlState
where
    F: FnOnce(Value) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    if !control.press() {
        return control.state();
    }

    let result = queue_payload(payload, queue).await;
    match &result {
        Ok(()) => info!(component = "workflow", "Workflow queued"),
        Err(e) => warn!(component = "workflow", "Workflow run failed: {:#}", e),
    }
    control.complete(&result);
    control.state()
}
