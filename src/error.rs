use thiserror::Error;

/// Failures raised while splitting content into segments.
///
/// These never reach callers of [`crate::classify::ContentClassifier::classify`];
/// they are logged and the content falls back to a single text segment.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("span {start}..{end} is not on a character boundary (len {len})")]
    Boundary { start: usize, end: usize, len: usize },

    #[error("pattern failed to compile: {0}")]
    Pattern(String),
}

/// Failures raised when a workflow payload is extracted or decoded.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no element with class '{0}' found in workflow markup")]
    MissingPayload(&'static str),

    #[error("workflow payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}
