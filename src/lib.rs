//! Message rendering for the ComfyUI assistant panel.
//!
//! Assistant replies arrive as a mix of HTML, Markdown-ish text and fenced
//! code. [`classify::ContentClassifier`] splits them into segments and
//! [`render::Renderer`] turns the segments into markup plus a list of
//! post-insert bindings for the host to wire up.

pub mod classify;
pub mod client;
pub mod config;
pub mod controls;
pub mod error;
pub mod markdown;
pub mod message;
pub mod render;
pub mod segment;
pub mod workflow;

pub use classify::ContentClassifier;
pub use message::{ChatMessage, MessageContent, Role};
pub use render::{Binding, BindingAction, RenderedMessage, Renderer};
pub use segment::{HtmlKind, Segment};

/// Classifies and renders one message with the default thresholds.
pub fn classify_and_render(
    content: &MessageContent,
    role: Role,
    prompt_name: Option<&str>,
    images: &[String],
) -> RenderedMessage {
    Renderer::default().classify_and_render(content, role, prompt_name, images)
}
