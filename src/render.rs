//! Segment to markup rendering.
//!
//! Rendering never touches a DOM. Anything that needs wiring after the host
//! inserts the markup is described by a [`Binding`]: a selector relative to
//! the element the message was inserted into, plus the behaviour to attach.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::classify::ContentClassifier;
use crate::config::Config;
use crate::markdown::{code_block, escape_attr, escape_html, format_text};
use crate::message::{ChatMessage, MessageContent, Role};
use crate::segment::{HtmlKind, Segment};
use crate::workflow::extract_payload_text;

static ONCLICK_BUTTON_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?is)<button\b[^>]*\bonclick\s*=").ok());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BindingAction {
    /// Copy `code` to the clipboard when the control is pressed.
    CopyCode { code: String },
    /// Wrap each matched button's inline handler with the busy/done/failed
    /// label sequence; the original handler still runs.
    InterceptButtons,
    /// POST the payload to `endpoint`.
    RunWorkflow {
        endpoint: String,
        payload: Option<String>,
    },
    /// Show or hide the pretty-printed payload in `viewer`.
    ToggleJson {
        viewer: String,
        payload: Option<String>,
    },
    /// Hand `url` to the host's image viewer.
    OpenImage { url: String },
}

/// A behaviour to attach after insertion.
///
/// `selector` is relative to the message's root element. Segment and
/// code-block ids restart at zero for every message, so hosts must query
/// inside that root (or qualify the selector with [`Binding::within`])
/// rather than across the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub selector: String,
    pub action: BindingAction,
}

impl Binding {
    /// Qualifies the selector with the host's selector for the message root.
    pub fn within(&self, root: &str) -> Binding {
        Binding {
            selector: format!("{} {}", root, self.selector),
            action: self.action.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub markup: String,
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Clone)]
pub struct Renderer {
    classifier: ContentClassifier,
    queue_endpoint: String,
}

impl RenderedMessage {
    /// Bindings qualified with `root`, one per binding.
    pub fn bindings_within(&self, root: &str) -> Vec<Binding> {
        self.bindings.iter().map(|b| b.within(root)).collect()
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Renderer {
    pub fn new(classifier: ContentClassifier, queue_endpoint: impl Into<String>) -> Self {
        Renderer {
            classifier,
            queue_endpoint: queue_endpoint.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ContentClassifier::new(config.classifier.clone()),
            format!("{}/queue", config.comfy.host.trim_end_matches('/')),
        )
    }

    pub fn classifier(&self) -> &ContentClassifier {
        &self.classifier
    }

    /// Renders a message by role. User content is always escaped; assistant
    /// content is classified first.
    pub fn classify_and_render(
        &self,
        content: &MessageContent,
        role: Role,
        prompt_name: Option<&str>,
        images: &[String],
    ) -> RenderedMessage {
        match role {
            Role::User => self.render_user(content.as_str(), prompt_name, images),
            Role::Assistant => self.render_assistant(content),
        }
    }

    pub fn render_message(&self, message: &ChatMessage) -> RenderedMessage {
        self.classify_and_render(
            &message.content,
            message.role,
            message.prompt_name.as_deref(),
            &message.images,
        )
    }

    pub fn render_assistant(&self, content: &MessageContent) -> RenderedMessage {
        let started = Instant::now();
        let segments = self.classifier.classify(content);
        let rendered = self.render_segments(&segments);
        debug!(
            component = "renderer",
            operation = "render_assistant",
            segments = segments.len(),
            bindings = rendered.bindings.len(),
            duration_us = started.elapsed().as_micros() as u64,
            "Assistant message rendered"
        );
        rendered
    }

    pub fn render_segments(&self, segments: &[Segment]) -> RenderedMessage {
        let mut rendered = RenderedMessage::default();
        for (index, segment) in segments.iter().enumerate() {
            trace!(
                component = "renderer",
                operation = "render_segment",
                index,
                kind = segment.kind_name(),
                "Rendering segment"
            );
            match segment {
                Segment::Text { text } => self.render_text(index, text, &mut rendered),
                Segment::Code { language, code } => {
                    self.render_code(index, language, code, &mut rendered)
                }
                Segment::Html {
                    markup,
                    kind: HtmlKind::Generic,
                } => self.render_generic_html(index, markup, &mut rendered),
                Segment::Html {
                    markup,
                    kind: HtmlKind::Workflow,
                } => self.render_workflow(index, markup, &mut rendered),
            }
        }
        rendered
    }

    fn render_text(&self, index: usize, text: &str, out: &mut RenderedMessage) {
        let prefix = index.to_string();
        let formatted = format_text(text, &prefix);
        out.markup.push_str(&format!(
            r#"<div class="text-content" data-segment="{}">{}</div>"#,
            index, formatted.html
        ));
        for (j, code) in formatted.code_blocks.into_iter().enumerate() {
            out.bindings.push(copy_binding(&format!("{}-{}", prefix, j), code));
        }
    }

    fn render_code(&self, index: usize, language: &str, code: &str, out: &mut RenderedMessage) {
        let block_id = index.to_string();
        out.markup.push_str(&format!(
            r#"<div class="code-segment" data-segment="{}">{}</div>"#,
            index,
            code_block(language, code, &block_id)
        ));
        out.bindings.push(copy_binding(&block_id, code.to_string()));
    }

    fn render_generic_html(&self, index: usize, markup: &str, out: &mut RenderedMessage) {
        out.markup.push_str(&format!(
            r#"<div class="ai-safe-html" data-segment="{}">{}</div>"#,
            index, markup
        ));
        let has_handlers = ONCLICK_BUTTON_RE
            .as_ref()
            .map_or(false, |re| re.is_match(markup));
        if has_handlers {
            out.bindings.push(Binding {
                selector: format!(r#"[data-segment="{}"] button[onclick]"#, index),
                action: BindingAction::InterceptButtons,
            });
        }
    }

    fn render_workflow(&self, index: usize, markup: &str, out: &mut RenderedMessage) {
        out.markup.push_str(&format!(
            r#"<div class="ai-workflow-wrapper" data-segment="{}">{}</div>"#,
            index, markup
        ));

        let payload = match extract_payload_text(markup) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(component = "renderer", index, "Workflow segment has no payload: {}", e);
                None
            }
        };
        let scope = format!(r#"[data-segment="{}"] .comfyui-workflow-container"#, index);
        out.bindings.push(Binding {
            selector: format!("{} .run-workflow-btn", scope),
            action: BindingAction::RunWorkflow {
                endpoint: self.queue_endpoint.clone(),
                payload: payload.clone(),
            },
        });
        out.bindings.push(Binding {
            selector: format!("{} .view-json-btn", scope),
            action: BindingAction::ToggleJson {
                viewer: format!("{} .json-viewer", scope),
                payload,
            },
        });
    }

    /// User text is shown as typed: escaped, no Markdown.
    pub fn render_user(&self, content: &str, prompt_name: Option<&str>, images: &[String]) -> RenderedMessage {
        let mut rendered = RenderedMessage::default();

        if let Some(name) = prompt_name.filter(|n| !n.is_empty()) {
            rendered.markup.push_str(&format!(
                r#"<div class="prompt-name">#{}</div>"#,
                escape_html(name)
            ));
        }

        rendered.markup.push_str(r#"<div class="user-message-content">"#);
        rendered.markup.push_str(&escape_html(content));

        if !images.is_empty() {
            rendered.markup.push_str(r#"<div class="message-images">"#);
            for (i, url) in images.iter().enumerate() {
                rendered.markup.push_str(&format!(
                    r#"<img src="{}" alt="uploaded image" data-image-index="{}">"#,
                    escape_attr(url),
                    i
                ));
                rendered.bindings.push(Binding {
                    selector: format!(r#".message-images img[data-image-index="{}"]"#, i),
                    action: BindingAction::OpenImage { url: url.clone() },
                });
            }
            rendered.markup.push_str("</div>");
        }

        rendered.markup.push_str("</div>");
        rendered
    }
}

fn copy_binding(block_id: &str, code: String) -> Binding {
    Binding {
        selector: format!(
            r#".code-block[data-code-block="{}"] .copy-button"#,
            escape_attr(block_id)
        ),
        action: BindingAction::CopyCode { code },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(text: &str) -> RenderedMessage {
        Renderer::default().render_assistant(&MessageContent::from(text))
    }

    #[test]
    fn test_text_code_text() {
        let rendered = render("a\n```js\nconsole.log(\"<1>\")\n```\nb");
        assert_eq!(
            rendered.markup,
            concat!(
                r#"<div class="text-content" data-segment="0"><p>a</p></div>"#,
                r#"<div class="code-segment" data-segment="1">"#,
                r#"<div class="code-block" data-code-block="1">"#,
                r#"<div class="code-header"><span class="code-lang">js</span>"#,
                r#"<button class="copy-button" type="button">Copy</button></div>"#,
                r#"<pre><code class="language-js">console.log("&lt;1&gt;")</code></pre></div></div>"#,
                r#"<div class="text-content" data-segment="2"><p>b</p></div>"#
            )
        );
        assert_eq!(
            rendered.bindings,
            vec![Binding {
                selector: r#".code-block[data-code-block="1"] .copy-button"#.to_string(),
                action: BindingAction::CopyCode {
                    code: "console.log(\"<1>\")".to_string()
                },
            }]
        );
    }

    #[test]
    fn test_generic_html_passes_through_and_intercepts_buttons() {
        let rendered = render(r#"Done. <button onclick="removeWatermark()">Remove watermark</button>"#);
        assert!(rendered
            .markup
            .contains(r#"<div class="ai-safe-html" data-segment="1"><button onclick="removeWatermark()">Remove watermark</button></div>"#));
        assert_eq!(
            rendered.bindings,
            vec![Binding {
                selector: r#"[data-segment="1"] button[onclick]"#.to_string(),
                action: BindingAction::InterceptButtons,
            }]
        );
    }

    #[test]
    fn test_plain_html_has_no_bindings() {
        let rendered = render("<table><tr><td>1</td></tr></table>");
        assert!(rendered.bindings.is_empty());
        assert!(rendered.markup.starts_with(r#"<div class="ai-safe-html" data-segment="0"><table>"#));
    }

    #[test]
    fn test_workflow_bindings() {
        let markup = concat!(
            r#"<div class="comfyui-workflow-container">"#,
            r#"<pre class="comfyui-workflow-json">{"1": {}}</pre>"#,
            r#"<button class="run-workflow-btn">Run workflow</button>"#,
            r#"<button class="view-json-btn">View JSON</button>"#,
            r#"<pre class="json-viewer hidden"></pre></div>"#
        );
        let rendered = render(markup);
        assert_eq!(
            rendered.markup,
            format!(r#"<div class="ai-workflow-wrapper" data-segment="0">{}</div>"#, markup)
        );
        assert_eq!(rendered.bindings.len(), 2);
        assert_eq!(
            rendered.bindings[0].action,
            BindingAction::RunWorkflow {
                endpoint: "http://127.0.0.1:8188/queue".to_string(),
                payload: Some(r#"{"1": {}}"#.to_string()),
            }
        );
        assert_eq!(
            rendered.bindings[1].selector,
            r#"[data-segment="0"] .comfyui-workflow-container .view-json-btn"#
        );
    }

    #[test]
    fn test_workflow_without_payload_still_binds() {
        let rendered = render(r#"<div class="comfyui-workflow-container">empty</div>"#);
        assert!(matches!(
            &rendered.bindings[0].action,
            BindingAction::RunWorkflow { payload: None, .. }
        ));
    }

    #[test]
    fn test_text_fence_fallback_gets_copy_binding() {
        let renderer = Renderer::default();
        let rendered = renderer.render_segments(&[Segment::text("see\n```sh\nls -la\n```")]);
        assert_eq!(
            rendered.bindings,
            vec![copy_binding("0-0", "ls -la".to_string())]
        );
        assert!(rendered.markup.contains(r#"data-code-block="0-0""#));
    }

    #[test]
    fn test_user_message_is_escaped() {
        let renderer = Renderer::default();
        let rendered = renderer.classify_and_render(
            &MessageContent::from("# not a heading <b>raw</b>"),
            Role::User,
            Some("<upscale>"),
            &["/view?filename=a\".png".to_string()],
        );
        assert_eq!(
            rendered.markup,
            concat!(
                r#"<div class="prompt-name">#&lt;upscale&gt;</div>"#,
                r#"<div class="user-message-content"># not a heading &lt;b&gt;raw&lt;/b&gt;"#,
                r#"<div class="message-images"><img src="/view?filename=a&quot;.png" alt="uploaded image" data-image-index="0"></div>"#,
                r#"</div>"#
            )
        );
        assert_eq!(
            rendered.bindings[0].action,
            BindingAction::OpenImage {
                url: "/view?filename=a\".png".to_string()
            }
        );
    }

    #[test]
    fn test_render_message_from_backend_json() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"role":"assistant","content":{"content":"<p>ready</p>","content_format":"html"}}"#,
        )
        .unwrap();
        let rendered = Renderer::default().render_message(&msg);
        assert_eq!(
            rendered.markup,
            r#"<div class="ai-safe-html" data-segment="0"><p>ready</p></div>"#
        );
    }

    #[test]
    fn test_bindings_can_be_scoped_per_message() {
        let renderer = Renderer::default();
        let first = renderer.render_assistant(&MessageContent::from("```sh\nls\n```"));
        let second = renderer.render_assistant(&MessageContent::from("```sh\npwd\n```"));
        assert_eq!(first.bindings[0].selector, second.bindings[0].selector);

        let first = first.bindings_within(r#"[data-message-id="1"]"#);
        let second = second.bindings_within(r#"[data-message-id="2"]"#);
        assert_eq!(
            first[0].selector,
            r#"[data-message-id="1"] .code-block[data-code-block="0"] .copy-button"#
        );
        assert_ne!(first[0].selector, second[0].selector);
        assert_eq!(second[0].action, BindingAction::CopyCode { code: "pwd".to_string() });

        let user = renderer.render_user("hi", None, &["/a.png".to_string()]);
        assert_eq!(
            user.bindings_within("#m7")[0].selector,
            r#"#m7 .message-images img[data-image-index="0"]"#
        );
    }

    #[test]
    fn test_bindings_serialize_with_kind_tag() {
        let binding = copy_binding("2", "x".to_string());
        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["action"]["kind"], "copy_code");
        assert_eq!(json["action"]["code"], "x");
    }
}
