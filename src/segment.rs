use once_cell::sync::Lazy;
use regex::Regex;

/// Class name that marks an embedded workflow payload container.
pub const WORKFLOW_MARKER: &str = "comfyui-workflow-container";

static WORKFLOW_CLASS_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"(?i)class\s*=\s*["'][^"']*\bcomfyui-workflow-container\b"#).ok()
});

/// Whether `markup` carries the workflow marker inside a `class` attribute.
pub fn has_workflow_marker(markup: &str) -> bool {
    if !markup.contains(WORKFLOW_MARKER) {
        return false;
    }
    match WORKFLOW_CLASS_RE.as_ref() {
        Some(re) => re.is_match(markup),
        None => markup.contains(&format!("class=\"{}\"", WORKFLOW_MARKER)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlKind {
    Workflow,
    Generic,
}

/// One classified unit of message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text { text: String },
    Code { language: String, code: String },
    Html { markup: String, kind: HtmlKind },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text { text: text.into() }
    }

    pub fn code(language: impl Into<String>, code: impl Into<String>) -> Self {
        Segment::Code {
            language: language.into(),
            code: code.into(),
        }
    }

    /// Builds an HTML segment, tagging it as a workflow when the markup
    /// carries the marker class.
    pub fn html(markup: impl Into<String>) -> Self {
        let markup = markup.into();
        let kind = if has_workflow_marker(&markup) {
            HtmlKind::Workflow
        } else {
            HtmlKind::Generic
        };
        Segment::Html { markup, kind }
    }

    pub fn is_html(&self) -> bool {
        matches!(self, Segment::Html { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Segment::Text { .. } => "text",
            Segment::Code { .. } => "code",
            Segment::Html {
                kind: HtmlKind::Workflow,
                ..
            } => "workflow",
            Segment::Html {
                kind: HtmlKind::Generic,
                ..
            } => "html",
        }
    }
}
