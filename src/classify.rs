//! Splits message content into ordered text, code and HTML segments.
//!
//! The rules run in a fixed order: tagged HTML, workflow marker, document
//! prefix, fenced code, then per-chunk HTML detection. Every chunk that is
//! not a fence goes through the per-chunk HTML heuristics.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::config::ClassifierLimits;
use crate::error::ClassifyError;
use crate::message::MessageContent;
use crate::segment::{has_workflow_marker, HtmlKind, Segment};

const FENCE: &str = "```";
const DEFAULT_LANGUAGE: &str = "plaintext";

struct Patterns {
    tag_open: Regex,
    open_tag: Regex,
    document_start: Regex,
    head_open: Regex,
    head_close: Regex,
    body_open: Regex,
    body_close: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Patterns {
            tag_open: Regex::new(r"<[A-Za-z0-9_]")?,
            open_tag: Regex::new(r"<([A-Za-z0-9_]+)[^>]*>")?,
            document_start: Regex::new(r"(?i)^\s*<!doctype\s+html")?,
            head_open: Regex::new(r"(?i)<head[\s>]")?,
            head_close: Regex::new(r"(?i)</head>")?,
            body_open: Regex::new(r"(?i)<body[\s>]")?,
            body_close: Regex::new(r"(?i)</body>")?,
        })
    }
}

static PATTERNS: Lazy<Result<Patterns, regex::Error>> = Lazy::new(Patterns::compile);

fn patterns() -> Result<&'static Patterns, ClassifyError> {
    PATTERNS
        .as_ref()
        .map_err(|e| ClassifyError::Pattern(e.to_string()))
}

fn slice(text: &str, start: usize, end: usize) -> Result<&str, ClassifyError> {
    text.get(start..end).ok_or(ClassifyError::Boundary {
        start,
        end,
        len: text.len(),
    })
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn ends_with_ignore_case(text: &str, suffix: &str) -> bool {
    text.len() >= suffix.len()
        && text.as_bytes()[text.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
}

/// Byte offsets of one fenced block within its source.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fence<'a> {
    start: usize,
    body_start: usize,
    body_end: usize,
    end: usize,
    language: &'a str,
}

fn is_language_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '+' | '#' | '.')
}

/// Finds the next fence at or after `from`. An unterminated fence runs to
/// the end of `text`.
fn next_fence(text: &str, from: usize) -> Option<Fence<'_>> {
    let mut search = from;
    loop {
        let start = search + text.get(search..)?.find(FENCE)?;
        if let Some(fence) = fence_at(text, start) {
            return Some(fence);
        }
        search = start + 1;
    }
}

/// Reads a fence opening at `start`. The optional language tag must be
/// followed by a line break, so inline triple backticks stay text.
fn fence_at(text: &str, start: usize) -> Option<Fence<'_>> {
    let mut pos = start + FENCE.len();

    let language_len: usize = text[pos..]
        .chars()
        .take_while(|c| is_language_char(*c))
        .map(char::len_utf8)
        .sum();
    let language = &text[pos..pos + language_len];
    pos += language_len;

    let rest = &text[pos..];
    let after_blank = rest.trim_start_matches(|c: char| c == ' ' || c == '\t');
    let body = after_blank
        .strip_prefix("\r\n")
        .or_else(|| after_blank.strip_prefix('\n'))?;
    pos += rest.len() - body.len();

    let body_start = pos;
    let (body_end, end) = match text[body_start..].find(FENCE) {
        Some(i) => (body_start + i, body_start + i + FENCE.len()),
        None => (text.len(), text.len()),
    };

    Some(Fence {
        start,
        body_start,
        body_end,
        end,
        language,
    })
}

/// Position of the first `pattern` in `hay` that is a whole tag name, i.e.
/// not followed by another name character.
fn find_tag_name(hay: &str, pattern: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(i) = hay[from..].find(pattern) {
        let at = from + i;
        let after = at + pattern.len();
        match hay[after..].chars().next() {
            Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '-' => from = after,
            _ => return Some(at),
        }
    }
    None
}

/// Walks `lower` from `from` looking for the close tag that balances an
/// already-consumed `<name ...>`. Returns the byte offset just past it.
fn find_matching_close(lower: &str, from: usize, name: &str) -> Option<usize> {
    let open_pattern = format!("<{}", name);
    let close_pattern = format!("</{}", name);
    let mut depth = 1usize;
    let mut pos = from;

    while pos < lower.len() {
        let rest = &lower[pos..];
        let close_at = find_tag_name(rest, &close_pattern)?;
        if let Some(open_at) = find_tag_name(rest, &open_pattern) {
            if open_at < close_at {
                depth += 1;
                pos += open_at + open_pattern.len();
                continue;
            }
        }

        let after_name = pos + close_at + close_pattern.len();
        let tail = &lower[after_name..];
        let trimmed = tail.trim_start();
        if !trimmed.starts_with('>') {
            pos = after_name;
            continue;
        }
        let close_end = after_name + (tail.len() - trimmed.len()) + 1;
        depth -= 1;
        if depth == 0 {
            return Some(close_end);
        }
        pos = close_end;
    }
    None
}

/// Splits message content into [`Segment`]s. Holds only its thresholds, so
/// one instance can be shared freely.
#[derive(Debug, Clone, Default)]
pub struct ContentClassifier {
    limits: ClassifierLimits,
}

impl ContentClassifier {
    pub fn new(limits: ClassifierLimits) -> Self {
        ContentClassifier { limits }
    }

    pub fn limits(&self) -> &ClassifierLimits {
        &self.limits
    }

    /// Classifies content into an ordered segment list. Never fails: any
    /// internal error yields the whole content as one text segment.
    pub fn classify(&self, content: &MessageContent) -> Vec<Segment> {
        if content.is_tagged_html() {
            trace!(
                component = "classifier",
                operation = "tagged_html",
                "Content already tagged as HTML"
            );
            return vec![Segment::html(content.as_str())];
        }
        self.classify_str(content.as_str())
    }

    pub fn classify_str(&self, text: &str) -> Vec<Segment> {
        match self.try_classify(text) {
            Ok(segments) => segments,
            Err(e) => {
                warn!(
                    component = "classifier",
                    content_len = text.len(),
                    "Classification failed, falling back to text: {}",
                    e
                );
                vec![Segment::text(text)]
            }
        }
    }

    fn try_classify(&self, text: &str) -> Result<Vec<Segment>, ClassifyError> {
        let p = patterns()?;

        if has_workflow_marker(text) {
            debug!(
                component = "classifier",
                operation = "workflow",
                content_len = text.len(),
                "Workflow marker found"
            );
            return Ok(vec![Segment::Html {
                markup: text.to_string(),
                kind: HtmlKind::Workflow,
            }]);
        }

        if p.document_start.is_match(text) || starts_with_ignore_case(text.trim_start(), "<html") {
            debug!(
                component = "classifier",
                operation = "document",
                content_len = text.len(),
                "Content is a full HTML document"
            );
            return Ok(vec![Segment::html(text)]);
        }

        let mut segments = Vec::new();
        let mut last = 0;
        while let Some(fence) = next_fence(text, last) {
            let before = slice(text, last, fence.start)?.trim();
            if !before.is_empty() {
                self.classify_chunk(before, &mut segments)?;
            }

            let code = slice(text, fence.body_start, fence.body_end)?.trim();
            if !code.is_empty() {
                let language = if fence.language.is_empty() {
                    DEFAULT_LANGUAGE
                } else {
                    fence.language
                };
                segments.push(Segment::code(language, code));
            }

            last = fence.end;
            if last >= text.len() {
                break;
            }
        }

        let rest = slice(text, last, text.len())?.trim();
        if !rest.is_empty() {
            self.classify_chunk(rest, &mut segments)?;
        }

        if segments.is_empty() {
            segments.push(Segment::text(text));
        }
        Ok(segments)
    }

    /// Classifies a trimmed, fence-free chunk.
    fn classify_chunk(&self, chunk: &str, out: &mut Vec<Segment>) -> Result<(), ClassifyError> {
        let p = patterns()?;

        if chunk.chars().count() > self.limits.large_input_threshold {
            debug!(
                component = "classifier",
                operation = "large_chunk",
                chunk_len = chunk.len(),
                threshold = self.limits.large_input_threshold,
                "Skipping fine-grained HTML scan"
            );
            if p.tag_open.is_match(chunk) {
                out.push(Segment::html(chunk));
            } else {
                out.push(Segment::text(chunk));
            }
            return Ok(());
        }

        if self.is_complete_html(chunk)? {
            out.push(Segment::html(chunk));
            return Ok(());
        }

        self.extract_html_blocks(chunk, out)
    }

    fn is_complete_html(&self, chunk: &str) -> Result<bool, ClassifyError> {
        let p = patterns()?;

        if p.document_start.is_match(chunk)
            || (starts_with_ignore_case(chunk, "<html") && ends_with_ignore_case(chunk, "</html>"))
        {
            return Ok(true);
        }

        if p.head_open.is_match(chunk)
            && p.head_close.is_match(chunk)
            && p.body_open.is_match(chunk)
            && p.body_close.is_match(chunk)
        {
            return Ok(true);
        }

        let char_len = chunk.chars().count();
        let tag_count = p
            .tag_open
            .find_iter(chunk)
            .take(self.limits.min_tag_count)
            .count();
        if tag_count >= self.limits.min_tag_count && char_len > self.limits.min_tagged_length {
            return Ok(true);
        }

        Ok(starts_with_ignore_case(chunk, "<div")
            && ends_with_ignore_case(chunk, "</div>")
            && char_len > self.limits.min_div_wrapper_length)
    }

    /// Pulls balanced `<tag>...</tag>` blocks out of a chunk, keeping the
    /// text between them.
    fn extract_html_blocks(&self, chunk: &str, out: &mut Vec<Segment>) -> Result<(), ClassifyError> {
        let p = patterns()?;
        let lower = chunk.to_ascii_lowercase();
        let mut last = 0;
        let mut cursor = 0;
        let mut matches = 0;

        while matches < self.limits.max_html_blocks && cursor < chunk.len() {
            let Some(caps) = p.open_tag.captures(slice(chunk, cursor, chunk.len())?) else {
                break;
            };
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            let open_start = cursor + whole.start();
            let open_end = cursor + whole.end();

            let name = name.as_str().to_ascii_lowercase();
            match find_matching_close(&lower, open_end, &name) {
                Some(close_end) => {
                    matches += 1;
                    let before = slice(chunk, last, open_start)?.trim();
                    if !before.is_empty() {
                        out.push(Segment::text(before));
                    }
                    out.push(Segment::html(slice(chunk, open_start, close_end)?));
                    last = close_end;
                    cursor = close_end;
                }
                None => cursor = open_end,
            }
        }

        if matches == self.limits.max_html_blocks {
            debug!(
                component = "classifier",
                operation = "block_limit",
                limit = self.limits.max_html_blocks,
                "HTML block limit reached"
            );
        }

        let rest = slice(chunk, last, chunk.len())?.trim();
        if !rest.is_empty() {
            out.push(Segment::text(rest));
        }
        Ok(())
    }
}
