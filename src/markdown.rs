//! Markdown-lite formatting for assistant text.
//!
//! Only a handful of constructs are recognised: fenced code, inline code,
//! ATX headings, `N.` / `-` list items, paragraphs and line breaks. The text
//! is escaped before any markup is layered on, and code regions are parked
//! behind placeholders so later steps never touch them.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const STASH_OPEN: char = '\u{E000}';
const STASH_CLOSE: char = '\u{E001}';

struct Patterns {
    fence: Regex,
    inline_code: Regex,
    heading: Regex,
    list_item: Regex,
    block_placeholder: Regex,
    placeholder: Regex,
}

static PATTERNS: Lazy<Option<Patterns>> = Lazy::new(|| {
    Some(Patterns {
        fence: Regex::new(r"(?s)```([\w+#.-]*)[ \t]*\n(.*?)```").ok()?,
        inline_code: Regex::new(r"`([^`\n]+)`").ok()?,
        heading: Regex::new(r"^(#{1,6})\s+(.+)$").ok()?,
        list_item: Regex::new(r"^(\d+\.|-)\s+(.+)$").ok()?,
        block_placeholder: Regex::new(r"^\x{E000}b\d+\x{E001}$").ok()?,
        placeholder: Regex::new(r"\x{E000}([bi])(\d+)\x{E001}").ok()?,
    })
});

/// Escapes `&`, `<` and `>`.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes text for use inside a double- or single-quoted attribute.
pub fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decodes the common named entities and numeric references in one pass.
/// Unknown entities are left as-is.
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|semi| *semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Markup for a code block whose body is already escaped.
fn code_block_markup(label: &str, language: Option<&str>, escaped_body: &str, block_id: &str) -> String {
    let lang_class = language
        .filter(|l| !l.is_empty())
        .map(|l| format!(r#" class="language-{}""#, escape_attr(l)))
        .unwrap_or_default();
    format!(
        concat!(
            r#"<div class="code-block" data-code-block="{id}">"#,
            r#"<div class="code-header"><span class="code-lang">{label}</span>"#,
            r#"<button class="copy-button" type="button">Copy</button></div>"#,
            r#"<pre><code{lang}>{body}</code></pre></div>"#
        ),
        id = escape_attr(block_id),
        label = escape_html(label),
        lang = lang_class,
        body = escaped_body,
    )
}

/// Renders a code block with a language header and copy control.
pub fn code_block(language: &str, code: &str, block_id: &str) -> String {
    code_block_markup(language, Some(language), &escape_html(code), block_id)
}

fn flush(paragraph: &mut Vec<&str>, out: &mut Vec<String>) {
    if !paragraph.is_empty() {
        out.push(format!("<p>{}</p>", paragraph.join("<br>")));
        paragraph.clear();
    }
}

/// Result of formatting a text segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Formatted {
    pub html: String,
    /// Raw code of each fenced block found in the text, in order. Block `j`
    /// carries `data-code-block="{prefix}-{j}"`.
    pub code_blocks: Vec<String>,
}

/// Formats assistant text. `id_prefix` scopes the ids of any fenced code
/// blocks found along the way.
pub fn format_text(text: &str, id_prefix: &str) -> Formatted {
    let Some(p) = PATTERNS.as_ref() else {
        tracing::warn!(component = "markdown", "Patterns unavailable, emitting escaped text");
        return Formatted {
            html: escape_html(text).replace('\n', "<br>"),
            code_blocks: Vec::new(),
        };
    };

    let normalized: String = text
        .replace("\r\n", "\n")
        .chars()
        .map(|c| if c == STASH_OPEN || c == STASH_CLOSE { '\u{FFFD}' } else { c })
        .collect();
    let escaped = escape_html(&normalized);

    let mut blocks: Vec<String> = Vec::new();
    let mut code_blocks: Vec<String> = Vec::new();
    let with_fences = p.fence.replace_all(&escaped, |caps: &Captures| {
        let lang = caps.get(1).map_or("", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str()).trim();
        let block_id = format!("{}-{}", id_prefix, code_blocks.len());
        code_blocks.push(unescape_html(body));
        let label = if lang.is_empty() { "text" } else { lang };
        blocks.push(code_block_markup(label, Some(lang), body, &block_id));
        format!("\n{}b{}{}\n", STASH_OPEN, blocks.len() - 1, STASH_CLOSE)
    });

    let mut inline: Vec<String> = Vec::new();
    let with_inline = p.inline_code.replace_all(&with_fences, |caps: &Captures| {
        let code = caps.get(1).map_or("", |m| m.as_str());
        inline.push(format!(r#"<code class="inline-code">{}</code>"#, code));
        format!("{}i{}{}", STASH_OPEN, inline.len() - 1, STASH_CLOSE)
    });

    let mut out: Vec<String> = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    for line in with_inline.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(&mut paragraph, &mut out);
        } else if p.block_placeholder.is_match(trimmed) {
            flush(&mut paragraph, &mut out);
            out.push(trimmed.to_string());
        } else if let Some(caps) = p.heading.captures(line) {
            flush(&mut paragraph, &mut out);
            let level = caps.get(1).map_or(1, |m| m.as_str().len());
            let title = caps.get(2).map_or("", |m| m.as_str()).trim();
            out.push(format!(r#"<h{0} class="md-heading">{1}</h{0}>"#, level, title));
        } else if let Some(caps) = p.list_item.captures(line) {
            flush(&mut paragraph, &mut out);
            let marker = caps.get(1).map_or("-", |m| m.as_str());
            let class = if marker == "-" { "unordered" } else { "ordered" };
            let item = caps.get(2).map_or("", |m| m.as_str()).trim();
            out.push(format!(r#"<li class="{}">{}</li>"#, class, item));
        } else {
            paragraph.push(trimmed);
        }
    }
    flush(&mut paragraph, &mut out);

    let joined = out.join("\n");
    let html = p
        .placeholder
        .replace_all(&joined, |caps: &Captures| {
            let index: usize = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(usize::MAX);
            let stash = if caps.get(1).map(|m| m.as_str()) == Some("b") {
                &blocks
            } else {
                &inline
            };
            stash.get(index).cloned().unwrap_or_default()
        })
        .into_owned();

    Formatted { html, code_blocks }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html(text: &str) -> String {
        format_text(text, "t").html
    }

    #[test]
    fn test_heading_followed_by_paragraph() {
        assert_eq!(
            html("### Title\ntext"),
            "<h3 class=\"md-heading\">Title</h3>\n<p>text</p>"
        );
    }

    #[test]
    fn test_heading_levels() {
        assert!(html("# One").starts_with("<h1 class=\"md-heading\">One</h1>"));
        assert!(html("###### Six").starts_with("<h6 class=\"md-heading\">Six</h6>"));
        // seven hashes is not a heading
        assert_eq!(html("####### Seven"), "<p>####### Seven</p>");
    }

    #[test]
    fn test_list_items() {
        assert_eq!(
            html("1. first\n2. second\n- loose"),
            concat!(
                "<li class=\"ordered\">first</li>\n",
                "<li class=\"ordered\">second</li>\n",
                "<li class=\"unordered\">loose</li>"
            )
        );
    }

    #[test]
    fn test_paragraphs_and_line_breaks() {
        assert_eq!(
            html("line one\nline two\n\nnext block"),
            "<p>line one<br>line two</p>\n<p>next block</p>"
        );
    }

    #[test]
    fn test_inline_code_is_escaped_and_not_reprocessed() {
        assert_eq!(
            html("use `<T> & # x` here"),
            "<p>use <code class=\"inline-code\">&lt;T&gt; &amp; # x</code> here</p>"
        );
    }

    #[test]
    fn test_fence_fallback_inside_text() {
        let formatted = format_text("before\n```rust\nlet a = 1 < 2;\n# not heading\n```\nafter", "s0");
        assert_eq!(formatted.code_blocks, vec!["let a = 1 < 2;\n# not heading".to_string()]);
        assert!(formatted.html.starts_with("<p>before</p>\n<div class=\"code-block\" data-code-block=\"s0-0\">"));
        assert!(formatted.html.contains("<span class=\"code-lang\">rust</span>"));
        assert!(formatted.html.contains("<code class=\"language-rust\">let a = 1 &lt; 2;\n# not heading</code>"));
        assert!(!formatted.html.contains("md-heading"));
        assert!(formatted.html.ends_with("</div>\n<p>after</p>"));
    }

    #[test]
    fn test_untagged_fence_label_is_text() {
        let formatted = html("```\nplain\n```");
        assert!(formatted.contains("<span class=\"code-lang\">text</span>"));
        assert!(formatted.contains("<pre><code>plain</code></pre>"));
    }

    #[test]
    fn test_no_raw_markup_leaks() {
        let input = "# <img src=x onerror=alert(1)>\n- <script>a && b</script>\n1 > 0 & `<b>`\n\n<i>x</i>";
        let out = html(input);
        let generated = Regex::new(r#"</?(p|br|h[1-6]|li|code)( class="[a-z-]+")?>"#).unwrap();
        let stripped = generated.replace_all(&out, "");
        assert!(!stripped.contains('<'), "{}", stripped);
        assert!(!stripped.contains('>'), "{}", stripped);
        let entity = Regex::new(r"&(amp|lt|gt);").unwrap();
        assert!(!entity.replace_all(&stripped, "").contains('&'));
    }

    #[test]
    fn test_placeholder_chars_in_input_are_neutralised() {
        let out = html("odd \u{E000}b0\u{E001} text");
        assert_eq!(out, "<p>odd \u{FFFD}b0\u{FFFD} text</p>");
    }

    #[test]
    fn test_unescape_round_trip() {
        let raw = "a < b && c > \"d\" &amp;";
        assert_eq!(unescape_html(&escape_html(raw)), raw);
        assert_eq!(unescape_html(&escape_attr(raw)), raw);
        assert_eq!(unescape_html("&#123;&#x7D; &unknown; & alone"), "{} &unknown; & alone");
    }
}
