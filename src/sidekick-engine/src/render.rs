//! Markup produced for the injected container.
//!
//! The engine never interprets markdown itself; it hands the full answer to a
//! [`Renderer`] and writes back whatever markup comes out.

use html_escape::encode_text;
use pulldown_cmark::{Event, Options, Parser, html};

/// Marker appended to an answer the user stopped.
pub const STOPPED_MARKER: &str = "[stopped]";

/// Text shown while the first fragment is outstanding.
pub const LOADING_TEXT: &str = "Analyzing search results...";

/// `render(markdown) -> markup`. Must be pure: the same input always yields
/// the same output, since it is called again with the whole answer on every
/// fragment.
pub trait Renderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}

/// GitHub-flavoured markdown with single newlines kept as line breaks.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    fn options() -> Options {
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
    }
}

impl Renderer for MarkdownRenderer {
    fn render(&self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, Self::options()).map(|event| match event {
            Event::SoftBreak => Event::HardBreak,
            other => other,
        });
        let mut out = String::with_capacity(markdown.len() + markdown.len() / 2);
        html::push_html(&mut out, parser);
        out
    }
}

pub fn loading_markup() -> String {
    format!("<div class=\"sidekick-loading\">{LOADING_TEXT}</div>")
}

/// Rendered answer followed by the stopped marker.
pub fn stopped_markup(rendered: &str) -> String {
    format!("{rendered}<p class=\"sidekick-stopped\">{STOPPED_MARKER}</p>")
}

pub fn error_markup(message: &str) -> String {
    format!(
        "<div class=\"sidekick-error\">{}</div>",
        encode_text(message)
    )
}

/// Follow-up question list appended under a finished answer.
pub fn suggestions_markup(questions: &[String]) -> String {
    if questions.is_empty() {
        return String::new();
    }
    let items: String = questions
        .iter()
        .map(|q| format!("<li class=\"sidekick-suggestion\">{}</li>", encode_text(q)))
        .collect();
    format!("<ul class=\"sidekick-suggestions\">{items}</ul>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_basics() {
        let html = MarkdownRenderer.render("**bold** and ~~gone~~");
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("<del>gone</del>"));
    }

    #[test]
    fn test_soft_breaks_become_hard_breaks() {
        let html = MarkdownRenderer.render("line one\nline two");
        assert!(html.contains("line one<br />"));
    }

    #[test]
    fn test_tables() {
        let html = MarkdownRenderer.render("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
        assert!(html.contains("<td>1</td>"));
    }

    #[test]
    fn test_render_is_repeatable() {
        let text = "# Title\n\n- one\n- two";
        assert_eq!(MarkdownRenderer.render(text), MarkdownRenderer.render(text));
    }

    #[test]
    fn test_error_and_suggestions_are_escaped() {
        assert_eq!(
            error_markup("<b>boom</b>"),
            "<div class=\"sidekick-error\">&lt;b&gt;boom&lt;/b&gt;</div>"
        );
        let list = suggestions_markup(&["a < b?".to_string()]);
        assert!(list.contains("a &lt; b?"));
        assert!(suggestions_markup(&[]).is_empty());
    }

    #[test]
    fn test_stopped_markup_keeps_answer() {
        let markup = stopped_markup("<p>half</p>");
        assert!(markup.starts_with("<p>half</p>"));
        assert!(markup.contains(STOPPED_MARKER));
    }
}
