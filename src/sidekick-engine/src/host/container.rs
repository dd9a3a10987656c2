//! Injected UI subtrees.

use html_escape::encode_text;

use super::{ElementSpec, HostDocument, NodeId};
use crate::render::loading_markup;

/// Invisible marker that records where the container belongs.
pub const ANCHOR_ID: &str = "sidekick-enhance-anchor";
pub const CONTAINER_ID: &str = "sidekick-enhance";
pub const TITLE_ID: &str = "sidekick-enhance-title";
/// Dismiss control.
pub const CLOSE_ID: &str = "sidekick-enhance-close";
/// Element the answer markup is written into.
pub const CONTENT_ID: &str = "sidekick-enhance-content";

/// Builds the visible container.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    title: String,
    content: String,
}

impl ContainerBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: loading_markup(),
        }
    }

    /// Initial markup of the content element.
    pub fn with_content(mut self, markup: impl Into<String>) -> Self {
        self.content = markup.into();
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn anchor_spec() -> ElementSpec {
        ElementSpec::new("div").id(ANCHOR_ID).hidden()
    }

    pub fn spec(&self) -> ElementSpec {
        let header = ElementSpec::new("div")
            .class("sidekick-enhance-header")
            .child(
                ElementSpec::new("span")
                    .id(TITLE_ID)
                    .markup(encode_text(&self.title).into_owned()),
            )
            .child(ElementSpec::new("button").id(CLOSE_ID).markup("&times;"));

        ElementSpec::new("div")
            .id(CONTAINER_ID)
            .class("sidekick-enhance")
            .child(header)
            .child(
                ElementSpec::new("div")
                    .id(CONTENT_ID)
                    .class("sidekick-enhance-content")
                    .markup(self.content.clone()),
            )
    }

    /// Create a detached container in `doc`.
    pub fn build(&self, doc: &dyn HostDocument) -> NodeId {
        doc.create(&self.spec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryDocument;
    use crate::render::LOADING_TEXT;

    #[test]
    fn test_container_layout() {
        let doc = MemoryDocument::new("https://example.com");
        let container = ContainerBuilder::new("Search <Helper>").build(&doc);
        doc.insert_first_child(doc.body(), container).expect("insert");

        let title = doc.find_by_id(TITLE_ID).expect("title");
        assert_eq!(doc.markup(title), "Search &lt;Helper&gt;");
        assert!(doc.find_by_id(CLOSE_ID).is_some());

        let content = doc.find_by_id(CONTENT_ID).expect("content");
        assert!(doc.contains(container, content));
        assert!(doc.markup(content).contains(LOADING_TEXT));
    }

    #[test]
    fn test_anchor_is_hidden() {
        let spec = ContainerBuilder::anchor_spec();
        assert!(spec.hidden);
        assert_eq!(spec.id.as_deref(), Some(ANCHOR_ID));
        assert!(spec.children.is_empty());
    }
}
