//! HTML backend abstraction for link rewriting
//!
//! The rewriter only needs to find elements by tag, read an attribute and
//! replace its value. [`SourceDocument`] tokenizes the fetched bytes with
//! `lol_html`, whose streaming rewriter copies every untouched token through
//! verbatim. A DOM round-trip through an HTML serializer would not.

use std::collections::BTreeMap;

use lol_html::{HtmlRewriter, Settings, element};

/// Handle to an element inside a [`Document`]
///
/// Handles compare in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Trait representing a parsed page whose attribute values can be edited
///
/// Implementations must keep the document structure fixed: only attribute
/// values change, and [`Document::to_bytes`] reproduces the input exactly
/// when nothing was set.
pub trait Document {
    /// All elements with the given tag name, in document order
    ///
    /// Tag names are matched case-insensitively.
    fn select(&self, tag: &str) -> Vec<NodeId>;

    /// Get the (entity-decoded) value of an attribute
    ///
    /// Returns `None` if the attribute doesn't exist.
    fn attr(&self, node: NodeId, name: &str) -> Option<&str>;

    /// Replace the value of an existing attribute
    ///
    /// Returns `false` if the attribute doesn't exist.
    fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> bool;

    /// Serialize the document with all replacements applied
    fn to_bytes(&self) -> Vec<u8>;
}

#[derive(Debug)]
struct Element {
    tag: String,
    /// Attribute names (lowercase) with entity-decoded values
    attrs: Vec<(String, String)>,
}

/// Byte-preserving HTML document
///
/// Elements are numbered in the order the tokenizer reports their start
/// tags. Serializing replays the same tokenization and rewrites the start
/// tags of edited elements only; comments, raw text such as `<script>`
/// bodies and every other byte pass through as they were.
#[derive(Debug)]
pub struct SourceDocument {
    source: Vec<u8>,
    elements: Vec<Element>,
    /// Pending replacements: element index to (attribute, encoded value)
    edits: BTreeMap<usize, Vec<(String, String)>>,
}

impl SourceDocument {
    /// Parse a page body
    ///
    /// A body the tokenizer gives up on is kept as an opaque document with no
    /// elements, so it is stored verbatim.
    pub fn parse(source: impl Into<Vec<u8>>) -> Self {
        let source = source.into();
        let elements = match scan(&source) {
            Ok(elements) => elements,
            Err(error) => {
                tracing::warn!(%error, "Unparseable HTML, links left as they are");
                Vec::new()
            }
        };
        Self {
            source,
            elements,
            edits: BTreeMap::new(),
        }
    }

    /// Original bytes, without replacements
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Text of the first `<title>` element, whitespace collapsed
    pub fn title(&self) -> Option<String> {
        let html = scraper::Html::parse_document(&String::from_utf8_lossy(&self.source));
        let selector = scraper::Selector::parse("title").ok()?;
        let text: String = html.select(&selector).next()?.text().collect();
        let title = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!title.is_empty()).then_some(title)
    }
}

impl Document for SourceDocument {
    fn select(&self, tag: &str) -> Vec<NodeId> {
        let tag = tag.to_ascii_lowercase();
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, element)| element.tag == tag)
            .map(|(index, _)| NodeId(index))
            .collect()
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.elements
            .get(node.0)?
            .attrs
            .iter()
            .find(|(attr, _)| attr.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> bool {
        let Some((attr, current)) = self
            .elements
            .get_mut(node.0)
            .and_then(|element| element.attrs.iter_mut().find(|(a, _)| a.eq_ignore_ascii_case(name)))
        else {
            return false;
        };

        *current = value.to_string();
        let encoded = html_escape::encode_double_quoted_attribute(value).into_owned();
        let edits = self.edits.entry(node.0).or_default();
        match edits.iter_mut().find(|(a, _)| a == attr) {
            Some((_, pending)) => *pending = encoded,
            None => edits.push((attr.clone(), encoded)),
        }
        true
    }

    fn to_bytes(&self) -> Vec<u8> {
        if self.edits.is_empty() {
            return self.source.clone();
        }
        match replay(&self.source, &self.edits) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(%error, "Failed to serialize rewritten HTML, keeping original");
                self.source.clone()
            }
        }
    }
}

/// Collect every start tag with its decoded attributes
fn scan(source: &[u8]) -> Result<Vec<Element>, lol_html::errors::RewritingError> {
    let mut elements = Vec::new();
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("*", |el| {
                elements.push(Element {
                    tag: el.tag_name().to_ascii_lowercase(),
                    attrs: el
                        .attributes()
                        .iter()
                        .map(|attr| {
                            let value = html_escape::decode_html_entities(&attr.value()).into_owned();
                            (attr.name().to_ascii_lowercase(), value)
                        })
                        .collect(),
                });
                Ok(())
            })],
            ..Settings::default()
        },
        |_: &[u8]| {},
    );
    rewriter.write(source)?;
    rewriter.end()?;
    Ok(elements)
}

/// Tokenize `source` again, applying `edits` to the start tags they target
fn replay(
    source: &[u8],
    edits: &BTreeMap<usize, Vec<(String, String)>>,
) -> Result<Vec<u8>, lol_html::errors::RewritingError> {
    let mut out = Vec::with_capacity(source.len());
    let mut index = 0usize;
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("*", |el| {
                if let Some(attrs) = edits.get(&index) {
                    for (name, value) in attrs {
                        el.set_attribute(name, value)?;
                    }
                }
                index += 1;
                Ok(())
            })],
            ..Settings::default()
        },
        |chunk: &[u8]| out.extend_from_slice(chunk),
    );
    rewriter.write(source)?;
    rewriter.end()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untouched_document_is_identical() {
        let html = b"<!DOCTYPE html>\n<HTML><body><A HREF='x.html' class=nav>x</A>\n</body></HTML>";
        let document = SourceDocument::parse(html.to_vec());
        assert_eq!(document.to_bytes(), html.to_vec());
    }

    #[test]
    fn test_set_attr_rewrites_only_the_edited_tag() {
        let html = "<p>keep   this</p><a class=\"x\" href=\"/a/\">a</a><a   href='/b/'>b</a>";
        let mut document = SourceDocument::parse(html);
        let anchor = document.select("a")[0];
        assert!(document.set_attr(anchor, "href", "a/index.html"));
        assert!(!document.set_attr(anchor, "src", "x"));
        assert_eq!(
            String::from_utf8(document.to_bytes()).unwrap(),
            "<p>keep   this</p><a class=\"x\" href=\"a/index.html\">a</a><a   href='/b/'>b</a>"
        );
    }

    #[test]
    fn test_unquoted_values() {
        let document = SourceDocument::parse("<img src=/logo.png alt=logo>");
        let img = document.select("img")[0];
        assert_eq!(document.attr(img, "src"), Some("/logo.png"));
        assert_eq!(document.attr(img, "alt"), Some("logo"));
    }

    #[test]
    fn test_comments_and_scripts_are_skipped() {
        let html = r#"<!-- <a href="/hidden/"> --><script>var s = '<a href="/js/">';</script><a href="/real/">r</a>"#;
        let document = SourceDocument::parse(html);
        let anchors = document.select("a");
        assert_eq!(anchors.len(), 1);
        assert_eq!(document.attr(anchors[0], "href"), Some("/real/"));
        assert_eq!(document.select("script").len(), 1);
    }

    #[test]
    fn test_entities_are_decoded_and_reencoded() {
        let mut document = SourceDocument::parse(r#"<a href="/list?a=1&amp;b=2">l</a>"#);
        let anchor = document.select("a")[0];
        assert_eq!(document.attr(anchor, "href"), Some("/list?a=1&b=2"));

        document.set_attr(anchor, "href", "https://example.com/list?a=1&b=2");
        assert_eq!(
            String::from_utf8(document.to_bytes()).unwrap(),
            r#"<a href="https://example.com/list?a=1&amp;b=2">l</a>"#
        );
    }

    #[test]
    fn test_named_and_numeric_entities_are_decoded() {
        let document = SourceDocument::parse(r#"<a href="/blog/&#x2f;b&sol;c/">x</a><a title="AT&T &copy; &#47;">y</a>"#);
        let anchors = document.select("a");
        assert_eq!(document.attr(anchors[0], "href"), Some("/blog//b/c/"));
        assert_eq!(document.attr(anchors[1], "title"), Some("AT&T \u{a9} /"));
    }

    #[test]
    fn test_later_set_attr_wins() {
        let mut document = SourceDocument::parse(r#"<base href="https://example.com/">"#);
        let base = document.select("base")[0];
        document.set_attr(base, "href", "first");
        document.set_attr(base, "HREF", "./");
        assert_eq!(document.attr(base, "href"), Some("./"));
        assert_eq!(String::from_utf8(document.to_bytes()).unwrap(), r#"<base href="./">"#);
    }

    #[test]
    fn test_title() {
        let document = SourceDocument::parse("<html><head><title>\n  My   Blog </title></head></html>");
        assert_eq!(document.title().as_deref(), Some("My Blog"));
        assert_eq!(SourceDocument::parse("<p>no title</p>").title(), None);
    }

    #[test]
    fn test_non_utf8_bytes_are_preserved() {
        let html = b"<p>caf\xe9</p><a href=\"/x/\">x</a>".to_vec();
        let mut document = SourceDocument::parse(html);
        let anchor = document.select("a")[0];
        document.set_attr(anchor, "href", "x/index.html");
        assert_eq!(document.to_bytes(), b"<p>caf\xe9</p><a href=\"x/index.html\">x</a>".to_vec());
    }
}
