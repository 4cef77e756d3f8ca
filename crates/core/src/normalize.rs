// ABOUTME: Reduces raw HTML to canonical visible text for fingerprinting.
// ABOUTME: Drops script/style/hidden subtrees and comments, then collapses whitespace.

use ego_tree::NodeRef;
use scraper::{Html, Node};

/// Elements whose whole subtree never contributes visible text.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "iframe", "template", "svg"];

/// Normalizes an HTML document (or fragment) to its visible text.
///
/// Text nodes are concatenated in document order, every whitespace run is
/// collapsed to a single space and the result is trimmed. The parser
/// recovers from any input, so this never fails: plain text comes back as
/// itself with whitespace collapsed.
pub fn normalize(raw_html: &str) -> String {
    let document = Html::parse_document(raw_html);
    let mut text = String::with_capacity(raw_html.len() / 2);
    collect_text(document.tree.root(), &mut text);
    collapse_whitespace(&text)
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(element) => {
            if is_skipped(element) {
                return;
            }
            for child in node.children() {
                collect_text(child, out);
            }
        }
        Node::Document | Node::Fragment => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
        // comments, doctype, processing instructions
        _ => {}
    }
}

fn is_skipped(element: &scraper::node::Element) -> bool {
    SKIPPED_TAGS.contains(&element.name()) || element.attr("hidden").is_some()
}

/// Collapses multiple whitespace characters into single spaces and trims.
pub fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut last_was_space = false;

    for c in s.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                result.push(' ');
                last_was_space = true;
            }
        } else {
            result.push(c);
            last_was_space = false;
        }
    }

    result.trim().to_string()
}
