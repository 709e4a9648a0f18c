//! Small utilities over `scraper` nodes.
//!
//! Saved chat pages are snapshots of heavily obfuscated SPAs, so almost every
//! query in this crate runs through a fallback list of selectors rather than a
//! single one. The helpers here keep that pattern short at the call sites.

use scraper::{ElementRef, Html, Selector};

/// Parse a selector, ignoring ones that do not compile.
///
/// Selector tables mix stable attributes with guesses about generated class
/// names; a bad entry should cost nothing beyond a debug log.
pub fn selector(s: &str) -> Option<Selector> {
    match Selector::parse(s) {
        Ok(sel) => Some(sel),
        Err(err) => {
            tracing::debug!(selector = s, error = %err, "skipping unparsable selector");
            None
        }
    }
}

/// First element matching any selector in `cascade`, in cascade order.
pub fn select_first<'a>(doc: &'a Html, cascade: &[&str]) -> Option<ElementRef<'a>> {
    for s in cascade {
        if let Some(sel) = selector(s)
            && let Some(el) = doc.select(&sel).next()
        {
            return Some(el);
        }
    }
    None
}

/// Concatenated text of all descendant text nodes, whitespace untouched.
pub fn text_content(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

/// Trimmed text content in one call.
pub fn text_of(el: ElementRef<'_>) -> String {
    text_content(el).trim().to_string()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// True when `node` sits inside `ancestor` (strict: a node does not contain
/// itself).
pub fn is_descendant_of(node: ElementRef<'_>, ancestor: ElementRef<'_>) -> bool {
    node.ancestors().any(|n| n.id() == ancestor.id())
}

/// Nearest ancestor (the element itself included) matching `sel`.
pub fn closest<'a>(el: ElementRef<'a>, sel: &Selector) -> Option<ElementRef<'a>> {
    if sel.matches(&el) {
        return Some(el);
    }
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|anc| sel.matches(anc))
}

/// Direct element children, text and comment nodes skipped.
pub fn child_elements<'a>(
    el: ElementRef<'a>,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    el.children().filter_map(ElementRef::wrap)
}

/// Case-insensitive substring test against an attribute value.
pub fn attr_contains(el: ElementRef<'_>, attr: &str, needle: &str) -> bool {
    el.value()
        .attr(attr)
        .is_some_and(|v| v.to_lowercase().contains(needle))
}

/// The element's `class` attribute, lowercased, empty when absent.
pub fn class_text(el: ElementRef<'_>) -> String {
    el.value().attr("class").unwrap_or("").to_lowercase()
}

/// Whether any descendant matches `sel`.
pub fn has_descendant(el: ElementRef<'_>, sel: &Selector) -> bool {
    el.select(sel).next().is_some()
}
