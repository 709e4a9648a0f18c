//! Selector cascades for locating messages inside a saved chat page.
//!
//! Each platform gets an ordered table of strategies. The first strategy whose
//! selector matches anything wins; when the whole table misses, a conversation
//! container is located instead and its direct children become the candidates.
//! Strategy order encodes trust: stable data attributes first, generated class
//! name guesses last.

use scraper::{ElementRef, Html};

use crate::dom;
use crate::transcript::Platform;

/// One entry in a message-container cascade.
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub selector: &'static str,
    /// Drop matches that sit inside another match of the same selector.
    /// Needed for class-substring selectors that hit whole subtrees.
    pub top_level_only: bool,
}

const fn strategy(name: &'static str, selector: &'static str) -> Strategy {
    Strategy {
        name,
        selector,
        top_level_only: false,
    }
}

const CHATGPT_MESSAGES: &[Strategy] = &[
    strategy("author-role", r#"div[data-message-author-role]"#),
    strategy("turn-testid", r#"div[data-testid*="conversation-turn"]"#),
    strategy("message-testid", r#"div[data-testid*="message"]"#),
    strategy("article", "article"),
    strategy("group-class", r#"div[class*="group"]"#),
];

const GEMINI_MESSAGES: &[Strategy] = &[
    strategy("turn-testid", r#"[data-test-id="conversation-turn"]"#),
    strategy("turn-class", r#"[class*="conversation-turn"]"#),
    strategy("model-response", "model-response"),
    strategy("presentation-child", r#"[role="presentation"] > div"#),
    strategy("container-child", ".conversation-container > div"),
    strategy("message-class", r#"[class*="message"]"#),
    Strategy {
        name: "top-level-turn",
        selector: r#"div[class*="turn"]"#,
        top_level_only: true,
    },
];

/// Containers probed when no message strategy matches at all.
const CONTAINER_FALLBACK: &[&str] = &[
    r#"[role="main"]"#,
    "main",
    ".conversation",
    r#"[class*="conversation"]"#,
    r#"[class*="chat"]"#,
];

/// Content containers probed inside a message element, most specific first.
const MESSAGE_CONTENT: &[&str] = &[
    ".markdown",
    ".prose",
    ".whitespace-pre-wrap",
    "[data-message-content]",
    r#"div[class*="message-content"]"#,
];

pub fn message_strategies(platform: Platform) -> &'static [Strategy] {
    match platform {
        Platform::ChatGpt => CHATGPT_MESSAGES,
        Platform::Gemini => GEMINI_MESSAGES,
    }
}

/// The raw candidate elements one strategy produced, before validity filtering.
#[derive(Debug)]
pub struct CandidateSet<'a> {
    pub elements: Vec<ElementRef<'a>>,
    pub strategy: &'static str,
    pub selector: String,
    /// Trait-based score of the winning selector, not a calibrated probability.
    pub confidence: f32,
    pub via_container_fallback: bool,
}

/// Run the message cascade for `platform` over a parsed page.
pub fn message_candidates<'a>(doc: &'a Html, platform: Platform) -> Option<CandidateSet<'a>> {
    for strat in message_strategies(platform) {
        let Some(sel) = dom::selector(strat.selector) else {
            continue;
        };
        let mut found: Vec<ElementRef<'a>> = doc.select(&sel).collect();
        if strat.top_level_only {
            found.retain(|el| {
                !el.ancestors()
                    .filter_map(ElementRef::wrap)
                    .any(|anc| sel.matches(&anc))
            });
        }
        if found.is_empty() {
            tracing::debug!(strategy = strat.name, selector = strat.selector, "no match");
            continue;
        }
        tracing::debug!(
            strategy = strat.name,
            selector = strat.selector,
            count = found.len(),
            "using selector"
        );
        let confidence = selector_confidence(strat.selector, found.len());
        return Some(CandidateSet {
            elements: found,
            strategy: strat.name,
            selector: strat.selector.to_string(),
            confidence,
            via_container_fallback: false,
        });
    }

    container_fallback(doc)
}

/// Last resort: find a conversation container and treat its direct `div` and
/// `article` children as message candidates.
fn container_fallback<'a>(doc: &'a Html) -> Option<CandidateSet<'a>> {
    for container_sel in CONTAINER_FALLBACK {
        let Some(sel) = dom::selector(container_sel) else {
            continue;
        };
        let Some(container) = doc.select(&sel).next() else {
            continue;
        };
        let children: Vec<ElementRef<'a>> = dom::child_elements(container)
            .filter(|el| matches!(el.value().name(), "div" | "article"))
            .collect();
        if children.is_empty() {
            continue;
        }
        tracing::warn!(
            container = container_sel,
            count = children.len(),
            "message selectors all missed, using container children"
        );
        return Some(CandidateSet {
            elements: children,
            strategy: "container-children",
            selector: (*container_sel).to_string(),
            confidence: 0.6,
            via_container_fallback: true,
        });
    }
    None
}

/// Content element for one message: first hit from the content cascade, the
/// message element itself when nothing matches.
pub fn content_element<'a>(message: ElementRef<'a>) -> ElementRef<'a> {
    for s in MESSAGE_CONTENT {
        if let Some(sel) = dom::selector(s)
            && let Some(found) = message.select(&sel).next()
        {
            return found;
        }
    }
    message
}

/// Trait-based reliability score for a selector that matched `count` elements.
///
/// Data attributes survive UI redesigns, generated utility classes do not; the
/// weights reward the former and punish the latter. Scores only annotate logs
/// and the analyze report.
pub fn selector_confidence(selector: &str, count: usize) -> f32 {
    if count == 0 {
        return 0.0;
    }
    let mut score = 0.5_f32;
    if selector.contains("[data-") {
        score += 0.3;
    }
    if selector.contains("[role=") {
        score += 0.2;
    }
    if selector.contains("[aria-") {
        score += 0.15;
    }
    if selector.contains('.') && !selector.contains('[') {
        score -= 0.2;
    }
    if ["div", "span", ".text-base"]
        .iter()
        .any(|generic| selector.contains(generic))
    {
        score -= 0.1;
    }
    if count < 1000 {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chatgpt_prefers_author_role() {
        let doc = Html::parse_document(
            r#"<html><body>
                <div data-message-author-role="user">hello there</div>
                <div data-message-author-role="assistant">hi, how can I help</div>
                <article>should not win</article>
            </body></html>"#,
        );
        let set = message_candidates(&doc, Platform::ChatGpt).unwrap();
        assert_eq!(set.strategy, "author-role");
        assert_eq!(set.elements.len(), 2);
        assert!(!set.via_container_fallback);
    }

    #[test]
    fn chatgpt_falls_through_to_articles() {
        let doc = Html::parse_document(
            r#"<html><body>
                <article>first message body text</article>
                <article>second message body text</article>
            </body></html>"#,
        );
        let set = message_candidates(&doc, Platform::ChatGpt).unwrap();
        assert_eq!(set.strategy, "article");
        assert_eq!(set.elements.len(), 2);
    }

    #[test]
    fn gemini_top_level_turns_skip_nested() {
        let doc = Html::parse_document(
            r#"<html><body>
                <div class="chat-turn-outer"><div class="inner-turn">nested</div></div>
                <div class="chat-turn-outer">second</div>
            </body></html>"#,
        );
        let set = message_candidates(&doc, Platform::Gemini).unwrap();
        assert_eq!(set.strategy, "top-level-turn");
        assert_eq!(set.elements.len(), 2);
    }

    #[test]
    fn container_children_when_everything_misses() {
        let doc = Html::parse_document(
            r#"<html><body>
                <main>
                    <div>one candidate</div>
                    <div>two candidate</div>
                    <span>not a candidate</span>
                </main>
            </body></html>"#,
        );
        let set = message_candidates(&doc, Platform::ChatGpt).unwrap();
        assert_eq!(set.strategy, "container-children");
        assert!(set.via_container_fallback);
        assert_eq!(set.elements.len(), 2);
    }

    #[test]
    fn no_candidates_on_empty_page() {
        let doc = Html::parse_document("<html><body><p>nothing here</p></body></html>");
        assert!(message_candidates(&doc, Platform::ChatGpt).is_none());
    }

    #[test]
    fn content_element_prefers_markdown_container() {
        let doc = Html::parse_document(
            r#"<html><body>
                <div data-message-author-role="assistant">
                    <div class="toolbar">copy</div>
                    <div class="markdown">the actual content</div>
                </div>
            </body></html>"#,
        );
        let set = message_candidates(&doc, Platform::ChatGpt).unwrap();
        let content = content_element(set.elements[0]);
        assert_eq!(dom::text_of(content), "the actual content");
    }

    #[test]
    fn confidence_rewards_data_attributes() {
        let with_data = selector_confidence(r#"div[data-message-author-role]"#, 4);
        let class_only = selector_confidence(".text-base", 4);
        assert!(with_data > class_only);
        assert!((with_data - 0.8).abs() < 1e-6);
        assert!((class_only - 0.3).abs() < 1e-6);
    }

    #[test]
    fn confidence_zero_without_matches() {
        assert_eq!(selector_confidence("article", 0), 0.0);
    }
}
