//! Conversation-level metadata mined from the page.
//!
//! Saved pages rarely say outright which product they came from or what the
//! conversation was called, so everything here is cascade-and-stoplist work:
//! try the specific places first, reject placeholder values, fall back to a
//! platform default.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use url::Url;

use crate::dom;
use crate::transcript::{Platform, TranscriptMeta};

static CONVERSATION_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:c|app)/([a-zA-Z0-9-]+)").unwrap());

const TITLE_SELECTORS: &[&str] = &[
    "h1",
    r#"[class*="conversation-title"]"#,
    r#"[data-testid*="conversation-title"]"#,
    r#"[aria-label*="conversation"]"#,
    "title",
];

const SOURCE_URL_SELECTORS: &[(&str, &str)] = &[
    (r#"link[rel="canonical"]"#, "href"),
    (r#"meta[property="og:url"]"#, "content"),
    ("base[href]", "href"),
];

const MODEL_NAMES: &[&str] = &["gpt-4", "gpt-3.5", "claude", "dall-e", "gemini"];

/// Decide which platform a page belongs to.
///
/// Precedence: explicit override, then the source URL's host, then DOM
/// markers, then ChatGPT as the default.
pub fn detect_platform(
    doc: &Html,
    explicit: Option<Platform>,
    source_url: Option<&Url>,
) -> Platform {
    if let Some(p) = explicit {
        return p;
    }
    if let Some(host) = source_url.and_then(|u| u.host_str()) {
        let host = host.to_lowercase();
        if host.contains("gemini.google") || host.contains("bard.google") {
            return Platform::Gemini;
        }
        if host.contains("openai") || host.contains("chatgpt") {
            return Platform::ChatGpt;
        }
    }
    if let Some(p) = sniff_platform(doc) {
        return p;
    }
    tracing::debug!("platform not identifiable, assuming ChatGPT");
    Platform::ChatGpt
}

fn sniff_platform(doc: &Html) -> Option<Platform> {
    // Page titles and og:site_name name the product directly.
    let mut names = String::new();
    if let Some(title) = dom::select_first(doc, &["title"]) {
        names.push_str(&dom::text_of(title).to_lowercase());
    }
    if let Some(meta) = dom::select_first(doc, &[r#"meta[property="og:site_name"]"#]) {
        names.push(' ');
        names.push_str(&meta.value().attr("content").unwrap_or("").to_lowercase());
    }
    if names.contains("gemini") || names.contains("bard") {
        return Some(Platform::Gemini);
    }
    if names.contains("chatgpt") || names.contains("openai") {
        return Some(Platform::ChatGpt);
    }

    // Gemini's DOM has markers ChatGPT never renders.
    if dom::select_first(
        doc,
        &[
            "model-response",
            r#"[data-test-id="conversation-turn"]"#,
            ".conversation-container",
        ],
    )
    .is_some()
    {
        return Some(Platform::Gemini);
    }
    None
}

/// Title cascade with per-platform stoplists for placeholder values.
pub fn extract_title(doc: &Html, platform: Platform) -> String {
    for selector in TITLE_SELECTORS {
        let Some(sel) = dom::selector(selector) else {
            continue;
        };
        let Some(el) = doc
            .select(&sel)
            .find(|el| !dom::class_text(*el).contains("hidden"))
        else {
            continue;
        };
        let title = dom::text_of(el);
        if title.is_empty() {
            continue;
        }
        if platform
            .generic_titles()
            .contains(&title.to_lowercase().as_str())
        {
            tracing::debug!(selector, title, "rejecting generic title");
            continue;
        }
        return title;
    }
    platform.default_title()
}

/// Best URL the page itself records for where it was saved from.
pub fn extract_source_url(doc: &Html) -> Option<Url> {
    for (selector, attr) in SOURCE_URL_SELECTORS {
        if let Some(el) = dom::select_first(doc, &[selector])
            && let Some(value) = el.value().attr(attr)
            && let Ok(url) = Url::parse(value)
        {
            return Some(url);
        }
    }
    None
}

/// Conversation id from the URL path (`/c/<id>`, `/app/<id>`) or from data
/// attributes left in the DOM.
pub fn conversation_id(doc: &Html, source_url: Option<&Url>) -> Option<String> {
    if let Some(url) = source_url
        && let Some(caps) = CONVERSATION_PATH_RE.captures(url.path())
    {
        return Some(caps[1].to_string());
    }
    if let Some(el) = dom::select_first(doc, &["[data-conversation-id]"])
        && let Some(id) = el.value().attr("data-conversation-id")
    {
        return Some(id.to_string());
    }
    if let Some(el) = dom::select_first(doc, &[r#"[data-testid*="conversation"]"#])
        && let Some(id) = el.value().attr("data-testid")
    {
        return Some(id.to_string());
    }
    None
}

/// Best-effort model sniff over the page text. Reported, never acted on.
pub fn sniff_model(doc: &Html) -> Option<String> {
    let body = dom::select_first(doc, &["body"])?;
    let text = dom::text_content(body).to_lowercase();
    MODEL_NAMES
        .iter()
        .find(|name| text.contains(**name))
        .map(|name| (*name).to_string())
}

/// All conversation metadata in one pass.
pub fn extract_meta(doc: &Html, platform: Platform, source_override: Option<Url>) -> TranscriptMeta {
    let source_url = source_override.or_else(|| extract_source_url(doc));
    let conversation_id = conversation_id(doc, source_url.as_ref());
    TranscriptMeta {
        title: extract_title(doc, platform),
        source_url,
        conversation_id,
        model: sniff_model(doc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_prefers_h1() {
        let doc = Html::parse_document(
            "<html><head><title>ChatGPT</title></head><body><h1>Rust lifetimes</h1></body></html>",
        );
        assert_eq!(extract_title(&doc, Platform::ChatGpt), "Rust lifetimes");
    }

    #[test]
    fn generic_titles_are_rejected() {
        let doc = Html::parse_document(
            "<html><head><title>Planning a trip</title></head><body><h1>New Chat</h1></body></html>",
        );
        assert_eq!(extract_title(&doc, Platform::ChatGpt), "Planning a trip");
    }

    #[test]
    fn hidden_h1_is_skipped() {
        let doc = Html::parse_document(
            r#"<html><body><h1 class="visually-hidden">skip me</h1><h1>Real title</h1></body></html>"#,
        );
        assert_eq!(extract_title(&doc, Platform::ChatGpt), "Real title");
    }

    #[test]
    fn falls_back_to_platform_default_title() {
        let doc = Html::parse_document("<html><body><p>hello</p></body></html>");
        assert_eq!(
            extract_title(&doc, Platform::Gemini),
            "Conversation with Gemini"
        );
    }

    #[test]
    fn canonical_link_wins_source_url() {
        let doc = Html::parse_document(
            r#"<html><head>
                <link rel="canonical" href="https://chat.openai.com/c/abc-123">
                <meta property="og:url" content="https://example.org/other">
            </head><body></body></html>"#,
        );
        let url = extract_source_url(&doc).unwrap();
        assert_eq!(url.as_str(), "https://chat.openai.com/c/abc-123");
    }

    #[test]
    fn og_url_when_no_canonical() {
        let doc = Html::parse_document(
            r#"<html><head><meta property="og:url" content="https://gemini.google.com/app/deadbeef"></head></html>"#,
        );
        let url = extract_source_url(&doc).unwrap();
        assert_eq!(url.host_str(), Some("gemini.google.com"));
    }

    #[test]
    fn conversation_id_from_url_path() {
        let doc = Html::parse_document("<html></html>");
        let url = Url::parse("https://chat.openai.com/c/abc-123-def").unwrap();
        assert_eq!(
            conversation_id(&doc, Some(&url)),
            Some("abc-123-def".to_string())
        );

        let gemini = Url::parse("https://gemini.google.com/app/51af2e3bc9").unwrap();
        assert_eq!(
            conversation_id(&doc, Some(&gemini)),
            Some("51af2e3bc9".to_string())
        );
    }

    #[test]
    fn conversation_id_from_data_attributes() {
        let doc = Html::parse_document(
            r#"<html><body><div data-conversation-id="xyz-890">m</div></body></html>"#,
        );
        assert_eq!(conversation_id(&doc, None), Some("xyz-890".to_string()));
    }

    #[test]
    fn platform_from_url_host() {
        let doc = Html::parse_document("<html></html>");
        let gemini = Url::parse("https://gemini.google.com/app/x").unwrap();
        assert_eq!(
            detect_platform(&doc, None, Some(&gemini)),
            Platform::Gemini
        );
        let chatgpt = Url::parse("https://chatgpt.com/c/y").unwrap();
        assert_eq!(
            detect_platform(&doc, None, Some(&chatgpt)),
            Platform::ChatGpt
        );
    }

    #[test]
    fn platform_from_dom_markers() {
        let doc = Html::parse_document(
            "<html><body><model-response>hi</model-response></body></html>",
        );
        assert_eq!(detect_platform(&doc, None, None), Platform::Gemini);

        let titled = Html::parse_document(
            "<html><head><title>Trip ideas - Gemini</title></head><body></body></html>",
        );
        assert_eq!(detect_platform(&titled, None, None), Platform::Gemini);
    }

    #[test]
    fn platform_defaults_to_chatgpt() {
        let doc = Html::parse_document("<html><body><p>plain</p></body></html>");
        assert_eq!(detect_platform(&doc, None, None), Platform::ChatGpt);
    }

    #[test]
    fn explicit_platform_overrides_markers() {
        let doc = Html::parse_document(
            "<html><body><model-response>hi</model-response></body></html>",
        );
        assert_eq!(
            detect_platform(&doc, Some(Platform::ChatGpt), None),
            Platform::ChatGpt
        );
    }

    #[test]
    fn model_sniffing() {
        let doc = Html::parse_document(
            "<html><body><div>Model: GPT-4 Turbo</div></body></html>",
        );
        assert_eq!(sniff_model(&doc), Some("gpt-4".to_string()));

        let none = Html::parse_document("<html><body><p>no names</p></body></html>");
        assert_eq!(sniff_model(&none), None);
    }
}
